pub mod enforcer;
pub mod validator;

pub use enforcer::{GroupingRule, PolicyEnforcer, PolicyField, PolicyRule};
pub use validator::{validate, MissingPolicyError, PolicyValidationReport, SummaryStats};

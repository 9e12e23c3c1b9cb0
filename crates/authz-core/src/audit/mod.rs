pub mod records;
pub mod sink;

pub use records::{Decision, DecisionRecord, DecisionRecordBuilder};
pub use sink::{AuditSink, AuditSinkConfig};

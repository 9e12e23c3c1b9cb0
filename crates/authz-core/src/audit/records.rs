//! `DecisionRecord`: the append-only unit the audit sink persists.
//! Constructed only through [`DecisionRecord::builder`], which enforces the
//! value's invariants so no half-built record can reach a
//! [`super::sink::AuditSink`].

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::{AuthzError, AuthzResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Decision {
    Allowed,
    Denied,
    RateLimited,
    Error,
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Decision::Allowed => "ALLOWED",
            Decision::Denied => "DENIED",
            Decision::RateLimited => "RATE_LIMITED",
            Decision::Error => "ERROR",
        };
        f.write_str(s)
    }
}

/// One authorization decision, ready to be written to durable storage.
///
/// Invariants (enforced in [`DecisionRecord::new`], not by callers):
/// - `resource` and `method` are non-empty.
/// - `subject` is non-empty unless `decision` is [`Decision::Error`] made
///   before authentication ran.
/// - `duration_ms` fits a `u32` (requests are not audited in microsecond
///   granularity; anything over ~49 days is a caller bug, not a real
///   latency).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DecisionRecord {
    pub id: Uuid,
    pub occurred_at: DateTime<Utc>,
    pub subject: String,
    pub role: Option<String>,
    pub method: String,
    pub resource: String,
    pub decision: Decision,
    pub reason: String,
    pub request_id: String,
    pub source_ip: Option<String>,
    pub duration_ms: u32,
}

pub struct DecisionRecordBuilder {
    subject: String,
    role: Option<String>,
    method: String,
    resource: String,
    decision: Decision,
    reason: String,
    request_id: String,
    source_ip: Option<String>,
    duration_ms: u32,
}

impl DecisionRecord {
    pub fn builder(method: impl Into<String>, resource: impl Into<String>, decision: Decision) -> DecisionRecordBuilder {
        DecisionRecordBuilder {
            subject: String::new(),
            role: None,
            method: method.into(),
            resource: resource.into(),
            decision,
            reason: String::new(),
            request_id: String::new(),
            source_ip: None,
            duration_ms: 0,
        }
    }
}

impl DecisionRecordBuilder {
    pub fn subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    pub fn role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = request_id.into();
        self
    }

    pub fn source_ip(mut self, source_ip: impl Into<String>) -> Self {
        self.source_ip = Some(source_ip.into());
        self
    }

    pub fn duration_ms(mut self, duration_ms: u32) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    pub fn build(self) -> AuthzResult<DecisionRecord> {
        if self.method.is_empty() {
            return Err(AuthzError::Validation("decision record method must not be empty".to_string()));
        }
        if self.resource.is_empty() {
            return Err(AuthzError::Validation("decision record resource must not be empty".to_string()));
        }
        if self.subject.is_empty() && !matches!(self.decision, Decision::Error | Decision::Denied) {
            return Err(AuthzError::Validation(
                "decision record subject must not be empty unless the decision is ERROR or DENIED".to_string(),
            ));
        }
        Ok(DecisionRecord {
            id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            subject: self.subject,
            role: self.role,
            method: self.method,
            resource: self.resource,
            decision: self.decision,
            reason: self.reason,
            request_id: self.request_id,
            source_ip: self.source_ip,
            duration_ms: self.duration_ms,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_valid_allowed_record() {
        let record = DecisionRecord::builder("GET", "/accounts/:id", Decision::Allowed)
            .subject("user-1")
            .role("staff")
            .request_id("req-1")
            .build()
            .unwrap();
        assert_eq!(record.decision, Decision::Allowed);
        assert_eq!(record.subject, "user-1");
    }

    #[test]
    fn empty_resource_is_rejected() {
        let err = DecisionRecord::builder("GET", "", Decision::Allowed)
            .subject("user-1")
            .build()
            .unwrap_err();
        assert!(matches!(err, AuthzError::Validation(_)));
    }

    #[test]
    fn denied_record_may_omit_subject() {
        let record = DecisionRecord::builder("GET", "/accounts/:id", Decision::Denied)
            .reason("no matching policy")
            .build()
            .unwrap();
        assert_eq!(record.subject, "");
    }

    #[test]
    fn allowed_record_requires_subject() {
        let err = DecisionRecord::builder("GET", "/accounts/:id", Decision::Allowed)
            .build()
            .unwrap_err();
        assert!(matches!(err, AuthzError::Validation(_)));
    }
}

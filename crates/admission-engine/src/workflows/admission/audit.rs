use serde::Serialize;

use super::domain::{AdmissionDecision, QuotaPolicy};
use super::lottery::{LotteryRecord, Supersession};

/// Outbound hook for the audit/notification collaborator.
///
/// Delivery failures are logged by the service and never undo the state change that
/// produced the event.
pub trait AuditPublisher: Send + Sync {
    fn publish(&self, event: AuditEvent) -> Result<(), AuditError>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum AuditEvent {
    Decision(AdmissionDecision),
    Withdrawal(AdmissionDecision),
    LotteryDrawn(LotteryRecord),
    LotterySuperseded(Supersession),
    PolicyReplaced(QuotaPolicy),
}

impl AuditEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            AuditEvent::Decision(_) => "decision",
            AuditEvent::Withdrawal(_) => "withdrawal",
            AuditEvent::LotteryDrawn(_) => "lottery_drawn",
            AuditEvent::LotterySuperseded(_) => "lottery_superseded",
            AuditEvent::PolicyReplaced(_) => "policy_replaced",
        }
    }
}

/// Audit dispatch error.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("audit transport unavailable: {0}")]
    Transport(String),
}

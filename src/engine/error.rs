use crate::models::session::SessionStatus;

/// Typed outcomes of engine operations. Transition and precondition
/// violations travel back to the caller; operational failures (declined
/// charge, missing webhook) are absorbed by the state machines instead and
/// only show up here when a caller invoked the operation directly.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: SessionStatus, to: SessionStatus },

    #[error("time precondition violated: {reason}")]
    PastSchedule { reason: String },

    #[error("session cannot be rescheduled: {reason}")]
    NotReschedulable { reason: String },

    #[error("subscription does not allow this operation: {reason}")]
    SubscriptionUnusable { reason: String },

    #[error("charge failed: {reason}")]
    ChargeFailed { reason: String },

    #[error("not found")]
    NotFound,

    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

impl EngineError {
    /// Stable machine-readable code for HTTP responses.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::InvalidTransition { .. } => "invalid_transition",
            EngineError::PastSchedule { .. } => "past_schedule",
            EngineError::NotReschedulable { .. } => "not_reschedulable",
            EngineError::SubscriptionUnusable { .. } => "subscription_unusable",
            EngineError::ChargeFailed { .. } => "charge_failed",
            EngineError::NotFound => "not_found",
            EngineError::Db(_) => "internal",
        }
    }
}

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway transport error: {0}")]
    Transport(String),
    #[error("gateway rejected request: {0}")]
    Rejected(String),
    #[error("gateway config error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        GatewayError::Transport(err.to_string())
    }
}

/// Outcome of one charge attempt. A decline is a normal outcome
/// (`success: false`), not an error; `GatewayError` is reserved for
/// transport/config trouble. Both are treated as charge failures by the
/// renewal ladder.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChargeOutcome {
    pub success: bool,
    pub reference: Option<String>,
    pub failure_reason: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChargeRequest {
    pub stored_method: String,
    pub amount_cents: i64,
    pub currency: String,
    /// Subscription id; lets the gateway dedupe retried charges.
    pub idempotency_key: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn charge(&self, req: ChargeRequest) -> Result<ChargeOutcome, GatewayError>;
}

mod live;
mod mock;

pub use live::HttpPaymentGateway;
#[allow(unused_imports)]
pub use mock::MockPaymentGateway;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_captures_requests_and_returns_configured_outcome() {
        let mock = MockPaymentGateway::succeeding();
        let req = ChargeRequest {
            stored_method: "pm_test_123".into(),
            amount_cents: 4_900,
            currency: "SAR".into(),
            idempotency_key: "00000000-0000-0000-0000-000000000000".into(),
        };

        let outcome = mock.charge(req.clone()).await.unwrap();
        assert!(outcome.success);
        assert!(outcome.reference.is_some());

        let captured = mock.charges.lock().unwrap();
        assert_eq!(captured.len(), 1);
        assert_eq!(captured[0], req);
    }

    #[tokio::test]
    async fn mock_decline_is_a_normal_outcome_not_an_error() {
        let mock = MockPaymentGateway::declining("insufficient funds");
        let outcome = mock
            .charge(ChargeRequest {
                stored_method: "pm_test_123".into(),
                amount_cents: 4_900,
                currency: "SAR".into(),
                idempotency_key: "k".into(),
            })
            .await
            .unwrap();
        assert!(!outcome.success);
        assert_eq!(outcome.failure_reason.as_deref(), Some("insufficient funds"));
    }
}

use async_trait::async_trait;
use std::sync::Mutex;

use super::{ChargeOutcome, ChargeRequest, GatewayError, PaymentGateway};

/// Test gateway: records every charge request and replays a scripted
/// sequence of outcomes (last entry repeats once the script runs out).
pub struct MockPaymentGateway {
    pub charges: Mutex<Vec<ChargeRequest>>,
    script: Mutex<Vec<ChargeOutcome>>,
}

impl MockPaymentGateway {
    pub fn with_script(script: Vec<ChargeOutcome>) -> Self {
        Self {
            charges: Mutex::new(vec![]),
            script: Mutex::new(script),
        }
    }

    pub fn succeeding() -> Self {
        Self::with_script(vec![ChargeOutcome {
            success: true,
            reference: Some("ch_test_1".into()),
            failure_reason: None,
        }])
    }

    pub fn declining(reason: &str) -> Self {
        Self::with_script(vec![ChargeOutcome {
            success: false,
            reference: None,
            failure_reason: Some(reason.to_string()),
        }])
    }

    pub fn charge_count(&self) -> usize {
        self.charges.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentGateway for MockPaymentGateway {
    async fn charge(&self, req: ChargeRequest) -> Result<ChargeOutcome, GatewayError> {
        self.charges.lock().unwrap().push(req);
        let mut script = self.script.lock().unwrap();
        let outcome = if script.len() > 1 {
            script.remove(0)
        } else {
            script
                .first()
                .cloned()
                .ok_or_else(|| GatewayError::Config("mock gateway has no scripted outcome".into()))?
        };
        Ok(outcome)
    }
}

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

use super::{ChargeOutcome, ChargeRequest, GatewayError, PaymentGateway};

/// Charges through the platform's payment-gateway service over HTTP. The
/// wire protocol is the gateway's concern; this client only knows the
/// charge endpoint and its JSON envelope.
pub struct HttpPaymentGateway {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Deserialize)]
struct ChargeResponse {
    success: bool,
    reference: Option<String>,
    failure_reason: Option<String>,
}

impl HttpPaymentGateway {
    pub fn new(base_url: &str, api_key: &str) -> Result<Self, GatewayError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    async fn charge(&self, req: ChargeRequest) -> Result<ChargeOutcome, GatewayError> {
        let url = format!("{}/v1/charges", self.base_url);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("idempotency-key", &req.idempotency_key)
            .json(&req)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected(format!("{status}: {body}")));
        }

        let parsed: ChargeResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        Ok(ChargeOutcome {
            success: parsed.success,
            reference: parsed.reference,
            failure_reason: parsed.failure_reason,
        })
    }
}

//! Paystack-style payment processor over HTTPS.
//!
//! Talks to a REST processor exposing `POST /transaction/initialize`,
//! `GET /transaction/verify/{reference}`, `POST /refund` and `POST /transfer`
//! (payouts), authenticated with a bearer secret key. Webhooks are signed with HMAC-SHA512 of the raw
//! body under the same key.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha512;
use tracing::{debug, warn};

use super::{
    CollaboratorError, PaymentProcessor, PaymentVerification, PayoutGateway, PayoutReceipt,
    VerificationStatus,
};
use crate::core_types::{Money, UserId};
use crate::money::to_minor_units;

const SERVICE: &str = "paystack";

/// Connection settings (`payment_processor` section of the YAML config)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentProcessorConfig {
    pub base_url: String,
    pub secret_key: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Minor-unit scale of payout amounts
    #[serde(default = "default_currency_decimals")]
    pub currency_decimals: u32,
}

fn default_timeout_ms() -> u64 {
    10_000
}

fn default_currency_decimals() -> u32 {
    2
}

#[derive(Serialize)]
struct InitializeRequest<'a> {
    email: &'a str,
    amount: u64,
    reference: &'a str,
}

#[derive(Serialize)]
struct RefundRequest<'a> {
    transaction: &'a str,
    amount: u64,
}

/// Envelope every processor response is wrapped in
#[derive(Deserialize)]
struct Envelope<T> {
    status: bool,
    message: String,
    data: Option<T>,
}

#[derive(Deserialize)]
struct InitializeData {
    authorization_url: String,
}

#[derive(Deserialize)]
struct VerifyData {
    status: String,
    amount: u64,
    currency: String,
}

#[derive(Serialize)]
struct TransferRequest<'a> {
    source: &'static str,
    amount: u64,
    currency: &'a str,
    recipient: &'a str,
    reference: &'a str,
}

#[derive(Deserialize)]
struct RefundData {
    id: serde_json::Value,
}

#[derive(Deserialize)]
struct TransferData {
    transfer_code: String,
    status: String,
}

/// HTTP payment processor client
pub struct HttpPaymentProcessor {
    config: PaymentProcessorConfig,
    client: reqwest::Client,
}

impl HttpPaymentProcessor {
    pub fn new(config: PaymentProcessorConfig) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                CollaboratorError::unavailable(SERVICE, format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self { config, client })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn read_envelope<T: for<'de> Deserialize<'de>>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CollaboratorError> {
        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CollaboratorError::unavailable(SERVICE, format!("HTTP {}", status)));
        }

        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|e| CollaboratorError::unavailable(SERVICE, format!("bad response body: {}", e)))?;

        if !envelope.status {
            return Err(CollaboratorError::rejected(SERVICE, envelope.message));
        }
        envelope
            .data
            .ok_or_else(|| CollaboratorError::rejected(SERVICE, "response carried no data"))
    }
}

fn transport_error(e: reqwest::Error, timeout_ms: u64) -> CollaboratorError {
    if e.is_timeout() {
        CollaboratorError::Timeout {
            service: SERVICE,
            millis: timeout_ms,
        }
    } else {
        CollaboratorError::unavailable(SERVICE, e)
    }
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn initialize(
        &self,
        email: &str,
        amount_minor: u64,
        reference: &str,
    ) -> Result<String, CollaboratorError> {
        debug!(reference, amount_minor, "initializing payment");
        let response = self
            .client
            .post(self.url("/transaction/initialize"))
            .bearer_auth(&self.config.secret_key)
            .json(&InitializeRequest {
                email,
                amount: amount_minor,
                reference,
            })
            .send()
            .await
            .map_err(|e| transport_error(e, self.config.timeout_ms))?;

        let data: InitializeData = self.read_envelope(response).await?;
        Ok(data.authorization_url)
    }

    async fn verify(&self, reference: &str) -> Result<PaymentVerification, CollaboratorError> {
        let response = self
            .client
            .get(self.url(&format!("/transaction/verify/{}", reference)))
            .bearer_auth(&self.config.secret_key)
            .send()
            .await
            .map_err(|e| transport_error(e, self.config.timeout_ms))?;

        let data: VerifyData = self.read_envelope(response).await?;
        let status = if data.status == "success" {
            VerificationStatus::Success
        } else {
            VerificationStatus::Failed
        };
        Ok(PaymentVerification {
            status,
            amount_minor: data.amount,
            currency: data.currency,
        })
    }

    async fn refund(
        &self,
        reference: &str,
        amount_minor: u64,
    ) -> Result<String, CollaboratorError> {
        let response = self
            .client
            .post(self.url("/refund"))
            .bearer_auth(&self.config.secret_key)
            .json(&RefundRequest {
                transaction: reference,
                amount: amount_minor,
            })
            .send()
            .await
            .map_err(|e| transport_error(e, self.config.timeout_ms))?;

        let data: RefundData = self.read_envelope(response).await?;
        Ok(match data.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
    }
}

/// Payouts go out from the processor balance. The rail resolves `recipient`
/// to the user's registered bank account and dedupes on `reference`.
#[async_trait]
impl PayoutGateway for HttpPaymentProcessor {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn pay(
        &self,
        recipient: &UserId,
        amount: Money,
        currency: &str,
        reference: &str,
    ) -> Result<PayoutReceipt, CollaboratorError> {
        let amount_minor = to_minor_units(amount, self.config.currency_decimals)
            .map_err(|e| CollaboratorError::rejected(SERVICE, e))?;
        debug!(recipient = %recipient, reference, amount_minor, "initiating transfer");

        let response = self
            .client
            .post(self.url("/transfer"))
            .bearer_auth(&self.config.secret_key)
            .json(&TransferRequest {
                source: "balance",
                amount: amount_minor,
                currency,
                recipient: recipient.as_str(),
                reference,
            })
            .send()
            .await
            .map_err(|e| transport_error(e, self.config.timeout_ms))?;

        let data: TransferData = self.read_envelope(response).await?;
        Ok(PayoutReceipt {
            reference: data.transfer_code,
            settled: data.status == "success",
        })
    }
}

// ============================================================================
// Webhook signature
// ============================================================================

/// Check a webhook signature header against the raw request body.
///
/// The header is the lowercase hex HMAC-SHA512 of the body keyed with the
/// processor secret. Comparison is constant-time.
pub fn verify_webhook_signature(secret_key: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(expected) = hex::decode(signature_hex.trim()) else {
        warn!("webhook signature is not valid hex");
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha512>::new_from_slice(secret_key.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Compute the signature a processor would send (used by tests and tooling)
pub fn sign_webhook_body(secret_key: &str, body: &[u8]) -> String {
    // HMAC accepts keys of any length
    let mut mac = match Hmac::<Sha512>::new_from_slice(secret_key.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Webhook payload: `{"event": "charge.success", "data": {"reference": ...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    pub data: WebhookData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookData {
    pub reference: String,
    #[serde(default)]
    pub amount: Option<u64>,
}

impl WebhookEvent {
    pub fn is_charge_success(&self) -> bool {
        self.event == "charge.success"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_webhook_signature_roundtrip() {
        let body = br#"{"event":"charge.success","data":{"reference":"INV-1"}}"#;
        let signature = sign_webhook_body("sk_test_123", body);
        assert_eq!(signature.len(), 128);
        assert!(verify_webhook_signature("sk_test_123", body, &signature));
    }

    #[test]
    fn test_webhook_signature_rejects_tampering() {
        let body = br#"{"event":"charge.success","data":{"reference":"INV-1"}}"#;
        let signature = sign_webhook_body("sk_test_123", body);
        assert!(!verify_webhook_signature("sk_other", body, &signature));
        assert!(!verify_webhook_signature(
            "sk_test_123",
            br#"{"event":"charge.success","data":{"reference":"INV-2"}}"#,
            &signature
        ));
        assert!(!verify_webhook_signature("sk_test_123", body, "zz-not-hex"));
    }

    #[test]
    fn test_webhook_event_parse() {
        let event: WebhookEvent = serde_json::from_str(
            r#"{"event":"charge.success","data":{"reference":"INV-1","amount":6000000}}"#,
        )
        .unwrap();
        assert!(event.is_charge_success());
        assert_eq!(event.data.reference, "INV-1");
        assert_eq!(event.data.amount, Some(6_000_000));
    }

    #[test]
    fn test_url_join() {
        let processor = HttpPaymentProcessor::new(PaymentProcessorConfig {
            base_url: "https://api.example.test/".into(),
            secret_key: "sk".into(),
            timeout_ms: 1000,
            currency_decimals: 2,
        })
        .unwrap();
        assert_eq!(
            processor.url("/refund"),
            "https://api.example.test/refund"
        );
    }
}

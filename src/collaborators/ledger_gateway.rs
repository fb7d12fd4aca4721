//! Ledger service bridge over HTTP.
//!
//! The token ledger and its consensus audit topics are reached through a
//! small JSON gateway that holds the operator keys:
//!
//! - `POST /tokens/{token_id}/mint`      `{amount, authority}` → `{transaction_id}`
//! - `POST /tokens/{token_id}/transfer`  `{from, to, amount}`  → `{transaction_id}`
//! - `POST /topics/{topic_id}/messages`  `{message}`           → `{sequence_number}`

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{CollaboratorError, LedgerService};

const SERVICE: &str = "ledger-gateway";

/// `ledger_gateway` section of the YAML config
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerGatewayConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    15_000
}

#[derive(Serialize)]
struct MintBody<'a> {
    amount: u64,
    authority: &'a str,
}

#[derive(Serialize)]
struct TransferBody<'a> {
    from: &'a str,
    to: &'a str,
    amount: u64,
}

#[derive(Serialize)]
struct MessageBody<'a> {
    message: &'a serde_json::Value,
}

#[derive(Deserialize)]
struct TransactionReply {
    transaction_id: String,
}

#[derive(Deserialize)]
struct MessageReply {
    sequence_number: u64,
}

pub struct HttpLedgerService {
    config: LedgerGatewayConfig,
    client: reqwest::Client,
}

impl HttpLedgerService {
    pub fn new(config: LedgerGatewayConfig) -> Result<Self, CollaboratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                CollaboratorError::unavailable(SERVICE, format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self { config, client })
    }

    async fn post<B: Serialize + ?Sized, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, CollaboratorError> {
        let url = format!("{}{}", self.config.base_url.trim_end_matches('/'), path);
        debug!(%url, "ledger gateway request");

        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                CollaboratorError::Timeout {
                    service: SERVICE,
                    millis: self.config.timeout_ms,
                }
            } else {
                CollaboratorError::unavailable(SERVICE, e)
            }
        })?;

        let status = response.status();
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(CollaboratorError::unavailable(SERVICE, format!("HTTP {}", status)));
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(CollaboratorError::rejected(SERVICE, format!("HTTP {}: {}", status, text)));
        }

        response
            .json()
            .await
            .map_err(|e| CollaboratorError::unavailable(SERVICE, format!("bad response body: {}", e)))
    }
}

#[async_trait]
impl LedgerService for HttpLedgerService {
    fn name(&self) -> &'static str {
        SERVICE
    }

    async fn mint(
        &self,
        token_id: &str,
        amount: u64,
        authority: &str,
    ) -> Result<String, CollaboratorError> {
        let reply: TransactionReply = self
            .post(&format!("/tokens/{}/mint", token_id), &MintBody { amount, authority })
            .await?;
        Ok(reply.transaction_id)
    }

    async fn transfer(
        &self,
        from: &str,
        to: &str,
        token_id: &str,
        amount: u64,
    ) -> Result<String, CollaboratorError> {
        let reply: TransactionReply = self
            .post(
                &format!("/tokens/{}/transfer", token_id),
                &TransferBody { from, to, amount },
            )
            .await?;
        Ok(reply.transaction_id)
    }

    async fn record_audit_message(
        &self,
        topic_id: &str,
        payload: &serde_json::Value,
    ) -> Result<u64, CollaboratorError> {
        let reply: MessageReply = self
            .post(
                &format!("/topics/{}/messages", topic_id),
                &MessageBody { message: payload },
            )
            .await?;
        Ok(reply.sequence_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config: LedgerGatewayConfig =
            serde_yaml::from_str("base_url: http://127.0.0.1:7070").unwrap();
        assert_eq!(config.timeout_ms, 15_000);
        assert!(config.api_key.is_none());
    }

    #[tokio::test]
    async fn test_unreachable_gateway_is_transient() {
        let ledger = HttpLedgerService::new(LedgerGatewayConfig {
            // Port 9 (discard) on localhost is not listening in test environments
            base_url: "http://127.0.0.1:9".into(),
            api_key: None,
            timeout_ms: 500,
        })
        .unwrap();
        let err = ledger
            .transfer("treasury", "alice", "0.0.1", 1)
            .await
            .unwrap_err();
        assert!(err.is_transient());
    }
}

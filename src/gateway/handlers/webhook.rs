//! Payment processor webhook

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde::Serialize;
use tracing::{info, warn};

use super::super::state::{AppState, SIGNATURE_HEADER};
use super::super::types::{ApiError, ApiResult, error_codes, ok};
use crate::collaborators::paystack::{WebhookEvent, verify_webhook_signature};

#[derive(Debug, Serialize)]
pub struct WebhookAck {
    pub event: String,
    pub reference: String,
    pub handled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investment_state: Option<String>,
}

/// POST /api/v1/webhooks/payment
///
/// Signature is checked over the raw body before parsing. Terminal outcomes
/// (confirmed, failed) are acknowledged with 200; transient failures return
/// 503 so the processor redelivers.
pub async fn payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<WebhookAck> {
    let secret = state
        .webhook_secret
        .as_deref()
        .ok_or_else(|| ApiError::service_unavailable("Payment webhook not configured"))?;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !verify_webhook_signature(secret, &body, signature) {
        warn!("Payment webhook with invalid signature");
        return ApiError::new(
            StatusCode::UNAUTHORIZED,
            error_codes::INVALID_SIGNATURE,
            "Invalid webhook signature",
        )
        .into_err();
    }

    let event: WebhookEvent = serde_json::from_slice(&body)
        .map_err(|e| ApiError::bad_request(format!("Invalid webhook payload: {}", e)))?;
    let reference = event.data.reference.clone();

    if !event.is_charge_success() {
        info!(event = %event.event, reference = %reference, "Ignoring payment webhook event");
        return ok(WebhookAck {
            event: event.event,
            reference,
            handled: false,
            investment_state: None,
        });
    }

    match state.engine.confirm_payment_by_reference(&reference).await {
        Ok(investment) => ok(WebhookAck {
            event: event.event,
            reference,
            handled: true,
            investment_state: Some(investment.state.as_str().to_string()),
        }),
        Err(e) if e.is_retryable() => Err(e.into()),
        Err(e) => {
            warn!(reference = %reference, error = %e, "Payment webhook not applied");
            ok(WebhookAck {
                event: event.event,
                reference,
                handled: false,
                investment_state: None,
            })
        }
    }
}

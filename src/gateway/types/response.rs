//! API response wrapper, error type and error codes

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::SettlementError;

/// Unified API response wrapper
///
/// - code: 0 = success, non-zero = error code
/// - msg: short message description
/// - data: actual data (success) or absent (error)
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub code: i32,
    pub msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: 0,
            msg: "ok".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: i32, msg: impl Into<String>) -> ApiResponse<()> {
        ApiResponse {
            code,
            msg: msg.into(),
            data: None,
        }
    }
}

pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

pub fn ok<T>(data: T) -> ApiResult<T> {
    Ok(Json(ApiResponse::success(data)))
}

/// Handler error rendered as `ApiResponse` with an HTTP status
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub code: i32,
    pub msg: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: i32, msg: impl Into<String>) -> Self {
        Self {
            status,
            code,
            msg: msg.into(),
        }
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, error_codes::INVALID_PARAMETER, msg)
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, error_codes::MISSING_AUTH, msg)
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::new(
            StatusCode::SERVICE_UNAVAILABLE,
            error_codes::SERVICE_UNAVAILABLE,
            msg,
        )
    }

    pub fn into_err<T>(self) -> ApiResult<T> {
        Err(self)
    }
}

impl From<SettlementError> for ApiError {
    fn from(e: SettlementError) -> Self {
        let status =
            StatusCode::from_u16(e.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!(code = e.code(), error = %e, "Request failed");
        }
        Self::new(status, error_codes::for_error(&e), e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::<()>::error(self.code, self.msg))).into_response()
    }
}

/// Standard API error codes
pub mod error_codes {
    use crate::error::SettlementError;

    pub const SUCCESS: i32 = 0;

    // Client errors (1xxx)
    pub const INVALID_PARAMETER: i32 = 1001;
    pub const INSUFFICIENT_SUPPLY: i32 = 1002;
    pub const OFFERING_CLOSED: i32 = 1003;
    pub const RESERVATION_EXPIRED: i32 = 1004;
    pub const PAYMENT_VERIFICATION_FAILED: i32 = 1005;

    // Auth errors (2xxx)
    pub const MISSING_AUTH: i32 = 2001;
    pub const UNAUTHORIZED: i32 = 2002;
    pub const INVALID_SIGNATURE: i32 = 2003;

    // Conflict errors (3xxx)
    pub const ALREADY_APPROVED: i32 = 3001;
    pub const DUPLICATE_VOTE: i32 = 3002;
    pub const REQUEST_CLOSED: i32 = 3003;
    pub const DISTRIBUTION_BUSY: i32 = 3004;
    pub const INVALID_STATE: i32 = 3005;

    // Resource errors (4xxx)
    pub const NOT_FOUND: i32 = 4001;

    // Server errors (5xxx)
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const SERVICE_UNAVAILABLE: i32 = 5001;

    pub fn for_error(e: &SettlementError) -> i32 {
        match e {
            SettlementError::Validation(_) => INVALID_PARAMETER,
            SettlementError::InsufficientSupply { .. } => INSUFFICIENT_SUPPLY,
            SettlementError::OfferingClosed(_) => OFFERING_CLOSED,
            SettlementError::ReservationExpired => RESERVATION_EXPIRED,
            SettlementError::PaymentVerificationFailed(_) => PAYMENT_VERIFICATION_FAILED,
            SettlementError::Unauthorized => UNAUTHORIZED,
            SettlementError::AlreadyApproved => ALREADY_APPROVED,
            SettlementError::DuplicateVote => DUPLICATE_VOTE,
            SettlementError::RequestClosed(_) => REQUEST_CLOSED,
            SettlementError::DistributionBusy => DISTRIBUTION_BUSY,
            SettlementError::InvalidStateTransition(_) => INVALID_STATE,
            SettlementError::NotFound(_) => NOT_FOUND,
            SettlementError::LedgerServiceUnavailable(_) | SettlementError::Collaborator(_) => {
                SERVICE_UNAVAILABLE
            }
            SettlementError::DatabaseError(_) => INTERNAL_ERROR,
        }
    }
}

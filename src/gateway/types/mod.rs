//! Gateway types module
//!
//! ## Input Types
//! - [`StrictDecimal`]: Format-validated decimal for API input
//! - [`StrictRatio`]: Format-validated fraction in `[0, 1]`
//! - request bodies in [`requests`]
//!
//! ## Output Types
//! - [`ApiResponse<T>`]: Unified API response wrapper
//! - [`ApiError`]: Handler error carrying HTTP status and API code

pub mod money;
pub mod requests;
pub mod response;

pub use money::{StrictDecimal, StrictRatio};
pub use requests::{
    ConfirmPaymentRequest, CreateDistributionRequest, PlaceInvestmentRequest,
    ProposalRequestBody, RefundRequest, RegisterOfferingRequest, VoteRequest,
    WithdrawalRequestBody,
};
pub use response::{ApiError, ApiResponse, ApiResult, error_codes, ok};

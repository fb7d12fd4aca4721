//! Request bodies

use chrono::{DateTime, Utc};
use serde::Deserialize;

use super::money::{StrictDecimal, StrictRatio};
use crate::approval::VoteChoice;
use crate::core_types::{OfferingId, TokenAmount, UserId};
use crate::investment::PaymentMethod;

#[derive(Debug, Deserialize)]
pub struct PlaceInvestmentRequest {
    pub offering_id: OfferingId,
    pub amount: StrictDecimal,
    pub payment_method: PaymentMethod,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub reference: String,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterOfferingRequest {
    pub name: String,
    pub token_id: String,
    pub total_supply: TokenAmount,
    pub price_per_token: StrictDecimal,
    pub min_investment: StrictDecimal,
    #[serde(default)]
    pub max_investment: Option<StrictDecimal>,
    #[serde(default)]
    pub max_tokens_per_purchase: Option<TokenAmount>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct CreateDistributionRequest {
    pub offering_id: OfferingId,
    pub per_token_amount: StrictDecimal,
    #[serde(default)]
    pub as_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct WithdrawalRequestBody {
    pub offering_id: OfferingId,
    pub amount: StrictDecimal,
    pub recipient: UserId,
    pub purpose: String,
    pub admins: Vec<UserId>,
    #[serde(default)]
    pub required_approvals: Option<u32>,
    #[serde(default)]
    pub deadline: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct ProposalRequestBody {
    pub offering_id: OfferingId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub quorum_required: StrictRatio,
    pub approval_threshold: StrictRatio,
    pub voting_ends_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    pub choice: VoteChoice,
}

//! API Request and Response Models
//!
//! User ids arrive as plain strings and are validated in the handlers, so a
//! blank id is reported as a 400 like every other invalid input.

use crate::models::MatchResult;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct JoinLobbyRequest {
    pub user_id: String,
    pub wager_usd: Decimal,
}

/// Results as submitted by the game client
#[derive(Debug, Clone, Deserialize)]
pub struct CompleteMatchRequest {
    pub match_id: String,
    #[serde(default)]
    pub results: Vec<MatchResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenWalletRequest {
    pub user_id: String,
    #[serde(default)]
    pub address: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DepositRequest {
    pub user_id: String,
    pub amount_sol: Decimal,
    #[serde(default)]
    pub external_reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WithdrawRequest {
    pub user_id: String,
    pub to_address: String,
    pub amount_sol: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResolveWithdrawalRequest {
    pub confirmed: bool,
    #[serde(default)]
    pub external_reference: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TransactionsQuery {
    #[serde(default)]
    pub limit: Option<usize>,
}

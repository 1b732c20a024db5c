//! Request Handlers
//!
//! Thin adapters from HTTP to the core services. Every failure is mapped
//! through [`ApiError::from_payout`] with the request id attached.

use super::{errors::ApiError, extract::ApiJson, middleware::RequestId, models::*};
use crate::common::{LobbyId, MatchId, TransactionId, UserId};
use crate::factory::PayoutCore;
use crate::ledger::{Reconciliation, WithdrawalReceipt};
use crate::matchmaker::JoinOutcome;
use crate::models::{Lobby, Match, Transaction, Wallet};
use crate::settlement::{GlobalStats, SettlementReceipt};
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode, Uri},
    response::IntoResponse,
    Extension, Json,
};
use std::str::FromStr;
use std::sync::Arc;

/// Shared application state
pub struct AppState {
    pub core: PayoutCore,
    pub version: String,
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn parse<T>(request_id: &RequestId, raw: &str) -> Result<T, ApiError>
where
    T: FromStr<Err = crate::errors::PayoutError>,
{
    T::from_str(raw).map_err(|e| ApiError::from_payout(request_id.0.clone(), e))
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: state.version.clone(),
    })
}

/// POST /lobby/join
pub async fn join_lobby_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<JoinLobbyRequest>,
) -> ApiResult<JoinOutcome> {
    let user_id: UserId = parse(&request_id, &body.user_id)?;
    state
        .core
        .matchmaker
        .join_lobby(user_id, body.wager_usd)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_payout(request_id.0, e))
}

/// GET /lobby/:lobby_id
pub async fn lobby_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(lobby_id): Path<String>,
) -> ApiResult<Lobby> {
    let lobby_id: LobbyId = parse(&request_id, &lobby_id)?;
    state
        .core
        .matchmaker
        .get_lobby(&lobby_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_payout(request_id.0, e))
}

/// GET /match/:match_id
pub async fn match_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(match_id): Path<String>,
) -> ApiResult<Match> {
    let match_id: MatchId = parse(&request_id, &match_id)?;
    state
        .core
        .matchmaker
        .get_match(&match_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_payout(request_id.0, e))
}

/// POST /match/complete
pub async fn complete_match_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<CompleteMatchRequest>,
) -> ApiResult<SettlementReceipt> {
    let match_id: MatchId = parse(&request_id, &body.match_id)?;
    state
        .core
        .settlement
        .complete_match(match_id, body.results)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_payout(request_id.0, e))
}

/// POST /wallets
pub async fn open_wallet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<OpenWalletRequest>,
) -> ApiResult<Wallet> {
    let user_id: UserId = parse(&request_id, &body.user_id)?;
    state
        .core
        .open_wallet(user_id, body.address)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_payout(request_id.0, e))
}

/// GET /wallet/:user_id
pub async fn wallet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<Wallet> {
    let user_id: UserId = parse(&request_id, &user_id)?;
    state
        .core
        .ledger
        .get_wallet(&user_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_payout(request_id.0, e))
}

/// POST /wallet/refresh/:user_id
pub async fn refresh_wallet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<Wallet> {
    let user_id: UserId = parse(&request_id, &user_id)?;
    state
        .core
        .ledger
        .refresh_wallet(&user_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_payout(request_id.0, e))
}

/// POST /wallet/deposit
pub async fn deposit_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<DepositRequest>,
) -> ApiResult<Transaction> {
    let user_id: UserId = parse(&request_id, &body.user_id)?;
    state
        .core
        .ledger
        .deposit(&user_id, body.amount_sol, body.external_reference)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_payout(request_id.0, e))
}

/// POST /wallet/withdraw
pub async fn withdraw_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    ApiJson(body): ApiJson<WithdrawRequest>,
) -> ApiResult<WithdrawalReceipt> {
    let user_id: UserId = parse(&request_id, &body.user_id)?;
    state
        .core
        .ledger
        .withdraw(&user_id, &body.to_address, body.amount_sol)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_payout(request_id.0, e))
}

/// POST /wallet/withdrawals/:tx_id
pub async fn resolve_withdrawal_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(tx_id): Path<String>,
    ApiJson(body): ApiJson<ResolveWithdrawalRequest>,
) -> ApiResult<Transaction> {
    let tx_id: TransactionId = parse(&request_id, &tx_id)?;
    state
        .core
        .ledger
        .resolve_withdrawal(&tx_id, body.confirmed, body.external_reference)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_payout(request_id.0, e))
}

/// GET /wallet/:user_id/reconcile
pub async fn reconcile_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> ApiResult<Reconciliation> {
    let user_id: UserId = parse(&request_id, &user_id)?;
    state
        .core
        .ledger
        .reconcile(&user_id)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_payout(request_id.0, e))
}

/// GET /transactions/:user_id?limit=
pub async fn transactions_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
    Query(params): Query<TransactionsQuery>,
) -> ApiResult<Vec<Transaction>> {
    let user_id: UserId = parse(&request_id, &user_id)?;
    state
        .core
        .ledger
        .transactions(&user_id, params.limit)
        .await
        .map(Json)
        .map_err(|e| ApiError::from_payout(request_id.0, e))
}

/// GET /stats
pub async fn stats_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> ApiResult<GlobalStats> {
    state
        .core
        .settlement
        .stats()
        .await
        .map(Json)
        .map_err(|e| ApiError::from_payout(request_id.0, e))
}

/// Unmatched paths
pub async fn fallback_handler(request_id: Option<Extension<RequestId>>, uri: Uri) -> ApiError {
    let request_id = request_id.map_or_else(RequestId::generate, |Extension(id)| id);
    ApiError::not_found(request_id.0, format!("no route for {}", uri.path()))
}

/// GET /metrics
pub async fn metrics_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let body = state
        .core
        .metrics
        .render()
        .map_err(|e| ApiError::internal_error(request_id.0, format!("Failed to render metrics: {}", e)))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    ))
}

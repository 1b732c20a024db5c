//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::handlers::*;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        // Matchmaking
        .route("/lobby/join", post(join_lobby_handler))
        .route("/lobby/:lobby_id", get(lobby_handler))
        // Settlement
        .route("/match/complete", post(complete_match_handler))
        .route("/match/:match_id", get(match_handler))
        // Wallets
        .route("/wallets", post(open_wallet_handler))
        .route("/wallet/deposit", post(deposit_handler))
        .route("/wallet/withdraw", post(withdraw_handler))
        .route("/wallet/withdrawals/:tx_id", post(resolve_withdrawal_handler))
        .route("/wallet/refresh/:user_id", post(refresh_wallet_handler))
        .route("/wallet/:user_id", get(wallet_handler))
        .route("/wallet/:user_id/reconcile", get(reconcile_handler))
        .route("/transactions/:user_id", get(transactions_handler))
        .route("/stats", get(stats_handler))
        // Metrics endpoint for Prometheus
        .route("/metrics", get(metrics_handler))
        .fallback(fallback_handler)
        .with_state(state)
}

//! PaperPayout - lobby matchmaking and match settlement
//!
//! Players join lobbies keyed by wager. A full lobby becomes a match, and
//! completing the match credits the winner's wallet with the pot minus the
//! platform fee. Persistence is injected through [`store::Stores`]; the HTTP
//! surface lives in [`api`].

pub mod api;
pub mod common;
pub mod config;
pub mod errors;
pub mod factory;
pub mod ledger;
pub mod locks;
pub mod matchmaker;
pub mod metrics;
pub mod models;
pub mod pricing;
pub mod settlement;
pub mod store;

pub use errors::{PayoutError, PayoutResult, StoreError};
pub use factory::{CoreFactory, PayoutCore};
pub use ledger::Ledger;
pub use matchmaker::{JoinOutcome, Matchmaker};
pub use settlement::{GlobalStats, SettlementEngine, SettlementReceipt, SettlementWarning};

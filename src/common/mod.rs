//! Shared identifiers and money helpers

pub mod ids;
pub mod money;

pub use ids::{LobbyId, MatchId, TransactionId, UserId};
pub use money::{round_to, Currency, Precision};

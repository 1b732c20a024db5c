//! Persisted records: lobbies, matches, wallets and ledger transactions

pub mod game_match;
pub mod lobby;
pub mod transaction;
pub mod wallet;

pub use game_match::{Match, MatchCompletion, MatchFilter, MatchPatch, MatchResult, SettlementAmounts};
pub use lobby::{Lobby, LobbyFilter, LobbyPatch, LobbyStatus};
pub use transaction::{
    Transaction, TransactionFilter, TransactionKind, TransactionPatch, TransactionStatus,
};
pub use wallet::{Wallet, WalletFilter, WalletPatch};

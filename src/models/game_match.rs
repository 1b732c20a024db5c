use crate::common::{LobbyId, MatchId, UserId};
use crate::models::Lobby;
use crate::store::Document;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One player's submitted result
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchResult {
    pub user_id: UserId,
    #[serde(default)]
    pub score: f64,
    /// Placement, 1 is best. Missing ranks sort last.
    #[serde(default)]
    pub rank: Option<u32>,
    #[serde(default)]
    pub time: Option<f64>,
}

/// Amounts fixed at completion time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SettlementAmounts {
    pub pot_usd: Decimal,
    pub fee_rate: Decimal,
    pub fee_usd: Decimal,
    pub payout_usd: Decimal,
    pub payout_sol: Decimal,
    /// USD -> SOL rate used for `payout_sol`
    pub rate_usd_to_sol: Decimal,
}

/// Snapshot of a started lobby, pending results
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Match {
    pub id: MatchId,
    pub lobby_id: LobbyId,
    pub wager_usd: Decimal,
    /// Immutable after creation
    pub players: Vec<UserId>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub winner_user_id: Option<UserId>,
    #[serde(default)]
    pub results: Option<Vec<MatchResult>>,
    #[serde(default)]
    pub settlement: Option<SettlementAmounts>,
    /// Set once the winner's wallet has been credited
    #[serde(default)]
    pub credited_at: Option<DateTime<Utc>>,
    /// Last time a credit found no wallet for the winner
    #[serde(default)]
    pub missing_wallet_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Match {
    /// Build the match for a lobby that was just filled
    pub fn from_lobby(id: MatchId, lobby: &Lobby) -> Self {
        let started_at = lobby.started_at.unwrap_or_else(Utc::now);
        Self {
            id,
            lobby_id: lobby.id,
            wager_usd: lobby.wager_usd,
            players: lobby.players.clone(),
            started_at,
            completed_at: None,
            winner_user_id: None,
            results: None,
            settlement: None,
            credited_at: None,
            missing_wallet_at: None,
            created_at: started_at,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.completed_at.is_some()
    }

    pub fn has_player(&self, user_id: &UserId) -> bool {
        self.players.iter().any(|p| p == user_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct MatchFilter {
    pub lobby_id: Option<LobbyId>,
    pub completed: Option<bool>,
    /// Completed matches whose payout has not been credited yet
    pub uncredited_only: bool,
    /// Split uncredited matches by whether the winner had no wallet
    pub awaiting_wallet: Option<bool>,
    pub winner: Option<UserId>,
}

impl MatchFilter {
    pub fn for_lobby(lobby_id: LobbyId) -> Self {
        Self {
            lobby_id: Some(lobby_id),
            ..Default::default()
        }
    }

    /// Credits interrupted by a failure rather than a missing wallet
    pub fn completed_uncredited() -> Self {
        Self {
            completed: Some(true),
            uncredited_only: true,
            awaiting_wallet: Some(false),
            ..Default::default()
        }
    }

    /// Uncredited because the winner had no wallet, optionally for one winner
    pub fn awaiting_wallet(winner: Option<UserId>) -> Self {
        Self {
            completed: Some(true),
            uncredited_only: true,
            awaiting_wallet: Some(true),
            winner,
            ..Default::default()
        }
    }
}

/// Completion fields, always written together
#[derive(Debug, Clone)]
pub struct MatchCompletion {
    pub completed_at: DateTime<Utc>,
    pub winner_user_id: UserId,
    pub results: Vec<MatchResult>,
    pub settlement: SettlementAmounts,
}

#[derive(Debug, Clone, Default)]
pub struct MatchPatch {
    pub completion: Option<MatchCompletion>,
    pub credited_at: Option<DateTime<Utc>>,
    pub missing_wallet_at: Option<DateTime<Utc>>,
}

impl Document for Match {
    type Id = MatchId;
    type Filter = MatchFilter;
    type Patch = MatchPatch;

    const COLLECTION: &'static str = "match";

    fn id(&self) -> &MatchId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn matches(&self, filter: &MatchFilter) -> bool {
        filter.lobby_id.map_or(true, |l| self.lobby_id == l)
            && filter.completed.map_or(true, |c| self.is_completed() == c)
            && (!filter.uncredited_only || self.credited_at.is_none())
            && filter
                .awaiting_wallet
                .map_or(true, |a| self.missing_wallet_at.is_some() == a)
            && filter
                .winner
                .as_ref()
                .map_or(true, |w| self.winner_user_id.as_ref() == Some(w))
    }

    fn apply(&mut self, patch: MatchPatch) {
        if let Some(completion) = patch.completion {
            self.completed_at = Some(completion.completed_at);
            self.winner_user_id = Some(completion.winner_user_id);
            self.results = Some(completion.results);
            self.settlement = Some(completion.settlement);
        }
        if let Some(credited_at) = patch.credited_at {
            self.credited_at = Some(credited_at);
        }
        if let Some(at) = patch.missing_wallet_at {
            self.missing_wallet_at = Some(at);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_result_defaults() {
        let result: MatchResult = serde_json::from_str(r#"{"user_id":"alice"}"#).unwrap();
        assert_eq!(result.score, 0.0);
        assert_eq!(result.rank, None);
        assert_eq!(result.time, None);
    }

    #[test]
    fn test_from_lobby_snapshots_players() {
        let mut lobby = Lobby::open(dec!(5), 2, UserId::new("a").unwrap());
        lobby.players.push(UserId::new("b").unwrap());
        lobby.started_at = Some(Utc::now());

        let m = Match::from_lobby(MatchId::new(), &lobby);
        assert_eq!(m.players, lobby.players);
        assert_eq!(m.lobby_id, lobby.id);
        assert!(!m.is_completed());
        assert!(m.matches(&MatchFilter::for_lobby(lobby.id)));
        assert!(!m.matches(&MatchFilter::completed_uncredited()));
    }

    #[test]
    fn test_missing_wallet_marker_splits_uncredited() {
        let lobby = Lobby::open(dec!(5), 2, UserId::new("a").unwrap());
        let mut m = Match::from_lobby(MatchId::new(), &lobby);
        m.completed_at = Some(Utc::now());
        m.winner_user_id = Some(UserId::new("a").unwrap());
        assert!(m.matches(&MatchFilter::completed_uncredited()));
        assert!(!m.matches(&MatchFilter::awaiting_wallet(None)));

        m.apply(MatchPatch {
            missing_wallet_at: Some(Utc::now()),
            ..Default::default()
        });
        assert!(!m.matches(&MatchFilter::completed_uncredited()));
        assert!(m.matches(&MatchFilter::awaiting_wallet(Some(UserId::new("a").unwrap()))));
        assert!(!m.matches(&MatchFilter::awaiting_wallet(Some(UserId::new("b").unwrap()))));
    }
}

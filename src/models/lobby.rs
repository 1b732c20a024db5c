use crate::common::{LobbyId, MatchId, UserId};
use crate::store::Document;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lobby lifecycle; only ever moves forward
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum LobbyStatus {
    Waiting,
    Started,
    Completed,
}

impl LobbyStatus {
    pub fn can_advance_to(self, next: LobbyStatus) -> bool {
        matches!(
            (self, next),
            (LobbyStatus::Waiting, LobbyStatus::Started)
                | (LobbyStatus::Started, LobbyStatus::Completed)
        )
    }
}

impl fmt::Display for LobbyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LobbyStatus::Waiting => write!(f, "waiting"),
            LobbyStatus::Started => write!(f, "started"),
            LobbyStatus::Completed => write!(f, "completed"),
        }
    }
}

/// A pending group of players wagering the same amount
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Lobby {
    pub id: LobbyId,
    pub wager_usd: Decimal,
    pub max_players: usize,
    /// Join order, no duplicates
    pub players: Vec<UserId>,
    pub status: LobbyStatus,
    /// Allocated in the same write that moves the lobby to `Started`
    #[serde(default)]
    pub match_id: Option<MatchId>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
}

impl Lobby {
    /// New waiting lobby seated with its first player
    pub fn open(wager_usd: Decimal, max_players: usize, first_player: UserId) -> Self {
        Self {
            id: LobbyId::new(),
            wager_usd: wager_usd.normalize(),
            max_players,
            players: vec![first_player],
            status: LobbyStatus::Waiting,
            match_id: None,
            created_at: Utc::now(),
            started_at: None,
        }
    }

    pub fn is_full(&self) -> bool {
        self.players.len() >= self.max_players
    }

    pub fn contains(&self, user_id: &UserId) -> bool {
        self.players.iter().any(|p| p == user_id)
    }
}

#[derive(Debug, Clone, Default)]
pub struct LobbyFilter {
    pub wager_usd: Option<Decimal>,
    pub status: Option<LobbyStatus>,
    /// Only lobbies with at least one free seat
    pub open_only: bool,
    pub member: Option<UserId>,
}

impl LobbyFilter {
    /// Join targets for a wager: waiting and not full
    pub fn open_for_wager(wager_usd: Decimal) -> Self {
        Self {
            wager_usd: Some(wager_usd),
            status: Some(LobbyStatus::Waiting),
            open_only: true,
            member: None,
        }
    }

    pub fn with_status(status: LobbyStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LobbyPatch {
    pub players: Option<Vec<UserId>>,
    pub status: Option<LobbyStatus>,
    pub started_at: Option<DateTime<Utc>>,
    pub match_id: Option<MatchId>,
}

impl Document for Lobby {
    type Id = LobbyId;
    type Filter = LobbyFilter;
    type Patch = LobbyPatch;

    const COLLECTION: &'static str = "lobby";

    fn id(&self) -> &LobbyId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn matches(&self, filter: &LobbyFilter) -> bool {
        // Decimal equality ignores scale, so 5 == 5.00
        filter.wager_usd.map_or(true, |w| self.wager_usd == w)
            && filter.status.map_or(true, |s| self.status == s)
            && (!filter.open_only || !self.is_full())
            && filter.member.as_ref().map_or(true, |m| self.contains(m))
    }

    fn apply(&mut self, patch: LobbyPatch) {
        if let Some(players) = patch.players {
            self.players = players;
        }
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(match_id) = patch.match_id {
            self.match_id = Some(match_id);
        }
    }
}

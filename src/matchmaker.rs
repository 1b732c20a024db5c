//! Lobby placement and match creation
//!
//! Joins for one wager bucket are serialized in-process by a keyed lock, and
//! every lobby write carries the version it was computed from. The write that
//! fills a lobby also flips it to `started` and reserves the match id, so the
//! match insert that follows can be replayed by [`Matchmaker::recover_started_lobbies`]
//! if the process dies in between.

use crate::common::{LobbyId, MatchId, UserId};
use crate::config::MatchmakingConfig;
use crate::errors::{PayoutError, PayoutResult, StoreError};
use crate::locks::KeyedLocks;
use crate::metrics::Metrics;
use crate::models::{Lobby, LobbyFilter, LobbyPatch, LobbyStatus, Match, MatchFilter};
use crate::store::{SortOrder, Stores, Versioned};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// What a join produced
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum JoinOutcome {
    Waiting {
        lobby_id: LobbyId,
        players: Vec<UserId>,
        max_players: usize,
    },
    Started {
        lobby_id: LobbyId,
        #[serde(rename = "match")]
        game_match: Match,
    },
}

impl JoinOutcome {
    pub fn lobby_id(&self) -> LobbyId {
        match self {
            JoinOutcome::Waiting { lobby_id, .. } | JoinOutcome::Started { lobby_id, .. } => *lobby_id,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self, JoinOutcome::Started { .. })
    }

    fn waiting(lobby: Lobby) -> Self {
        JoinOutcome::Waiting {
            lobby_id: lobby.id,
            players: lobby.players,
            max_players: lobby.max_players,
        }
    }
}

pub struct Matchmaker {
    stores: Stores,
    config: MatchmakingConfig,
    /// Keyed by normalized wager
    locks: KeyedLocks<String>,
    metrics: Metrics,
}

impl Matchmaker {
    pub fn new(stores: Stores, config: MatchmakingConfig, metrics: Metrics) -> Self {
        Self {
            stores,
            config,
            locks: KeyedLocks::new(),
            metrics,
        }
    }

    /// Seat `user_id` in the oldest open lobby for `wager_usd`, or open one
    pub async fn join_lobby(&self, user_id: UserId, wager_usd: Decimal) -> PayoutResult<JoinOutcome> {
        if wager_usd <= Decimal::ZERO {
            return Err(PayoutError::InvalidInput(format!(
                "wager must be positive, got {}",
                wager_usd
            )));
        }
        // The full pot has to stay representable for settlement
        if wager_usd.checked_mul(Decimal::from(self.config.max_players)).is_none() {
            return Err(PayoutError::InvalidInput(format!(
                "wager {} is too large for a {} player pot",
                wager_usd, self.config.max_players
            )));
        }
        let wager_usd = wager_usd.normalize();
        let _guard = self.locks.lock(wager_usd.to_string()).await;

        for attempt in 1..=self.config.max_join_retries {
            // Already seated in a waiting lobby for this wager: no-op
            let seated = LobbyFilter {
                wager_usd: Some(wager_usd),
                status: Some(LobbyStatus::Waiting),
                open_only: false,
                member: Some(user_id.clone()),
            };
            if let Some(existing) = self.stores.lobbies.find_one(&seated).await? {
                debug!(lobby_id = %existing.document.id, user_id = %user_id, "Player already seated");
                return Ok(JoinOutcome::waiting(existing.into_inner()));
            }

            let candidate = self
                .stores
                .lobbies
                .find_one(&LobbyFilter::open_for_wager(wager_usd))
                .await?;

            let result = match candidate {
                None => self.open_lobby(user_id.clone(), wager_usd).await,
                Some(lobby) => self.seat(lobby, user_id.clone()).await,
            };

            match result {
                Err(StoreError::VersionConflict { expected, found }) => {
                    self.metrics.join_conflicts.inc();
                    debug!(user_id = %user_id, attempt, expected, found, "Lobby write lost a race, retrying");
                }
                Err(StoreError::Duplicate { .. }) => {
                    self.metrics.join_conflicts.inc();
                    debug!(user_id = %user_id, attempt, "Lobby id collision, retrying");
                }
                Err(e) => return Err(e.into()),
                Ok(Seated::Waiting(lobby)) => return Ok(JoinOutcome::waiting(lobby)),
                Ok(Seated::Filled(lobby)) => return self.start_match(lobby).await,
            }
        }

        warn!(user_id = %user_id, wager = %wager_usd, "Join gave up after repeated conflicts");
        Err(PayoutError::Contention {
            operation: "join_lobby",
            attempts: self.config.max_join_retries,
        })
    }

    pub async fn get_lobby(&self, lobby_id: &LobbyId) -> PayoutResult<Lobby> {
        self.stores
            .lobbies
            .get(lobby_id)
            .await?
            .map(Versioned::into_inner)
            .ok_or_else(|| PayoutError::not_found("lobby", lobby_id))
    }

    pub async fn get_match(&self, match_id: &MatchId) -> PayoutResult<Match> {
        self.stores
            .matches
            .get(match_id)
            .await?
            .map(Versioned::into_inner)
            .ok_or_else(|| PayoutError::not_found("match", match_id))
    }

    /// Create the match for every started lobby that is missing one
    pub async fn recover_started_lobbies(&self) -> PayoutResult<usize> {
        let started = self
            .stores
            .lobbies
            .find_many(
                &LobbyFilter::with_status(LobbyStatus::Started),
                Some(SortOrder::OldestFirst),
                None,
            )
            .await?;

        let mut created = 0;
        for lobby in started.into_iter().map(Versioned::into_inner) {
            let Some(match_id) = lobby.match_id else {
                error!(lobby_id = %lobby.id, "Started lobby has no reserved match id");
                continue;
            };
            if self.stores.matches.get(&match_id).await?.is_some() {
                continue;
            }
            // Another path may have created a match for this lobby under a
            // different id; never create a second one
            if self
                .stores
                .matches
                .find_one(&MatchFilter::for_lobby(lobby.id))
                .await?
                .is_some()
            {
                continue;
            }

            match self.stores.matches.insert(Match::from_lobby(match_id, &lobby)).await {
                Ok(_) | Err(StoreError::Duplicate { .. }) => {
                    warn!(lobby_id = %lobby.id, match_id = %match_id, "Recovered missing match");
                    self.metrics.matches_started.inc();
                    created += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(created)
    }

    /// Forget wager locks nobody is waiting on
    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }

    async fn open_lobby(&self, user_id: UserId, wager_usd: Decimal) -> Result<Seated, StoreError> {
        let lobby = Lobby::open(wager_usd, self.config.max_players, user_id);
        self.stores.lobbies.insert(lobby.clone()).await?;

        info!(lobby_id = %lobby.id, wager = %wager_usd, max_players = lobby.max_players, "Opened lobby");
        self.metrics.lobbies_created.inc();
        self.metrics.players_joined.inc();
        self.metrics.open_lobbies.inc();
        Ok(Seated::Waiting(lobby))
    }

    async fn seat(&self, lobby: Versioned<Lobby>, user_id: UserId) -> Result<Seated, StoreError> {
        let Versioned { version, document } = lobby;

        let mut players = document.players.clone();
        players.push(user_id.clone());
        let fills = players.len() >= document.max_players;

        let patch = if fills {
            LobbyPatch {
                players: Some(players),
                status: Some(LobbyStatus::Started),
                started_at: Some(Utc::now()),
                match_id: Some(MatchId::new()),
            }
        } else {
            LobbyPatch {
                players: Some(players),
                ..Default::default()
            }
        };

        let updated = self
            .stores
            .lobbies
            .update_one(&document.id, patch, Some(version))
            .await?
            .into_inner();

        debug!(lobby_id = %updated.id, user_id = %user_id, seated = updated.players.len(), "Player joined lobby");
        self.metrics.players_joined.inc();

        if fills {
            Ok(Seated::Filled(updated))
        } else {
            Ok(Seated::Waiting(updated))
        }
    }

    async fn start_match(&self, lobby: Lobby) -> PayoutResult<JoinOutcome> {
        let match_id = lobby
            .match_id
            .ok_or_else(|| PayoutError::InvalidInput(format!("lobby {} has no match id", lobby.id)))?;
        let game_match = Match::from_lobby(match_id, &lobby);

        self.metrics.open_lobbies.dec();
        match self.stores.matches.insert(game_match.clone()).await {
            Ok(_) => {
                info!(
                    lobby_id = %lobby.id,
                    match_id = %match_id,
                    players = game_match.players.len(),
                    "Lobby full, match started"
                );
                self.metrics.matches_started.inc();
                Ok(JoinOutcome::Started {
                    lobby_id: lobby.id,
                    game_match,
                })
            }
            Err(StoreError::Duplicate { .. }) => {
                let existing = self.get_match(&match_id).await?;
                Ok(JoinOutcome::Started {
                    lobby_id: lobby.id,
                    game_match: existing,
                })
            }
            Err(e) => {
                error!(lobby_id = %lobby.id, match_id = %match_id, error = %e, "Match insert failed; recovery will create it");
                Err(e.into())
            }
        }
    }
}

enum Seated {
    Waiting(Lobby),
    Filled(Lobby),
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn matchmaker(max_players: usize) -> Matchmaker {
        Matchmaker::new(
            Stores::in_memory(),
            MatchmakingConfig {
                max_players,
                max_join_retries: 4,
            },
            Metrics::new().unwrap(),
        )
    }

    fn user(name: &str) -> UserId {
        UserId::new(name).unwrap()
    }

    #[tokio::test]
    async fn test_rejects_wager_whose_pot_overflows() {
        let mm = matchmaker(2);
        assert!(matches!(
            mm.join_lobby(user("a"), Decimal::MAX).await,
            Err(PayoutError::InvalidInput(_))
        ));
        assert!(mm
            .stores
            .lobbies
            .find_many(&LobbyFilter::default(), None, None)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_rejects_non_positive_wager() {
        let mm = matchmaker(2);
        assert!(matches!(
            mm.join_lobby(user("a"), Decimal::ZERO).await,
            Err(PayoutError::InvalidInput(_))
        ));
        assert!(matches!(
            mm.join_lobby(user("a"), dec!(-5)).await,
            Err(PayoutError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_rejoin_is_noop() {
        let mm = matchmaker(3);
        let first = mm.join_lobby(user("a"), dec!(5)).await.unwrap();
        let again = mm.join_lobby(user("a"), dec!(5.00)).await.unwrap();
        assert_eq!(first.lobby_id(), again.lobby_id());
        match again {
            JoinOutcome::Waiting { players, .. } => assert_eq!(players, vec![user("a")]),
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_recover_creates_missing_match() {
        let mm = matchmaker(2);
        let mut lobby = Lobby::open(dec!(5), 2, user("a"));
        lobby.players.push(user("b"));
        lobby.status = LobbyStatus::Started;
        lobby.started_at = Some(Utc::now());
        lobby.match_id = Some(MatchId::new());
        let match_id = lobby.match_id.unwrap();
        mm.stores.lobbies.insert(lobby).await.unwrap();

        assert_eq!(mm.recover_started_lobbies().await.unwrap(), 1);
        let created = mm.get_match(&match_id).await.unwrap();
        assert_eq!(created.players, vec![user("a"), user("b")]);

        assert_eq!(mm.recover_started_lobbies().await.unwrap(), 0);
    }
}

//! Match completion and payout
//!
//! Completion is written once, guarded by a per-match lock and a version
//! check on the match record. Crediting the winner is a separate step that
//! goes through the ledger's idempotent payout credit, so it can be replayed
//! by the recovery pass until `credited_at` is stamped.

use crate::common::{Currency, MatchId, Precision, TransactionId, UserId};
use crate::errors::{PayoutError, PayoutResult, StoreError};
use crate::ledger::Ledger;
use crate::locks::KeyedLocks;
use crate::metrics::Metrics;
use crate::models::{
    LobbyFilter, LobbyPatch, LobbyStatus, Match, MatchCompletion, MatchFilter, MatchPatch,
    MatchResult, SettlementAmounts, TransactionFilter, TransactionKind, TransactionStatus,
};
use crate::pricing::PricingOracle;
use crate::store::{SortOrder, Stores, Versioned};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Non-fatal conditions attached to a successful settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementWarning {
    /// Winner recorded but there was no wallet to credit
    MissingWallet { user_id: UserId },
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementReceipt {
    pub match_id: MatchId,
    pub winner_user_id: UserId,
    pub pot_usd: Decimal,
    pub fee_usd: Decimal,
    pub payout_usd: Decimal,
    pub payout_sol: Decimal,
    pub transaction_id: Option<TransactionId>,
    /// True when the match had already been completed by an earlier call
    pub replayed: bool,
    pub warnings: Vec<SettlementWarning>,
}

/// Outcome of one [`SettlementEngine::recover_uncredited`] pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub scanned: usize,
    pub credited: usize,
    pub missing_wallet: usize,
    pub failed: usize,
}

/// Live totals across all lobbies and payouts
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GlobalStats {
    /// Lobbies currently in the started state
    pub players_in_game: usize,
    pub global_player_winnings_usd: Decimal,
}

struct CreditResult {
    transaction_id: Option<TransactionId>,
    warnings: Vec<SettlementWarning>,
}

pub struct SettlementEngine {
    stores: Stores,
    ledger: Arc<Ledger>,
    oracle: Arc<dyn PricingOracle>,
    fee_rate: Decimal,
    precision: Precision,
    locks: KeyedLocks<MatchId>,
    metrics: Metrics,
}

impl SettlementEngine {
    pub fn new(
        stores: Stores,
        ledger: Arc<Ledger>,
        oracle: Arc<dyn PricingOracle>,
        fee_rate: Decimal,
        precision: Precision,
        metrics: Metrics,
    ) -> Self {
        Self {
            stores,
            ledger,
            oracle,
            fee_rate,
            precision,
            locks: KeyedLocks::new(),
            metrics,
        }
    }

    /// Record results, pick the winner and credit the payout
    ///
    /// Calling this again for a completed match returns the stored outcome
    /// and never credits twice.
    pub async fn complete_match(
        &self,
        match_id: MatchId,
        results: Vec<MatchResult>,
    ) -> PayoutResult<SettlementReceipt> {
        if results.is_empty() {
            return Err(PayoutError::InvalidInput("no results provided".to_string()));
        }

        let started = Instant::now();
        let _guard = self.locks.lock(match_id).await;

        let current = self.load(&match_id).await?;
        if current.document.is_completed() {
            return self.replay(current.into_inner()).await;
        }

        let results = filter_results(&current.document, results);
        let winner = pick_winner(&results)
            .ok_or_else(|| {
                PayoutError::InvalidResult(format!(
                    "none of the submitted results belong to a player of match {}",
                    match_id
                ))
            })?
            .user_id
            .clone();

        let amounts = self.compute_amounts(&current.document).await?;

        let completion = MatchCompletion {
            completed_at: Utc::now(),
            winner_user_id: winner.clone(),
            results,
            settlement: amounts,
        };
        let completed = match self
            .stores
            .matches
            .update_one(
                &match_id,
                MatchPatch {
                    completion: Some(completion),
                    ..Default::default()
                },
                Some(current.version),
            )
            .await
        {
            Ok(updated) => updated.into_inner(),
            Err(StoreError::VersionConflict { .. }) => {
                // Completed by another process sharing the store
                let fresh = self.load(&match_id).await?.into_inner();
                if fresh.is_completed() {
                    return self.replay(fresh).await;
                }
                return Err(PayoutError::Contention {
                    operation: "complete_match",
                    attempts: 1,
                });
            }
            Err(e) => return Err(e.into()),
        };

        info!(
            match_id = %match_id,
            winner = %winner,
            players = completed.players.len(),
            "Match completed"
        );
        self.metrics.matches_settled.inc();

        self.complete_lobby(&completed).await?;
        let credit = self.credit_winner(&completed).await?;

        self.metrics
            .settlement_duration
            .observe(started.elapsed().as_secs_f64());
        receipt(&completed, credit, false)
    }

    /// Re-run the credit step for completed matches never marked credited
    ///
    /// Interrupted credits and matches whose winner had no wallet are
    /// scanned as separate batches of up to `limit` each.
    pub async fn recover_uncredited(&self, limit: usize) -> PayoutResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        self.recover_batch(&MatchFilter::completed_uncredited(), Some(limit), &mut report)
            .await?;
        self.recover_batch(&MatchFilter::awaiting_wallet(None), Some(limit), &mut report)
            .await?;

        if report.credited > 0 || report.failed > 0 {
            info!(
                scanned = report.scanned,
                credited = report.credited,
                missing_wallet = report.missing_wallet,
                failed = report.failed,
                "Uncredited match recovery pass"
            );
        }
        Ok(report)
    }

    /// Credit payouts that were waiting on this user's wallet
    pub async fn credit_awaiting(&self, user_id: &UserId) -> PayoutResult<RecoveryReport> {
        let mut report = RecoveryReport::default();
        let filter = MatchFilter::awaiting_wallet(Some(user_id.clone()));
        self.recover_batch(&filter, None, &mut report).await?;
        if report.credited > 0 {
            info!(user_id = %user_id, credited = report.credited, "Credited payouts held for a new wallet");
        }
        Ok(report)
    }

    /// Started lobbies and the USD paid out to winners so far
    pub async fn stats(&self) -> PayoutResult<GlobalStats> {
        let in_game = self
            .stores
            .lobbies
            .find_many(&LobbyFilter::with_status(LobbyStatus::Started), None, None)
            .await?;

        let payouts = self
            .stores
            .transactions
            .find_many(
                &TransactionFilter {
                    kind: Some(TransactionKind::Payout),
                    status: Some(TransactionStatus::Confirmed),
                    ..Default::default()
                },
                None,
                None,
            )
            .await?;
        let mut winnings = Decimal::ZERO;
        for payout in &payouts {
            winnings = winnings
                .checked_add(payout.document.amount_usd)
                .ok_or_else(|| PayoutError::InvalidInput("payout total out of range".to_string()))?;
        }

        Ok(GlobalStats {
            players_in_game: in_game.len(),
            global_player_winnings_usd: self.precision.display(winnings),
        })
    }

    async fn recover_batch(
        &self,
        filter: &MatchFilter,
        limit: Option<usize>,
        report: &mut RecoveryReport,
    ) -> PayoutResult<()> {
        let pending = self
            .stores
            .matches
            .find_many(filter, Some(SortOrder::OldestFirst), limit)
            .await?;
        report.scanned += pending.len();

        for candidate in pending {
            let match_id = candidate.document.id;
            let _guard = self.locks.lock(match_id).await;

            let current = match self.load(&match_id).await {
                Ok(current) => current.into_inner(),
                Err(e) => {
                    warn!(match_id = %match_id, error = %e, "Could not reload match for recovery");
                    report.failed += 1;
                    continue;
                }
            };
            if current.credited_at.is_some() {
                continue;
            }

            let outcome = async {
                self.complete_lobby(&current).await?;
                self.credit_winner(&current).await
            }
            .await;

            match outcome {
                Ok(credit) if credit.warnings.is_empty() => report.credited += 1,
                Ok(_) => report.missing_wallet += 1,
                Err(e) => {
                    warn!(match_id = %match_id, error = %e, "Recovery credit failed");
                    report.failed += 1;
                }
            }
        }
        Ok(())
    }

    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }

    async fn replay(&self, completed: Match) -> PayoutResult<SettlementReceipt> {
        debug!(match_id = %completed.id, "Match already completed, replaying outcome");
        self.metrics.settlement_replays.inc();

        self.complete_lobby(&completed).await?;
        let credit = if completed.credited_at.is_some() {
            // The payout exists; look it up for the receipt only
            let tx = self
                .stores
                .transactions
                .find_one(&TransactionFilter::payout_for(completed.id))
                .await?;
            CreditResult {
                transaction_id: tx.map(|t| t.document.id),
                warnings: Vec::new(),
            }
        } else {
            self.credit_winner(&completed).await?
        };

        receipt(&completed, credit, true)
    }

    async fn compute_amounts(&self, game_match: &Match) -> PayoutResult<SettlementAmounts> {
        let rate = self.oracle.rate(Currency::Usd, Currency::Sol).await?;
        compute_payout(
            game_match.wager_usd,
            game_match.players.len(),
            self.fee_rate,
            rate,
            &self.precision,
        )
    }

    /// Forward-only; a lobby already completed is left alone
    async fn complete_lobby(&self, game_match: &Match) -> PayoutResult<()> {
        let Some(lobby) = self.stores.lobbies.get(&game_match.lobby_id).await? else {
            warn!(match_id = %game_match.id, lobby_id = %game_match.lobby_id, "Lobby of settled match is missing");
            return Ok(());
        };
        if !lobby.document.status.can_advance_to(LobbyStatus::Completed) {
            return Ok(());
        }

        match self
            .stores
            .lobbies
            .update_one(
                &lobby.document.id,
                LobbyPatch {
                    status: Some(LobbyStatus::Completed),
                    ..Default::default()
                },
                Some(lobby.version),
            )
            .await
        {
            Ok(_) => Ok(()),
            // Completed concurrently; status only moves forward so this is the same end state
            Err(StoreError::VersionConflict { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn credit_winner(&self, completed: &Match) -> PayoutResult<CreditResult> {
        let (Some(winner), Some(amounts)) = (&completed.winner_user_id, &completed.settlement) else {
            return Err(PayoutError::InvalidResult(format!(
                "match {} is not completed",
                completed.id
            )));
        };

        let metadata = serde_json::json!({
            "match_id": completed.id,
            "lobby_id": completed.lobby_id,
            "pot_usd": amounts.pot_usd,
            "fee_usd": amounts.fee_usd,
            "fee_rate": amounts.fee_rate,
        });

        let outcome = self
            .ledger
            .credit_payout(
                completed.id,
                winner,
                amounts.payout_sol,
                amounts.payout_usd,
                metadata,
            )
            .await;

        match outcome {
            Ok(credit) => {
                self.stores
                    .matches
                    .update_one(
                        &completed.id,
                        MatchPatch {
                            credited_at: Some(Utc::now()),
                            ..Default::default()
                        },
                        None,
                    )
                    .await?;
                Ok(CreditResult {
                    transaction_id: Some(credit.transaction().id),
                    warnings: Vec::new(),
                })
            }
            Err(PayoutError::NotFound { entity: "wallet", .. }) => {
                error!(
                    match_id = %completed.id,
                    winner = %winner,
                    payout_usd = %amounts.payout_usd,
                    "Winner has no wallet; payout not credited"
                );
                self.metrics.missing_wallet.inc();
                self.stores
                    .matches
                    .update_one(
                        &completed.id,
                        MatchPatch {
                            missing_wallet_at: Some(Utc::now()),
                            ..Default::default()
                        },
                        None,
                    )
                    .await?;
                Ok(CreditResult {
                    transaction_id: None,
                    warnings: vec![SettlementWarning::MissingWallet {
                        user_id: winner.clone(),
                    }],
                })
            }
            Err(e) => {
                error!(match_id = %completed.id, error = %e, "Payout credit failed; recovery will retry");
                Err(e)
            }
        }
    }

    async fn load(&self, match_id: &MatchId) -> PayoutResult<Versioned<Match>> {
        self.stores
            .matches
            .get(match_id)
            .await?
            .ok_or_else(|| PayoutError::not_found("match", match_id))
    }
}

fn receipt(completed: &Match, credit: CreditResult, replayed: bool) -> PayoutResult<SettlementReceipt> {
    let (Some(winner), Some(amounts)) = (&completed.winner_user_id, &completed.settlement) else {
        return Err(PayoutError::InvalidResult(format!(
            "match {} has no recorded outcome",
            completed.id
        )));
    };
    Ok(SettlementReceipt {
        match_id: completed.id,
        winner_user_id: winner.clone(),
        pot_usd: amounts.pot_usd,
        fee_usd: amounts.fee_usd,
        payout_usd: amounts.payout_usd,
        payout_sol: amounts.payout_sol,
        transaction_id: credit.transaction_id,
        replayed,
        warnings: credit.warnings,
    })
}

/// Keep results for players of the match, first submission per player
pub fn filter_results(game_match: &Match, results: Vec<MatchResult>) -> Vec<MatchResult> {
    let mut seen = HashSet::new();
    results
        .into_iter()
        .filter(|r| game_match.has_player(&r.user_id) && seen.insert(r.user_id.clone()))
        .collect()
}

/// Lowest rank wins (missing ranks last), then the highest score.
/// Full ties keep submission order.
pub fn pick_winner(results: &[MatchResult]) -> Option<&MatchResult> {
    let mut ordered: Vec<&MatchResult> = results.iter().collect();
    ordered.sort_by(|a, b| {
        let rank_a = (a.rank.is_none(), a.rank);
        let rank_b = (b.rank.is_none(), b.rank);
        rank_a.cmp(&rank_b).then_with(|| b.score.total_cmp(&a.score))
    });
    ordered.into_iter().next()
}

/// Pot, fee and payout for a match
///
/// Fails with `InvalidInput` when an amount leaves the decimal range.
pub fn compute_payout(
    wager_usd: Decimal,
    player_count: usize,
    fee_rate: Decimal,
    usd_to_sol: Decimal,
    precision: &Precision,
) -> PayoutResult<SettlementAmounts> {
    let out_of_range = || {
        PayoutError::InvalidInput(format!(
            "payout for {} players at {} USD is out of range",
            player_count, wager_usd
        ))
    };
    let pot_usd = precision.display(
        wager_usd
            .checked_mul(Decimal::from(player_count))
            .ok_or_else(out_of_range)?,
    );
    let fee_usd = precision.display(pot_usd.checked_mul(fee_rate).ok_or_else(out_of_range)?);
    let payout_usd = precision.display(pot_usd.checked_sub(fee_usd).ok_or_else(out_of_range)?);
    let payout_sol = precision.settlement(payout_usd.checked_mul(usd_to_sol).ok_or_else(out_of_range)?);

    Ok(SettlementAmounts {
        pot_usd,
        fee_rate,
        fee_usd,
        payout_usd,
        payout_sol,
        rate_usd_to_sol: usd_to_sol,
    })
}

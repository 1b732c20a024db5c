//! Match completion, winner payout and recovery of uncredited matches

use async_trait::async_trait;
use paperpayout::{
    common::{MatchId, UserId},
    config::{ConfigBuilder, SettlementConfig},
    errors::{StoreError, StoreResult},
    factory::{CoreFactory, PayoutCore},
    models::{
        LobbyStatus, Match, MatchFilter, MatchPatch, MatchResult, Transaction, TransactionKind,
        TransactionStatus, Wallet,
    },
    pricing::FixedRateOracle,
    store::{Collection, MemoryCollection, SortOrder, Stores, Versioned},
    JoinOutcome, PayoutError, SettlementWarning,
};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex};

fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

fn result(name: &str, score: f64, rank: Option<u32>) -> MatchResult {
    MatchResult {
        user_id: user(name),
        score,
        rank,
        time: None,
    }
}

fn core(max_players: usize) -> PayoutCore {
    CoreFactory::from_config(ConfigBuilder::new().max_players(max_players).build()).unwrap()
}

/// Seat every player and return the match created when the lobby fills
async fn start_match(core: &PayoutCore, players: &[&str], wager: rust_decimal::Decimal) -> Match {
    let mut started = None;
    for name in players {
        if let JoinOutcome::Started { game_match, .. } =
            core.matchmaker.join_lobby(user(name), wager).await.unwrap()
        {
            started = Some(game_match);
        }
    }
    started.expect("lobby did not fill")
}

async fn open_wallets(core: &PayoutCore, players: &[&str]) {
    for name in players {
        core.ledger.open_wallet(user(name), None).await.unwrap();
    }
}

#[tokio::test]
async fn test_winner_receives_pot_minus_fee() {
    let core = core(4);
    let players = ["ann", "ben", "cat", "dan"];
    open_wallets(&core, &players).await;
    let game_match = start_match(&core, &players, dec!(5)).await;

    let receipt = core
        .settlement
        .complete_match(
            game_match.id,
            vec![
                result("ann", 10.0, Some(3)),
                result("ben", 5.0, Some(1)),
                result("cat", 99.0, None),
                result("dan", 1.0, Some(2)),
            ],
        )
        .await
        .unwrap();

    assert_eq!(receipt.winner_user_id, user("ben"));
    assert_eq!(receipt.pot_usd, dec!(20));
    assert_eq!(receipt.fee_usd, dec!(2));
    assert_eq!(receipt.payout_usd, dec!(18));
    assert_eq!(receipt.payout_sol, dec!(0.09));
    assert!(!receipt.replayed);
    assert!(receipt.warnings.is_empty());

    let wallet = core.ledger.get_wallet(&user("ben")).await.unwrap();
    assert_eq!(wallet.balance_sol, dec!(0.09));
    assert_eq!(wallet.balance_usd, dec!(18));

    let history = core.ledger.transactions(&user("ben"), None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, TransactionKind::Payout);
    assert_eq!(history[0].status, TransactionStatus::Confirmed);
    assert_eq!(history[0].match_id, Some(game_match.id));
    assert_eq!(Some(history[0].id), receipt.transaction_id);

    // Losers are untouched
    let loser = core.ledger.get_wallet(&user("ann")).await.unwrap();
    assert_eq!(loser.balance_sol, dec!(0));

    let stored = core.matchmaker.get_match(&game_match.id).await.unwrap();
    assert_eq!(stored.winner_user_id, Some(user("ben")));
    assert!(stored.completed_at.is_some());
    assert!(stored.credited_at.is_some());

    let lobby = core.matchmaker.get_lobby(&game_match.lobby_id).await.unwrap();
    assert_eq!(lobby.status, LobbyStatus::Completed);
}

#[tokio::test]
async fn test_score_breaks_rank_ties() {
    let core = core(2);
    open_wallets(&core, &["a", "b"]).await;
    let game_match = start_match(&core, &["a", "b"], dec!(1)).await;

    let receipt = core
        .settlement
        .complete_match(
            game_match.id,
            vec![result("a", 40.0, None), result("b", 70.0, None)],
        )
        .await
        .unwrap();
    assert_eq!(receipt.winner_user_id, user("b"));
}

#[tokio::test]
async fn test_second_completion_replays_without_crediting() {
    let core = core(2);
    open_wallets(&core, &["a", "b"]).await;
    let game_match = start_match(&core, &["a", "b"], dec!(5)).await;

    let first = core
        .settlement
        .complete_match(game_match.id, vec![result("a", 1.0, Some(1))])
        .await
        .unwrap();

    // Different results must not change the recorded winner
    let second = core
        .settlement
        .complete_match(game_match.id, vec![result("b", 1.0, Some(1))])
        .await
        .unwrap();

    assert!(second.replayed);
    assert_eq!(second.winner_user_id, user("a"));
    assert_eq!(second.transaction_id, first.transaction_id);

    let wallet = core.ledger.get_wallet(&user("a")).await.unwrap();
    assert_eq!(wallet.balance_sol, dec!(0.045));
    assert_eq!(core.ledger.transactions(&user("a"), None).await.unwrap().len(), 1);
    assert_eq!(core.metrics.settlement_replays.get(), 1);
}

#[tokio::test]
async fn test_missing_wallet_is_a_warning() {
    let core = core(2);
    let game_match = start_match(&core, &["a", "b"], dec!(5)).await;

    let receipt = core
        .settlement
        .complete_match(game_match.id, vec![result("a", 1.0, Some(1))])
        .await
        .unwrap();

    assert_eq!(receipt.winner_user_id, user("a"));
    assert_eq!(receipt.transaction_id, None);
    assert_eq!(
        receipt.warnings,
        vec![SettlementWarning::MissingWallet { user_id: user("a") }]
    );

    let stored = core.matchmaker.get_match(&game_match.id).await.unwrap();
    assert!(stored.completed_at.is_some());
    assert!(stored.credited_at.is_none());
    assert!(stored.missing_wallet_at.is_some());
    assert_eq!(core.metrics.missing_wallet.get(), 1);
}

#[tokio::test]
async fn test_recovery_credits_once_wallet_exists() {
    let core = core(2);
    let game_match = start_match(&core, &["a", "b"], dec!(5)).await;
    core.settlement
        .complete_match(game_match.id, vec![result("a", 1.0, Some(1))])
        .await
        .unwrap();

    let report = core.settlement.recover_uncredited(10).await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.missing_wallet, 1);
    assert_eq!(report.credited, 0);

    core.ledger.open_wallet(user("a"), None).await.unwrap();
    let report = core.settlement.recover_uncredited(10).await.unwrap();
    assert_eq!(report.credited, 1);

    let report = core.settlement.recover_uncredited(10).await.unwrap();
    assert_eq!(report.scanned, 0);

    let wallet = core.ledger.get_wallet(&user("a")).await.unwrap();
    assert_eq!(wallet.balance_sol, dec!(0.045));
}

#[tokio::test]
async fn test_credit_outage_is_retried_safely() {
    let transactions = Arc::new(MemoryCollection::<Transaction>::new());
    let wallets = Arc::new(MemoryCollection::<Wallet>::new());
    let mut stores = Stores::in_memory();
    stores.transactions = transactions.clone();
    stores.wallets = wallets.clone();

    let core = CoreFactory::with_parts(
        ConfigBuilder::new().max_players(2).build(),
        stores,
        Arc::new(FixedRateOracle::new(dec!(200)).unwrap()),
    )
    .unwrap();
    open_wallets(&core, &["a", "b"]).await;
    let game_match = start_match(&core, &["a", "b"], dec!(5)).await;

    transactions.set_available(false);
    let failed = core
        .settlement
        .complete_match(game_match.id, vec![result("a", 1.0, Some(1))])
        .await;
    assert!(matches!(failed, Err(PayoutError::StoreUnavailable(_))));

    // The outcome was recorded before the credit failed
    let stored = core.matchmaker.get_match(&game_match.id).await.unwrap();
    assert_eq!(stored.winner_user_id, Some(user("a")));
    assert!(stored.credited_at.is_none());

    transactions.set_available(true);
    let receipt = core
        .settlement
        .complete_match(game_match.id, vec![result("b", 1.0, Some(1))])
        .await
        .unwrap();
    assert!(receipt.replayed);
    assert!(receipt.transaction_id.is_some());

    let report = core.settlement.recover_uncredited(10).await.unwrap();
    assert_eq!(report.scanned, 0);

    let wallet = core.ledger.get_wallet(&user("a")).await.unwrap();
    assert_eq!(wallet.balance_sol, dec!(0.045));
    assert_eq!(core.ledger.transactions(&user("a"), None).await.unwrap().len(), 1);
    assert_eq!(wallets.len(), 2);
}

#[tokio::test]
async fn test_results_from_strangers_are_rejected() {
    let core = core(2);
    let game_match = start_match(&core, &["a", "b"], dec!(5)).await;

    let err = core
        .settlement
        .complete_match(game_match.id, vec![result("mallory", 100.0, Some(1))])
        .await
        .unwrap_err();
    assert!(matches!(err, PayoutError::InvalidResult(_)));

    let stored = core.matchmaker.get_match(&game_match.id).await.unwrap();
    assert!(stored.completed_at.is_none());
}

#[tokio::test]
async fn test_empty_results_and_unknown_match() {
    let core = core(2);
    let game_match = start_match(&core, &["a", "b"], dec!(5)).await;

    let err = core
        .settlement
        .complete_match(game_match.id, Vec::new())
        .await
        .unwrap_err();
    assert!(matches!(err, PayoutError::InvalidInput(_)));

    let err = core
        .settlement
        .complete_match(MatchId::new(), vec![result("a", 1.0, Some(1))])
        .await
        .unwrap_err();
    assert!(matches!(err, PayoutError::NotFound { entity: "match", .. }));
}

#[tokio::test]
async fn test_fee_rate_is_configurable() {
    let core = CoreFactory::from_config(
        ConfigBuilder::new()
            .max_players(2)
            .fee_rate(dec!(0.25))
            .build(),
    )
    .unwrap();
    open_wallets(&core, &["a", "b"]).await;
    let game_match = start_match(&core, &["a", "b"], dec!(10)).await;

    let receipt = core
        .settlement
        .complete_match(game_match.id, vec![result("a", 1.0, Some(1))])
        .await
        .unwrap();
    assert_eq!(receipt.pot_usd, dec!(20));
    assert_eq!(receipt.fee_usd, dec!(5));
    assert_eq!(receipt.payout_usd, dec!(15));
    assert_eq!(receipt.payout_sol, dec!(0.075));
}

#[tokio::test]
async fn test_wallet_less_winners_do_not_starve_recovery() {
    let transactions = Arc::new(MemoryCollection::<Transaction>::new());
    let mut stores = Stores::in_memory();
    stores.transactions = transactions.clone();
    let config = ConfigBuilder::new()
        .max_players(2)
        .settlement(SettlementConfig {
            recovery_batch_size: 1,
            ..Default::default()
        })
        .build();
    let core = CoreFactory::with_parts(config, stores, Arc::new(FixedRateOracle::new(dec!(200)).unwrap())).unwrap();

    // Older match won by a player who never opens a wallet
    let ghost_match = start_match(&core, &["ghost", "x"], dec!(5)).await;
    core.settlement
        .complete_match(ghost_match.id, vec![result("ghost", 1.0, Some(1))])
        .await
        .unwrap();

    // Newer match whose credit fails during a transactions outage
    open_wallets(&core, &["c", "d"]).await;
    let game_match = start_match(&core, &["c", "d"], dec!(5)).await;
    transactions.set_available(false);
    assert!(core
        .settlement
        .complete_match(game_match.id, vec![result("c", 1.0, Some(1))])
        .await
        .is_err());
    transactions.set_available(true);

    let (_, report) = core.run_recovery().await.unwrap();
    assert_eq!(report.credited, 1);
    assert_eq!(report.missing_wallet, 1);
    assert_eq!(core.ledger.get_wallet(&user("c")).await.unwrap().balance_sol, dec!(0.045));

    for _ in 0..4 {
        let (_, report) = core.run_recovery().await.unwrap();
        assert_eq!(report.credited, 0);
    }
    assert_eq!(core.ledger.get_wallet(&user("c")).await.unwrap().balance_sol, dec!(0.045));
    assert_eq!(core.ledger.transactions(&user("c"), None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_opening_wallet_credits_held_payouts() {
    let core = core(2);
    let first = start_match(&core, &["late", "b"], dec!(5)).await;
    let second = start_match(&core, &["late", "b"], dec!(10)).await;
    for game_match in [&first, &second] {
        core.settlement
            .complete_match(game_match.id, vec![result("late", 1.0, Some(1))])
            .await
            .unwrap();
    }

    let wallet = core.open_wallet(user("late"), None).await.unwrap();
    // 0.045 + 0.09
    assert_eq!(wallet.balance_sol, dec!(0.135));
    assert!(core.ledger.reconcile(&user("late")).await.unwrap().consistent);

    let report = core.settlement.recover_uncredited(10).await.unwrap();
    assert_eq!(report.scanned, 0);
    let stored = core.matchmaker.get_match(&second.id).await.unwrap();
    assert!(stored.credited_at.is_some());
}

#[tokio::test]
async fn test_oversized_wager_never_reaches_settlement() {
    let core = core(2);
    let err = core.matchmaker.join_lobby(user("a"), Decimal::MAX).await.unwrap_err();
    assert!(matches!(err, PayoutError::InvalidInput(_)));
    assert_eq!(core.settlement.stats().await.unwrap().players_in_game, 0);
}

#[tokio::test]
async fn test_stats_track_started_lobbies_and_winnings() {
    let core = core(2);
    open_wallets(&core, &["a", "b", "c", "d"]).await;

    let settled = start_match(&core, &["a", "b"], dec!(5)).await;
    start_match(&core, &["c", "d"], dec!(10)).await;
    core.matchmaker.join_lobby(user("e"), dec!(1)).await.unwrap();

    let stats = core.settlement.stats().await.unwrap();
    assert_eq!(stats.players_in_game, 2);
    assert_eq!(stats.global_player_winnings_usd, dec!(0));

    core.settlement
        .complete_match(settled.id, vec![result("b", 1.0, Some(1))])
        .await
        .unwrap();
    let stats = core.settlement.stats().await.unwrap();
    assert_eq!(stats.players_in_game, 1);
    assert_eq!(stats.global_player_winnings_usd, dec!(9));
}

/// Match collection whose lookups fail for one id
struct UnreadableMatch {
    inner: MemoryCollection<Match>,
    broken: Mutex<Option<MatchId>>,
}

#[async_trait]
impl Collection<Match> for UnreadableMatch {
    async fn get(&self, id: &MatchId) -> StoreResult<Option<Versioned<Match>>> {
        if *self.broken.lock().unwrap() == Some(*id) {
            return Err(StoreError::Unavailable("match record unreadable".into()));
        }
        self.inner.get(id).await
    }

    async fn find_many(
        &self,
        filter: &MatchFilter,
        sort: Option<SortOrder>,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Versioned<Match>>> {
        self.inner.find_many(filter, sort, limit).await
    }

    async fn insert(&self, document: Match) -> StoreResult<MatchId> {
        self.inner.insert(document).await
    }

    async fn update_one(
        &self,
        id: &MatchId,
        patch: MatchPatch,
        expected_version: Option<u64>,
    ) -> StoreResult<Versioned<Match>> {
        self.inner.update_one(id, patch, expected_version).await
    }
}

#[tokio::test]
async fn test_unreadable_match_does_not_abort_recovery() {
    let matches = Arc::new(UnreadableMatch {
        inner: MemoryCollection::new(),
        broken: Mutex::new(None),
    });
    let transactions = Arc::new(MemoryCollection::<Transaction>::new());
    let mut stores = Stores::in_memory();
    stores.matches = matches.clone();
    stores.transactions = transactions.clone();
    let core = CoreFactory::with_parts(
        ConfigBuilder::new().max_players(2).build(),
        stores,
        Arc::new(FixedRateOracle::new(dec!(200)).unwrap()),
    )
    .unwrap();
    open_wallets(&core, &["a", "b", "c", "d"]).await;

    let older = start_match(&core, &["a", "b"], dec!(5)).await;
    let newer = start_match(&core, &["c", "d"], dec!(5)).await;
    transactions.set_available(false);
    for (game_match, winner) in [(&older, "a"), (&newer, "c")] {
        assert!(core
            .settlement
            .complete_match(game_match.id, vec![result(winner, 1.0, Some(1))])
            .await
            .is_err());
    }
    transactions.set_available(true);

    *matches.broken.lock().unwrap() = Some(older.id);
    let report = core.settlement.recover_uncredited(10).await.unwrap();
    assert_eq!(report.scanned, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.credited, 1);
    assert_eq!(core.ledger.get_wallet(&user("c")).await.unwrap().balance_sol, dec!(0.045));

    *matches.broken.lock().unwrap() = None;
    let report = core.settlement.recover_uncredited(10).await.unwrap();
    assert_eq!(report.credited, 1);
    assert_eq!(core.ledger.get_wallet(&user("a")).await.unwrap().balance_sol, dec!(0.045));
}

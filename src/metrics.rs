//! Prometheus metrics for lobbies, settlement and wallets
//!
//! Each `Metrics` owns its registry, so several cores can live in one process
//! (tests do this) without colliding on metric names.
//!
//! - `paperpayout_lobbies_created_total`
//! - `paperpayout_players_joined_total`
//! - `paperpayout_matches_started_total`
//! - `paperpayout_matches_settled_total`
//! - `paperpayout_settlement_replays_total` - completions answered from the stored outcome
//! - `paperpayout_missing_wallet_total` - winners settled without a wallet to credit
//! - `paperpayout_join_conflicts_total` - optimistic lobby writes that lost a race
//! - `paperpayout_wallet_mutations_total{kind}`
//! - `paperpayout_open_lobbies`
//! - `paperpayout_settlement_duration_seconds`

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub lobbies_created: IntCounter,
    pub players_joined: IntCounter,
    pub matches_started: IntCounter,
    pub matches_settled: IntCounter,
    pub settlement_replays: IntCounter,
    pub missing_wallet: IntCounter,
    pub join_conflicts: IntCounter,
    pub wallet_mutations: IntCounterVec,
    pub open_lobbies: IntGauge,
    pub settlement_duration: Histogram,
    registry: Arc<Registry>,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let counter = |name: &str, help: &str| -> prometheus::Result<IntCounter> {
            let c = IntCounter::new(format!("paperpayout_{}", name), help)?;
            registry.register(Box::new(c.clone()))?;
            Ok(c)
        };

        let lobbies_created = counter("lobbies_created_total", "Lobbies opened")?;
        let players_joined = counter("players_joined_total", "Players seated in a lobby")?;
        let matches_started = counter("matches_started_total", "Matches created from full lobbies")?;
        let matches_settled = counter("matches_settled_total", "Matches completed with a winner")?;
        let settlement_replays = counter(
            "settlement_replays_total",
            "Completion requests answered from an already settled match",
        )?;
        let missing_wallet = counter(
            "missing_wallet_total",
            "Settled matches whose winner had no wallet",
        )?;
        let join_conflicts = counter(
            "join_conflicts_total",
            "Lobby writes rejected by the version check",
        )?;

        let wallet_mutations = IntCounterVec::new(
            Opts::new("paperpayout_wallet_mutations_total", "Balance changes by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(wallet_mutations.clone()))?;

        let open_lobbies = IntGauge::new("paperpayout_open_lobbies", "Lobbies currently waiting")?;
        registry.register(Box::new(open_lobbies.clone()))?;

        let settlement_duration = Histogram::with_opts(
            HistogramOpts::new(
                "paperpayout_settlement_duration_seconds",
                "Time to settle a match",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(settlement_duration.clone()))?;

        Ok(Self {
            lobbies_created,
            players_joined,
            matches_started,
            matches_settled,
            settlement_replays,
            missing_wallet,
            join_conflicts,
            wallet_mutations,
            open_lobbies,
            settlement_duration,
            registry,
        })
    }

    pub fn record_wallet_mutation(&self, kind: &str) {
        self.wallet_mutations.with_label_values(&[kind]).inc();
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Text exposition format for `/metrics`
    pub fn render(&self) -> prometheus::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_registries() {
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.lobbies_created.inc();
        assert_eq!(a.lobbies_created.get(), 1);
        assert_eq!(b.lobbies_created.get(), 0);
    }

    #[test]
    fn test_render_contains_counters() {
        let metrics = Metrics::new().unwrap();
        metrics.matches_settled.inc();
        metrics.record_wallet_mutation("deposit");
        metrics.open_lobbies.set(3);

        let text = metrics.render().unwrap();
        assert!(text.contains("paperpayout_matches_settled_total 1"));
        assert!(text.contains("paperpayout_wallet_mutations_total{kind=\"deposit\"} 1"));
        assert!(text.contains("paperpayout_open_lobbies 3"));
    }
}

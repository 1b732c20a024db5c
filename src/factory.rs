//! Wiring of stores, pricing and services from configuration
//!
//! Binaries and tests build a [`PayoutCore`] here instead of assembling the
//! services by hand.

use crate::config::{self, PayoutConfig, StorageBackend};
use crate::errors::{ConfigurationError, PayoutResult};
use crate::ledger::Ledger;
use crate::matchmaker::Matchmaker;
use crate::metrics::Metrics;
use crate::models::Wallet;
use crate::pricing::{FixedRateOracle, PricingOracle};
use crate::common::UserId;
use crate::settlement::{RecoveryReport, SettlementEngine};
use crate::store::Stores;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The assembled core services, sharing one set of stores
#[derive(Clone)]
pub struct PayoutCore {
    pub config: PayoutConfig,
    pub stores: Stores,
    pub metrics: Metrics,
    pub oracle: Arc<dyn PricingOracle>,
    pub ledger: Arc<Ledger>,
    pub matchmaker: Arc<Matchmaker>,
    pub settlement: Arc<SettlementEngine>,
}

impl PayoutCore {
    /// Open a wallet and credit any payouts its owner won before having one
    pub async fn open_wallet(&self, user_id: UserId, address: Option<String>) -> PayoutResult<Wallet> {
        let wallet = self.ledger.open_wallet(user_id, address).await?;
        match self.settlement.credit_awaiting(&wallet.user_id).await {
            Ok(report) if report.credited > 0 => self.ledger.get_wallet(&wallet.user_id).await,
            Ok(_) => Ok(wallet),
            Err(e) => {
                // The recovery pass picks these up later
                warn!(user_id = %wallet.user_id, error = %e, "Could not credit held payouts");
                Ok(wallet)
            }
        }
    }

    /// One recovery sweep: missing matches first, then uncredited payouts
    pub async fn run_recovery(&self) -> PayoutResult<(usize, RecoveryReport)> {
        let matches_created = self.matchmaker.recover_started_lobbies().await?;
        let report = self
            .settlement
            .recover_uncredited(self.config.settlement.recovery_batch_size)
            .await?;

        let pruned = self.matchmaker.prune_locks() + self.settlement.prune_locks() + self.ledger.prune_locks();
        if pruned > 0 {
            debug!(pruned, "Dropped idle keyed locks");
        }
        Ok((matches_created, report))
    }
}

/// Factory for building cores with different backends
pub struct CoreFactory;

impl CoreFactory {
    /// Build from configuration, opening the configured storage backend
    pub fn from_config(config: PayoutConfig) -> PayoutResult<PayoutCore> {
        config::validate(&config)?;
        let stores = Self::create_stores(&config)?;
        let oracle: Arc<dyn PricingOracle> = Arc::new(FixedRateOracle::new(
            config.settlement.settlement_currency_rate,
        )?);
        Self::assemble(config, stores, oracle)
    }

    /// In-memory core with default settings
    pub fn in_memory() -> PayoutResult<PayoutCore> {
        Self::from_config(PayoutConfig::default())
    }

    /// Build around caller-provided stores and pricing
    pub fn with_parts(
        config: PayoutConfig,
        stores: Stores,
        oracle: Arc<dyn PricingOracle>,
    ) -> PayoutResult<PayoutCore> {
        config::validate(&config)?;
        Self::assemble(config, stores, oracle)
    }

    fn assemble(
        config: PayoutConfig,
        stores: Stores,
        oracle: Arc<dyn PricingOracle>,
    ) -> PayoutResult<PayoutCore> {
        let metrics = Metrics::new().map_err(|e| {
            ConfigurationError::ValidationFailed(format!("metrics registry: {}", e))
        })?;
        let precision = config.settlement.precision();

        let ledger = Arc::new(Ledger::new(
            stores.clone(),
            oracle.clone(),
            config.wallet.clone(),
            precision,
            metrics.clone(),
        ));
        let matchmaker = Arc::new(Matchmaker::new(
            stores.clone(),
            config.matchmaking.clone(),
            metrics.clone(),
        ));
        let settlement = Arc::new(SettlementEngine::new(
            stores.clone(),
            ledger.clone(),
            oracle.clone(),
            config.settlement.fee_rate,
            precision,
            metrics.clone(),
        ));

        info!(
            max_players = config.matchmaking.max_players,
            fee_rate = %config.settlement.fee_rate,
            backend = ?config.storage.backend,
            "Payout core ready"
        );

        Ok(PayoutCore {
            config,
            stores,
            metrics,
            oracle,
            ledger,
            matchmaker,
            settlement,
        })
    }

    fn create_stores(config: &PayoutConfig) -> PayoutResult<Stores> {
        match config.storage.backend {
            StorageBackend::Memory => Ok(Stores::in_memory()),
            #[cfg(feature = "rocksdb")]
            StorageBackend::Rocksdb => {
                info!(path = %config.storage.data_dir, "Opening RocksDB collections");
                Ok(Stores::rocksdb(&config.storage.data_dir)?)
            }
            #[cfg(not(feature = "rocksdb"))]
            StorageBackend::Rocksdb => Err(ConfigurationError::ValidationFailed(
                "built without the `rocksdb` feature".to_string(),
            )
            .into()),
        }
    }
}

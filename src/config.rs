//! Configuration management with validation and defaults
//!
//! Values come from built-in defaults, an optional TOML file, then `PAYOUT_*`
//! environment variables. CLI flags are applied last by the binary.

use crate::common::Precision;
use crate::errors::{ConfigurationError, PayoutResult};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PayoutConfig {
    pub matchmaking: MatchmakingConfig,
    pub settlement: SettlementConfig,
    pub wallet: WalletConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    /// Capacity of newly created lobbies
    pub max_players: usize,
    /// Optimistic attempts per join before giving up with `Contention`
    pub max_join_retries: u32,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            max_players: 10,
            max_join_retries: 8,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SettlementConfig {
    /// Platform cut of the pot, in [0, 1)
    pub fee_rate: Decimal,
    /// USD per SOL used when no live price feed is wired in
    pub settlement_currency_rate: Decimal,
    pub settlement_dp: u32,
    pub display_dp: u32,
    /// Seconds between background recovery passes; 0 disables the loop
    pub recovery_interval_secs: u64,
    pub recovery_batch_size: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            fee_rate: dec!(0.10),
            settlement_currency_rate: dec!(200),
            settlement_dp: 6,
            display_dp: 2,
            recovery_interval_secs: 30,
            recovery_batch_size: 100,
        }
    }
}

impl SettlementConfig {
    pub fn precision(&self) -> Precision {
        Precision {
            settlement_dp: self.settlement_dp,
            display_dp: self.display_dp,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct WalletConfig {
    /// Prefix of generated placeholder addresses
    pub address_prefix: String,
    pub withdrawal_min_fee: Decimal,
    pub withdrawal_fee_rate: Decimal,
    pub default_history_limit: usize,
    pub max_history_limit: usize,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            address_prefix: "SOL_FAKE_".to_string(),
            withdrawal_min_fee: dec!(0.000005),
            withdrawal_fee_rate: dec!(0.002),
            default_history_limit: 50,
            max_history_limit: 500,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Rocksdb,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Memory,
            data_dir: "./DB/paperpayout".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            request_timeout_secs: 30,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info,tower_http=info".to_string(),
        }
    }
}

/// Configuration loader with environment variable support
#[derive(Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load from file (if set) and process environment, then validate
    pub fn load(&self) -> PayoutResult<PayoutConfig> {
        self.load_with(|key| env::var(key).ok())
    }

    /// Same as [`load`](Self::load) with an explicit variable lookup
    pub fn load_with<F>(&self, lookup: F) -> PayoutResult<PayoutConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => PayoutConfig::default(),
        };

        apply_env_overrides(&mut config, lookup)?;
        validate(&config)?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> PayoutResult<PayoutConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    pub fn save(&self, config: &PayoutConfig, path: &str) -> PayoutResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

fn parse_var<T: std::str::FromStr>(field: &str, raw: String, reason: &str) -> Result<T, ConfigurationError> {
    raw.trim().parse().map_err(|_| ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: raw,
        reason: reason.to_string(),
    })
}

fn apply_env_overrides<F>(config: &mut PayoutConfig, lookup: F) -> Result<(), ConfigurationError>
where
    F: Fn(&str) -> Option<String>,
{
    // Matchmaking
    if let Some(v) = lookup("PAYOUT_MAX_PLAYERS") {
        config.matchmaking.max_players = parse_var("PAYOUT_MAX_PLAYERS", v, "Invalid player count")?;
    }
    if let Some(v) = lookup("PAYOUT_MAX_JOIN_RETRIES") {
        config.matchmaking.max_join_retries =
            parse_var("PAYOUT_MAX_JOIN_RETRIES", v, "Invalid retry count")?;
    }

    // Settlement
    if let Some(v) = lookup("PAYOUT_FEE_RATE") {
        config.settlement.fee_rate = parse_var("PAYOUT_FEE_RATE", v, "Invalid decimal")?;
    }
    if let Some(v) = lookup("PAYOUT_SETTLEMENT_RATE") {
        config.settlement.settlement_currency_rate =
            parse_var("PAYOUT_SETTLEMENT_RATE", v, "Invalid decimal")?;
    }
    if let Some(v) = lookup("PAYOUT_RECOVERY_INTERVAL_SECS") {
        config.settlement.recovery_interval_secs =
            parse_var("PAYOUT_RECOVERY_INTERVAL_SECS", v, "Invalid interval")?;
    }

    // Storage
    if let Some(v) = lookup("PAYOUT_STORAGE_BACKEND") {
        config.storage.backend = match v.trim().to_ascii_lowercase().as_str() {
            "memory" => StorageBackend::Memory,
            "rocksdb" => StorageBackend::Rocksdb,
            _ => {
                return Err(ConfigurationError::InvalidValue {
                    field: "PAYOUT_STORAGE_BACKEND".to_string(),
                    value: v,
                    reason: "Expected 'memory' or 'rocksdb'".to_string(),
                })
            }
        };
    }
    if let Some(v) = lookup("PAYOUT_DATA_DIR") {
        config.storage.data_dir = v;
    }

    // API; a bare PORT is honored for container platforms
    if let Some(v) = lookup("PAYOUT_API_HOST") {
        config.api.host = v;
    }
    if let Some(v) = lookup("PAYOUT_API_PORT").or_else(|| lookup("PORT")) {
        config.api.port = parse_var("PAYOUT_API_PORT", v, "Invalid port number")?;
    }

    if let Some(v) = lookup("PAYOUT_LOG") {
        config.logging.filter = v;
    }

    Ok(())
}

/// Check configuration values for logical consistency
pub fn validate(config: &PayoutConfig) -> Result<(), ConfigurationError> {
    let settlement = &config.settlement;

    if settlement.fee_rate < Decimal::ZERO || settlement.fee_rate >= Decimal::ONE {
        return Err(ConfigurationError::InvalidValue {
            field: "settlement.fee_rate".to_string(),
            value: settlement.fee_rate.to_string(),
            reason: "Fee rate must be in [0, 1)".to_string(),
        });
    }

    if settlement.settlement_currency_rate <= Decimal::ZERO {
        return Err(ConfigurationError::InvalidValue {
            field: "settlement.settlement_currency_rate".to_string(),
            value: settlement.settlement_currency_rate.to_string(),
            reason: "Rate must be positive".to_string(),
        });
    }

    if settlement.settlement_dp > 18 || settlement.display_dp > 18 {
        return Err(ConfigurationError::ValidationFailed(
            "decimal places must be at most 18".to_string(),
        ));
    }

    if config.matchmaking.max_players < 2 {
        return Err(ConfigurationError::InvalidValue {
            field: "matchmaking.max_players".to_string(),
            value: config.matchmaking.max_players.to_string(),
            reason: "A match needs at least two players".to_string(),
        });
    }

    if config.matchmaking.max_join_retries == 0 {
        return Err(ConfigurationError::InvalidValue {
            field: "matchmaking.max_join_retries".to_string(),
            value: "0".to_string(),
            reason: "At least one attempt is required".to_string(),
        });
    }

    if config.wallet.withdrawal_min_fee < Decimal::ZERO || config.wallet.withdrawal_fee_rate < Decimal::ZERO {
        return Err(ConfigurationError::ValidationFailed(
            "withdrawal fees cannot be negative".to_string(),
        ));
    }

    if config.wallet.default_history_limit == 0
        || config.wallet.default_history_limit > config.wallet.max_history_limit
    {
        return Err(ConfigurationError::ValidationFailed(
            "wallet.default_history_limit must be in 1..=max_history_limit".to_string(),
        ));
    }

    if config.api.port == 0 {
        return Err(ConfigurationError::InvalidValue {
            field: "api.port".to_string(),
            value: "0".to_string(),
            reason: "Port cannot be zero".to_string(),
        });
    }

    if config.storage.backend == StorageBackend::Rocksdb {
        if !cfg!(feature = "rocksdb") {
            return Err(ConfigurationError::ValidationFailed(
                "storage.backend = \"rocksdb\" requires the `rocksdb` feature".to_string(),
            ));
        }
        if config.storage.data_dir.is_empty() {
            return Err(ConfigurationError::MissingRequired("storage.data_dir".to_string()));
        }
    }

    Ok(())
}

/// Builder pattern for creating configurations
pub struct ConfigBuilder {
    config: PayoutConfig,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: PayoutConfig::default(),
        }
    }

    pub fn matchmaking(mut self, matchmaking: MatchmakingConfig) -> Self {
        self.config.matchmaking = matchmaking;
        self
    }

    pub fn settlement(mut self, settlement: SettlementConfig) -> Self {
        self.config.settlement = settlement;
        self
    }

    pub fn wallet(mut self, wallet: WalletConfig) -> Self {
        self.config.wallet = wallet;
        self
    }

    pub fn storage(mut self, storage: StorageConfig) -> Self {
        self.config.storage = storage;
        self
    }

    pub fn api(mut self, api: ApiConfig) -> Self {
        self.config.api = api;
        self
    }

    pub fn max_players(mut self, max_players: usize) -> Self {
        self.config.matchmaking.max_players = max_players;
        self
    }

    pub fn fee_rate(mut self, fee_rate: Decimal) -> Self {
        self.config.settlement.fee_rate = fee_rate;
        self
    }

    pub fn build(self) -> PayoutConfig {
        self.config
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Write the default configuration as a starting point
pub fn generate_sample_config(path: &str) -> PayoutResult<()> {
    ConfigLoader::new().save(&PayoutConfig::default(), path)
}

//! Currency conversion
//!
//! Settlement needs a USD -> SOL rate. The rate source is injected so a live
//! price feed can replace the fixed configured rate without touching the core.

use crate::common::Currency;
use crate::errors::{PayoutError, PayoutResult};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::warn;

#[async_trait]
pub trait PricingOracle: Send + Sync {
    /// Units of `to` per one unit of `from`
    async fn rate(&self, from: Currency, to: Currency) -> PayoutResult<Decimal>;
}

/// Constant rate from configuration
#[derive(Debug, Clone, Copy)]
pub struct FixedRateOracle {
    usd_per_sol: Decimal,
}

impl FixedRateOracle {
    /// `usd_per_sol` is the configured settlement currency rate (e.g. 200)
    pub fn new(usd_per_sol: Decimal) -> PayoutResult<Self> {
        if usd_per_sol <= Decimal::ZERO {
            return Err(PayoutError::InvalidInput(format!(
                "settlement currency rate must be positive, got {}",
                usd_per_sol
            )));
        }
        Ok(Self { usd_per_sol })
    }

    pub fn usd_per_sol(&self) -> Decimal {
        self.usd_per_sol
    }
}

#[async_trait]
impl PricingOracle for FixedRateOracle {
    async fn rate(&self, from: Currency, to: Currency) -> PayoutResult<Decimal> {
        match (from, to) {
            (a, b) if a == b => Ok(Decimal::ONE),
            (Currency::Sol, Currency::Usd) => Ok(self.usd_per_sol),
            (Currency::Usd, Currency::Sol) => Decimal::ONE
                .checked_div(self.usd_per_sol)
                .ok_or_else(|| PayoutError::PricingUnavailable("rate overflow".to_string())),
            _ => Err(PayoutError::PricingUnavailable(format!(
                "no rate for {} -> {}",
                from, to
            ))),
        }
    }
}

/// Primary oracle with a fixed-rate fallback when it fails
pub struct FallbackOracle {
    primary: Arc<dyn PricingOracle>,
    fallback: FixedRateOracle,
}

impl FallbackOracle {
    pub fn new(primary: Arc<dyn PricingOracle>, fallback: FixedRateOracle) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl PricingOracle for FallbackOracle {
    async fn rate(&self, from: Currency, to: Currency) -> PayoutResult<Decimal> {
        match self.primary.rate(from, to).await {
            Ok(rate) => Ok(rate),
            Err(e) => {
                warn!(%from, %to, error = %e, "Primary pricing oracle failed, using fixed rate");
                self.fallback.rate(from, to).await
            }
        }
    }
}

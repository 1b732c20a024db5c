use crate::common::{TransactionId, UserId};
use crate::store::Document;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// A user's wallet, keyed by the user id
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Wallet {
    pub user_id: UserId,
    pub address: String,
    pub balance_sol: Decimal,
    pub balance_usd: Decimal,
    /// Transaction whose effect was applied by the latest balance write
    #[serde(default)]
    pub last_transaction_id: Option<TransactionId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn new(user_id: UserId, address: String) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            address,
            balance_sol: Decimal::ZERO,
            balance_usd: Decimal::ZERO,
            last_transaction_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WalletFilter {
    pub address: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct WalletPatch {
    pub balance_sol: Option<Decimal>,
    pub balance_usd: Option<Decimal>,
    pub last_transaction_id: Option<TransactionId>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl WalletPatch {
    /// Balance write attributed to one transaction
    pub fn balances(balance_sol: Decimal, balance_usd: Decimal, applied: TransactionId) -> Self {
        Self {
            balance_sol: Some(balance_sol),
            balance_usd: Some(balance_usd),
            last_transaction_id: Some(applied),
            updated_at: Some(Utc::now()),
        }
    }
}

impl Document for Wallet {
    type Id = UserId;
    type Filter = WalletFilter;
    type Patch = WalletPatch;

    const COLLECTION: &'static str = "wallet";

    fn id(&self) -> &UserId {
        &self.user_id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn matches(&self, filter: &WalletFilter) -> bool {
        filter.address.as_ref().map_or(true, |a| &self.address == a)
    }

    fn apply(&mut self, patch: WalletPatch) {
        if let Some(sol) = patch.balance_sol {
            self.balance_sol = sol;
        }
        if let Some(usd) = patch.balance_usd {
            self.balance_usd = usd;
        }
        if let Some(tx) = patch.last_transaction_id {
            self.last_transaction_id = Some(tx);
        }
        if let Some(at) = patch.updated_at {
            self.updated_at = at;
        }
    }
}

//! Wallet balances and the transaction ledger
//!
//! Every balance change goes through [`Ledger`]. Mutations for one user are
//! serialized by a keyed lock and end in a version-checked wallet write that
//! also records which transaction caused it (`last_transaction_id`). Credits
//! are written as `pending`, applied, then confirmed; a pending credit the
//! wallet already points at is known to have been applied.

use crate::common::{Currency, MatchId, Precision, TransactionId, UserId};
use crate::config::WalletConfig;
use crate::errors::{PayoutError, PayoutResult, StoreError};
use crate::locks::KeyedLocks;
use crate::metrics::Metrics;
use crate::models::{
    Transaction, TransactionFilter, TransactionKind, TransactionPatch, TransactionStatus, Wallet,
    WalletPatch,
};
use crate::pricing::PricingOracle;
use crate::store::{SortOrder, Stores, Versioned};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

const WALLET_WRITE_ATTEMPTS: u32 = 5;

fn out_of_range(what: &str) -> PayoutError {
    PayoutError::InvalidInput(format!("{} is out of range", what))
}

/// Result of the idempotent payout credit
#[derive(Debug, Clone)]
pub enum CreditOutcome {
    /// This call moved the funds
    Credited(Transaction),
    /// A confirmed payout for the match already existed
    AlreadyCredited(Transaction),
}

impl CreditOutcome {
    pub fn transaction(&self) -> &Transaction {
        match self {
            CreditOutcome::Credited(tx) | CreditOutcome::AlreadyCredited(tx) => tx,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct WithdrawalReceipt {
    pub transaction: Transaction,
    pub network_fee: Decimal,
    pub wallet: Wallet,
}

/// Expected vs stored SOL balance for one wallet
#[derive(Debug, Clone, Serialize)]
pub struct Reconciliation {
    pub user_id: UserId,
    pub confirmed_credits: Decimal,
    pub confirmed_debits: Decimal,
    /// Funds held by withdrawals that are still pending
    pub pending_withdrawals: Decimal,
    pub expected_sol: Decimal,
    pub actual_sol: Decimal,
    pub difference: Decimal,
    pub consistent: bool,
    pub transaction_count: usize,
}

pub struct Ledger {
    stores: Stores,
    oracle: Arc<dyn PricingOracle>,
    config: WalletConfig,
    precision: Precision,
    locks: KeyedLocks<UserId>,
    metrics: Metrics,
}

impl Ledger {
    pub fn new(
        stores: Stores,
        oracle: Arc<dyn PricingOracle>,
        config: WalletConfig,
        precision: Precision,
        metrics: Metrics,
    ) -> Self {
        Self {
            stores,
            oracle,
            config,
            precision,
            locks: KeyedLocks::new(),
            metrics,
        }
    }

    /// Create the user's wallet, or return it if it already exists
    pub async fn open_wallet(&self, user_id: UserId, address: Option<String>) -> PayoutResult<Wallet> {
        let _guard = self.locks.lock(user_id.clone()).await;

        if let Some(existing) = self.stores.wallets.get(&user_id).await? {
            return Ok(existing.into_inner());
        }

        let address = match address.map(|a| a.trim().to_string()) {
            Some(a) if !a.is_empty() => a,
            _ => format!("{}{}", self.config.address_prefix, user_id.suffix(8)),
        };
        let wallet = Wallet::new(user_id.clone(), address);

        match self.stores.wallets.insert(wallet.clone()).await {
            Ok(_) => {
                info!(user_id = %user_id, address = %wallet.address, "Opened wallet");
                self.metrics.record_wallet_mutation("open");
                Ok(wallet)
            }
            // Opened concurrently by another process
            Err(StoreError::Duplicate { .. }) => self.get_wallet(&user_id).await,
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_wallet(&self, user_id: &UserId) -> PayoutResult<Wallet> {
        Ok(self.load(user_id).await?.into_inner())
    }

    /// Re-price the USD balance at the current rate and touch `updated_at`
    pub async fn refresh_wallet(&self, user_id: &UserId) -> PayoutResult<Wallet> {
        let _guard = self.locks.lock(user_id.clone()).await;

        let wallet = self.load(user_id).await?;
        self.confirm_applied_credit(&wallet.document).await?;
        let balance_usd = self.to_usd(wallet.document.balance_sol).await?;

        let refreshed = self
            .stores
            .wallets
            .update_one(
                user_id,
                WalletPatch {
                    balance_usd: Some(balance_usd),
                    updated_at: Some(Utc::now()),
                    ..Default::default()
                },
                Some(wallet.version),
            )
            .await
            .map_err(|e| match e {
                StoreError::VersionConflict { .. } => PayoutError::Contention {
                    operation: "refresh_wallet",
                    attempts: 1,
                },
                other => other.into(),
            })?
            .into_inner();

        debug!(user_id = %user_id, balance_usd = %refreshed.balance_usd, "Wallet refreshed");
        Ok(refreshed)
    }

    pub async fn deposit(
        &self,
        user_id: &UserId,
        amount_sol: Decimal,
        external_reference: Option<String>,
    ) -> PayoutResult<Transaction> {
        let amount_sol = self.positive_sol(amount_sol, "deposit amount")?;
        let _guard = self.locks.lock(user_id.clone()).await;

        let wallet = self.load(user_id).await?;
        self.confirm_applied_credit(&wallet.document).await?;

        let amount_usd = self.to_usd(amount_sol).await?;
        // Reject before recording anything if the new balance cannot be held
        self.balances_after(&wallet.document, amount_sol).await?;

        let tx = Transaction::new(
            user_id.clone(),
            TransactionKind::Deposit,
            amount_sol,
            amount_usd,
            TransactionStatus::Pending,
        )
        .with_reference(external_reference);
        self.stores.transactions.insert(tx.clone()).await?;

        if let Err(e) = self.apply_delta(user_id, tx.id, tx.signed_sol(), true).await {
            warn!(user_id = %user_id, tx_id = %tx.id, error = %e, "Deposit credit failed");
            self.set_status(&tx.id, TransactionStatus::Failed, None).await?;
            return Err(e);
        }
        let confirmed = self.set_status(&tx.id, TransactionStatus::Confirmed, None).await?;

        info!(user_id = %user_id, amount_sol = %amount_sol, tx_id = %tx.id, "Deposit confirmed");
        self.metrics.record_wallet_mutation("deposit");
        Ok(confirmed)
    }

    /// Debit amount plus network fee and hold it in a pending withdrawal
    pub async fn withdraw(
        &self,
        user_id: &UserId,
        to_address: &str,
        amount_sol: Decimal,
    ) -> PayoutResult<WithdrawalReceipt> {
        let amount_sol = self.positive_sol(amount_sol, "withdrawal amount")?;
        let to_address = to_address.trim();
        if to_address.is_empty() {
            return Err(PayoutError::InvalidInput("to_address must not be empty".to_string()));
        }

        let _guard = self.locks.lock(user_id.clone()).await;

        let wallet = self.load(user_id).await?;
        self.confirm_applied_credit(&wallet.document).await?;

        let available = wallet.document.balance_sol;
        if available < amount_sol {
            return Err(PayoutError::InsufficientFunds {
                available,
                requested: amount_sol,
            });
        }

        let network_fee = self.network_fee(amount_sol)?;
        let total = amount_sol
            .checked_add(network_fee)
            .ok_or_else(|| out_of_range("withdrawal amount"))?;
        if available < total {
            return Err(PayoutError::InsufficientFunds {
                available,
                requested: total,
            });
        }

        let amount_usd = self.to_usd(total).await?;
        let tx = Transaction::new(
            user_id.clone(),
            TransactionKind::Withdrawal,
            total,
            amount_usd,
            TransactionStatus::Pending,
        )
        .with_metadata(serde_json::json!({
            "to": to_address,
            "requested": amount_sol,
            "network_fee": network_fee,
        }));
        self.stores.transactions.insert(tx.clone()).await?;

        let wallet = match self.apply_delta(user_id, tx.id, tx.signed_sol(), true).await {
            Ok(wallet) => wallet,
            Err(e) => {
                warn!(user_id = %user_id, tx_id = %tx.id, error = %e, "Withdrawal debit failed");
                self.set_status(&tx.id, TransactionStatus::Failed, None).await?;
                return Err(e);
            }
        };

        info!(
            user_id = %user_id,
            amount_sol = %amount_sol,
            network_fee = %network_fee,
            tx_id = %tx.id,
            "Withdrawal pending"
        );
        self.metrics.record_wallet_mutation("withdrawal");
        Ok(WithdrawalReceipt {
            transaction: tx,
            network_fee,
            wallet,
        })
    }

    /// Settle a pending withdrawal; a failed one is refunded in full
    pub async fn resolve_withdrawal(
        &self,
        tx_id: &TransactionId,
        confirmed: bool,
        external_reference: Option<String>,
    ) -> PayoutResult<Transaction> {
        let tx = self
            .stores
            .transactions
            .get(tx_id)
            .await?
            .ok_or_else(|| PayoutError::not_found("transaction", tx_id))?
            .into_inner();

        if tx.kind != TransactionKind::Withdrawal {
            return Err(PayoutError::InvalidInput(format!(
                "transaction {} is a {}, not a withdrawal",
                tx_id, tx.kind
            )));
        }

        let _guard = self.locks.lock(tx.user_id.clone()).await;

        // Re-read under the lock; a concurrent resolve may have won
        let current = self
            .stores
            .transactions
            .get(tx_id)
            .await?
            .ok_or_else(|| PayoutError::not_found("transaction", tx_id))?;
        let target = if confirmed {
            TransactionStatus::Confirmed
        } else {
            TransactionStatus::Failed
        };

        match current.document.status {
            TransactionStatus::Pending => {}
            status if status == target => return Ok(current.into_inner()),
            status => {
                return Err(PayoutError::InvalidInput(format!(
                    "withdrawal {} is already {:?}",
                    tx_id, status
                )))
            }
        }

        let resolved = self.set_status(tx_id, target, external_reference).await?;

        if target == TransactionStatus::Failed {
            self.apply_delta(&resolved.user_id, resolved.id, resolved.amount_sol, false)
                .await?;
            info!(tx_id = %tx_id, user_id = %resolved.user_id, refund_sol = %resolved.amount_sol, "Withdrawal failed, refunded");
            self.metrics.record_wallet_mutation("refund");
        } else {
            info!(tx_id = %tx_id, user_id = %resolved.user_id, "Withdrawal confirmed");
        }

        Ok(resolved)
    }

    /// Credit a match payout exactly once
    ///
    /// Fails with `NotFound` for wallets that do not exist; nothing is written
    /// in that case.
    pub async fn credit_payout(
        &self,
        match_id: MatchId,
        user_id: &UserId,
        amount_sol: Decimal,
        amount_usd: Decimal,
        metadata: serde_json::Value,
    ) -> PayoutResult<CreditOutcome> {
        let _guard = self.locks.lock(user_id.clone()).await;

        let wallet = self.load(user_id).await?;

        let existing = self
            .stores
            .transactions
            .find_one(&TransactionFilter::payout_for(match_id))
            .await?;

        if let Some(existing) = existing {
            let tx = existing.into_inner();
            if tx.status != TransactionStatus::Pending {
                debug!(match_id = %match_id, tx_id = %tx.id, "Payout already credited");
                return Ok(CreditOutcome::AlreadyCredited(tx));
            }

            if wallet.document.last_transaction_id != Some(tx.id) {
                self.confirm_applied_credit(&wallet.document).await?;
                self.apply_delta(user_id, tx.id, tx.signed_sol(), true).await?;
            }
            let confirmed = self.set_status(&tx.id, TransactionStatus::Confirmed, None).await?;
            warn!(match_id = %match_id, tx_id = %tx.id, "Completed interrupted payout credit");
            self.metrics.record_wallet_mutation("payout");
            return Ok(CreditOutcome::Credited(confirmed));
        }

        self.confirm_applied_credit(&wallet.document).await?;
        self.balances_after(&wallet.document, amount_sol).await?;

        let tx = Transaction::new(
            user_id.clone(),
            TransactionKind::Payout,
            amount_sol,
            amount_usd,
            TransactionStatus::Pending,
        )
        .with_match(match_id)
        .with_metadata(metadata);
        self.stores.transactions.insert(tx.clone()).await?;

        self.apply_delta(user_id, tx.id, tx.signed_sol(), true).await?;
        let confirmed = self.set_status(&tx.id, TransactionStatus::Confirmed, None).await?;

        info!(
            match_id = %match_id,
            user_id = %user_id,
            amount_sol = %amount_sol,
            amount_usd = %amount_usd,
            "Payout credited"
        );
        self.metrics.record_wallet_mutation("payout");
        Ok(CreditOutcome::Credited(confirmed))
    }

    /// Newest first
    pub async fn transactions(&self, user_id: &UserId, limit: Option<usize>) -> PayoutResult<Vec<Transaction>> {
        let limit = limit.unwrap_or(self.config.default_history_limit);
        if limit == 0 {
            return Err(PayoutError::InvalidInput("limit must be at least 1".to_string()));
        }
        let limit = limit.min(self.config.max_history_limit);

        let found = self
            .stores
            .transactions
            .find_many(
                &TransactionFilter::for_user(user_id.clone()),
                Some(SortOrder::NewestFirst),
                Some(limit),
            )
            .await?;
        Ok(found.into_iter().map(Versioned::into_inner).collect())
    }

    pub async fn reconcile(&self, user_id: &UserId) -> PayoutResult<Reconciliation> {
        let wallet = self.get_wallet(user_id).await?;
        let history = self
            .stores
            .transactions
            .find_many(&TransactionFilter::for_user(user_id.clone()), None, None)
            .await?;

        let mut confirmed_credits = Decimal::ZERO;
        let mut confirmed_debits = Decimal::ZERO;
        let mut pending_withdrawals = Decimal::ZERO;

        for tx in history.iter().map(|v| &v.document) {
            let bucket = match (tx.status, tx.kind.is_credit()) {
                (TransactionStatus::Confirmed, true) => &mut confirmed_credits,
                (TransactionStatus::Confirmed, false) => &mut confirmed_debits,
                (TransactionStatus::Pending, false) if tx.kind == TransactionKind::Withdrawal => {
                    &mut pending_withdrawals
                }
                _ => continue,
            };
            *bucket = bucket
                .checked_add(tx.amount_sol)
                .ok_or_else(|| out_of_range("transaction total"))?;
        }

        let expected_sol = self.precision.settlement(
            confirmed_credits
                .checked_sub(confirmed_debits)
                .and_then(|net| net.checked_sub(pending_withdrawals))
                .ok_or_else(|| out_of_range("expected balance"))?,
        );
        let actual_sol = self.precision.settlement(wallet.balance_sol);
        let difference = actual_sol - expected_sol;

        if !difference.is_zero() {
            warn!(user_id = %user_id, expected = %expected_sol, actual = %actual_sol, "Wallet does not reconcile");
        }

        Ok(Reconciliation {
            user_id: user_id.clone(),
            confirmed_credits,
            confirmed_debits,
            pending_withdrawals,
            expected_sol,
            actual_sol,
            difference,
            consistent: difference.is_zero(),
            transaction_count: history.len(),
        })
    }

    pub fn prune_locks(&self) -> usize {
        self.locks.prune()
    }

    async fn load(&self, user_id: &UserId) -> PayoutResult<Versioned<Wallet>> {
        self.stores
            .wallets
            .get(user_id)
            .await?
            .ok_or_else(|| PayoutError::not_found("wallet", user_id))
    }

    /// Confirm a pending credit the wallet already reflects, so the pointer
    /// can safely move on to the next transaction
    async fn confirm_applied_credit(&self, wallet: &Wallet) -> PayoutResult<()> {
        let Some(last) = wallet.last_transaction_id else {
            return Ok(());
        };
        let Some(tx) = self.stores.transactions.get(&last).await? else {
            return Ok(());
        };
        if tx.document.status == TransactionStatus::Pending && tx.document.kind.is_credit() {
            warn!(tx_id = %last, user_id = %wallet.user_id, "Confirming applied credit left pending");
            self.set_status(&last, TransactionStatus::Confirmed, None).await?;
        }
        Ok(())
    }

    /// Add `delta_sol` to the balance, attributing the write to `tx_id`.
    ///
    /// With `skip_if_applied`, a wallet already pointing at `tx_id` is left
    /// untouched.
    async fn apply_delta(
        &self,
        user_id: &UserId,
        tx_id: TransactionId,
        delta_sol: Decimal,
        skip_if_applied: bool,
    ) -> PayoutResult<Wallet> {
        for attempt in 1..=WALLET_WRITE_ATTEMPTS {
            let current = self.load(user_id).await?;
            if skip_if_applied && current.document.last_transaction_id == Some(tx_id) {
                return Ok(current.into_inner());
            }

            let (balance_sol, balance_usd) = self.balances_after(&current.document, delta_sol).await?;

            match self
                .stores
                .wallets
                .update_one(
                    user_id,
                    WalletPatch::balances(balance_sol, balance_usd, tx_id),
                    Some(current.version),
                )
                .await
            {
                Ok(updated) => return Ok(updated.into_inner()),
                Err(StoreError::VersionConflict { expected, found }) => {
                    debug!(user_id = %user_id, attempt, expected, found, "Wallet write conflict, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(PayoutError::Contention {
            operation: "wallet_update",
            attempts: WALLET_WRITE_ATTEMPTS,
        })
    }

    /// Balance after adding `delta_sol`, with its USD value
    async fn balances_after(&self, wallet: &Wallet, delta_sol: Decimal) -> PayoutResult<(Decimal, Decimal)> {
        let balance_sol = wallet
            .balance_sol
            .checked_add(delta_sol)
            .map(|b| self.precision.settlement(b))
            .ok_or_else(|| out_of_range("wallet balance"))?;
        if balance_sol < Decimal::ZERO {
            return Err(PayoutError::InsufficientFunds {
                available: wallet.balance_sol,
                requested: -delta_sol,
            });
        }
        let balance_usd = self.to_usd(balance_sol).await?;
        Ok((balance_sol, balance_usd))
    }

    /// Only pending transactions change status, and only once
    async fn set_status(
        &self,
        tx_id: &TransactionId,
        status: TransactionStatus,
        external_reference: Option<String>,
    ) -> PayoutResult<Transaction> {
        let current = self
            .stores
            .transactions
            .get(tx_id)
            .await?
            .ok_or_else(|| PayoutError::not_found("transaction", tx_id))?;
        if !current.document.status.can_transition_to(status) {
            return Err(PayoutError::InvalidInput(format!(
                "transaction {} cannot move from {:?} to {:?}",
                tx_id, current.document.status, status
            )));
        }

        let updated = self
            .stores
            .transactions
            .update_one(
                tx_id,
                TransactionPatch {
                    status,
                    external_reference,
                },
                Some(current.version),
            )
            .await
            .map_err(|e| match e {
                StoreError::VersionConflict { .. } => PayoutError::Contention {
                    operation: "transaction_status",
                    attempts: 1,
                },
                other => other.into(),
            })?;
        Ok(updated.into_inner())
    }

    fn positive_sol(&self, amount: Decimal, what: &str) -> PayoutResult<Decimal> {
        let rounded = self.precision.settlement(amount);
        if rounded <= Decimal::ZERO {
            return Err(PayoutError::InvalidInput(format!("{} must be positive, got {}", what, amount)));
        }
        Ok(rounded)
    }

    fn network_fee(&self, amount_sol: Decimal) -> PayoutResult<Decimal> {
        let proportional = amount_sol
            .checked_mul(self.config.withdrawal_fee_rate)
            .ok_or_else(|| out_of_range("network fee"))?;
        Ok(self
            .precision
            .settlement(proportional.max(self.config.withdrawal_min_fee)))
    }

    async fn to_usd(&self, amount_sol: Decimal) -> PayoutResult<Decimal> {
        let rate = self.oracle.rate(Currency::Sol, Currency::Usd).await?;
        let amount_usd = amount_sol
            .checked_mul(rate)
            .ok_or_else(|| out_of_range("USD value"))?;
        Ok(self.precision.display(amount_usd))
    }
}

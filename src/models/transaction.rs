use crate::common::{MatchId, TransactionId, UserId};
use crate::store::Document;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Deposit,
    Withdrawal,
    Wager,
    Payout,
    Fee,
}

impl TransactionKind {
    /// Whether the amount is added to the balance
    pub fn is_credit(self) -> bool {
        matches!(self, TransactionKind::Deposit | TransactionKind::Payout)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransactionKind::Deposit => "deposit",
            TransactionKind::Withdrawal => "withdrawal",
            TransactionKind::Wager => "wager",
            TransactionKind::Payout => "payout",
            TransactionKind::Fee => "fee",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Pending,
    Confirmed,
    Failed,
}

impl TransactionStatus {
    pub fn can_transition_to(self, next: TransactionStatus) -> bool {
        self == TransactionStatus::Pending && next != TransactionStatus::Pending
    }
}

/// Append-only ledger record; only `status` changes after creation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: TransactionId,
    pub user_id: UserId,
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    /// Magnitude; the sign comes from `kind`
    pub amount_sol: Decimal,
    pub amount_usd: Decimal,
    pub status: TransactionStatus,
    /// Chain hash or payment processor reference
    #[serde(default)]
    pub external_reference: Option<String>,
    #[serde(default)]
    pub match_id: Option<MatchId>,
    #[serde(default)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        user_id: UserId,
        kind: TransactionKind,
        amount_sol: Decimal,
        amount_usd: Decimal,
        status: TransactionStatus,
    ) -> Self {
        Self {
            id: TransactionId::new(),
            user_id,
            kind,
            amount_sol,
            amount_usd,
            status,
            external_reference: None,
            match_id: None,
            metadata: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_match(mut self, match_id: MatchId) -> Self {
        self.match_id = Some(match_id);
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_reference(mut self, reference: Option<String>) -> Self {
        self.external_reference = reference;
        self
    }

    /// Signed effect on the SOL balance
    pub fn signed_sol(&self) -> Decimal {
        if self.kind.is_credit() {
            self.amount_sol
        } else {
            -self.amount_sol
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub user_id: Option<UserId>,
    pub kind: Option<TransactionKind>,
    pub status: Option<TransactionStatus>,
    pub match_id: Option<MatchId>,
}

impl TransactionFilter {
    pub fn for_user(user_id: UserId) -> Self {
        Self {
            user_id: Some(user_id),
            ..Default::default()
        }
    }

    /// The payout recorded for a match, if any
    pub fn payout_for(match_id: MatchId) -> Self {
        Self {
            kind: Some(TransactionKind::Payout),
            match_id: Some(match_id),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransactionPatch {
    pub status: TransactionStatus,
    pub external_reference: Option<String>,
}

impl Document for Transaction {
    type Id = TransactionId;
    type Filter = TransactionFilter;
    type Patch = TransactionPatch;

    const COLLECTION: &'static str = "transaction";

    fn id(&self) -> &TransactionId {
        &self.id
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn matches(&self, filter: &TransactionFilter) -> bool {
        filter.user_id.as_ref().map_or(true, |u| &self.user_id == u)
            && filter.kind.map_or(true, |k| self.kind == k)
            && filter.status.map_or(true, |s| self.status == s)
            && filter.match_id.map_or(true, |m| self.match_id == Some(m))
    }

    fn apply(&mut self, patch: TransactionPatch) {
        self.status = patch.status;
        if patch.external_reference.is_some() {
            self.external_reference = patch.external_reference;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_status_transitions() {
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Confirmed));
        assert!(TransactionStatus::Pending.can_transition_to(TransactionStatus::Failed));
        assert!(!TransactionStatus::Confirmed.can_transition_to(TransactionStatus::Failed));
        assert!(!TransactionStatus::Pending.can_transition_to(TransactionStatus::Pending));
    }

    #[test]
    fn test_signed_amounts() {
        let user = UserId::new("u").unwrap();
        let payout = Transaction::new(
            user.clone(),
            TransactionKind::Payout,
            dec!(0.09),
            dec!(18),
            TransactionStatus::Confirmed,
        );
        assert_eq!(payout.signed_sol(), dec!(0.09));

        let withdrawal = Transaction::new(
            user,
            TransactionKind::Withdrawal,
            dec!(0.5),
            dec!(100),
            TransactionStatus::Pending,
        );
        assert_eq!(withdrawal.signed_sol(), dec!(-0.5));
    }

    #[test]
    fn test_serializes_kind_as_type() {
        let tx = Transaction::new(
            UserId::new("u").unwrap(),
            TransactionKind::Deposit,
            dec!(1),
            dec!(200),
            TransactionStatus::Confirmed,
        );
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["type"], "deposit");
        assert_eq!(json["status"], "confirmed");
    }
}

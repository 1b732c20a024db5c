//! Wallet funding, withdrawals and reconciliation

use paperpayout::{
    common::{TransactionId, UserId},
    factory::{CoreFactory, PayoutCore},
    models::{TransactionKind, TransactionStatus},
    PayoutError,
};
use rust_decimal_macros::dec;

fn user(name: &str) -> UserId {
    UserId::new(name).unwrap()
}

async fn funded(amount: rust_decimal::Decimal) -> (PayoutCore, UserId) {
    let core = CoreFactory::in_memory().unwrap();
    let alice = user("alice-0001");
    core.ledger.open_wallet(alice.clone(), None).await.unwrap();
    core.ledger
        .deposit(&alice, amount, Some("faucet".to_string()))
        .await
        .unwrap();
    (core, alice)
}

#[tokio::test]
async fn test_open_wallet_is_idempotent() {
    let core = CoreFactory::in_memory().unwrap();
    let first = core
        .ledger
        .open_wallet(user("user-12345678"), None)
        .await
        .unwrap();
    assert_eq!(first.address, "SOL_FAKE_12345678");
    assert_eq!(first.balance_sol, dec!(0));

    let again = core
        .ledger
        .open_wallet(user("user-12345678"), Some("custom".to_string()))
        .await
        .unwrap();
    assert_eq!(again.address, first.address);
    assert_eq!(again.created_at, first.created_at);
}

#[tokio::test]
async fn test_deposit_updates_both_balances() {
    let (core, alice) = funded(dec!(1.5)).await;

    let wallet = core.ledger.get_wallet(&alice).await.unwrap();
    assert_eq!(wallet.balance_sol, dec!(1.5));
    assert_eq!(wallet.balance_usd, dec!(300));

    let history = core.ledger.transactions(&alice, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind, TransactionKind::Deposit);
    assert_eq!(history[0].status, TransactionStatus::Confirmed);
    assert_eq!(history[0].external_reference.as_deref(), Some("faucet"));
    assert_eq!(wallet.last_transaction_id, Some(history[0].id));
}

#[tokio::test]
async fn test_deposit_requires_wallet_and_positive_amount() {
    let core = CoreFactory::in_memory().unwrap();
    let err = core.ledger.deposit(&user("ghost"), dec!(1), None).await.unwrap_err();
    assert!(matches!(err, PayoutError::NotFound { entity: "wallet", .. }));

    core.ledger.open_wallet(user("bob"), None).await.unwrap();
    let err = core.ledger.deposit(&user("bob"), dec!(-1), None).await.unwrap_err();
    assert!(matches!(err, PayoutError::InvalidInput(_)));
}

#[tokio::test]
async fn test_withdrawal_fee_is_proportional_with_floor() {
    let (core, alice) = funded(dec!(1)).await;

    let receipt = core.ledger.withdraw(&alice, "dest", dec!(0.5)).await.unwrap();
    assert_eq!(receipt.network_fee, dec!(0.001));
    assert_eq!(receipt.transaction.amount_sol, dec!(0.501));
    assert_eq!(receipt.transaction.status, TransactionStatus::Pending);
    assert_eq!(receipt.wallet.balance_sol, dec!(0.499));

    // Tiny withdrawals pay the minimum fee
    let receipt = core.ledger.withdraw(&alice, "dest", dec!(0.001)).await.unwrap();
    assert_eq!(receipt.network_fee, dec!(0.000005));
    assert_eq!(receipt.wallet.balance_sol, dec!(0.497995));
}

#[tokio::test]
async fn test_withdrawal_checks_amount_and_fee() {
    let (core, alice) = funded(dec!(1)).await;

    match core.ledger.withdraw(&alice, "dest", dec!(2)).await {
        Err(PayoutError::InsufficientFunds { available, requested }) => {
            assert_eq!(available, dec!(1));
            assert_eq!(requested, dec!(2));
        }
        other => panic!("expected InsufficientFunds, got {:?}", other),
    }

    // The amount fits but amount plus fee does not
    match core.ledger.withdraw(&alice, "dest", dec!(1)).await {
        Err(PayoutError::InsufficientFunds { requested, .. }) => {
            assert_eq!(requested, dec!(1.002));
        }
        other => panic!("expected InsufficientFunds, got {:?}", other),
    }

    let err = core.ledger.withdraw(&alice, "  ", dec!(0.1)).await.unwrap_err();
    assert!(matches!(err, PayoutError::InvalidInput(_)));

    let wallet = core.ledger.get_wallet(&alice).await.unwrap();
    assert_eq!(wallet.balance_sol, dec!(1));
    assert_eq!(core.ledger.transactions(&alice, None).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_failed_withdrawal_is_refunded() {
    let (core, alice) = funded(dec!(1)).await;
    let receipt = core.ledger.withdraw(&alice, "dest", dec!(0.5)).await.unwrap();

    let pending = core.ledger.reconcile(&alice).await.unwrap();
    assert!(pending.consistent);
    assert_eq!(pending.pending_withdrawals, dec!(0.501));

    let failed = core
        .ledger
        .resolve_withdrawal(&receipt.transaction.id, false, None)
        .await
        .unwrap();
    assert_eq!(failed.status, TransactionStatus::Failed);

    let wallet = core.ledger.get_wallet(&alice).await.unwrap();
    assert_eq!(wallet.balance_sol, dec!(1));
    assert!(core.ledger.reconcile(&alice).await.unwrap().consistent);

    // Resolving the same way again changes nothing
    core.ledger
        .resolve_withdrawal(&receipt.transaction.id, false, None)
        .await
        .unwrap();
    assert_eq!(core.ledger.get_wallet(&alice).await.unwrap().balance_sol, dec!(1));

    let err = core
        .ledger
        .resolve_withdrawal(&receipt.transaction.id, true, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PayoutError::InvalidInput(_)));
}

#[tokio::test]
async fn test_confirmed_withdrawal_keeps_debit() {
    let (core, alice) = funded(dec!(1)).await;
    let receipt = core.ledger.withdraw(&alice, "dest", dec!(0.5)).await.unwrap();

    let confirmed = core
        .ledger
        .resolve_withdrawal(&receipt.transaction.id, true, Some("sig-abc".to_string()))
        .await
        .unwrap();
    assert_eq!(confirmed.status, TransactionStatus::Confirmed);
    assert_eq!(confirmed.external_reference.as_deref(), Some("sig-abc"));

    let reconciliation = core.ledger.reconcile(&alice).await.unwrap();
    assert!(reconciliation.consistent);
    assert_eq!(reconciliation.confirmed_credits, dec!(1));
    assert_eq!(reconciliation.confirmed_debits, dec!(0.501));
    assert_eq!(reconciliation.actual_sol, dec!(0.499));
}

#[tokio::test]
async fn test_resolve_rejects_non_withdrawals() {
    let (core, alice) = funded(dec!(1)).await;
    let deposit = core.ledger.transactions(&alice, None).await.unwrap().remove(0);

    let err = core
        .ledger
        .resolve_withdrawal(&deposit.id, true, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PayoutError::InvalidInput(_)));

    let err = core
        .ledger
        .resolve_withdrawal(&TransactionId::new(), true, None)
        .await
        .unwrap_err();
    assert!(matches!(err, PayoutError::NotFound { entity: "transaction", .. }));
}

#[tokio::test]
async fn test_history_is_newest_first_and_limited() {
    let (core, alice) = funded(dec!(1)).await;
    for i in 0..4 {
        core.ledger
            .deposit(&alice, dec!(0.1), Some(format!("dep-{}", i)))
            .await
            .unwrap();
    }

    let history = core.ledger.transactions(&alice, None).await.unwrap();
    assert_eq!(history.len(), 5);
    assert_eq!(history[0].external_reference.as_deref(), Some("dep-3"));
    assert_eq!(history[4].external_reference.as_deref(), Some("faucet"));

    let limited = core.ledger.transactions(&alice, Some(2)).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[0].id, history[0].id);

    let err = core.ledger.transactions(&alice, Some(0)).await.unwrap_err();
    assert!(matches!(err, PayoutError::InvalidInput(_)));
}

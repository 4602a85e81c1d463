//! Tests for the transaction coordinator workflows

use std::str::FromStr;
use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::audit::{AuditEventType, AuditLogger};
use crate::currency::CurrencyRegistry;
use crate::error::LedgerError;
use crate::models::transaction::REASON_TIMEOUT;
use crate::models::{
    FraudReportStatus, Transaction, TransactionStatus, TransactionType, UserContext, Wallet,
};
use crate::services::conversion::{ConversionConfig, ConversionService, StaticRateProvider};
use crate::services::coordinator::{
    CoordinatorConfig, CryptoBuyRequest, DepositRequest, PosPaymentRequest,
    TransactionCoordinator, TransferRequest, WithdrawRequest,
};
use crate::services::events::{EventDispatcher, LedgerEvent};
use crate::services::fees::{FeeCalculator, FeePolicy};
use crate::services::ledger::LedgerService;
use crate::services::risk::{PassthroughClassifier, RiskConfig, RiskGate, StaticKycProvider};
use crate::services::wallet::WalletService;
use crate::store::{InMemoryStore, SettlementStore};

struct Stack {
    store: Arc<InMemoryStore>,
    wallets: Arc<WalletService>,
    ledger: Arc<LedgerService>,
    coordinator: Arc<TransactionCoordinator>,
    events: Arc<EventDispatcher>,
    audit: Arc<AuditLogger>,
}

fn stack() -> Stack {
    let policy = FeePolicy::default();
    let registry = Arc::new(CurrencyRegistry::new());
    let store = Arc::new(InMemoryStore::new(&registry));
    let store_dyn: Arc<dyn SettlementStore> = store.clone();
    let events = Arc::new(EventDispatcher::default());
    let audit = Arc::new(AuditLogger::new());
    let wallets = Arc::new(WalletService::new(
        store_dyn.clone(),
        registry.clone(),
        events.clone(),
        audit.clone(),
    ));
    let ledger = Arc::new(LedgerService::new(store_dyn.clone(), registry.clone()));
    let conversion = Arc::new(ConversionService::new(
        Arc::new(StaticRateProvider::default()),
        registry.clone(),
        ConversionConfig::default(),
    ));
    let fees = Arc::new(FeeCalculator::new(policy, registry.clone()));
    let kyc = Arc::new(StaticKycProvider::new());
    let risk = Arc::new(RiskGate::new(
        RiskConfig::default(),
        Arc::new(PassthroughClassifier),
        store_dyn.clone(),
        audit.clone(),
        events.clone(),
    ));
    let coordinator = Arc::new(TransactionCoordinator::new(
        store_dyn,
        wallets.clone(),
        ledger.clone(),
        conversion,
        fees,
        risk,
        kyc,
        registry,
        events.clone(),
        audit.clone(),
        CoordinatorConfig::default(),
    ));
    Stack {
        store,
        wallets,
        ledger,
        coordinator,
        events,
        audit,
    }
}

fn dec(value: &str) -> Decimal {
    Decimal::from_str(value).unwrap()
}

fn operator() -> UserContext {
    UserContext::operator(Uuid::new_v4())
}

async fn open_wallet(stack: &Stack, ctx: &UserContext, currency: &str) -> Wallet {
    stack
        .wallets
        .create(ctx, ctx.user_id, currency)
        .await
        .unwrap()
}

async fn deposit(stack: &Stack, ctx: &UserContext, wallet_id: Uuid, amount: Decimal) -> Transaction {
    stack
        .coordinator
        .deposit(
            ctx,
            DepositRequest {
                wallet_id,
                amount,
                reference: Uuid::new_v4().to_string(),
                description: None,
            },
        )
        .await
        .unwrap()
}

#[tokio::test]
async fn deposit_settles_with_a_single_entry() {
    let stack = stack();
    let ctx = UserContext::customer(Uuid::new_v4());
    let wallet = open_wallet(&stack, &ctx, "USD").await;

    let tx = deposit(&stack, &ctx, wallet.id, dec("500")).await;
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.fee, Decimal::ZERO);

    let wallet = stack.store.wallet(wallet.id).await.unwrap();
    assert_eq!(wallet.balance, dec("500"));
    assert_eq!(wallet.available_balance, dec("500"));

    let entries = stack.store.entries_for_transaction(tx.id).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].amount, dec("500"));
    assert_eq!(entries[0].balance_after, dec("500"));
}

#[tokio::test]
async fn settlement_emits_a_terminal_event() {
    let stack = stack();
    let ctx = UserContext::customer(Uuid::new_v4());
    let wallet = open_wallet(&stack, &ctx, "USD").await;
    let mut rx = stack.events.subscribe();

    let tx = deposit(&stack, &ctx, wallet.id, dec("50")).await;

    match rx.recv().await.unwrap() {
        LedgerEvent::TransactionSettled {
            transaction_id,
            amount,
            ..
        } => {
            assert_eq!(transaction_id, tx.id);
            assert_eq!(amount, dec("50"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn operations_on_a_frozen_wallet_are_rejected_upfront() {
    let stack = stack();
    let ctx = UserContext::customer(Uuid::new_v4());
    let op = operator();
    let wallet = open_wallet(&stack, &ctx, "USD").await;
    stack.wallets.freeze(&op, wallet.id).await.unwrap();

    let reference = "frozen-deposit".to_string();
    let err = stack
        .coordinator
        .deposit(
            &ctx,
            DepositRequest {
                wallet_id: wallet.id,
                amount: dec("100"),
                reference: reference.clone(),
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::WalletFrozen(_)));

    // Nothing was recorded: validation failures never touch state.
    assert!(stack
        .store
        .transaction_by_reference(&reference)
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        stack.audit.records_of_type(AuditEventType::WalletFrozen).len(),
        1
    );

    stack.wallets.unfreeze(&op, wallet.id).await.unwrap();
    deposit(&stack, &ctx, wallet.id, dec("100")).await;
}

#[tokio::test]
async fn input_validation_rejects_bad_requests() {
    let stack = stack();
    let ctx = UserContext::customer(Uuid::new_v4());
    let wallet = open_wallet(&stack, &ctx, "USD").await;

    let err = stack
        .coordinator
        .deposit(
            &ctx,
            DepositRequest {
                wallet_id: wallet.id,
                amount: Decimal::ZERO,
                reference: "zero-amount".to_string(),
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let err = stack
        .coordinator
        .deposit(
            &ctx,
            DepositRequest {
                wallet_id: wallet.id,
                amount: dec("10"),
                reference: "   ".to_string(),
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));

    let err = stack
        .coordinator
        .transfer(
            &ctx,
            TransferRequest {
                from_wallet_id: wallet.id,
                to_wallet_id: wallet.id,
                amount: dec("10"),
                reference: "self-transfer".to_string(),
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[tokio::test]
async fn pos_payment_routes_the_fee_to_the_platform_wallet() {
    let stack = stack();
    let payer = UserContext::customer(Uuid::new_v4());
    let merchant = UserContext::customer(Uuid::new_v4());
    let payer_wallet = open_wallet(&stack, &payer, "USD").await;
    let merchant_wallet = open_wallet(&stack, &merchant, "USD").await;
    deposit(&stack, &payer, payer_wallet.id, dec("200")).await;

    let tx = stack
        .coordinator
        .pos_payment(
            &payer,
            PosPaymentRequest {
                from_wallet_id: payer_wallet.id,
                merchant_wallet_id: merchant_wallet.id,
                amount: dec("100"),
                reference: "pos-1".to_string(),
                merchant_name: Some("Corner Cafe".to_string()),
            },
        )
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.fee, dec("1.50"));

    let payer_wallet = stack.store.wallet(payer_wallet.id).await.unwrap();
    let merchant_wallet = stack.store.wallet(merchant_wallet.id).await.unwrap();
    let fee_wallet = stack.store.fee_wallet("USD").await.unwrap();
    assert_eq!(payer_wallet.balance, dec("98.50"));
    assert_eq!(merchant_wallet.balance, dec("100"));
    assert_eq!(fee_wallet.balance, dec("1.50"));

    // Three legs: payer debit, fee credit, merchant credit.
    let entries = stack.store.entries_for_transaction(tx.id).await.unwrap();
    assert_eq!(entries.len(), 3);
    let total: Decimal = entries.iter().map(|e| e.amount).sum();
    assert_eq!(total, Decimal::ZERO);
}

#[tokio::test]
async fn daily_and_monthly_limits_are_enforced() {
    let stack = stack();
    let ctx = UserContext::customer(Uuid::new_v4());
    let op = operator();
    let wallet = open_wallet(&stack, &ctx, "USD").await;
    deposit(&stack, &ctx, wallet.id, dec("2000")).await;

    stack
        .wallets
        .update_limits(&op, wallet.id, Some(dec("1000")), Some(dec("2000")))
        .await
        .unwrap();

    // 600 + 1 fee fits the daily limit.
    let tx = stack
        .coordinator
        .withdraw(
            &ctx,
            WithdrawRequest {
                wallet_id: wallet.id,
                amount: dec("600"),
                reference: "wd-1".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);

    // 601 spent today; another 500 + 1 would exceed 1000.
    let err = stack
        .coordinator
        .withdraw(
            &ctx,
            WithdrawRequest {
                wallet_id: wallet.id,
                amount: dec("500"),
                reference: "wd-2".to_string(),
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::DailyLimitExceeded { .. }));
    let failed = stack
        .store
        .transaction_by_reference("wd-2")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(failed.status, TransactionStatus::Failed);

    // Raise the daily limit; the monthly limit now trips instead.
    stack
        .wallets
        .update_limits(&op, wallet.id, Some(dec("10000")), None)
        .await
        .unwrap();
    let err = stack
        .coordinator
        .withdraw(
            &ctx,
            WithdrawRequest {
                wallet_id: wallet.id,
                amount: dec("1399"),
                reference: "wd-3".to_string(),
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::MonthlyLimitExceeded { .. }));

    let wallet = stack.store.wallet(wallet.id).await.unwrap();
    assert_eq!(wallet.balance, dec("1399")); // 2000 - 601
}

#[tokio::test]
async fn crypto_buy_pins_the_rate_and_converts() {
    let stack = stack();
    let ctx = UserContext::customer(Uuid::new_v4());
    let usd = open_wallet(&stack, &ctx, "USD").await;
    let btc = open_wallet(&stack, &ctx, "BTC").await;
    deposit(&stack, &ctx, usd.id, dec("1000")).await;

    let tx = stack
        .coordinator
        .crypto_buy(
            &ctx,
            CryptoBuyRequest {
                fiat_wallet_id: usd.id,
                crypto_wallet_id: btc.id,
                amount: dec("500"),
                reference: "buy-1".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.fee, dec("5.00"));
    assert_eq!(tx.target_currency.as_deref(), Some("BTC"));
    assert_eq!(tx.exchange_rate.unwrap(), dec("0.0000154"));
    assert_eq!(tx.converted_amount.unwrap(), dec("0.0077"));

    let usd = stack.store.wallet(usd.id).await.unwrap();
    let btc = stack.store.wallet(btc.id).await.unwrap();
    assert_eq!(usd.balance, dec("495.00"));
    assert_eq!(btc.balance, dec("0.0077"));
}

#[tokio::test]
async fn crypto_withdrawal_waits_for_external_confirmation() {
    let stack = stack();
    let ctx = UserContext::customer(Uuid::new_v4());
    let op = operator();
    let btc = open_wallet(&stack, &ctx, "BTC").await;
    deposit(&stack, &ctx, btc.id, dec("1")).await;

    let tx = stack
        .coordinator
        .withdraw(
            &ctx,
            WithdrawRequest {
                wallet_id: btc.id,
                amount: dec("0.5"),
                reference: "btc-out-1".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);
    assert_eq!(tx.hold_amount.unwrap(), dec("0.5005"));

    // Funds are reserved but not moved while the chain settles.
    let wallet = stack.store.wallet(btc.id).await.unwrap();
    assert_eq!(wallet.balance, dec("1"));
    assert_eq!(wallet.available_balance, dec("0.4995"));
    assert!(stack.store.entries_for_transaction(tx.id).await.unwrap().is_empty());

    let settled = stack
        .coordinator
        .confirm_pending_withdrawal(&op, tx.id, true, None)
        .await
        .unwrap();
    assert_eq!(settled.status, TransactionStatus::Completed);
    assert!(settled.hold_amount.is_none());

    let wallet = stack.store.wallet(btc.id).await.unwrap();
    assert_eq!(wallet.balance, dec("0.4995"));
    assert_eq!(wallet.available_balance, dec("0.4995"));

    let fee_wallet = stack.store.fee_wallet("BTC").await.unwrap();
    assert_eq!(fee_wallet.balance, dec("0.0005"));
    assert_eq!(
        stack.store.entries_for_transaction(tx.id).await.unwrap().len(),
        2
    );
}

#[tokio::test]
async fn failed_external_settlement_releases_the_hold() {
    let stack = stack();
    let ctx = UserContext::customer(Uuid::new_v4());
    let op = operator();
    let btc = open_wallet(&stack, &ctx, "BTC").await;
    deposit(&stack, &ctx, btc.id, dec("1")).await;

    let tx = stack
        .coordinator
        .withdraw(
            &ctx,
            WithdrawRequest {
                wallet_id: btc.id,
                amount: dec("0.2"),
                reference: "btc-out-2".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Pending);

    let failed = stack
        .coordinator
        .confirm_pending_withdrawal(&op, tx.id, false, Some("rejected by network".to_string()))
        .await
        .unwrap();
    assert_eq!(failed.status, TransactionStatus::Failed);
    assert!(failed.hold_amount.is_none());

    let wallet = stack.store.wallet(btc.id).await.unwrap();
    assert_eq!(wallet.balance, dec("1"));
    assert_eq!(wallet.available_balance, dec("1"));
    assert!(stack.store.entries_for_transaction(tx.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn reversal_compensates_but_keeps_the_fee() {
    let stack = stack();
    let payer = UserContext::customer(Uuid::new_v4());
    let merchant = UserContext::customer(Uuid::new_v4());
    let op = operator();
    let payer_wallet = open_wallet(&stack, &payer, "USD").await;
    let merchant_wallet = open_wallet(&stack, &merchant, "USD").await;
    deposit(&stack, &payer, payer_wallet.id, dec("200")).await;

    let tx = stack
        .coordinator
        .pos_payment(
            &payer,
            PosPaymentRequest {
                from_wallet_id: payer_wallet.id,
                merchant_wallet_id: merchant_wallet.id,
                amount: dec("100"),
                reference: "pos-rev".to_string(),
                merchant_name: None,
            },
        )
        .await
        .unwrap();

    let reversed = stack
        .coordinator
        .reverse(&op, tx.id, "merchant dispute upheld")
        .await
        .unwrap();
    assert_eq!(reversed.status, TransactionStatus::Reversed);

    let payer_wallet = stack.store.wallet(payer_wallet.id).await.unwrap();
    let merchant_wallet = stack.store.wallet(merchant_wallet.id).await.unwrap();
    let fee_wallet = stack.store.fee_wallet("USD").await.unwrap();
    // Principal returned; the 1.50 fee is retained by the platform.
    assert_eq!(payer_wallet.balance, dec("198.50"));
    assert_eq!(merchant_wallet.balance, Decimal::ZERO);
    assert_eq!(fee_wallet.balance, dec("1.50"));

    assert_eq!(
        stack.audit.records_of_type(AuditEventType::TransactionReversed).len(),
        1
    );

    // A reversed transaction cannot be reversed again.
    let err = stack
        .coordinator
        .reverse(&op, tx.id, "again")
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::Validation(_)));
}

#[tokio::test]
async fn flagged_transaction_with_hold_settles_after_approval() {
    let stack = stack();
    let ctx = UserContext::customer(Uuid::new_v4());
    let other = UserContext::customer(Uuid::new_v4());
    let op = operator();
    let wallet = open_wallet(&stack, &ctx, "USD").await;
    let target = open_wallet(&stack, &other, "USD").await;

    // Small routine deposits establish a 200 average and enough balance.
    for _ in 0..13 {
        deposit(&stack, &ctx, wallet.id, dec("200")).await;
    }

    // 2500 trips amount-spike, new-account, and unverified rules: score 70.
    let tx = stack
        .coordinator
        .transfer(
            &ctx,
            TransferRequest {
                from_wallet_id: wallet.id,
                to_wallet_id: target.id,
                amount: dec("2500"),
                reference: "flagged-approve".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Flagged);
    assert_eq!(tx.risk_score, 70);
    assert_eq!(tx.hold_amount.unwrap(), dec("2500"));

    // Funds reserved, not moved.
    let snapshot = stack.store.wallet(wallet.id).await.unwrap();
    assert_eq!(snapshot.balance, dec("2600"));
    assert_eq!(snapshot.available_balance, dec("100"));

    let approved = stack
        .coordinator
        .resolve_flagged(&op, tx.id, true)
        .await
        .unwrap();
    assert_eq!(approved.status, TransactionStatus::Completed);

    let sender = stack.store.wallet(wallet.id).await.unwrap();
    let receiver = stack.store.wallet(target.id).await.unwrap();
    assert_eq!(sender.balance, dec("100"));
    assert_eq!(sender.available_balance, dec("100"));
    assert_eq!(receiver.balance, dec("2500"));

    let report = stack
        .store
        .fraud_report_for_transaction(tx.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.status, FraudReportStatus::Cleared);
}

#[tokio::test]
async fn flagged_transaction_rejected_by_review_fails() {
    let stack = stack();
    let ctx = UserContext::customer(Uuid::new_v4());
    let other = UserContext::customer(Uuid::new_v4());
    let op = operator();
    let wallet = open_wallet(&stack, &ctx, "USD").await;
    let target = open_wallet(&stack, &other, "USD").await;
    deposit(&stack, &ctx, wallet.id, dec("200")).await;

    let tx = stack
        .coordinator
        .transfer(
            &ctx,
            TransferRequest {
                from_wallet_id: wallet.id,
                to_wallet_id: target.id,
                amount: dec("2500"),
                reference: "flagged-reject".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(tx.status, TransactionStatus::Flagged);
    // Balance too small to reserve; the hold is skipped, funds untouched.
    assert!(tx.hold_amount.is_none());

    let rejected = stack
        .coordinator
        .resolve_flagged(&op, tx.id, false)
        .await
        .unwrap();
    assert_eq!(rejected.status, TransactionStatus::Failed);

    let report = stack
        .store
        .fraud_report_for_transaction(tx.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.status, FraudReportStatus::Confirmed);

    let wallet = stack.store.wallet(wallet.id).await.unwrap();
    assert_eq!(wallet.balance, dec("200"));
    assert_eq!(wallet.available_balance, dec("200"));
}

#[tokio::test]
async fn transiently_failed_transaction_resumes_under_the_same_reference() {
    let stack = stack();
    let ctx = UserContext::customer(Uuid::new_v4());
    let wallet = open_wallet(&stack, &ctx, "USD").await;

    // Simulate a deposit that timed out after its record was created.
    let mut tx = Transaction::new(
        TransactionType::Deposit,
        dec("100"),
        "USD".to_string(),
        "resume-1".to_string(),
        None,
        Some(wallet.id),
        None,
    );
    tx.mark_failed(REASON_TIMEOUT);
    stack.store.insert_transaction(tx.clone()).await.unwrap();

    let resumed = stack
        .coordinator
        .deposit(
            &ctx,
            DepositRequest {
                wallet_id: wallet.id,
                amount: dec("100"),
                reference: "resume-1".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();
    assert_eq!(resumed.id, tx.id);
    assert_eq!(resumed.status, TransactionStatus::Completed);

    let wallet = stack.store.wallet(wallet.id).await.unwrap();
    assert_eq!(wallet.balance, dec("100"));
    assert_eq!(
        stack.store.entries_for_transaction(tx.id).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn wallet_history_reconciles_after_mixed_operations() {
    let stack = stack();
    let ctx = UserContext::customer(Uuid::new_v4());
    let other = UserContext::customer(Uuid::new_v4());
    let wallet = open_wallet(&stack, &ctx, "USD").await;
    let target = open_wallet(&stack, &other, "USD").await;

    deposit(&stack, &ctx, wallet.id, dec("500")).await;
    deposit(&stack, &ctx, wallet.id, dec("250")).await;
    stack
        .coordinator
        .transfer(
            &ctx,
            TransferRequest {
                from_wallet_id: wallet.id,
                to_wallet_id: target.id,
                amount: dec("300"),
                reference: "rec-1".to_string(),
                description: None,
            },
        )
        .await
        .unwrap();

    let reconciliation = stack.ledger.reconcile_wallet(wallet.id).await.unwrap();
    assert!(reconciliation.balanced);
    assert_eq!(reconciliation.actual_balance, dec("450"));
    assert_eq!(reconciliation.entry_count, 3);
}

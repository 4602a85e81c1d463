//! Transaction coordinator
//!
//! Orchestrates every balance-changing operation: validate -> idempotency ->
//! risk gate -> fees/conversion -> atomic settlement -> events. Rate lookups
//! and risk scoring happen before the commit critical section; the commit
//! itself applies all wallet deltas and ledger entries as one unit of work
//! with bounded optimistic retries and a configurable timeout. Once a commit
//! has been submitted the operation resolves to Completed or Failed, never
//! half-applied; cancelling a request before that point has no effect beyond
//! the resumable Pending record.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Datelike, TimeZone, Utc};
use rand::Rng;
use rust_decimal::Decimal;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditEventType, AuditLogger, AuditRecord};
use crate::currency::CurrencyRegistry;
use crate::error::{LedgerError, Result};
use crate::models::transaction::{REASON_CONFLICT, REASON_TIMEOUT};
use crate::models::{
    EntryDraft, FraudReportStatus, RiskVerdict, Transaction, TransactionStatus, TransactionType,
    UserContext, Wallet, WalletStatus,
};
use crate::services::conversion::ConversionService;
use crate::services::events::{EventDispatcher, LedgerEvent};
use crate::services::fees::FeeCalculator;
use crate::services::ledger::{LedgerService, LegDirection};
use crate::services::risk::{KycProvider, RiskContext, RiskEvaluation, RiskGate};
use crate::services::wallet::WalletService;
use crate::store::{SettlementBatch, SettlementStore, WalletDelta};

/// Coordinator tuning knobs
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Optimistic commit attempts before surfacing `Conflict`.
    pub max_commit_attempts: u32,
    /// Base backoff between conflict retries; jitter is added on top.
    pub retry_backoff: Duration,
    /// Upper bound on one atomic commit; elapsing surfaces `Timeout`.
    pub commit_timeout: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_commit_attempts: 3,
            retry_backoff: Duration::from_millis(25),
            commit_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DepositRequest {
    pub wallet_id: Uuid,
    pub amount: Decimal,
    pub reference: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct WithdrawRequest {
    pub wallet_id: Uuid,
    pub amount: Decimal,
    pub reference: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub from_wallet_id: Uuid,
    pub to_wallet_id: Uuid,
    pub amount: Decimal,
    pub reference: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PosPaymentRequest {
    pub from_wallet_id: Uuid,
    pub merchant_wallet_id: Uuid,
    pub amount: Decimal,
    pub reference: String,
    pub merchant_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CryptoBuyRequest {
    pub fiat_wallet_id: Uuid,
    pub crypto_wallet_id: Uuid,
    /// Fiat principal spent on the purchase.
    pub amount: Decimal,
    pub reference: String,
}

#[derive(Debug, Clone)]
pub struct CryptoSellRequest {
    pub crypto_wallet_id: Uuid,
    pub fiat_wallet_id: Uuid,
    /// Crypto principal being sold.
    pub amount: Decimal,
    pub reference: String,
}

/// How a settlement batch is shaped.
enum SettleMode {
    /// Normal forward settlement with fresh balance deltas.
    Standard,
    /// Settle a previously placed availability hold (pending crypto
    /// withdrawal confirmed by the external system).
    SettleHold(Decimal),
    /// Compensating entries for a completed transaction; fee is retained.
    Reversal,
}

pub struct TransactionCoordinator {
    store: Arc<dyn SettlementStore>,
    wallets: Arc<WalletService>,
    ledger: Arc<LedgerService>,
    conversion: Arc<ConversionService>,
    fees: Arc<FeeCalculator>,
    risk: Arc<RiskGate>,
    kyc: Arc<dyn KycProvider>,
    registry: Arc<CurrencyRegistry>,
    events: Arc<EventDispatcher>,
    audit: Arc<AuditLogger>,
    config: CoordinatorConfig,
}

impl TransactionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn SettlementStore>,
        wallets: Arc<WalletService>,
        ledger: Arc<LedgerService>,
        conversion: Arc<ConversionService>,
        fees: Arc<FeeCalculator>,
        risk: Arc<RiskGate>,
        kyc: Arc<dyn KycProvider>,
        registry: Arc<CurrencyRegistry>,
        events: Arc<EventDispatcher>,
        audit: Arc<AuditLogger>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            wallets,
            ledger,
            conversion,
            fees,
            risk,
            kyc,
            registry,
            events,
            audit,
            config,
        }
    }

    #[instrument(skip(self, ctx, req), fields(reference = %req.reference))]
    pub async fn deposit(&self, ctx: &UserContext, req: DepositRequest) -> Result<Transaction> {
        let wallet = self.wallets.get(ctx, req.wallet_id).await?;
        self.require_active(&wallet)?;

        self.run_operation(
            ctx,
            TransactionType::Deposit,
            req.amount,
            wallet.currency.clone(),
            req.reference,
            req.description,
            None,
            Some(wallet),
        )
        .await
    }

    #[instrument(skip(self, ctx, req), fields(reference = %req.reference))]
    pub async fn withdraw(&self, ctx: &UserContext, req: WithdrawRequest) -> Result<Transaction> {
        let wallet = self.wallets.get(ctx, req.wallet_id).await?;
        self.require_active(&wallet)?;

        self.run_operation(
            ctx,
            TransactionType::Withdrawal,
            req.amount,
            wallet.currency.clone(),
            req.reference,
            req.description,
            Some(wallet),
            None,
        )
        .await
    }

    #[instrument(skip(self, ctx, req), fields(reference = %req.reference))]
    pub async fn transfer(&self, ctx: &UserContext, req: TransferRequest) -> Result<Transaction> {
        if req.from_wallet_id == req.to_wallet_id {
            return Err(LedgerError::Validation(
                "cannot transfer a wallet to itself".to_string(),
            ));
        }
        let from = self.wallets.get(ctx, req.from_wallet_id).await?;
        // The receiving wallet may belong to any user.
        let to = self.store.wallet(req.to_wallet_id).await?;
        self.require_active(&from)?;
        self.require_active(&to)?;

        self.run_operation(
            ctx,
            TransactionType::Transfer,
            req.amount,
            from.currency.clone(),
            req.reference,
            req.description,
            Some(from),
            Some(to),
        )
        .await
    }

    #[instrument(skip(self, ctx, req), fields(reference = %req.reference))]
    pub async fn pos_payment(
        &self,
        ctx: &UserContext,
        req: PosPaymentRequest,
    ) -> Result<Transaction> {
        if req.from_wallet_id == req.merchant_wallet_id {
            return Err(LedgerError::Validation(
                "payer and merchant wallets must differ".to_string(),
            ));
        }
        let from = self.wallets.get(ctx, req.from_wallet_id).await?;
        let merchant = self.store.wallet(req.merchant_wallet_id).await?;
        self.require_active(&from)?;
        self.require_active(&merchant)?;

        let description = req
            .merchant_name
            .map(|name| format!("POS payment to {}", name));
        self.run_operation(
            ctx,
            TransactionType::PosPayment,
            req.amount,
            from.currency.clone(),
            req.reference,
            description,
            Some(from),
            Some(merchant),
        )
        .await
    }

    #[instrument(skip(self, ctx, req), fields(reference = %req.reference))]
    pub async fn crypto_buy(
        &self,
        ctx: &UserContext,
        req: CryptoBuyRequest,
    ) -> Result<Transaction> {
        let fiat = self.wallets.get(ctx, req.fiat_wallet_id).await?;
        let crypto = self.wallets.get(ctx, req.crypto_wallet_id).await?;
        if fiat.owner_id != crypto.owner_id {
            return Err(LedgerError::Validation(
                "buy must settle into the buyer's own wallet".to_string(),
            ));
        }
        if self.registry.is_crypto(&fiat.currency) || !self.registry.is_crypto(&crypto.currency) {
            return Err(LedgerError::Validation(
                "crypto buy spends a fiat wallet and credits a crypto wallet".to_string(),
            ));
        }
        self.require_active(&fiat)?;
        self.require_active(&crypto)?;

        self.run_operation(
            ctx,
            TransactionType::CryptoBuy,
            req.amount,
            fiat.currency.clone(),
            req.reference,
            None,
            Some(fiat),
            Some(crypto),
        )
        .await
    }

    #[instrument(skip(self, ctx, req), fields(reference = %req.reference))]
    pub async fn crypto_sell(
        &self,
        ctx: &UserContext,
        req: CryptoSellRequest,
    ) -> Result<Transaction> {
        let crypto = self.wallets.get(ctx, req.crypto_wallet_id).await?;
        let fiat = self.wallets.get(ctx, req.fiat_wallet_id).await?;
        if fiat.owner_id != crypto.owner_id {
            return Err(LedgerError::Validation(
                "sale must settle into the seller's own wallet".to_string(),
            ));
        }
        if !self.registry.is_crypto(&crypto.currency) || self.registry.is_crypto(&fiat.currency) {
            return Err(LedgerError::Validation(
                "crypto sell spends a crypto wallet and credits a fiat wallet".to_string(),
            ));
        }
        self.require_active(&crypto)?;
        self.require_active(&fiat)?;

        self.run_operation(
            ctx,
            TransactionType::CryptoSell,
            req.amount,
            crypto.currency.clone(),
            req.reference,
            None,
            Some(crypto),
            Some(fiat),
        )
        .await
    }

    /// Callback from the external settlement system for a pending crypto
    /// withdrawal: settles the held funds on confirmation or releases the
    /// hold on failure.
    #[instrument(skip(self, ctx))]
    pub async fn confirm_pending_withdrawal(
        &self,
        ctx: &UserContext,
        transaction_id: Uuid,
        confirmed: bool,
        detail: Option<String>,
    ) -> Result<Transaction> {
        self.require_operator(ctx)?;
        let mut tx = self.store.transaction(transaction_id).await?;
        if tx.transaction_type != TransactionType::Withdrawal
            || tx.status != TransactionStatus::Pending
        {
            return Err(LedgerError::Validation(format!(
                "transaction {} is not a pending withdrawal",
                transaction_id
            )));
        }
        let hold = tx.hold_amount.ok_or_else(|| {
            LedgerError::Validation(format!("transaction {} holds no funds", transaction_id))
        })?;
        let from_wallet_id = tx.from_wallet_id.ok_or_else(|| {
            LedgerError::Validation(format!("transaction {} has no source wallet", transaction_id))
        })?;

        if !confirmed {
            self.store.release_hold(from_wallet_id, hold).await?;
            tx.hold_amount = None;
            let reason = detail.unwrap_or_else(|| "external settlement failed".to_string());
            self.fail_transaction(&mut tx, &reason).await;
            return Ok(tx);
        }

        match self.settle(tx.clone(), SettleMode::SettleHold(hold)).await {
            Ok(settled) => Ok(settled),
            Err(e) => {
                // The hold survives a transient failure so a retried
                // confirmation can still settle it; a permanent failure
                // returns the reserved funds.
                if !e.is_transient() {
                    if let Err(release_err) = self.store.release_hold(from_wallet_id, hold).await {
                        warn!(
                            transaction_id = %transaction_id,
                            error = %release_err,
                            "failed to release hold after settlement failure"
                        );
                    }
                    if let Ok(mut stored) = self.store.transaction(transaction_id).await {
                        stored.hold_amount = None;
                        if let Err(update_err) = self.store.update_transaction(stored).await {
                            warn!(
                                transaction_id = %transaction_id,
                                error = %update_err,
                                "failed to clear hold bookkeeping"
                            );
                        }
                    }
                }
                Err(e)
            }
        }
    }

    /// Structured entry point for the external review surface to resolve a
    /// FLAGGED transaction: approve settles it, reject fails it. Either way
    /// the availability hold is released and the fraud report closed out.
    #[instrument(skip(self, ctx))]
    pub async fn resolve_flagged(
        &self,
        ctx: &UserContext,
        transaction_id: Uuid,
        approve: bool,
    ) -> Result<Transaction> {
        self.require_operator(ctx)?;
        let mut tx = self.store.transaction(transaction_id).await?;
        if tx.status != TransactionStatus::Flagged {
            return Err(LedgerError::Validation(format!(
                "transaction {} is not flagged",
                transaction_id
            )));
        }

        if let Some(hold) = tx.hold_amount.take() {
            if let Some(from_wallet_id) = tx.from_wallet_id {
                self.store.release_hold(from_wallet_id, hold).await?;
            }
            self.store.update_transaction(tx.clone()).await?;
        }

        if let Some(mut report) = self
            .store
            .fraud_report_for_transaction(transaction_id)
            .await?
        {
            report.resolve(if approve {
                FraudReportStatus::Cleared
            } else {
                FraudReportStatus::Confirmed
            });
            self.store.update_fraud_report(report).await?;
        }

        self.audit.record(
            AuditRecord::new(
                AuditEventType::FlaggedResolved,
                if approve {
                    "flagged transaction approved after review"
                } else {
                    "flagged transaction rejected after review"
                },
            )
            .with_user(ctx.user_id)
            .with_transaction(transaction_id),
        );

        if !approve {
            self.fail_transaction(&mut tx, "rejected after fraud review").await;
            return Ok(tx);
        }

        tx.transition(TransactionStatus::Pending)
            .map_err(LedgerError::Validation)?;
        self.store.update_transaction(tx.clone()).await?;
        self.finalize(tx).await
    }

    /// Compensate a completed transaction with reversing entries and mark it
    /// REVERSED. The fee is retained by the platform.
    #[instrument(skip(self, ctx))]
    pub async fn reverse(
        &self,
        ctx: &UserContext,
        transaction_id: Uuid,
        reason: &str,
    ) -> Result<Transaction> {
        self.require_operator(ctx)?;
        let tx = self.store.transaction(transaction_id).await?;
        if tx.status != TransactionStatus::Completed {
            return Err(LedgerError::Validation(format!(
                "only completed transactions can be reversed, {} is {}",
                transaction_id, tx.status
            )));
        }

        let reversed = self.settle(tx, SettleMode::Reversal).await?;

        self.audit.record(
            AuditRecord::new(AuditEventType::TransactionReversed, reason.to_string())
                .with_user(ctx.user_id)
                .with_transaction(transaction_id),
        );
        self.events.emit(LedgerEvent::TransactionReversed {
            transaction_id,
            reference: reversed.reference.clone(),
        });
        Ok(reversed)
    }

    pub async fn transaction(&self, ctx: &UserContext, transaction_id: Uuid) -> Result<Transaction> {
        let tx = self.store.transaction(transaction_id).await?;
        self.check_transaction_access(ctx, &tx).await?;
        Ok(tx)
    }

    pub async fn transaction_by_reference(
        &self,
        ctx: &UserContext,
        reference: &str,
    ) -> Result<Option<Transaction>> {
        match self.store.transaction_by_reference(reference).await? {
            Some(tx) => {
                self.check_transaction_access(ctx, &tx).await?;
                Ok(Some(tx))
            }
            None => Ok(None),
        }
    }

    // ---- pipeline -------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    async fn run_operation(
        &self,
        ctx: &UserContext,
        transaction_type: TransactionType,
        amount: Decimal,
        currency: String,
        reference: String,
        description: Option<String>,
        from_wallet: Option<Wallet>,
        to_wallet: Option<Wallet>,
    ) -> Result<Transaction> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::Validation(
                "amount must be positive".to_string(),
            ));
        }
        if reference.trim().is_empty() {
            return Err(LedgerError::Validation(
                "idempotency reference is required".to_string(),
            ));
        }
        if !self.registry.supports(&currency) {
            return Err(LedgerError::Validation(format!(
                "unsupported currency: {}",
                currency
            )));
        }

        // Idempotency: a known reference is returned unchanged, except that a
        // transiently failed attempt (timeout/conflict) resumes.
        if let Some(existing) = self.store.transaction_by_reference(&reference).await? {
            if existing.is_transient_failure() {
                let mut resumed = existing;
                resumed
                    .transition(TransactionStatus::Pending)
                    .map_err(LedgerError::Validation)?;
                let resumed = self.store.update_transaction(resumed).await?;
                info!(%reference, "resuming transiently failed transaction");
                return self.finalize(resumed).await;
            }
            info!(%reference, "returning existing transaction for reference");
            return Ok(existing);
        }

        let mut tx = Transaction::new(
            transaction_type,
            amount,
            currency,
            reference.clone(),
            from_wallet.as_ref().map(|w| w.id),
            to_wallet.as_ref().map(|w| w.id),
            description,
        );
        tx = match self.store.insert_transaction(tx).await {
            Ok(tx) => tx,
            Err(LedgerError::AlreadyExists(_)) => {
                // Lost a duplicate-submission race; hand back the winner.
                return self
                    .store
                    .transaction_by_reference(&reference)
                    .await?
                    .ok_or_else(|| LedgerError::NotFound(format!("transaction {}", reference)));
            }
            Err(e) => return Err(e),
        };

        // Risk gating happens before any rate lookup or lock acquisition.
        let subject_id = from_wallet
            .as_ref()
            .or(to_wallet.as_ref())
            .map(|w| w.owner_id)
            .unwrap_or(ctx.user_id);
        let risk_ctx = self.build_risk_context(subject_id, &tx).await?;
        let evaluation = self.risk.evaluate(&risk_ctx);
        tx.risk_score = evaluation.score;

        match evaluation.verdict {
            RiskVerdict::Block => {
                self.risk.record_verdict(&tx, &evaluation).await?;
                self.fail_transaction(&mut tx, "blocked by risk policy").await;
                return Err(LedgerError::TransactionBlocked {
                    risk_score: evaluation.score,
                });
            }
            RiskVerdict::Hold => {
                self.risk.record_verdict(&tx, &evaluation).await?;
                // Reserve the principal so it cannot be double-spent while
                // the review is open. Failing to reserve is not fatal; the
                // funds check repeats if the review approves.
                if let Some(from) = &from_wallet {
                    match self.store.place_hold(from.id, tx.amount).await {
                        Ok(_) => tx.hold_amount = Some(tx.amount),
                        Err(e) => warn!(
                            wallet_id = %from.id,
                            error = %e,
                            "could not place review hold"
                        ),
                    }
                }
                tx.transition(TransactionStatus::Flagged)
                    .map_err(LedgerError::Validation)?;
                let tx = self.store.update_transaction(tx).await?;
                self.events.emit(LedgerEvent::TransactionFlagged {
                    transaction_id: tx.id,
                    reference: tx.reference.clone(),
                    risk_score: tx.risk_score,
                });
                self.spawn_reclassify(tx.id, risk_ctx, evaluation);
                return Ok(tx);
            }
            RiskVerdict::Allow => {
                self.spawn_reclassify(tx.id, risk_ctx, evaluation);
            }
        }

        self.finalize(tx).await
    }

    /// Steps 4-6 of the workflow: fee, conversion pinning, limit checks, and
    /// the atomic settlement (or the pending-hold branch for crypto
    /// withdrawals). Entered with an ALLOW verdict already recorded on the
    /// transaction.
    async fn finalize(&self, mut tx: Transaction) -> Result<Transaction> {
        let fee = self
            .fees
            .fee(tx.transaction_type, &tx.currency, tx.amount)?;
        tx.fee = fee;

        if let Some(to_wallet_id) = tx.to_wallet_id {
            let to = self.store.wallet(to_wallet_id).await?;
            if to.currency != tx.currency {
                let conversion = self
                    .conversion
                    .convert(tx.amount, &tx.currency, &to.currency)
                    .await?;
                tx.pin_conversion(
                    to.currency.clone(),
                    conversion.rate,
                    conversion.converted_amount,
                );
            }
        }
        tx = self.store.update_transaction(tx).await?;

        if tx.transaction_type.is_debit() {
            if let Some(from_wallet_id) = tx.from_wallet_id {
                let from = self.store.wallet(from_wallet_id).await?;
                if let Err(e) = self.check_limits(&from, tx.debit_total()).await {
                    self.fail_transaction(&mut tx, &e.to_string()).await;
                    return Err(e);
                }
            }
        }

        // Crypto withdrawals settle asynchronously: reserve the funds and
        // wait for the external system to confirm or fail the transaction.
        if tx.transaction_type == TransactionType::Withdrawal
            && self.registry.is_crypto(&tx.currency)
        {
            let from_wallet_id = tx.from_wallet_id.ok_or_else(|| {
                LedgerError::Validation("withdrawal has no source wallet".to_string())
            })?;
            let hold = tx.debit_total();
            if let Err(e) = self.store.place_hold(from_wallet_id, hold).await {
                self.fail_transaction(&mut tx, &e.to_string()).await;
                return Err(e);
            }
            tx.hold_amount = Some(hold);
            let tx = self.store.update_transaction(tx).await?;
            info!(
                transaction_id = %tx.id,
                "crypto withdrawal held pending external settlement"
            );
            return Ok(tx);
        }

        self.settle(tx, SettleMode::Standard).await
    }

    /// The atomic commit loop: build fresh deltas, validate conservation,
    /// commit under a timeout, and retry on version conflicts with jittered
    /// backoff. Risk is not re-scored here; the verdict gated this attempt.
    ///
    /// Failure bookkeeping depends on the mode: a standard settlement marks
    /// the transaction Failed (transient reasons stay resumable); a hold
    /// settlement stays Pending across transient failures so the external
    /// confirmation can be retried; a reversal never touches the completed
    /// transaction's status.
    async fn settle(&self, tx: Transaction, mode: SettleMode) -> Result<Transaction> {
        let mark_on_transient = matches!(mode, SettleMode::Standard);
        let mark_on_permanent = !matches!(mode, SettleMode::Reversal);
        let mut tx = tx;
        let mut attempt = 0u32;
        loop {
            attempt += 1;

            let batch = match self.build_batch(&tx, &mode).await {
                Ok(batch) => batch,
                Err(e) => {
                    return if mark_on_permanent {
                        self.fail_and_surface(&mut tx, e).await
                    } else {
                        Err(self.surface_error(&tx, e))
                    };
                }
            };

            match tokio::time::timeout(self.config.commit_timeout, self.store.commit(batch)).await
            {
                Err(_) => {
                    if mark_on_transient {
                        self.fail_transaction(&mut tx, REASON_TIMEOUT).await;
                    }
                    return Err(LedgerError::Timeout);
                }
                Ok(Ok(outcome)) => {
                    let settled = outcome.transaction;
                    if settled.status == TransactionStatus::Completed {
                        self.events.emit(LedgerEvent::TransactionSettled {
                            transaction_id: settled.id,
                            reference: settled.reference.clone(),
                            transaction_type: settled.transaction_type,
                            amount: settled.amount,
                            fee: settled.fee,
                            currency: settled.currency.clone(),
                            from_wallet_id: settled.from_wallet_id,
                            to_wallet_id: settled.to_wallet_id,
                        });
                    }
                    info!(
                        transaction_id = %settled.id,
                        status = %settled.status,
                        entries = outcome.entries.len(),
                        "settlement committed"
                    );
                    return Ok(settled);
                }
                Ok(Err(LedgerError::Conflict(detail))) => {
                    if attempt >= self.config.max_commit_attempts {
                        if mark_on_transient {
                            self.fail_transaction(&mut tx, REASON_CONFLICT).await;
                        }
                        return Err(LedgerError::Conflict(detail));
                    }
                    let jitter_ms = rand::thread_rng()
                        .gen_range(0..=self.config.retry_backoff.as_millis() as u64);
                    tokio::time::sleep(self.config.retry_backoff + Duration::from_millis(jitter_ms))
                        .await;
                    warn!(
                        transaction_id = %tx.id,
                        attempt,
                        "commit conflict, retrying with fresh wallet state"
                    );
                }
                Ok(Err(e)) => {
                    return if mark_on_permanent {
                        self.fail_and_surface(&mut tx, e).await
                    } else {
                        Err(self.surface_error(&tx, e))
                    };
                }
            }
        }
    }

    /// Assemble the deltas and paired ledger entries for one commit attempt,
    /// reading fresh wallet versions. Conservation is validated before the
    /// batch may touch the store.
    async fn build_batch(&self, tx: &Transaction, mode: &SettleMode) -> Result<SettlementBatch> {
        let mut deltas = Vec::new();
        let mut entries = Vec::new();

        let describe = |fallback: &str| {
            tx.description
                .clone()
                .unwrap_or_else(|| fallback.to_string())
        };

        let (direction, target_status) = match mode {
            SettleMode::Reversal => (LegDirection::Reversal, TransactionStatus::Reversed),
            _ => (LegDirection::Forward, TransactionStatus::Completed),
        };

        match mode {
            SettleMode::Standard => match tx.transaction_type {
                TransactionType::Deposit => {
                    let to = self.fresh_wallet(tx.to_wallet_id).await?;
                    deltas.push(self.wallets.prepare_delta(&to, tx.amount)?);
                    entries.push(EntryDraft::new(
                        to.id,
                        tx.amount,
                        &to.currency,
                        &describe("Deposit via external rail"),
                    ));
                }
                TransactionType::Withdrawal => {
                    let from = self.fresh_wallet(tx.from_wallet_id).await?;
                    deltas.push(self.wallets.prepare_delta(&from, -tx.debit_total())?);
                    entries.push(EntryDraft::new(
                        from.id,
                        -tx.debit_total(),
                        &from.currency,
                        &describe("Withdrawal to external rail"),
                    ));
                    self.push_fee_leg(tx, &mut deltas, &mut entries).await?;
                }
                TransactionType::Transfer
                | TransactionType::PosPayment
                | TransactionType::CryptoBuy
                | TransactionType::CryptoSell => {
                    let from = self.fresh_wallet(tx.from_wallet_id).await?;
                    let to = self.fresh_wallet(tx.to_wallet_id).await?;
                    let credited = tx.converted_amount.unwrap_or(tx.amount);

                    deltas.push(self.wallets.prepare_delta(&from, -tx.debit_total())?);
                    entries.push(EntryDraft::new(
                        from.id,
                        -tx.debit_total(),
                        &from.currency,
                        &describe(&format!("{} to wallet {}", tx.transaction_type, to.id)),
                    ));
                    self.push_fee_leg(tx, &mut deltas, &mut entries).await?;
                    deltas.push(self.wallets.prepare_delta(&to, credited)?);
                    entries.push(EntryDraft::new(
                        to.id,
                        credited,
                        &to.currency,
                        &describe(&format!("{} from wallet {}", tx.transaction_type, from.id)),
                    ));
                }
            },
            SettleMode::SettleHold(hold) => {
                let from = self.fresh_wallet(tx.from_wallet_id).await?;
                if !from.is_active() {
                    return Err(match from.status {
                        WalletStatus::Frozen => LedgerError::WalletFrozen(from.id),
                        _ => LedgerError::WalletClosed(from.id),
                    });
                }
                deltas.push(WalletDelta::settle_held(&from, *hold));
                entries.push(EntryDraft::new(
                    from.id,
                    -tx.debit_total(),
                    &from.currency,
                    &describe("Crypto withdrawal settled on-chain"),
                ));
                self.push_fee_leg(tx, &mut deltas, &mut entries).await?;
            }
            SettleMode::Reversal => {
                // Compensate the principal legs; the fee is not returned.
                if let Some(to) = self.optional_fresh_wallet(tx.to_wallet_id).await? {
                    let credited = tx.converted_amount.unwrap_or(tx.amount);
                    deltas.push(self.wallets.prepare_delta(&to, -credited)?);
                    entries.push(EntryDraft::new(
                        to.id,
                        -credited,
                        &to.currency,
                        "Reversal of credited funds",
                    ));
                }
                if let Some(from) = self.optional_fresh_wallet(tx.from_wallet_id).await? {
                    deltas.push(self.wallets.prepare_delta(&from, tx.amount)?);
                    entries.push(EntryDraft::new(
                        from.id,
                        tx.amount,
                        &from.currency,
                        "Reversal of debited funds",
                    ));
                }
            }
        }

        self.ledger.validate_legs(tx, &entries, direction)?;

        let mut next = tx.clone();
        if matches!(mode, SettleMode::SettleHold(_)) {
            next.hold_amount = None;
        }
        next.transition(target_status)
            .map_err(LedgerError::Validation)?;

        Ok(SettlementBatch {
            transaction: next,
            deltas,
            entries,
        })
    }

    /// Credit the platform fee wallet for the transaction currency.
    async fn push_fee_leg(
        &self,
        tx: &Transaction,
        deltas: &mut Vec<WalletDelta>,
        entries: &mut Vec<EntryDraft>,
    ) -> Result<()> {
        if tx.fee.is_zero() {
            return Ok(());
        }
        let fee_wallet = self.store.fee_wallet(&tx.currency).await?;
        deltas.push(WalletDelta::platform_credit(fee_wallet.id, tx.fee));
        entries.push(EntryDraft::new(
            fee_wallet.id,
            tx.fee,
            &fee_wallet.currency,
            &format!("{} fee", tx.transaction_type),
        ));
        Ok(())
    }

    // ---- helpers --------------------------------------------------------

    async fn build_risk_context(&self, subject_id: Uuid, tx: &Transaction) -> Result<RiskContext> {
        let activity = self.store.activity_snapshot(subject_id).await?;
        let kyc_verified = self.kyc.is_verified(subject_id).await;
        let account_age_hours = activity
            .oldest_wallet_created_at
            .map(|created| (Utc::now() - created).num_hours())
            .unwrap_or(0);

        Ok(RiskContext {
            user_id: subject_id,
            transaction_type: tx.transaction_type,
            amount: tx.amount,
            currency: tx.currency.clone(),
            historical_average: activity.average_completed_amount,
            tx_count_24h: activity.tx_count_24h,
            account_age_hours,
            kyc_verified,
        })
    }

    fn spawn_reclassify(&self, transaction_id: Uuid, ctx: RiskContext, evaluation: RiskEvaluation) {
        let gate = Arc::clone(&self.risk);
        tokio::spawn(async move {
            gate.reclassify(transaction_id, ctx, evaluation).await;
        });
    }

    async fn check_limits(&self, wallet: &Wallet, debit: Decimal) -> Result<()> {
        let now = Utc::now();
        if wallet.daily_limit > Decimal::ZERO {
            let spent = self
                .store
                .completed_debit_total(wallet.id, start_of_utc_day(now))
                .await?;
            if spent + debit > wallet.daily_limit {
                return Err(LedgerError::DailyLimitExceeded {
                    wallet_id: wallet.id,
                    limit: wallet.daily_limit,
                });
            }
        }
        if wallet.monthly_limit > Decimal::ZERO {
            let spent = self
                .store
                .completed_debit_total(wallet.id, start_of_utc_month(now))
                .await?;
            if spent + debit > wallet.monthly_limit {
                return Err(LedgerError::MonthlyLimitExceeded {
                    wallet_id: wallet.id,
                    limit: wallet.monthly_limit,
                });
            }
        }
        Ok(())
    }

    async fn fresh_wallet(&self, wallet_id: Option<Uuid>) -> Result<Wallet> {
        let id = wallet_id
            .ok_or_else(|| LedgerError::Validation("operation wallet is missing".to_string()))?;
        self.store.wallet(id).await
    }

    async fn optional_fresh_wallet(&self, wallet_id: Option<Uuid>) -> Result<Option<Wallet>> {
        match wallet_id {
            Some(id) => Ok(Some(self.store.wallet(id).await?)),
            None => Ok(None),
        }
    }

    /// Mark a transaction failed, persist it, and emit the terminal event.
    async fn fail_transaction(&self, tx: &mut Transaction, reason: &str) {
        tx.mark_failed(reason);
        if let Err(e) = self.store.update_transaction(tx.clone()).await {
            warn!(transaction_id = %tx.id, error = %e, "failed to persist failure status");
        }
        self.events.emit(LedgerEvent::TransactionFailed {
            transaction_id: tx.id,
            reference: tx.reference.clone(),
            reason: reason.to_string(),
        });
    }

    /// Fail the transaction for `error` and surface it to the caller.
    async fn fail_and_surface(
        &self,
        tx: &mut Transaction,
        error: LedgerError,
    ) -> Result<Transaction> {
        let surfaced = self.surface_error(tx, error);
        let reason = match &surfaced {
            LedgerError::UnbalancedLedger { .. } => "internal settlement failure".to_string(),
            other => other.to_string(),
        };
        self.fail_transaction(tx, &reason).await;
        Err(surfaced)
    }

    /// Internal invariant violations are logged with full context and
    /// surfaced as a generic internal failure; everything else passes
    /// through untouched.
    fn surface_error(&self, tx: &Transaction, error: LedgerError) -> LedgerError {
        if error.is_internal() {
            error!(
                transaction_id = %tx.id,
                error = %error,
                "ledger invariant violation, aborting settlement"
            );
            return LedgerError::UnbalancedLedger {
                transaction_id: tx.id,
                detail: "internal settlement failure".to_string(),
            };
        }
        error
    }

    fn require_active(&self, wallet: &Wallet) -> Result<()> {
        match wallet.status {
            WalletStatus::Active => Ok(()),
            WalletStatus::Frozen => Err(LedgerError::WalletFrozen(wallet.id)),
            WalletStatus::Closed => Err(LedgerError::WalletClosed(wallet.id)),
        }
    }

    fn require_operator(&self, ctx: &UserContext) -> Result<()> {
        if !ctx.is_operator() {
            return Err(LedgerError::PermissionDenied(
                "operator role required".to_string(),
            ));
        }
        Ok(())
    }

    async fn check_transaction_access(&self, ctx: &UserContext, tx: &Transaction) -> Result<()> {
        if ctx.is_operator() {
            return Ok(());
        }
        for wallet_id in [tx.from_wallet_id, tx.to_wallet_id].into_iter().flatten() {
            let wallet = self.store.wallet(wallet_id).await?;
            if wallet.owner_id == ctx.user_id {
                return Ok(());
            }
        }
        Err(LedgerError::PermissionDenied(
            "transaction belongs to another user".to_string(),
        ))
    }
}

fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_hms_opt(0, 0, 0).unwrap())
}

fn start_of_utc_month(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = now.date_naive().with_day(1).unwrap();
    Utc.from_utc_datetime(&first.and_hms_opt(0, 0, 0).unwrap())
}

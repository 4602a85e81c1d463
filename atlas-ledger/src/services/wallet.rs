//! Wallet store service
//!
//! Owns wallet lifecycle and invariants. Balance mutation itself is only
//! sanctioned through the settlement commit; this service produces the
//! validated deltas that go into it.

use std::sync::Arc;

use rust_decimal::Decimal;
use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditEventType, AuditLogger, AuditRecord};
use crate::currency::CurrencyRegistry;
use crate::error::{LedgerError, Result};
use crate::models::{UserContext, Wallet, WalletStatus};
use crate::services::events::{EventDispatcher, LedgerEvent};
use crate::store::{SettlementStore, WalletDelta};

pub struct WalletService {
    store: Arc<dyn SettlementStore>,
    registry: Arc<CurrencyRegistry>,
    events: Arc<EventDispatcher>,
    audit: Arc<AuditLogger>,
}

impl WalletService {
    pub fn new(
        store: Arc<dyn SettlementStore>,
        registry: Arc<CurrencyRegistry>,
        events: Arc<EventDispatcher>,
        audit: Arc<AuditLogger>,
    ) -> Self {
        Self {
            store,
            registry,
            events,
            audit,
        }
    }

    /// Open a wallet for a currency. One wallet per (owner, currency); the
    /// owner's first wallet becomes the default.
    pub async fn create(&self, ctx: &UserContext, owner_id: Uuid, currency: &str) -> Result<Wallet> {
        if !ctx.can_act_for(owner_id) {
            return Err(LedgerError::PermissionDenied(
                "cannot open a wallet for another user".to_string(),
            ));
        }
        if !self.registry.supports(currency) {
            return Err(LedgerError::Validation(format!(
                "unsupported currency: {}",
                currency
            )));
        }
        if self
            .store
            .wallet_for_owner(owner_id, currency)
            .await?
            .is_some()
        {
            return Err(LedgerError::AlreadyExists(format!(
                "wallet for owner {} in {}",
                owner_id, currency
            )));
        }

        let is_default = self.store.wallets_for_owner(owner_id).await?.is_empty();
        let wallet = Wallet::new(owner_id, currency.to_string(), is_default);
        let wallet = self.store.insert_wallet(wallet).await?;
        info!(wallet_id = %wallet.id, owner_id = %owner_id, currency, "wallet created");
        Ok(wallet)
    }

    pub async fn get(&self, ctx: &UserContext, wallet_id: Uuid) -> Result<Wallet> {
        let wallet = self.store.wallet(wallet_id).await?;
        if !ctx.can_act_for(wallet.owner_id) {
            return Err(LedgerError::PermissionDenied(
                "wallet belongs to another user".to_string(),
            ));
        }
        Ok(wallet)
    }

    pub async fn list_by_owner(&self, ctx: &UserContext, owner_id: Uuid) -> Result<Vec<Wallet>> {
        if !ctx.can_act_for(owner_id) {
            return Err(LedgerError::PermissionDenied(
                "cannot list another user's wallets".to_string(),
            ));
        }
        self.store.wallets_for_owner(owner_id).await
    }

    /// Validate a balance delta against a wallet's current state and produce
    /// the commit-ready mutation. This is the only sanctioned gate to a
    /// balance change; the delta settles inside the same atomic unit of work
    /// as its paired ledger entries.
    pub fn prepare_delta(&self, wallet: &Wallet, signed_amount: Decimal) -> Result<WalletDelta> {
        match wallet.status {
            WalletStatus::Active => {}
            WalletStatus::Frozen => return Err(LedgerError::WalletFrozen(wallet.id)),
            WalletStatus::Closed => return Err(LedgerError::WalletClosed(wallet.id)),
        }
        if signed_amount < Decimal::ZERO {
            // Held funds cannot be spent: debits draw on availability.
            if wallet.available_balance + signed_amount < Decimal::ZERO {
                return Err(LedgerError::InsufficientFunds {
                    wallet_id: wallet.id,
                    requested: signed_amount.abs(),
                    available: wallet.available_balance,
                });
            }
        }
        Ok(WalletDelta::balanced(wallet, signed_amount))
    }

    pub async fn freeze(&self, ctx: &UserContext, wallet_id: Uuid) -> Result<Wallet> {
        self.require_operator(ctx)?;
        let wallet = self.store.wallet(wallet_id).await?;
        if wallet.status == WalletStatus::Closed {
            return Err(LedgerError::WalletClosed(wallet_id));
        }
        let wallet = self
            .store
            .update_wallet_status(wallet_id, WalletStatus::Frozen)
            .await?;
        self.audit.record(
            AuditRecord::new(AuditEventType::WalletFrozen, "wallet frozen by operator")
                .with_user(ctx.user_id)
                .with_wallet(wallet_id),
        );
        self.events.emit(LedgerEvent::WalletFrozen {
            wallet_id,
            owner_id: wallet.owner_id,
        });
        Ok(wallet)
    }

    pub async fn unfreeze(&self, ctx: &UserContext, wallet_id: Uuid) -> Result<Wallet> {
        self.require_operator(ctx)?;
        let wallet = self.store.wallet(wallet_id).await?;
        if wallet.status != WalletStatus::Frozen {
            return Err(LedgerError::Validation(format!(
                "wallet {} is not frozen",
                wallet_id
            )));
        }
        let wallet = self
            .store
            .update_wallet_status(wallet_id, WalletStatus::Active)
            .await?;
        self.audit.record(
            AuditRecord::new(AuditEventType::WalletUnfrozen, "wallet unfrozen by operator")
                .with_user(ctx.user_id)
                .with_wallet(wallet_id),
        );
        self.events.emit(LedgerEvent::WalletUnfrozen {
            wallet_id,
            owner_id: wallet.owner_id,
        });
        Ok(wallet)
    }

    /// Close a wallet. Wallets are never deleted; a closed wallet keeps its
    /// history but accepts no further operations. Requires a zero balance.
    pub async fn close(&self, ctx: &UserContext, wallet_id: Uuid) -> Result<Wallet> {
        self.require_operator(ctx)?;
        let wallet = self.store.wallet(wallet_id).await?;
        if wallet.balance != Decimal::ZERO {
            return Err(LedgerError::Validation(format!(
                "wallet {} still holds {} {}",
                wallet_id, wallet.balance, wallet.currency
            )));
        }
        let wallet = self
            .store
            .update_wallet_status(wallet_id, WalletStatus::Closed)
            .await?;
        self.audit.record(
            AuditRecord::new(AuditEventType::WalletClosed, "wallet closed")
                .with_user(ctx.user_id)
                .with_wallet(wallet_id),
        );
        Ok(wallet)
    }

    pub async fn update_limits(
        &self,
        ctx: &UserContext,
        wallet_id: Uuid,
        daily_limit: Option<Decimal>,
        monthly_limit: Option<Decimal>,
    ) -> Result<Wallet> {
        self.require_operator(ctx)?;
        if daily_limit.map(|l| l < Decimal::ZERO).unwrap_or(false)
            || monthly_limit.map(|l| l < Decimal::ZERO).unwrap_or(false)
        {
            return Err(LedgerError::Validation(
                "limits must be non-negative".to_string(),
            ));
        }
        let wallet = self
            .store
            .update_wallet_limits(wallet_id, daily_limit, monthly_limit)
            .await?;
        self.audit.record(
            AuditRecord::new(AuditEventType::WalletLimitsUpdated, "limits updated")
                .with_user(ctx.user_id)
                .with_wallet(wallet_id)
                .with_metadata("daily_limit", serde_json::json!(wallet.daily_limit.to_string()))
                .with_metadata(
                    "monthly_limit",
                    serde_json::json!(wallet.monthly_limit.to_string()),
                ),
        );
        Ok(wallet)
    }

    fn require_operator(&self, ctx: &UserContext) -> Result<()> {
        if !ctx.is_operator() {
            return Err(LedgerError::PermissionDenied(
                "operator role required".to_string(),
            ));
        }
        Ok(())
    }
}

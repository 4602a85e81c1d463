//! Structured audit trail
//!
//! The core does not write audit storage itself; it emits structured records
//! the external audit log writer consumes. Every HOLD/BLOCK verdict, every
//! freeze/unfreeze, and every reversal produces a record here.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Audit event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    RiskHold,
    RiskBlock,
    RiskEscalated,
    WalletFrozen,
    WalletUnfrozen,
    WalletClosed,
    WalletLimitsUpdated,
    TransactionReversed,
    FlaggedResolved,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuditEventType::RiskHold => write!(f, "risk_hold"),
            AuditEventType::RiskBlock => write!(f, "risk_block"),
            AuditEventType::RiskEscalated => write!(f, "risk_escalated"),
            AuditEventType::WalletFrozen => write!(f, "wallet_frozen"),
            AuditEventType::WalletUnfrozen => write!(f, "wallet_unfrozen"),
            AuditEventType::WalletClosed => write!(f, "wallet_closed"),
            AuditEventType::WalletLimitsUpdated => write!(f, "wallet_limits_updated"),
            AuditEventType::TransactionReversed => write!(f, "transaction_reversed"),
            AuditEventType::FlaggedResolved => write!(f, "flagged_resolved"),
        }
    }
}

/// One audit record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub user_id: Option<Uuid>,
    pub wallet_id: Option<Uuid>,
    pub transaction_id: Option<Uuid>,
    pub detail: String,
    pub metadata: serde_json::Value,
}

impl AuditRecord {
    pub fn new(event_type: AuditEventType, detail: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            wallet_id: None,
            transaction_id: None,
            detail: detail.into(),
            metadata: serde_json::Value::Object(serde_json::Map::new()),
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_wallet(mut self, wallet_id: Uuid) -> Self {
        self.wallet_id = Some(wallet_id);
        self
    }

    pub fn with_transaction(mut self, transaction_id: Uuid) -> Self {
        self.transaction_id = Some(transaction_id);
        self
    }

    pub fn with_metadata(mut self, key: &str, value: serde_json::Value) -> Self {
        if let serde_json::Value::Object(ref mut map) = self.metadata {
            map.insert(key.to_string(), value);
        }
        self
    }
}

/// Collects audit records and mirrors them to the tracing log.
#[derive(Debug, Default)]
pub struct AuditLogger {
    records: RwLock<Vec<AuditRecord>>,
}

impl AuditLogger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, record: AuditRecord) {
        tracing::info!(
            event = %record.event_type,
            user_id = ?record.user_id,
            wallet_id = ?record.wallet_id,
            transaction_id = ?record.transaction_id,
            detail = %record.detail,
            "audit"
        );
        self.records.write().unwrap().push(record);
    }

    pub fn records(&self) -> Vec<AuditRecord> {
        self.records.read().unwrap().clone()
    }

    pub fn records_of_type(&self, event_type: AuditEventType) -> Vec<AuditRecord> {
        self.records
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.event_type == event_type)
            .cloned()
            .collect()
    }
}

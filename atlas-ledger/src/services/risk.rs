//! Fraud risk gate
//!
//! Two explicit stages: a deterministic rule engine that gates fund movement
//! synchronously, and a best-effort secondary classifier that may re-score a
//! transaction afterwards. The secondary stage can only escalate, never
//! downgrade, and never aborts settlement on its own.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::RwLock;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::audit::{AuditEventType, AuditLogger, AuditRecord};
use crate::error::Result;
use crate::models::{
    FraudReport, RiskLevel, RiskVerdict, Transaction, TransactionType,
};
use crate::services::events::{EventDispatcher, LedgerEvent};
use crate::store::SettlementStore;

/// Rule identifiers recorded on fraud reports
pub const RULE_AMOUNT_ABOVE_AVERAGE: &str = "amount_above_average";
pub const RULE_VELOCITY_24H: &str = "velocity_24h";
pub const RULE_NEW_ACCOUNT_HIGH_AMOUNT: &str = "new_account_high_amount";
pub const RULE_KYC_UNVERIFIED_CAP: &str = "kyc_unverified_cap";
/// Flag used when the secondary classifier escalates an allowed transaction.
pub const RULE_SECONDARY_CLASSIFIER: &str = "secondary_classifier";

/// KYC tier exposed by the external verification provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KycTier {
    Unverified,
    Basic,
    Full,
}

/// External KYC status provider. Verification itself happens outside the
/// ledger; the gate only consumes the flag and tier.
#[async_trait::async_trait]
pub trait KycProvider: Send + Sync {
    async fn is_verified(&self, user_id: Uuid) -> bool;
    async fn tier(&self, user_id: Uuid) -> KycTier;
}

/// Fixed-table KYC provider for tests and development. Unknown users are
/// unverified.
#[derive(Debug, Default)]
pub struct StaticKycProvider {
    tiers: RwLock<HashMap<Uuid, KycTier>>,
}

impl StaticKycProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tier(&self, user_id: Uuid, tier: KycTier) {
        self.tiers.write().unwrap().insert(user_id, tier);
    }
}

#[async_trait::async_trait]
impl KycProvider for StaticKycProvider {
    async fn is_verified(&self, user_id: Uuid) -> bool {
        self.tier(user_id).await != KycTier::Unverified
    }

    async fn tier(&self, user_id: Uuid) -> KycTier {
        self.tiers
            .read()
            .unwrap()
            .get(&user_id)
            .copied()
            .unwrap_or(KycTier::Unverified)
    }
}

/// Deterministic rule thresholds. Defaults implement the reference policy
/// exactly: BLOCK at 90, HOLD at 70, +30 for amounts above 10x the sender's
/// average, +20 for more than 20 transactions in 24h, +25 for accounts
/// younger than a day moving more than the new-account threshold, +15 for
/// unverified senders above the unverified-tier cap.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub block_threshold: u8,
    pub hold_threshold: u8,
    pub average_multiple: Decimal,
    pub velocity_max_24h: u32,
    pub new_account_min_age_hours: i64,
    pub new_account_amount_threshold: Decimal,
    pub unverified_tier_cap: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            block_threshold: 90,
            hold_threshold: 70,
            average_multiple: Decimal::from(10),
            velocity_max_24h: 20,
            new_account_min_age_hours: 24,
            new_account_amount_threshold: Decimal::from(1_000),
            unverified_tier_cap: Decimal::from(2_000),
        }
    }
}

/// Inputs to one rule evaluation
#[derive(Debug, Clone)]
pub struct RiskContext {
    pub user_id: Uuid,
    pub transaction_type: TransactionType,
    pub amount: Decimal,
    pub currency: String,
    /// Mean amount across the sender's completed transactions, if any.
    pub historical_average: Option<Decimal>,
    pub tx_count_24h: u32,
    pub account_age_hours: i64,
    pub kyc_verified: bool,
}

/// Outcome of the synchronous rule stage
#[derive(Debug, Clone)]
pub struct RiskEvaluation {
    pub score: u8,
    pub flags: Vec<String>,
    pub verdict: RiskVerdict,
    pub level: RiskLevel,
}

/// Output of the secondary scoring oracle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecondaryAssessment {
    pub score: u8,
    pub classification: String,
    pub explanation: String,
}

/// Best-effort external scoring oracle. Unavailability falls back to the
/// rule-based result unchanged.
#[async_trait::async_trait]
pub trait SecondaryClassifier: Send + Sync {
    async fn classify(&self, ctx: &RiskContext, rule_score: u8) -> Result<SecondaryAssessment>;

    fn name(&self) -> &str;
}

/// Default no-op classifier: echoes the rule-based result.
pub struct PassthroughClassifier;

#[async_trait::async_trait]
impl SecondaryClassifier for PassthroughClassifier {
    async fn classify(&self, _ctx: &RiskContext, rule_score: u8) -> Result<SecondaryAssessment> {
        Ok(SecondaryAssessment {
            score: rule_score,
            classification: "rule_based".to_string(),
            explanation: "secondary classifier disabled; rule score carried over".to_string(),
        })
    }

    fn name(&self) -> &str {
        "passthrough"
    }
}

pub struct RiskGate {
    config: RiskConfig,
    classifier: Arc<dyn SecondaryClassifier>,
    store: Arc<dyn SettlementStore>,
    audit: Arc<AuditLogger>,
    events: Arc<EventDispatcher>,
}

impl RiskGate {
    pub fn new(
        config: RiskConfig,
        classifier: Arc<dyn SecondaryClassifier>,
        store: Arc<dyn SettlementStore>,
        audit: Arc<AuditLogger>,
        events: Arc<EventDispatcher>,
    ) -> Self {
        Self {
            config,
            classifier,
            store,
            audit,
            events,
        }
    }

    /// Run the deterministic rule engine. Pure: no side effects, fully
    /// testable without network access.
    pub fn evaluate(&self, ctx: &RiskContext) -> RiskEvaluation {
        let mut score: u32 = 0;
        let mut flags = Vec::new();

        if let Some(average) = ctx.historical_average {
            if average > Decimal::ZERO && ctx.amount > average * self.config.average_multiple {
                score += 30;
                flags.push(RULE_AMOUNT_ABOVE_AVERAGE.to_string());
            }
        }
        if ctx.tx_count_24h > self.config.velocity_max_24h {
            score += 20;
            flags.push(RULE_VELOCITY_24H.to_string());
        }
        if ctx.account_age_hours < self.config.new_account_min_age_hours
            && ctx.amount > self.config.new_account_amount_threshold
        {
            score += 25;
            flags.push(RULE_NEW_ACCOUNT_HIGH_AMOUNT.to_string());
        }
        if !ctx.kyc_verified && ctx.amount > self.config.unverified_tier_cap {
            score += 15;
            flags.push(RULE_KYC_UNVERIFIED_CAP.to_string());
        }

        let score = score.min(100) as u8;
        let verdict = if score >= self.config.block_threshold {
            RiskVerdict::Block
        } else if score >= self.config.hold_threshold {
            RiskVerdict::Hold
        } else {
            RiskVerdict::Allow
        };

        RiskEvaluation {
            score,
            flags,
            verdict,
            level: RiskLevel::from_score(score),
        }
    }

    /// Persist the fraud report a HOLD or BLOCK verdict requires and emit the
    /// audit record. ALLOW records nothing here.
    pub async fn record_verdict(
        &self,
        transaction: &Transaction,
        evaluation: &RiskEvaluation,
    ) -> Result<Option<FraudReport>> {
        let event_type = match evaluation.verdict {
            RiskVerdict::Allow => return Ok(None),
            RiskVerdict::Hold => AuditEventType::RiskHold,
            RiskVerdict::Block => AuditEventType::RiskBlock,
        };

        let report = FraudReport::new(
            transaction.id,
            evaluation.score,
            evaluation.flags.clone(),
        );
        let report = self.store.insert_fraud_report(report).await?;

        self.audit.record(
            AuditRecord::new(
                event_type,
                format!(
                    "verdict {} at score {} for {}",
                    evaluation.verdict, evaluation.score, transaction.reference
                ),
            )
            .with_transaction(transaction.id)
            .with_metadata("flags", serde_json::json!(evaluation.flags)),
        );
        info!(
            transaction_id = %transaction.id,
            score = evaluation.score,
            verdict = %evaluation.verdict,
            "risk verdict recorded"
        );
        Ok(Some(report))
    }

    /// Secondary re-scoring hook. Runs off the critical path after the
    /// synchronous verdict has gated the attempt; the gating decision itself
    /// is final. Escalates the fraud report when the oracle scores higher and
    /// degrades silently when the oracle is unavailable.
    pub async fn reclassify(
        &self,
        transaction_id: Uuid,
        ctx: RiskContext,
        rule_evaluation: RiskEvaluation,
    ) {
        let assessment = match self.classifier.classify(&ctx, rule_evaluation.score).await {
            Ok(assessment) => assessment,
            Err(e) => {
                warn!(
                    classifier = self.classifier.name(),
                    transaction_id = %transaction_id,
                    error = %e,
                    "secondary classifier unavailable, keeping rule-based result"
                );
                return;
            }
        };

        if assessment.score <= rule_evaluation.score {
            return;
        }

        let result = match self.store.fraud_report_for_transaction(transaction_id).await {
            Ok(Some(mut report)) => {
                report.escalate(assessment.score, Some(assessment.explanation.clone()));
                self.store.update_fraud_report(report).await.map(|_| ())
            }
            Ok(None) => {
                let mut report = FraudReport::new(
                    transaction_id,
                    assessment.score,
                    vec![RULE_SECONDARY_CLASSIFIER.to_string()],
                );
                report.narrative = Some(assessment.explanation.clone());
                self.store.insert_fraud_report(report).await.map(|_| ())
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.audit.record(
                    AuditRecord::new(
                        AuditEventType::RiskEscalated,
                        format!(
                            "secondary classifier raised score {} -> {}",
                            rule_evaluation.score, assessment.score
                        ),
                    )
                    .with_transaction(transaction_id),
                );
                self.events.emit(LedgerEvent::RiskEscalated {
                    transaction_id,
                    score: assessment.score,
                    classification: assessment.classification,
                });
            }
            Err(e) => {
                warn!(
                    transaction_id = %transaction_id,
                    error = %e,
                    "failed to persist secondary escalation"
                );
            }
        }
    }

    /// Unverified-tier cap exposed for context assembly.
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }
}

//! Fraud risk assessments and reports

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Graded risk level derived from the 0-100 score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map a 0-100 score onto a level. Matches the gating thresholds: a
    /// Critical score blocks, a High score holds.
    pub fn from_score(score: u8) -> Self {
        match score {
            90..=u8::MAX => RiskLevel::Critical,
            70..=89 => RiskLevel::High,
            40..=69 => RiskLevel::Medium,
            _ => RiskLevel::Low,
        }
    }
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
            RiskLevel::Critical => write!(f, "critical"),
        }
    }
}

/// Gating decision for a single settlement attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RiskVerdict {
    Allow,
    Hold,
    Block,
}

impl std::fmt::Display for RiskVerdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskVerdict::Allow => write!(f, "allow"),
            RiskVerdict::Hold => write!(f, "hold"),
            RiskVerdict::Block => write!(f, "block"),
        }
    }
}

/// Review status of a fraud report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FraudReportStatus {
    Open,
    Cleared,
    Confirmed,
}

impl std::fmt::Display for FraudReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FraudReportStatus::Open => write!(f, "open"),
            FraudReportStatus::Cleared => write!(f, "cleared"),
            FraudReportStatus::Confirmed => write!(f, "confirmed"),
        }
    }
}

/// Report created whenever a risk evaluation holds or blocks a transaction,
/// or the secondary classifier escalates one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FraudReport {
    pub id: Uuid,
    pub transaction_id: Uuid,
    pub risk_score: u8,
    pub risk_level: RiskLevel,
    /// Identifiers of the rules that fired.
    pub flags: Vec<String>,
    pub status: FraudReportStatus,
    /// Best-effort explanation from the secondary classifier, if it ran.
    pub narrative: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FraudReport {
    pub fn new(transaction_id: Uuid, risk_score: u8, flags: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transaction_id,
            risk_score,
            risk_level: RiskLevel::from_score(risk_score),
            flags,
            status: FraudReportStatus::Open,
            narrative: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Escalate the report to a higher score. Downgrades are ignored.
    pub fn escalate(&mut self, score: u8, narrative: Option<String>) {
        if score > self.risk_score {
            self.risk_score = score;
            self.risk_level = RiskLevel::from_score(score);
            self.narrative = narrative;
            self.updated_at = Utc::now();
        }
    }

    pub fn resolve(&mut self, status: FraudReportStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

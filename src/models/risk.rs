use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
        };
        f.write_str(s)
    }
}

/// Something an analyzer flagged while scoring an account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnusualActivity {
    pub kind: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subjects: Vec<String>,
}

impl UnusualActivity {
    pub fn new(kind: &str, message: impl Into<String>) -> Self {
        UnusualActivity {
            kind: kind.to_string(),
            message: message.into(),
            count: None,
            subjects: Vec::new(),
        }
    }

    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    pub fn with_subjects(mut self, subjects: Vec<String>) -> Self {
        self.subjects = subjects;
        self
    }
}

/// Output of a single analyzer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzerReport {
    pub risk_score: u32,
    pub unusual_activities: Vec<UnusualActivity>,
    pub recommendations: Vec<String>,
}

impl AnalyzerReport {
    pub fn flag(&mut self, score: u32, activity: UnusualActivity, recommendation: Option<&str>) {
        self.risk_score += score;
        self.unusual_activities.push(activity);
        if let Some(rec) = recommendation {
            self.recommendations.push(rec.to_string());
        }
    }
}

/// Derived risk assessment for an account. Never the source of truth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub account_id: String,
    pub risk_score: u32,
    pub risk_level: RiskLevel,
    pub unusual_activities: Vec<UnusualActivity>,
    pub recommendations: Vec<String>,
}

impl RiskAssessment {
    pub fn is_high_risk(&self) -> bool {
        self.risk_level == RiskLevel::High
    }
}

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Moderate,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" => Some(Self::Low),
            "moderate" | "medium" => Some(Self::Moderate),
            "high" => Some(Self::High),
            "critical" => Some(Self::Critical),
            _ => None,
        }
    }
}

/// Triage verdict for a single turn.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecisionHint {
    Flag { flag_type: String, severity: Severity, reason: String, follow_up: Vec<String> },
    Close { reason: String },
    AskMore { questions: Vec<String> },
}

impl DecisionHint {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Flag { .. } => "FLAG",
            Self::Close { .. } => "CLOSE",
            Self::AskMore { .. } => "ASK_MORE",
        }
    }

    pub fn is_flag(&self) -> bool {
        matches!(self, Self::Flag { .. })
    }

    pub fn flag_severity(&self) -> Option<Severity> {
        match self {
            Self::Flag { severity, .. } => Some(*severity),
            _ => None,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PatientId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EpisodeId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolAssignmentId(pub String);

/// Clinical category an episode is tracked under.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConditionCode {
    /// Heart failure.
    Hf,
    /// Chronic obstructive pulmonary disease.
    Copd,
    /// Acute myocardial infarction.
    Ami,
    /// Pneumonia.
    Pna,
    Other,
}

impl ConditionCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hf => "HF",
            Self::Copd => "COPD",
            Self::Ami => "AMI",
            Self::Pna => "PNA",
            Self::Other => "OTHER",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "HF" | "CHF" | "HEART_FAILURE" => Some(Self::Hf),
            "COPD" => Some(Self::Copd),
            "AMI" | "MI" => Some(Self::Ami),
            "PNA" | "PNEUMONIA" => Some(Self::Pna),
            "OTHER" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Hf => "heart failure",
            Self::Copd => "COPD",
            Self::Ami => "heart attack recovery",
            Self::Pna => "pneumonia",
            Self::Other => "post-discharge recovery",
        }
    }
}

/// Health-literacy tier used to pitch wording.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EducationTier {
    Low,
    #[default]
    Medium,
    High,
}

impl EducationTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "MEDIUM" => Some(Self::Medium),
            "HIGH" => Some(Self::High),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolAssignment {
    pub id: ProtocolAssignmentId,
    pub episode_id: EpisodeId,
    pub condition_code: ConditionCode,
    pub education_tier: EducationTier,
    /// Raw rules document; parsed by `rules::ProtocolRules` when loaded.
    pub rules_json: String,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

use serde::{Deserialize, Serialize};

use crate::domain::decision::Severity;

/// Fever threshold, Fahrenheit.
pub const FEVER_THRESHOLD_F: f64 = 100.4;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    ReportSymptom,
    ReportWellbeing,
    AskQuestion,
    Confirm,
    OffTopic,
    #[default]
    Unclear,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Sentiment {
    Positive,
    #[default]
    Neutral,
    Negative,
    Distressed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightChange {
    Gained,
    Lost,
    Stable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MedicationAdherence {
    Adherent,
    Partial,
    NonAdherent,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreathingState {
    Normal,
    Improved,
    Stable,
    Worse,
    Impaired,
}

impl BreathingState {
    pub fn is_stable(&self) -> bool {
        matches!(self, Self::Normal | Self::Improved | Self::Stable)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionSource {
    Collaborator,
    #[default]
    Fallback,
}

/// Structured reading of one patient utterance.
///
/// Field names mirror the JSON the text-understanding collaborator returns, so the
/// same type is used to decode its responses. Optional clinical fields stay `None`
/// when the patient did not state them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalRecord {
    #[serde(default)]
    pub intent: Intent,
    #[serde(default)]
    pub symptoms: Vec<String>,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default)]
    pub sentiment: Sentiment,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub raw_text: String,
    #[serde(default)]
    pub pain_score: Option<u8>,
    #[serde(default)]
    pub weight_change: Option<WeightChange>,
    #[serde(default)]
    pub medication_adherence: Option<MedicationAdherence>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub breathing: Option<BreathingState>,
    #[serde(default)]
    pub complications: Vec<String>,
    #[serde(default)]
    pub matched_patterns: Vec<String>,
    #[serde(default)]
    pub source: ExtractionSource,
}

fn default_severity() -> Severity {
    Severity::Low
}

impl SignalRecord {
    pub fn empty(raw_text: impl Into<String>) -> Self {
        Self {
            intent: Intent::Unclear,
            symptoms: Vec::new(),
            severity: Severity::Low,
            sentiment: Sentiment::Neutral,
            confidence: 0.0,
            raw_text: raw_text.into(),
            pain_score: None,
            weight_change: None,
            medication_adherence: None,
            temperature: None,
            breathing: None,
            complications: Vec::new(),
            matched_patterns: Vec::new(),
            source: ExtractionSource::Fallback,
        }
    }

    /// Temperature in Fahrenheit. Values under 50 are read as Celsius.
    pub fn temperature_f(&self) -> Option<f64> {
        self.temperature.map(|value| if value < 50.0 { value * 9.0 / 5.0 + 32.0 } else { value })
    }

    pub fn has_fever(&self) -> bool {
        self.temperature_f().is_some_and(|value| value >= FEVER_THRESHOLD_F)
    }

    /// Clamps collaborator-supplied values into their documented ranges.
    pub fn normalized(mut self) -> Self {
        self.confidence = if self.confidence.is_finite() {
            self.confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self.pain_score = self.pain_score.map(|score| score.min(10));
        self.symptoms = normalize_tags(self.symptoms);
        self.complications = normalize_tags(self.complications);
        self
    }
}

/// Lower-cases tags, joins words with underscores and drops duplicates.
pub fn normalize_tags(tags: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_lowercase().split_whitespace().collect::<Vec<_>>().join("_");
        if !tag.is_empty() && !normalized.contains(&tag) {
            normalized.push(tag);
        }
    }
    normalized
}

//! Protocol rules documents.
//!
//! A protocol is stored as JSON with ordered `red_flags` and `closures` lists. Each rule
//! carries a condition object (`if`) holding exactly one predicate. Documents are parsed
//! once, when a protocol is loaded, into the closed [`Predicate`] union so evaluation never
//! sees an unknown shape.

use serde_json::{Map, Value};
use thiserror::Error;

use crate::domain::decision::Severity;
use crate::rules::patterns::ProtocolPattern;

/// Predicate keys in precedence order. When a condition object carries several,
/// the first one listed here is the one evaluated.
const PREDICATE_KEYS: &[&str] = &[
    "any_text",
    "pain_score_gte",
    "pain_score_lte",
    "temperature_gte",
    "temperature_lte",
    "no_symptoms",
    "weight_stable",
    "medication_adherent",
    "temperature_normal",
    "breathing_stable",
    "no_exacerbation",
    "no_complications",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NumericField {
    PainScore,
    /// Fahrenheit.
    Temperature,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Comparison {
    AtLeast,
    AtMost,
}

impl Comparison {
    pub fn holds(&self, value: f64, threshold: f64) -> bool {
        match self {
            Self::AtLeast => value >= threshold,
            Self::AtMost => value <= threshold,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BooleanCheck {
    NoSymptoms,
    WeightStable,
    MedicationAdherent,
    TemperatureNormal,
    BreathingStable,
    NoExacerbation,
    NoComplications,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Predicate {
    TextMatch { any_of: Vec<String> },
    NumericThreshold { field: NumericField, comparison: Comparison, threshold: f64 },
    BooleanCheck { check: BooleanCheck, expected: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub struct FlagDescriptor {
    pub flag_type: String,
    pub severity: Severity,
    pub reason: String,
    pub follow_up: Vec<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RedFlagRule {
    pub predicate: Predicate,
    pub flag: FlagDescriptor,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ClosureRule {
    pub predicate: Predicate,
    pub reason: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RuleSection {
    RedFlags,
    Closures,
    Patterns,
}

impl std::fmt::Display for RuleSection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::RedFlags => "red_flags",
            Self::Closures => "closures",
            Self::Patterns => "patterns",
        })
    }
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum RuleError {
    #[error("protocol document is not valid JSON: {0}")]
    Malformed(String),
    #[error("protocol document must be a JSON object with `red_flags`/`closures` lists")]
    NotAnObject,
    #[error("{section}[{index}] is missing `{field}`")]
    MissingField { section: RuleSection, index: usize, field: &'static str },
    #[error("{section}[{index}] has no recognised predicate (keys: {keys:?})")]
    UnknownPredicate { section: RuleSection, index: usize, keys: Vec<String> },
    #[error("{section}[{index}].{key} has an invalid value: {detail}")]
    InvalidValue { section: RuleSection, index: usize, key: String, detail: String },
    #[error("{section}[{index}] uses unknown severity `{value}`")]
    UnknownSeverity { section: RuleSection, index: usize, value: String },
}

/// A validated protocol, ready for evaluation.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProtocolRules {
    pub red_flags: Vec<RedFlagRule>,
    pub closures: Vec<ClosureRule>,
    pub patterns: Vec<ProtocolPattern>,
    /// Overrides the generic clarifying questions when non-empty.
    pub ask_more_questions: Vec<String>,
}

impl ProtocolRules {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rejects the whole document on the first invalid rule.
    pub fn parse(json: &str) -> Result<Self, RuleError> {
        let (rules, mut issues) = parse_document(json)?;
        if issues.is_empty() {
            Ok(rules)
        } else {
            Err(issues.remove(0))
        }
    }

    /// Keeps every valid rule and reports the rest. A document that is not JSON
    /// at all yields an empty rule set.
    pub fn parse_lenient(json: &str) -> (Self, Vec<RuleError>) {
        match parse_document(json) {
            Ok(parsed) => parsed,
            Err(error) => (Self::empty(), vec![error]),
        }
    }
}

fn parse_document(json: &str) -> Result<(ProtocolRules, Vec<RuleError>), RuleError> {
    let document: Value =
        serde_json::from_str(json).map_err(|error| RuleError::Malformed(error.to_string()))?;
    let Value::Object(document) = document else {
        return Err(RuleError::NotAnObject);
    };

    let mut rules = ProtocolRules::empty();
    let mut issues = Vec::new();

    for (index, entry) in list(&document, "red_flags").iter().enumerate() {
        match parse_red_flag(index, entry) {
            Ok(rule) => rules.red_flags.push(rule),
            Err(error) => issues.push(error),
        }
    }

    for (index, entry) in list(&document, "closures").iter().enumerate() {
        match parse_closure(index, entry) {
            Ok(rule) => rules.closures.push(rule),
            Err(error) => issues.push(error),
        }
    }

    for (index, entry) in list(&document, "patterns").iter().enumerate() {
        match parse_pattern(index, entry) {
            Ok(pattern) => rules.patterns.push(pattern),
            Err(error) => issues.push(error),
        }
    }

    if let Some(questions) = document
        .get("ask_more")
        .and_then(|ask_more| ask_more.get("questions"))
        .and_then(Value::as_array)
    {
        rules.ask_more_questions = string_items(questions);
    }

    Ok((rules, issues))
}

fn list<'a>(document: &'a Map<String, Value>, key: &str) -> &'a [Value] {
    document.get(key).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[])
}

fn string_items(values: &[Value]) -> Vec<String> {
    values
        .iter()
        .filter_map(Value::as_str)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .collect()
}

fn parse_red_flag(index: usize, entry: &Value) -> Result<RedFlagRule, RuleError> {
    let section = RuleSection::RedFlags;
    let predicate = parse_condition(section, index, entry)?;
    let flag = entry
        .get("flag")
        .and_then(Value::as_object)
        .ok_or(RuleError::MissingField { section, index, field: "flag" })?;

    let flag_type = flag
        .get("type")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(RuleError::MissingField { section, index, field: "flag.type" })?
        .to_string();

    let severity_raw = flag
        .get("severity")
        .and_then(Value::as_str)
        .ok_or(RuleError::MissingField { section, index, field: "flag.severity" })?;
    let severity = Severity::parse(severity_raw).ok_or_else(|| RuleError::UnknownSeverity {
        section,
        index,
        value: severity_raw.to_string(),
    })?;

    let reason = flag
        .get("reason")
        .and_then(Value::as_str)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| format!("{flag_type} criteria matched"));

    let follow_up =
        flag.get("follow_up").and_then(Value::as_array).map(|v| string_items(v)).unwrap_or_default();

    Ok(RedFlagRule { predicate, flag: FlagDescriptor { flag_type, severity, reason, follow_up } })
}

fn parse_closure(index: usize, entry: &Value) -> Result<ClosureRule, RuleError> {
    let predicate = parse_condition(RuleSection::Closures, index, entry)?;
    let reason = entry
        .get("close")
        .and_then(|close| close.get("reason"))
        .and_then(Value::as_str)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| "closure criteria met".to_string());

    Ok(ClosureRule { predicate, reason })
}

fn parse_pattern(index: usize, entry: &Value) -> Result<ProtocolPattern, RuleError> {
    let section = RuleSection::Patterns;
    let text = entry
        .get("text")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or(RuleError::MissingField { section, index, field: "text" })?;
    let id = entry
        .get("id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| text.to_lowercase().split_whitespace().collect::<Vec<_>>().join("_"));

    Ok(ProtocolPattern::new(id, text))
}

fn parse_condition(section: RuleSection, index: usize, entry: &Value) -> Result<Predicate, RuleError> {
    let condition = entry
        .get("if")
        .and_then(Value::as_object)
        .ok_or(RuleError::MissingField { section, index, field: "if" })?;

    let Some(key) = PREDICATE_KEYS.iter().find(|key| condition.contains_key(**key)) else {
        return Err(RuleError::UnknownPredicate {
            section,
            index,
            keys: condition.keys().cloned().collect(),
        });
    };
    let value = &condition[*key];
    let invalid = |detail: &str| RuleError::InvalidValue {
        section,
        index,
        key: (*key).to_string(),
        detail: detail.to_string(),
    };

    let predicate = match *key {
        "any_text" => {
            let any_of = match value {
                Value::Array(items) => string_items(items),
                Value::String(item) => string_items(&[Value::String(item.clone())]),
                _ => return Err(invalid("expected a list of strings")),
            };
            if any_of.is_empty() {
                return Err(invalid("expected at least one phrase"));
            }
            Predicate::TextMatch { any_of }
        }
        "pain_score_gte" | "pain_score_lte" | "temperature_gte" | "temperature_lte" => {
            let threshold = value.as_f64().ok_or_else(|| invalid("expected a number"))?;
            let field = if key.starts_with("pain") {
                NumericField::PainScore
            } else {
                NumericField::Temperature
            };
            let comparison =
                if key.ends_with("_gte") { Comparison::AtLeast } else { Comparison::AtMost };
            Predicate::NumericThreshold { field, comparison, threshold }
        }
        boolean_key => {
            let expected = value.as_bool().ok_or_else(|| invalid("expected true or false"))?;
            let check = match boolean_key {
                "no_symptoms" => BooleanCheck::NoSymptoms,
                "weight_stable" => BooleanCheck::WeightStable,
                "medication_adherent" => BooleanCheck::MedicationAdherent,
                "temperature_normal" => BooleanCheck::TemperatureNormal,
                "breathing_stable" => BooleanCheck::BreathingStable,
                "no_exacerbation" => BooleanCheck::NoExacerbation,
                _ => BooleanCheck::NoComplications,
            };
            Predicate::BooleanCheck { check, expected }
        }
    };

    Ok(predicate)
}

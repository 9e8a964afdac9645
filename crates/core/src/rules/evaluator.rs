use crate::domain::decision::DecisionHint;
use crate::domain::signal::{
    BreathingState, MedicationAdherence, SignalRecord, WeightChange, FEVER_THRESHOLD_F,
};
use crate::rules::dsl::{BooleanCheck, NumericField, Predicate, ProtocolRules, RuleSection};

pub const GENERIC_QUESTIONS: &[&str] = &[
    "Can you tell me a little more about how you are feeling today?",
    "Have you noticed any new or worsening symptoms since we last spoke?",
    "Have you been able to take all of your medications as prescribed?",
];

/// Symptom tags that count as a flare-up for `no_exacerbation`.
const EXACERBATION_TAGS: &[&str] =
    &["exacerbation", "flare_up", "increased_sputum", "wheezing", "shortness_of_breath"];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RuleRef {
    pub section: RuleSection,
    pub index: usize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    pub hint: DecisionHint,
    pub matched_rule: Option<RuleRef>,
}

/// Interprets a protocol against one signal record.
///
/// Red flags are tried in document order and the first match wins; closures are
/// only consulted when no red flag matched. Evaluation is a pure function of its
/// inputs.
#[derive(Clone, Debug, Default)]
pub struct RuleEvaluator;

impl RuleEvaluator {
    pub fn new() -> Self {
        Self
    }

    pub fn evaluate(&self, rules: &ProtocolRules, signal: &SignalRecord) -> DecisionHint {
        self.evaluate_traced(rules, signal).hint
    }

    pub fn evaluate_traced(&self, rules: &ProtocolRules, signal: &SignalRecord) -> Evaluation {
        let haystack = Haystack::from_signal(signal);

        for (index, rule) in rules.red_flags.iter().enumerate() {
            if predicate_holds(&rule.predicate, signal, &haystack) {
                return Evaluation {
                    hint: DecisionHint::Flag {
                        flag_type: rule.flag.flag_type.clone(),
                        severity: rule.flag.severity,
                        reason: rule.flag.reason.clone(),
                        follow_up: rule.flag.follow_up.clone(),
                    },
                    matched_rule: Some(RuleRef { section: RuleSection::RedFlags, index }),
                };
            }
        }

        for (index, rule) in rules.closures.iter().enumerate() {
            if predicate_holds(&rule.predicate, signal, &haystack) {
                return Evaluation {
                    hint: DecisionHint::Close { reason: rule.reason.clone() },
                    matched_rule: Some(RuleRef { section: RuleSection::Closures, index }),
                };
            }
        }

        let questions = if rules.ask_more_questions.is_empty() {
            GENERIC_QUESTIONS.iter().map(|question| (*question).to_string()).collect()
        } else {
            rules.ask_more_questions.clone()
        };
        Evaluation { hint: DecisionHint::AskMore { questions }, matched_rule: None }
    }
}

/// Text searched by `any_text`: the raw patient text plus the extracted symptom
/// and pattern tags, lowercased. Matching is plain substring search and ignores
/// negation, so "no chest pain today" still satisfies a `chest pain` rule even
/// when the extractor dropped the phrase. Over-escalation is the accepted error.
struct Haystack {
    entries: Vec<String>,
}

impl Haystack {
    fn from_signal(signal: &SignalRecord) -> Self {
        let mut entries = vec![normalize(&signal.raw_text)];
        for tag in signal.symptoms.iter().chain(signal.matched_patterns.iter()) {
            let tag = normalize(tag);
            entries.push(tag.replace('_', " "));
            entries.push(tag);
        }
        Self { entries }
    }

    fn contains_any(&self, needles: &[String]) -> bool {
        needles.iter().map(|needle| normalize(needle)).any(|needle| {
            !needle.is_empty() && self.entries.iter().any(|entry| entry.contains(&needle))
        })
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2019}', '\u{2018}'], "'")
}

fn predicate_holds(predicate: &Predicate, signal: &SignalRecord, haystack: &Haystack) -> bool {
    match predicate {
        Predicate::TextMatch { any_of } => haystack.contains_any(any_of),
        Predicate::NumericThreshold { field, comparison, threshold } => {
            let value = match field {
                NumericField::PainScore => signal.pain_score.map(f64::from),
                NumericField::Temperature => signal.temperature_f(),
            };
            value.is_some_and(|value| comparison.holds(value, *threshold))
        }
        Predicate::BooleanCheck { check, expected } => boolean_check(*check, signal) == *expected,
    }
}

fn boolean_check(check: BooleanCheck, signal: &SignalRecord) -> bool {
    match check {
        BooleanCheck::NoSymptoms => signal.symptoms.is_empty(),
        BooleanCheck::WeightStable => signal.weight_change == Some(WeightChange::Stable),
        BooleanCheck::MedicationAdherent => {
            signal.medication_adherence == Some(MedicationAdherence::Adherent)
        }
        BooleanCheck::TemperatureNormal => {
            signal.temperature_f().is_some_and(|value| value < FEVER_THRESHOLD_F)
        }
        BooleanCheck::BreathingStable => signal.breathing.is_some_and(|state| state.is_stable()),
        BooleanCheck::NoExacerbation => {
            let flared = signal
                .symptoms
                .iter()
                .chain(signal.complications.iter())
                .any(|tag| EXACERBATION_TAGS.contains(&tag.as_str()));
            let breathing_worse =
                matches!(signal.breathing, Some(BreathingState::Worse | BreathingState::Impaired));
            !flared && !breathing_worse
        }
        BooleanCheck::NoComplications => signal.complications.is_empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::{RuleEvaluator, GENERIC_QUESTIONS};
    use crate::domain::decision::{DecisionHint, Severity};
    use crate::domain::signal::{BreathingState, MedicationAdherence, SignalRecord, WeightChange};
    use crate::rules::dsl::{ProtocolRules, RuleSection};

    fn rules(json: &str) -> ProtocolRules {
        ProtocolRules::parse(json).expect("valid rules")
    }

    fn signal(text: &str) -> SignalRecord {
        SignalRecord::empty(text)
    }

    #[test]
    fn chest_pain_scenario_flags_critical() {
        let rules = rules(
            r#"{"red_flags": [{"if": {"any_text": ["chest pain", "can't breathe"]},
                               "flag": {"type": "HF_CHEST_PAIN", "severity": "critical"}}]}"#,
        );
        let hint = RuleEvaluator::new().evaluate(&rules, &signal("I have chest pain and can't breathe"));

        assert!(matches!(
            hint,
            DecisionHint::Flag { ref flag_type, severity: Severity::Critical, .. } if flag_type == "HF_CHEST_PAIN"
        ));
    }

    #[test]
    fn flags_dominate_matching_closures() {
        let rules = rules(
            r#"{
                "closures": [{"if": {"no_symptoms": true}, "close": {"reason": "fine"}}],
                "red_flags": [{"if": {"any_text": ["fine"]}, "flag": {"type": "X", "severity": "low"}}]
            }"#,
        );
        let evaluation = RuleEvaluator::new().evaluate_traced(&rules, &signal("I feel fine"));

        assert!(evaluation.hint.is_flag());
        assert_eq!(evaluation.matched_rule.map(|rule| rule.section), Some(RuleSection::RedFlags));
    }

    #[test]
    fn first_red_flag_in_document_order_wins() {
        let rules = rules(
            r#"{"red_flags": [
                {"if": {"any_text": ["swelling"]}, "flag": {"type": "EDEMA", "severity": "moderate"}},
                {"if": {"any_text": ["swelling"]}, "flag": {"type": "EDEMA_LATE", "severity": "critical"}}
            ]}"#,
        );
        let hint = RuleEvaluator::new().evaluate(&rules, &signal("some swelling in my ankles"));
        assert_eq!(hint.flag_severity(), Some(Severity::Moderate));
    }

    #[test]
    fn pain_threshold_uses_configured_severity() {
        let rules = rules(
            r#"{"red_flags": [{"if": {"pain_score_gte": 8}, "flag": {"type": "PAIN", "severity": "high"}}]}"#,
        );
        let evaluator = RuleEvaluator::new();

        for score in 8..=10u8 {
            let mut record = signal("it hurts");
            record.pain_score = Some(score);
            assert_eq!(evaluator.evaluate(&rules, &record).flag_severity(), Some(Severity::High));
        }

        let mut mild = signal("it hurts a bit");
        mild.pain_score = Some(7);
        assert!(!evaluator.evaluate(&rules, &mild).is_flag());
        assert!(!evaluator.evaluate(&rules, &signal("no score given")).is_flag());
    }

    #[test]
    fn fine_scenario_closes() {
        let rules = rules(
            r#"{"red_flags": [{"if": {"any_text": ["chest pain"]}, "flag": {"type": "CP", "severity": "critical"}}],
                "closures": [{"if": {"no_symptoms": true}, "close": {"reason": "No symptoms reported"}}]}"#,
        );
        let hint = RuleEvaluator::new().evaluate(&rules, &signal("I feel fine, no issues"));
        assert_eq!(hint, DecisionHint::Close { reason: "No symptoms reported".to_string() });
    }

    #[test]
    fn symptom_tags_are_searched() {
        let rules = rules(
            r#"{"red_flags": [{"if": {"any_text": ["short of breath"]}, "flag": {"type": "SOB", "severity": "high"}}]}"#,
        );
        let mut record = signal("it's getting worse");
        record.symptoms = vec!["short_of_breath".to_string()];
        assert!(RuleEvaluator::new().evaluate(&rules, &record).is_flag());
    }

    #[test]
    fn boolean_checks_require_positive_evidence() {
        let rules = rules(
            r#"{"closures": [
                {"if": {"weight_stable": true}, "close": {"reason": "weight"}},
                {"if": {"medication_adherent": true}, "close": {"reason": "meds"}},
                {"if": {"temperature_normal": true}, "close": {"reason": "temp"}},
                {"if": {"breathing_stable": true}, "close": {"reason": "breathing"}}
            ]}"#,
        );
        let evaluator = RuleEvaluator::new();

        let mut record = signal("a cough");
        record.symptoms = vec!["cough".to_string()];
        assert!(matches!(evaluator.evaluate(&rules, &record), DecisionHint::AskMore { .. }));

        record.weight_change = Some(WeightChange::Gained);
        record.medication_adherence = Some(MedicationAdherence::Adherent);
        assert_eq!(evaluator.evaluate(&rules, &record), DecisionHint::Close { reason: "meds".to_string() });

        record.medication_adherence = None;
        record.temperature = Some(100.4);
        record.breathing = Some(BreathingState::Improved);
        assert_eq!(
            evaluator.evaluate(&rules, &record),
            DecisionHint::Close { reason: "breathing".to_string() }
        );
    }

    #[test]
    fn exacerbation_and_complication_checks() {
        let rules = rules(
            r#"{"closures": [
                {"if": {"no_exacerbation": true}, "close": {"reason": "stable"}},
                {"if": {"no_complications": false}, "close": {"reason": "complications present"}}
            ]}"#,
        );
        let evaluator = RuleEvaluator::new();

        let mut record = signal("more wheezing");
        record.symptoms = vec!["wheezing".to_string()];
        record.complications = vec!["wound_infection".to_string()];
        assert_eq!(
            evaluator.evaluate(&rules, &record),
            DecisionHint::Close { reason: "complications present".to_string() }
        );

        record.symptoms.clear();
        assert_eq!(evaluator.evaluate(&rules, &record), DecisionHint::Close { reason: "stable".to_string() });
    }

    #[test]
    fn default_is_generic_ask_more() {
        let hint = RuleEvaluator::new().evaluate(&ProtocolRules::empty(), &signal("hello"));
        let DecisionHint::AskMore { questions } = hint else {
            panic!("expected ask more");
        };
        assert_eq!(questions.len(), GENERIC_QUESTIONS.len());
    }

    #[test]
    fn protocol_questions_override_generic_set() {
        let rules = rules(r#"{"ask_more": {"questions": ["Did you weigh yourself this morning?"]}}"#);
        assert_eq!(
            RuleEvaluator::new().evaluate(&rules, &signal("hi")),
            DecisionHint::AskMore { questions: vec!["Did you weigh yourself this morning?".to_string()] }
        );
    }

    #[test]
    fn evaluation_is_idempotent() {
        let rules = rules(
            r#"{"red_flags": [{"if": {"temperature_gte": 101}, "flag": {"type": "FEVER", "severity": "high"}}],
                "closures": [{"if": {"no_symptoms": true}}]}"#,
        );
        let mut record = signal("temp 38.6");
        record.temperature = Some(38.6);
        let evaluator = RuleEvaluator::new();
        assert_eq!(evaluator.evaluate(&rules, &record), evaluator.evaluate(&rules, &record));
    }

    #[test]
    fn negated_phrase_in_raw_text_still_flags() {
        let rules = rules(
            r#"{"red_flags": [{"if": {"any_text": ["chest pain"]}, "flag": {"type": "HF_CHEST_PAIN", "severity": "critical"}}]}"#,
        );
        // The extractor reports no symptoms; the raw text is still searched.
        let hint = RuleEvaluator::new().evaluate(&rules, &signal("No chest pain today"));
        assert_eq!(hint.flag_severity(), Some(Severity::Critical));
    }

    #[test]
    fn curly_apostrophes_match() {
        let rules = rules(
            r#"{"red_flags": [{"if": {"any_text": ["can't breathe"]}, "flag": {"type": "SOB", "severity": "critical"}}]}"#,
        );
        assert!(RuleEvaluator::new().evaluate(&rules, &signal("I can\u{2019}t breathe")).is_flag());
    }
}

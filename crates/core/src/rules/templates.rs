//! Built-in protocol documents used when an episode gets its first assignment.

use serde_json::{json, Value};

use crate::domain::protocol::{ConditionCode, EducationTier};

/// Returns the rules document for a condition, with clarifying questions worded for
/// the patient's education tier.
pub fn template_for(condition: ConditionCode, tier: EducationTier) -> String {
    let mut document = match condition {
        ConditionCode::Hf => heart_failure(),
        ConditionCode::Copd => copd(),
        ConditionCode::Ami => myocardial_infarction(),
        ConditionCode::Pna => pneumonia(),
        ConditionCode::Other => general(),
    };

    if let Value::Object(map) = &mut document {
        map.insert("ask_more".to_string(), json!({ "questions": questions(condition, tier) }));
    }
    document.to_string()
}

fn shared_red_flags() -> Vec<Value> {
    vec![json!({
        "if": {"pain_score_gte": 8},
        "flag": {
            "type": "SEVERE_PAIN",
            "severity": "high",
            "reason": "Patient reported pain of 8 or more out of 10",
            "follow_up": ["Where is the pain located?", "When did it start?"]
        }
    })]
}

fn heart_failure() -> Value {
    let mut red_flags = vec![
        json!({
            "if": {"any_text": ["chest pain", "can't breathe", "cannot breathe", "fainted", "passed out"]},
            "flag": {
                "type": "HF_CHEST_PAIN",
                "severity": "critical",
                "reason": "Chest pain or severe breathlessness reported"
            }
        }),
        json!({
            "if": {"any_text": ["weight_gain_3lb", "gained 3 pounds", "gained three pounds"]},
            "flag": {
                "type": "HF_RAPID_WEIGHT_GAIN",
                "severity": "high",
                "reason": "Weight gain of 3 pounds or more reported",
                "follow_up": ["Over how many days did the weight change?"]
            }
        }),
        json!({
            "if": {"any_text": ["swelling", "swollen", "short of breath", "weight_gain"]},
            "flag": {
                "type": "HF_FLUID_RETENTION",
                "severity": "moderate",
                "reason": "Possible fluid retention"
            }
        }),
    ];
    red_flags.extend(shared_red_flags());

    json!({
        "red_flags": red_flags,
        "closures": [
            {"if": {"no_symptoms": true}, "close": {"reason": "No symptoms reported"}},
            {"if": {"weight_stable": true}, "close": {"reason": "Weight stable"}}
        ],
        "patterns": [
            {"id": "weight_gain_3lb", "text": "gained 3 pounds"},
            {"id": "weight_gain", "text": "gained weight"},
            {"id": "ankle_swelling", "text": "swollen ankles"}
        ]
    })
}

fn copd() -> Value {
    let mut red_flags = vec![
        json!({
            "if": {"any_text": ["can't breathe", "cannot breathe", "lips are blue", "blue lips", "chest pain"]},
            "flag": {
                "type": "COPD_RESPIRATORY_DISTRESS",
                "severity": "critical",
                "reason": "Severe breathing difficulty reported"
            }
        }),
        json!({
            "if": {"no_exacerbation": false},
            "flag": {
                "type": "COPD_EXACERBATION",
                "severity": "high",
                "reason": "Signs of a COPD flare-up",
                "follow_up": ["Has your rescue inhaler helped?"]
            }
        }),
    ];
    red_flags.extend(shared_red_flags());

    json!({
        "red_flags": red_flags,
        "closures": [
            {"if": {"no_symptoms": true}, "close": {"reason": "No symptoms reported"}},
            {"if": {"breathing_stable": true}, "close": {"reason": "Breathing stable"}}
        ],
        "patterns": [
            {"id": "sputum_color_change", "text": "mucus changed color"},
            {"id": "inhaler_more_often", "text": "using inhaler more"}
        ]
    })
}

fn myocardial_infarction() -> Value {
    let mut red_flags = vec![
        json!({
            "if": {"any_text": ["chest pain", "chest pressure", "pain in my arm", "jaw pain", "can't breathe"]},
            "flag": {
                "type": "AMI_CHEST_PAIN",
                "severity": "critical",
                "reason": "Possible recurrent cardiac symptoms"
            }
        }),
        json!({
            "if": {"any_text": ["missed my pills", "forgot my medication", "ran out of", "stopped taking", "missed a dose"]},
            "flag": {
                "type": "AMI_MEDICATION_GAP",
                "severity": "moderate",
                "reason": "Cardiac medications may have been missed"
            }
        }),
    ];
    red_flags.extend(shared_red_flags());

    json!({
        "red_flags": red_flags,
        "closures": [
            {"if": {"no_symptoms": true}, "close": {"reason": "No symptoms reported"}}
        ]
    })
}

fn pneumonia() -> Value {
    let mut red_flags = vec![
        json!({
            "if": {"any_text": ["can't breathe", "cannot breathe", "confused", "coughing blood", "chest pain"]},
            "flag": {
                "type": "PNA_RESPIRATORY_DISTRESS",
                "severity": "critical",
                "reason": "Severe respiratory or mental-status change"
            }
        }),
        json!({
            "if": {"temperature_gte": 101},
            "flag": {
                "type": "PNA_FEVER",
                "severity": "high",
                "reason": "Temperature of 101 F or higher",
                "follow_up": ["When did you last take your temperature?"]
            }
        }),
    ];
    red_flags.extend(shared_red_flags());

    json!({
        "red_flags": red_flags,
        "closures": [
            {"if": {"no_symptoms": true}, "close": {"reason": "No symptoms reported"}},
            {"if": {"temperature_normal": true}, "close": {"reason": "Temperature normal"}}
        ]
    })
}

fn general() -> Value {
    let mut red_flags = vec![json!({
        "if": {"any_text": ["chest pain", "can't breathe", "cannot breathe", "bleeding heavily"]},
        "flag": {
            "type": "GENERAL_EMERGENCY",
            "severity": "critical",
            "reason": "Emergency symptom reported"
        }
    })];
    red_flags.extend(shared_red_flags());
    red_flags.push(json!({
        "if": {"no_complications": false},
        "flag": {
            "type": "GENERAL_COMPLICATION",
            "severity": "moderate",
            "reason": "Post-discharge complication reported"
        }
    }));

    json!({
        "red_flags": red_flags,
        "closures": [
            {"if": {"no_symptoms": true}, "close": {"reason": "No symptoms reported"}}
        ]
    })
}

fn questions(condition: ConditionCode, tier: EducationTier) -> Vec<&'static str> {
    match (condition, tier) {
        (ConditionCode::Hf, EducationTier::Low) => vec![
            "Did you step on the scale today? Is your weight the same?",
            "Are your feet or legs puffy?",
        ],
        (ConditionCode::Hf, _) => vec![
            "Has your morning weight changed since yesterday?",
            "Have you noticed any swelling in your ankles or legs?",
            "Are you more short of breath than usual when lying down?",
        ],
        (ConditionCode::Copd, EducationTier::Low) => vec![
            "Is your breathing harder than usual?",
            "Are you using your puffer more?",
        ],
        (ConditionCode::Copd, _) => vec![
            "How does your breathing compare with yesterday?",
            "Has the amount or color of your mucus changed?",
            "Are you using your rescue inhaler more often?",
        ],
        (ConditionCode::Ami, EducationTier::Low) => vec![
            "Any pain or pressure in your chest?",
            "Did you take your heart pills today?",
        ],
        (ConditionCode::Ami, _) => vec![
            "Have you had any chest discomfort, pressure or tightness?",
            "Have you been taking your heart medications as prescribed?",
        ],
        (ConditionCode::Pna, EducationTier::Low) => vec![
            "Do you feel hot or have chills?",
            "Is your cough better or worse?",
        ],
        (ConditionCode::Pna, _) => vec![
            "Have you checked your temperature today?",
            "Is your cough improving, the same, or worse?",
        ],
        (ConditionCode::Other, EducationTier::Low) => vec![
            "How are you feeling today?",
            "Is anything bothering you?",
        ],
        (ConditionCode::Other, _) => vec![
            "How have you been feeling since you got home?",
            "Have you noticed any new or worsening symptoms?",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::template_for;
    use crate::domain::decision::Severity;
    use crate::domain::protocol::{ConditionCode, EducationTier};
    use crate::domain::signal::SignalRecord;
    use crate::rules::dsl::ProtocolRules;
    use crate::rules::evaluator::RuleEvaluator;

    #[test]
    fn every_template_parses_strictly() {
        for condition in [
            ConditionCode::Hf,
            ConditionCode::Copd,
            ConditionCode::Ami,
            ConditionCode::Pna,
            ConditionCode::Other,
        ] {
            for tier in [EducationTier::Low, EducationTier::Medium, EducationTier::High] {
                let rules = ProtocolRules::parse(&template_for(condition, tier))
                    .unwrap_or_else(|error| panic!("{condition:?}/{tier:?}: {error}"));
                assert!(!rules.red_flags.is_empty());
                assert!(!rules.ask_more_questions.is_empty());
            }
        }
    }

    #[test]
    fn heart_failure_template_flags_chest_pain_as_critical() {
        let rules =
            ProtocolRules::parse(&template_for(ConditionCode::Hf, EducationTier::Medium)).expect("rules");
        let hint = RuleEvaluator::new()
            .evaluate(&rules, &SignalRecord::empty("I have chest pain and can't breathe"));
        assert_eq!(hint.flag_severity(), Some(Severity::Critical));
    }

    #[test]
    fn heart_failure_template_carries_weight_patterns() {
        let rules =
            ProtocolRules::parse(&template_for(ConditionCode::Hf, EducationTier::High)).expect("rules");
        let ids: Vec<_> = rules.patterns.iter().map(|pattern| pattern.id.as_str()).collect();
        assert!(ids.contains(&"weight_gain_3lb"));
        assert!(ids.contains(&"weight_gain"));
    }

    #[test]
    fn tiers_change_question_wording() {
        let low = ProtocolRules::parse(&template_for(ConditionCode::Copd, EducationTier::Low)).expect("rules");
        let high = ProtocolRules::parse(&template_for(ConditionCode::Copd, EducationTier::High)).expect("rules");
        assert_ne!(low.ask_more_questions, high.ask_more_questions);
    }
}

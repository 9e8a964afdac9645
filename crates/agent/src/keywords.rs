//! Deterministic keyword extraction used when the text-understanding collaborator
//! cannot answer.
//!
//! Detection is a fixed lexicon of regular expressions over lower-cased text. A hit is
//! discarded when a negation ("no", "not", "don't have", ...) precedes it in the same
//! clause. When the utterance only refers back to something ("it's worse today"), the
//! symptoms of the latest patient turn in the history are carried over.

use std::sync::Mutex;

use async_trait::async_trait;
use carepath_core::domain::decision::Severity;
use carepath_core::domain::interaction::{ConversationTurn, MessageRole};
use carepath_core::domain::signal::{
    BreathingState, ExtractionSource, Intent, MedicationAdherence, Sentiment, SignalRecord,
    WeightChange,
};
use carepath_core::rules::patterns::match_patterns;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use regex::Regex;

use crate::extraction::{ExtractionError, ExtractionRequest, SignalExtractor};

const SYMPTOM_LEXICON: &[(&str, &str)] = &[
    ("chest_pain", r"chest\s+(pain|pressure|tightness|hurts?)|pain\s+in\s+(my|the)\s+chest|my\s+chest\s+hurts"),
    (
        "shortness_of_breath",
        r"short(ness)?\s+of\s+breath|can'?t\s+breathe|cannot\s+breathe|trouble\s+breathing|hard\s+to\s+breathe|difficulty\s+breathing|breathless|winded",
    ),
    ("swelling", r"swell(ing|ed|en)?|swollen|puff(y|iness)"),
    (
        "weight_gain",
        r"gain(ed|ing)?\s+(\w+\s+){0,3}(weight|pounds?|lbs?)|weight\s+gain|put\s+on\s+(\w+\s+){0,2}(weight|pounds?)|weight\s+(is\s+)?up",
    ),
    ("cough", r"cough(ing|s)?"),
    ("increased_sputum", r"mucus|sputum|phlegm"),
    ("wheezing", r"wheez(e|ing|y)"),
    ("fever", r"fever(ish)?|chills"),
    ("dizziness", r"dizz(y|iness)|light-?headed|faint(ed|ing)?"),
    ("fatigue", r"tired|fatigued?|exhausted|worn\s+out|no\s+energy"),
    ("nausea", r"nause(a|ous)|vomit(ing|ed)?|throw(ing)?\s+up"),
    ("palpitations", r"palpitations?|heart\s+(is\s+)?racing|racing\s+heart|fluttering"),
    ("confusion", r"confus(ed|ion)|disoriented"),
    ("pain", r"\bpain(ful)?\b|\bhurts?\b|\baching\b|\bsore\b"),
];

const COMPLICATION_LEXICON: &[(&str, &str)] = &[
    (
        "wound_infection",
        r"(incision|wound|stitches|cut)\s+(\w+\s+){0,3}(red|pus|oozing|draining|infected|hot)",
    ),
    ("bleeding", r"bleed(ing|s)?|blood\s+in"),
    ("fall", r"\b(fell|fallen)\b|had\s+a\s+fall"),
    ("readmission", r"(went|been|go)\s+(back\s+)?to\s+the\s+(er|hospital|emergency)"),
];

const NEGATION: &str = r"\b(no|not|without|denies|deny|never|none)\b|n't\s+(have|had|feel|notice|get)|haven'?t\s+(had|noticed|felt)|don'?t\s+have";
const CLAUSE_BREAK: &str = r"[.,;!?]|\b(but|and)\b";
const BACK_REFERENCE: &str = r"\b(it|it's|its|that|this|they|those|same)\b";

const PAIN_OUT_OF_TEN: &str = r"\b(\d{1,2})\s*(/|out\s+of)\s*10\b";
const PAIN_STATED: &str = r"pain(\s+(is|level|score|at|of|about|around|a))*\s+(\d{1,2})\b";
const TEMPERATURE_STATED: &str =
    r"(temp(erature)?|fever)(\s+(is|was|of|at|reading|about|around))*\s*:?\s*(\d{2,3}(\.\d+)?)";
const TEMPERATURE_UNIT: &str = r"\b(\d{2,3}(\.\d+)?)\s*(°\s*[fc]?|degrees)";

const WEIGHT_LOST: &str =
    r"(lost|losing|dropped)\s+(\w+\s+){0,3}(weight|pounds?|lbs?)|weight\s+(is\s+)?down";
const WEIGHT_STABLE: &str = r"weight\s+(is\s+|has\s+been\s+|stayed\s+)?(the\s+same|stable|steady|unchanged|normal)|same\s+weight|no\s+weight\s+(gain|change)";

const MEDS: &str = r"(dose|doses|pills?|meds|medications?|medicines?|tablets?|inhalers?)";

const BREATHING_WORSE: &str = r"breathing\s+(is\s+|has\s+been\s+|got\s+|gotten\s+)?(worse|harder|bad)|more\s+short\s+of\s+breath|harder\s+to\s+breathe|worse\s+breathing";
const BREATHING_IMPROVED: &str = r"breathing\s+(is\s+|has\s+)?(better|improved|improving|easier)";
const BREATHING_NORMAL: &str = r"breathing\s+(is\s+)?(fine|normal|ok(ay)?|good)|breathing\s+well|no\s+trouble\s+breathing";
const BREATHING_STABLE: &str = r"breathing\s+(is\s+)?(the\s+same|stable|unchanged)";
const CANNOT_BREATHE: &str = r"can'?t\s+breathe|cannot\s+breathe";

const QUESTION_START: &str = r"^(what|how|when|why|can|could|should|is|are|do|does|will)\b";
const WELLBEING: &str =
    r"\b(fine|good|great|well|okay|ok|better)\b|no\s+(issues|problems|complaints)";
const CONFIRMATION: &str = r"^(yes|yeah|yep|yup|no|nope|correct|right|sure)\b";
const OFF_TOPIC: &str = r"\b(weather|sports?|game|movie|tv|recipe|news|politics)\b";
const DISTRESS: &str = r"\b(scared|terrified|panic(king)?|emergency)\b|help\s+me";
const NEGATIVE_MOOD: &str = r"\b(worried|anxious|awful|terrible|worse|upset|bad)\b";

struct TaggedPattern {
    tag: &'static str,
    pattern: Regex,
}

struct Lexicon {
    symptoms: Vec<TaggedPattern>,
    complications: Vec<TaggedPattern>,
    negation: Regex,
    clause_break: Regex,
    back_reference: Regex,
    pain_out_of_ten: Regex,
    pain_stated: Regex,
    temperature_stated: Regex,
    temperature_unit: Regex,
    weight_lost: Regex,
    weight_stable: Regex,
    meds_missed: Regex,
    meds_partial: Regex,
    meds_taken: Regex,
    breathing_worse: Regex,
    breathing_improved: Regex,
    breathing_normal: Regex,
    breathing_stable: Regex,
    cannot_breathe: Regex,
    question_start: Regex,
    wellbeing: Regex,
    confirmation: Regex,
    off_topic: Regex,
    distress: Regex,
    negative_mood: Regex,
}

fn tagged(entries: &[(&'static str, &'static str)]) -> Result<Vec<TaggedPattern>, regex::Error> {
    entries
        .iter()
        .map(|&(tag, pattern)| Regex::new(pattern).map(|pattern| TaggedPattern { tag, pattern }))
        .collect()
}

impl Lexicon {
    fn compile() -> Result<Self, regex::Error> {
        Ok(Self {
            symptoms: tagged(SYMPTOM_LEXICON)?,
            complications: tagged(COMPLICATION_LEXICON)?,
            negation: Regex::new(NEGATION)?,
            clause_break: Regex::new(CLAUSE_BREAK)?,
            back_reference: Regex::new(BACK_REFERENCE)?,
            pain_out_of_ten: Regex::new(PAIN_OUT_OF_TEN)?,
            pain_stated: Regex::new(PAIN_STATED)?,
            temperature_stated: Regex::new(TEMPERATURE_STATED)?,
            temperature_unit: Regex::new(TEMPERATURE_UNIT)?,
            weight_lost: Regex::new(WEIGHT_LOST)?,
            weight_stable: Regex::new(WEIGHT_STABLE)?,
            meds_missed: Regex::new(&format!(
                r"((missed|forgot|skipped|skip|ran\s+out\s+of|stopped\s+taking)\s+(\w+\s+){{0,3}}{MEDS})|((don'?t|didn'?t|not|never|haven'?t)\s+(been\s+)?tak(e|ing|en)\s+(\w+\s+){{0,2}}{MEDS})"
            ))?,
            meds_partial: Regex::new(&format!(r"(some|most|a\s+few)\s+of\s+my\s+{MEDS}"))?,
            meds_taken: Regex::new(&format!(
                r"(took|taking|take|taken)\s+(\w+\s+){{0,2}}{MEDS}|on\s+my\s+meds"
            ))?,
            breathing_worse: Regex::new(BREATHING_WORSE)?,
            breathing_improved: Regex::new(BREATHING_IMPROVED)?,
            breathing_normal: Regex::new(BREATHING_NORMAL)?,
            breathing_stable: Regex::new(BREATHING_STABLE)?,
            cannot_breathe: Regex::new(CANNOT_BREATHE)?,
            question_start: Regex::new(QUESTION_START)?,
            wellbeing: Regex::new(WELLBEING)?,
            confirmation: Regex::new(CONFIRMATION)?,
            off_topic: Regex::new(OFF_TOPIC)?,
            distress: Regex::new(DISTRESS)?,
            negative_mood: Regex::new(NEGATIVE_MOOD)?,
        })
    }

    /// True when a negation sits between the last clause break and `start`.
    fn is_negated(&self, text: &str, start: usize) -> bool {
        let prefix = &text[..start];
        let clause_start =
            self.clause_break.find_iter(prefix).last().map(|found| found.end()).unwrap_or(0);
        self.negation.is_match(&prefix[clause_start..])
    }

    fn affirmed_tags(&self, entries: &[TaggedPattern], text: &str) -> Vec<String> {
        entries
            .iter()
            .filter(|entry| {
                entry
                    .pattern
                    .find_iter(text)
                    .any(|found| !self.is_negated(text, found.start()))
            })
            .map(|entry| entry.tag.to_string())
            .collect()
    }

    fn symptoms(&self, text: &str) -> Vec<String> {
        let mut tags = self.affirmed_tags(&self.symptoms, text);
        if tags.iter().any(|tag| tag == "chest_pain") {
            tags.retain(|tag| tag != "pain");
        }
        tags
    }

    fn pain_score(&self, text: &str) -> Option<u8> {
        let stated = self
            .pain_out_of_ten
            .captures(text)
            .and_then(|captures| captures.get(1))
            .or_else(|| self.pain_stated.captures(text).and_then(|captures| captures.get(3)))?;
        stated.as_str().parse::<u8>().ok().filter(|score| *score <= 10)
    }

    fn temperature(&self, text: &str) -> Option<f64> {
        let stated = self
            .temperature_stated
            .captures(text)
            .and_then(|captures| captures.get(5))
            .or_else(|| self.temperature_unit.captures(text).and_then(|captures| captures.get(1)))?;
        stated.as_str().parse::<f64>().ok().filter(|value| (30.0..=115.0).contains(value))
    }

    fn weight_change(&self, text: &str, symptoms: &[String]) -> Option<WeightChange> {
        if symptoms.iter().any(|tag| tag == "weight_gain") {
            Some(WeightChange::Gained)
        } else if self.weight_lost.is_match(text) {
            Some(WeightChange::Lost)
        } else if self.weight_stable.is_match(text) {
            Some(WeightChange::Stable)
        } else {
            None
        }
    }

    fn medication_adherence(&self, text: &str) -> Option<MedicationAdherence> {
        if self.meds_missed.is_match(text) {
            Some(MedicationAdherence::NonAdherent)
        } else if self.meds_partial.is_match(text) {
            Some(MedicationAdherence::Partial)
        } else if self.meds_taken.is_match(text) {
            Some(MedicationAdherence::Adherent)
        } else {
            None
        }
    }

    fn breathing(&self, text: &str, symptoms: &[String]) -> Option<BreathingState> {
        if self.breathing_worse.is_match(text) {
            Some(BreathingState::Worse)
        } else if symptoms.iter().any(|tag| tag == "shortness_of_breath") {
            Some(BreathingState::Impaired)
        } else if self.breathing_improved.is_match(text) {
            Some(BreathingState::Improved)
        } else if self.breathing_normal.is_match(text) {
            Some(BreathingState::Normal)
        } else if self.breathing_stable.is_match(text) {
            Some(BreathingState::Stable)
        } else {
            None
        }
    }

    fn intent(&self, text: &str, symptoms: &[String], complications: &[String]) -> Intent {
        if text.trim_end().ends_with('?') || self.question_start.is_match(text) {
            Intent::AskQuestion
        } else if !symptoms.is_empty() || !complications.is_empty() {
            Intent::ReportSymptom
        } else if self.wellbeing.is_match(text) {
            Intent::ReportWellbeing
        } else if self.confirmation.is_match(text) {
            Intent::Confirm
        } else if self.off_topic.is_match(text) {
            Intent::OffTopic
        } else {
            Intent::Unclear
        }
    }

    fn severity(&self, text: &str, signal: &SignalRecord) -> Severity {
        let has = |tag: &str| signal.symptoms.iter().any(|symptom| symptom == tag);
        if has("chest_pain") || has("confusion") || self.cannot_breathe.is_match(text) {
            Severity::Critical
        } else if has("shortness_of_breath")
            || signal.has_fever()
            || signal.pain_score.is_some_and(|score| score >= 8)
            || signal.complications.iter().any(|tag| tag == "bleeding")
        {
            Severity::High
        } else if !signal.symptoms.is_empty() || !signal.complications.is_empty() {
            Severity::Moderate
        } else {
            Severity::Low
        }
    }

    fn sentiment(&self, text: &str, signal: &SignalRecord) -> Sentiment {
        if signal.severity == Severity::Critical || self.distress.is_match(text) {
            Sentiment::Distressed
        } else if self.negative_mood.is_match(text) || !signal.symptoms.is_empty() {
            Sentiment::Negative
        } else if self.wellbeing.is_match(text) {
            Sentiment::Positive
        } else {
            Sentiment::Neutral
        }
    }
}

/// Local extractor over the same output schema as the collaborator.
pub struct KeywordExtractor {
    lexicon: Lexicon,
    rng: Mutex<StdRng>,
}

impl KeywordExtractor {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self { lexicon: Lexicon::compile()?, rng: Mutex::new(StdRng::from_entropy()) })
    }

    /// Fixed seed, so confidence values repeat across runs.
    pub fn with_seed(seed: u64) -> Result<Self, regex::Error> {
        Ok(Self { lexicon: Lexicon::compile()?, rng: Mutex::new(StdRng::seed_from_u64(seed)) })
    }

    pub fn extract_local(&self, request: &ExtractionRequest) -> SignalRecord {
        let text = normalize(&request.text);
        let lexicon = &self.lexicon;

        let mut symptoms = lexicon.symptoms(&text);
        if symptoms.is_empty() && lexicon.back_reference.is_match(&text) {
            symptoms = self.inherited_symptoms(&request.history);
        }
        let complications = lexicon.affirmed_tags(&lexicon.complications, &text);

        let mut signal = SignalRecord::empty(request.text.clone());
        signal.intent = lexicon.intent(&text, &symptoms, &complications);
        signal.pain_score = lexicon.pain_score(&text);
        signal.temperature = lexicon.temperature(&text);
        signal.weight_change = lexicon.weight_change(&text, &symptoms);
        signal.medication_adherence = lexicon.medication_adherence(&text);
        signal.breathing = lexicon.breathing(&text, &symptoms);
        signal.symptoms = symptoms;
        signal.complications = complications;
        signal.matched_patterns = match_patterns(&request.patterns, &request.text);
        signal.severity = lexicon.severity(&text, &signal);
        signal.sentiment = lexicon.sentiment(&text, &signal);
        signal.confidence = self.confidence();
        signal.source = ExtractionSource::Fallback;
        signal.normalized()
    }

    fn inherited_symptoms(&self, history: &[ConversationTurn]) -> Vec<String> {
        history
            .iter()
            .rev()
            .filter(|turn| turn.role == MessageRole::Patient)
            .map(|turn| self.lexicon.symptoms(&normalize(&turn.content)))
            .find(|symptoms| !symptoms.is_empty())
            .unwrap_or_default()
    }

    fn confidence(&self) -> f64 {
        let mut rng = match self.rng.lock() {
            Ok(rng) => rng,
            Err(poisoned) => poisoned.into_inner(),
        };
        rng.gen_range(0.7..1.0)
    }
}

#[async_trait]
impl SignalExtractor for KeywordExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<SignalRecord, ExtractionError> {
        Ok(self.extract_local(request))
    }
}

fn normalize(text: &str) -> String {
    text.to_lowercase().replace(['\u{2018}', '\u{2019}'], "'")
}

#[cfg(test)]
mod tests {
    use carepath_core::domain::decision::Severity;
    use carepath_core::domain::interaction::{ConversationTurn, MessageRole};
    use carepath_core::domain::protocol::{ConditionCode, EducationTier};
    use carepath_core::domain::signal::{
        BreathingState, ExtractionSource, Intent, MedicationAdherence, SignalRecord, WeightChange,
    };
    use carepath_core::rules::patterns::ProtocolPattern;

    use super::KeywordExtractor;
    use crate::extraction::ExtractionRequest;

    fn extract(text: &str) -> SignalRecord {
        extract_with_history(text, Vec::new())
    }

    fn extract_with_history(text: &str, history: Vec<ConversationTurn>) -> SignalRecord {
        let extractor = KeywordExtractor::with_seed(42).expect("lexicon");
        extractor.extract_local(&ExtractionRequest {
            text: text.to_string(),
            condition: ConditionCode::Hf,
            tier: EducationTier::Medium,
            history,
            patterns: vec![
                ProtocolPattern::new("weight_gain_3lb", "gained 3 pounds"),
                ProtocolPattern::new("weight_gain", "gained weight"),
            ],
        })
    }

    fn has(signal: &SignalRecord, tag: &str) -> bool {
        signal.symptoms.iter().any(|symptom| symptom == tag)
    }

    #[test]
    fn chest_pain_and_breathlessness_are_critical() {
        let signal = extract("I have chest pain and can’t breathe");
        assert!(has(&signal, "chest_pain"));
        assert!(has(&signal, "shortness_of_breath"));
        assert!(!has(&signal, "pain"));
        assert_eq!(signal.severity, Severity::Critical);
        assert_eq!(signal.breathing, Some(BreathingState::Impaired));
        assert_eq!(signal.intent, Intent::ReportSymptom);
        assert_eq!(signal.source, ExtractionSource::Fallback);
    }

    #[test]
    fn wellbeing_report_has_no_symptoms() {
        let signal = extract("I feel fine, no issues");
        assert!(signal.symptoms.is_empty());
        assert_eq!(signal.intent, Intent::ReportWellbeing);
        assert_eq!(signal.severity, Severity::Low);
    }

    #[test]
    fn negated_symptoms_are_dropped() {
        let signal = extract("No chest pain today, but my ankles are swollen");
        assert!(!has(&signal, "chest_pain"));
        assert!(has(&signal, "swelling"));

        let denied = extract("I don't have any shortness of breath");
        assert!(denied.symptoms.is_empty());

        let joined = extract("I don't feel well and my ankles are swollen");
        assert!(has(&joined, "swelling"));
    }

    #[test]
    fn vague_weight_gain_matches_only_generic_pattern() {
        let vague = extract("I think I gained a little weight");
        assert_eq!(vague.matched_patterns, vec!["weight_gain".to_string()]);
        assert_eq!(vague.weight_change, Some(WeightChange::Gained));

        let exact = extract("I gained 3 pounds since yesterday");
        assert!(exact.matched_patterns.contains(&"weight_gain_3lb".to_string()));
    }

    #[test]
    fn numbers_are_read_when_stated() {
        let signal = extract("My pain is 9 out of 10 and my temperature is 101.5");
        assert_eq!(signal.pain_score, Some(9));
        assert_eq!(signal.temperature, Some(101.5));
        assert_eq!(signal.severity, Severity::High);

        let celsius = extract("temp was 38.6");
        assert!(celsius.has_fever());

        let unstated = extract("it hurts a lot");
        assert_eq!(unstated.pain_score, None);
    }

    #[test]
    fn medication_adherence_states() {
        assert_eq!(
            extract("I forgot to take my pills yesterday").medication_adherence,
            Some(MedicationAdherence::NonAdherent)
        );
        assert_eq!(
            extract("I stopped taking my meds").medication_adherence,
            Some(MedicationAdherence::NonAdherent)
        );
        assert_eq!(
            extract("I took all my medications").medication_adherence,
            Some(MedicationAdherence::Adherent)
        );
        assert_eq!(extract("hello there").medication_adherence, None);
    }

    #[test]
    fn breathing_states() {
        assert_eq!(extract("my breathing is worse").breathing, Some(BreathingState::Worse));
        assert_eq!(extract("breathing is better today").breathing, Some(BreathingState::Improved));
        assert_eq!(extract("no trouble breathing").breathing, Some(BreathingState::Normal));
    }

    #[test]
    fn back_reference_inherits_prior_symptom() {
        let history = vec![
            ConversationTurn { role: MessageRole::Patient, content: "my ankles are swelling".into() },
            ConversationTurn { role: MessageRole::Agent, content: "How long has that been going on?".into() },
        ];
        let signal = extract_with_history("it's worse today", history);
        assert!(has(&signal, "swelling"));
    }

    #[test]
    fn complications_are_tagged() {
        let signal = extract("I fell yesterday and my incision looks red");
        assert!(signal.complications.contains(&"fall".to_string()));
        assert!(signal.complications.contains(&"wound_infection".to_string()));
    }

    #[test]
    fn confidence_is_seeded_and_bounded() {
        let first = extract("I have a cough").confidence;
        let second = extract("I have a cough").confidence;
        assert_eq!(first, second);
        assert!((0.7..1.0).contains(&first));
    }

    #[test]
    fn questions_are_detected() {
        assert_eq!(extract("Can I take ibuprofen?").intent, Intent::AskQuestion);
    }
}

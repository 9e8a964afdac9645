//! Turning one patient utterance into a [`SignalRecord`].
//!
//! The collaborator-backed extractor is tried first under a [`FallbackPolicy`]. When it
//! is unavailable, slow, or returns something that does not decode, the local keyword
//! extractor produces the same record shape so the turn always completes.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use carepath_core::config::{EngineConfig, LlmConfig};
use carepath_core::domain::interaction::{ConversationTurn, MessageRole};
use carepath_core::domain::protocol::{ConditionCode, EducationTier};
use carepath_core::domain::signal::{ExtractionSource, SignalRecord};
use carepath_core::rules::patterns::{validate_selection, ProtocolPattern};
use thiserror::Error;
use tracing::warn;

use crate::keywords::KeywordExtractor;
use crate::llm::LlmClient;

#[derive(Clone, Debug, PartialEq)]
pub struct ExtractionRequest {
    pub text: String,
    pub condition: ConditionCode,
    pub tier: EducationTier,
    /// Prior turns, oldest first.
    pub history: Vec<ConversationTurn>,
    pub patterns: Vec<ProtocolPattern>,
}

#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("text-understanding collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("text-understanding collaborator timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed extraction result: {0}")]
    Malformed(String),
}

#[async_trait]
pub trait SignalExtractor: Send + Sync {
    async fn extract(&self, request: &ExtractionRequest) -> Result<SignalRecord, ExtractionError>;
}

const EXTRACTION_SYSTEM_PROMPT: &str = r#"You read messages from patients recently discharged from hospital and return a single JSON object describing what the patient said. Use exactly these keys:
- intent: one of report_symptom, report_wellbeing, ask_question, confirm, off_topic, unclear
- symptoms: array of short snake_case symptom tags (e.g. chest_pain, shortness_of_breath, swelling, weight_gain, cough, fever)
- severity: one of low, moderate, high, critical
- sentiment: one of positive, neutral, negative, distressed
- confidence: number between 0 and 1
- pain_score: integer 0-10 or null
- weight_change: gained, lost, stable or null
- medication_adherence: adherent, partial, non_adherent or null
- temperature: number or null
- breathing: normal, improved, stable, worse, impaired or null
- complications: array of snake_case tags
- matched_patterns: array of pattern ids taken from the supplied patterns
Resolve pronouns such as "it" or "that" using the conversation history. Only report numbers the patient actually stated. Never select a pattern that requires a number the patient did not say; choose the matching pattern without a number instead. Report symptoms the patient denies as absent."#;

/// Extraction delegated to the text-understanding collaborator.
pub struct LlmSignalExtractor {
    client: Arc<dyn LlmClient>,
}

impl LlmSignalExtractor {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }

    fn user_prompt(request: &ExtractionRequest) -> String {
        let history: Vec<serde_json::Value> = request
            .history
            .iter()
            .map(|turn| {
                serde_json::json!({
                    "role": match turn.role {
                        MessageRole::Patient => "patient",
                        MessageRole::Agent => "agent",
                    },
                    "content": turn.content,
                })
            })
            .collect();

        serde_json::json!({
            "condition": request.condition.as_str(),
            "education_tier": request.tier.as_str(),
            "text": request.text,
            "history": history,
            "patterns": request.patterns,
        })
        .to_string()
    }
}

#[async_trait]
impl SignalExtractor for LlmSignalExtractor {
    async fn extract(&self, request: &ExtractionRequest) -> Result<SignalRecord, ExtractionError> {
        let raw = self
            .client
            .chat_json(EXTRACTION_SYSTEM_PROMPT, &Self::user_prompt(request))
            .await
            .map_err(|error| ExtractionError::Unavailable(error.to_string()))?;

        let mut signal: SignalRecord = serde_json::from_str(&raw)
            .map_err(|error| ExtractionError::Malformed(error.to_string()))?;

        signal.raw_text = request.text.clone();
        signal.source = ExtractionSource::Collaborator;
        signal.matched_patterns =
            validate_selection(&request.patterns, &signal.matched_patterns, &request.text);
        Ok(signal.normalized())
    }
}

/// How long and how often the collaborator is tried before falling back.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FallbackPolicy {
    pub timeout: Duration,
    pub attempts: u32,
}

impl Default for FallbackPolicy {
    fn default() -> Self {
        Self { timeout: Duration::from_millis(8_000), attempts: 1 }
    }
}

impl FallbackPolicy {
    pub fn from_config(engine: &EngineConfig, llm: &LlmConfig) -> Self {
        Self {
            timeout: Duration::from_millis(engine.extraction_timeout_ms),
            attempts: llm.max_retries.saturating_add(1),
        }
    }
}

/// Collaborator first, keyword extraction when every attempt fails.
pub struct FallbackExtractor {
    primary: Arc<dyn SignalExtractor>,
    fallback: KeywordExtractor,
    policy: FallbackPolicy,
}

impl FallbackExtractor {
    pub fn new(
        primary: Arc<dyn SignalExtractor>,
        fallback: KeywordExtractor,
        policy: FallbackPolicy,
    ) -> Self {
        Self { primary, fallback, policy }
    }

    pub fn policy(&self) -> FallbackPolicy {
        self.policy
    }

    /// Never fails. The record's `source` tells which extractor produced it.
    pub async fn extract(&self, request: &ExtractionRequest) -> SignalRecord {
        for attempt in 1..=self.policy.attempts.max(1) {
            let outcome = tokio::time::timeout(self.policy.timeout, self.primary.extract(request))
                .await
                .unwrap_or(Err(ExtractionError::Timeout(self.policy.timeout)));

            match outcome {
                Ok(signal) => return signal,
                Err(error) => {
                    warn!(
                        event_name = "agent.extraction.collaborator_failed",
                        attempt,
                        max_attempts = self.policy.attempts,
                        error = %error,
                        "signal extraction attempt failed"
                    );
                }
            }
        }

        warn!(
            event_name = "agent.extraction.fallback",
            condition = request.condition.as_str(),
            "using keyword extraction"
        );
        self.fallback.extract_local(request)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use carepath_core::domain::protocol::{ConditionCode, EducationTier};
    use carepath_core::domain::signal::{ExtractionSource, Intent};
    use carepath_core::rules::patterns::ProtocolPattern;
    use serde_json::json;

    use super::{
        ExtractionError, ExtractionRequest, FallbackExtractor, FallbackPolicy,
        LlmSignalExtractor, SignalExtractor,
    };
    use crate::keywords::KeywordExtractor;
    use crate::llm::{ChatReply, LlmClient, ToolDefinition};

    struct CannedClient {
        response: Result<String, String>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl CannedClient {
        fn ok(body: serde_json::Value) -> Self {
            Self { response: Ok(body.to_string()), delay: Duration::ZERO, calls: AtomicUsize::new(0) }
        }

        fn failing() -> Self {
            Self {
                response: Err("connection refused".to_string()),
                delay: Duration::ZERO,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl LlmClient for CannedClient {
        async fn chat_json(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.response.clone().map_err(|error| anyhow!(error))
        }

        async fn chat_with_tools(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            _tools: &[ToolDefinition],
        ) -> Result<ChatReply> {
            Err(anyhow!("not used"))
        }

        fn model_name(&self) -> &str {
            "canned"
        }

        fn provider_name(&self) -> &str {
            "test"
        }
    }

    fn request(text: &str) -> ExtractionRequest {
        ExtractionRequest {
            text: text.to_string(),
            condition: ConditionCode::Hf,
            tier: EducationTier::Medium,
            history: Vec::new(),
            patterns: vec![
                ProtocolPattern::new("weight_gain_3lb", "gained 3 pounds"),
                ProtocolPattern::new("weight_gain", "gained weight"),
            ],
        }
    }

    fn fallback_for(client: CannedClient, policy: FallbackPolicy) -> (FallbackExtractor, Arc<CannedClient>) {
        let client = Arc::new(client);
        let primary = Arc::new(LlmSignalExtractor::new(client.clone()));
        let keywords = KeywordExtractor::with_seed(7).expect("lexicon");
        (FallbackExtractor::new(primary, keywords, policy), client)
    }

    #[tokio::test]
    async fn collaborator_record_is_normalized_and_tagged() {
        let client = Arc::new(CannedClient::ok(json!({
            "intent": "report_symptom",
            "symptoms": ["Ankle Swelling"],
            "severity": "moderate",
            "confidence": 1.7,
            "pain_score": 14,
            "matched_patterns": []
        })));
        let extractor = LlmSignalExtractor::new(client);

        let signal = extractor.extract(&request("my ankles are swelling")).await.expect("signal");
        assert_eq!(signal.intent, Intent::ReportSymptom);
        assert_eq!(signal.symptoms, vec!["ankle_swelling".to_string()]);
        assert_eq!(signal.confidence, 1.0);
        assert_eq!(signal.pain_score, Some(10));
        assert_eq!(signal.raw_text, "my ankles are swelling");
        assert_eq!(signal.source, ExtractionSource::Collaborator);
    }

    #[tokio::test]
    async fn fabricated_numeric_pattern_is_replaced_by_generic_sibling() {
        let client = Arc::new(CannedClient::ok(json!({
            "intent": "report_symptom",
            "symptoms": ["weight_gain"],
            "matched_patterns": ["weight_gain_3lb"]
        })));
        let extractor = LlmSignalExtractor::new(client);

        let vague = extractor
            .extract(&request("I think I gained a little weight"))
            .await
            .expect("signal");
        assert_eq!(vague.matched_patterns, vec!["weight_gain".to_string()]);

        let exact = extractor.extract(&request("I gained 3 pounds")).await.expect("signal");
        assert_eq!(exact.matched_patterns, vec!["weight_gain_3lb".to_string()]);
    }

    #[tokio::test]
    async fn non_json_response_is_malformed() {
        let client = Arc::new(CannedClient {
            response: Ok("sorry, I cannot help".to_string()),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        });
        let error = LlmSignalExtractor::new(client)
            .extract(&request("hello"))
            .await
            .expect_err("malformed");
        assert!(matches!(error, ExtractionError::Malformed(_)));
    }

    #[tokio::test]
    async fn unavailable_collaborator_falls_back_after_every_attempt() {
        let policy = FallbackPolicy { timeout: Duration::from_secs(1), attempts: 3 };
        let (extractor, client) = fallback_for(CannedClient::failing(), policy);

        let signal = extractor.extract(&request("I have a bad cough")).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert_eq!(signal.source, ExtractionSource::Fallback);
        assert!(signal.symptoms.contains(&"cough".to_string()));
        assert!((0.7..1.0).contains(&signal.confidence));
    }

    #[tokio::test]
    async fn slow_collaborator_times_out_into_fallback() {
        let slow = CannedClient {
            response: Ok(json!({"intent": "confirm"}).to_string()),
            delay: Duration::from_millis(200),
            calls: AtomicUsize::new(0),
        };
        let policy = FallbackPolicy { timeout: Duration::from_millis(20), attempts: 1 };
        let (extractor, _) = fallback_for(slow, policy);

        let signal = extractor.extract(&request("I feel fine")).await;
        assert_eq!(signal.source, ExtractionSource::Fallback);
    }

    #[tokio::test]
    async fn healthy_collaborator_is_used_directly() {
        let (extractor, client) =
            fallback_for(CannedClient::ok(json!({"intent": "confirm"})), FallbackPolicy::default());

        let signal = extractor.extract(&request("yes")).await;
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
        assert_eq!(signal.source, ExtractionSource::Collaborator);
        assert_eq!(signal.intent, Intent::Confirm);
    }
}

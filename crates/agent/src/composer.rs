//! Reply composition.
//!
//! Flags never reach the generative collaborator: [`select_strategy`] maps them to a
//! fixed text and a single escalation tool call. Only ASK_MORE and CLOSE turns are
//! delegated, and anything unusable that comes back (an error, a timeout, tool calls
//! with no text, a guardrail denial) is replaced by a template keyed on the hint.

use std::sync::Arc;
use std::time::Duration;

use carepath_core::domain::decision::{DecisionHint, Severity};
use carepath_core::domain::interaction::{ConversationTurn, MessageRole};
use carepath_core::domain::protocol::{ConditionCode, EducationTier};
use carepath_core::domain::tool::{ToolCall, ToolName};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use crate::guardrails::{GuardrailDecision, GuardrailPolicy};
use crate::llm::{ChatReply, LlmClient, ToolDefinition};

pub const CRITICAL_REPLY: &str = "Thank you for telling me. What you are describing needs attention right away. A nurse will contact you within 30 minutes. If your symptoms get worse or you feel you are in danger, call emergency services (911) now.";

pub const HIGH_REPLY: &str = "Thank you for letting me know. I have flagged this for your care team and a nurse will follow up with you within 2 hours. If things get worse before then, call your doctor or emergency services.";

pub const FLAG_REPLY: &str = "Thank you for sharing that. I have passed it on to your care team so they can keep an eye on it. Please let me know if anything changes.";

pub const CLOSE_REPLY: &str = "Thank you for checking in. Everything you have shared sounds on track. Keep following your care plan, and reach out any time something changes.";

const GENERATIVE_SYSTEM_PROMPT: &str = r#"You are a friendly care assistant checking in with a patient who was recently discharged from hospital. You receive the patient's message, the recent conversation, and a triage hint decided by the clinical protocol. Reply in plain language suited to the patient's education tier, in no more than four short sentences.
Rules:
1. When a symptom line is unclear, try two or three different questions about it before moving on.
2. Confirm that at least two specific symptoms are normal before calling log_checkin.
3. Never give medical or pharmacy advice, never suggest changing medication or doses. Refer those questions to the care team.
4. If the patient goes off topic, acknowledge briefly and bring the conversation back to the check-in.
Use the tools only as described. Always include a text reply for the patient."#;

/// How a turn's reply is produced.
#[derive(Clone, Debug, PartialEq)]
pub enum ResponseStrategy {
    Forced { text: &'static str, tool_call: ToolCall },
    Generative,
}

/// Which path produced the reply.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CompositionPath {
    Forced,
    Generative,
    Fallback,
}

impl CompositionPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Forced => "forced",
            Self::Generative => "generative",
            Self::Fallback => "fallback",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComposedReply {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub path: CompositionPath,
}

#[derive(Clone, Copy, Debug)]
pub struct CompositionContext<'a> {
    pub condition: ConditionCode,
    pub tier: EducationTier,
    pub patient_text: &'a str,
    pub hint: &'a DecisionHint,
    pub history: &'a [ConversationTurn],
}

/// Pure choice between a fixed reply and delegation.
pub fn select_strategy(hint: &DecisionHint) -> ResponseStrategy {
    let DecisionHint::Flag { flag_type, severity, reason, follow_up } = hint else {
        return ResponseStrategy::Generative;
    };

    let parameters = json!({
        "flag_type": flag_type,
        "severity": severity.as_str(),
        "reason": reason,
        "reason_codes": [flag_type],
        "follow_up": follow_up,
    });

    match severity {
        Severity::Critical => ResponseStrategy::Forced {
            text: CRITICAL_REPLY,
            tool_call: ToolCall::new(ToolName::HandoffToNurse, parameters),
        },
        Severity::High => ResponseStrategy::Forced {
            text: HIGH_REPLY,
            tool_call: ToolCall::new(ToolName::RaiseFlag, parameters),
        },
        Severity::Moderate | Severity::Low => ResponseStrategy::Forced {
            text: FLAG_REPLY,
            tool_call: ToolCall::new(ToolName::RaiseFlag, parameters),
        },
    }
}

/// Deterministic reply for the hint, with no tool calls.
pub fn template_reply(hint: &DecisionHint) -> String {
    match hint {
        DecisionHint::Flag { severity: Severity::Critical, .. } => CRITICAL_REPLY.to_string(),
        DecisionHint::Flag { severity: Severity::High, .. } => HIGH_REPLY.to_string(),
        DecisionHint::Flag { .. } => FLAG_REPLY.to_string(),
        DecisionHint::Close { .. } => CLOSE_REPLY.to_string(),
        DecisionHint::AskMore { questions } => match questions.first() {
            Some(question) => format!("Thanks for the update. To make sure you are doing okay: {question}"),
            None => "Thanks for the update. Can you tell me a little more about how you are feeling today?"
                .to_string(),
        },
    }
}

/// The tools offered to the generative collaborator.
pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: ToolName::RaiseFlag.as_str().to_string(),
            description: "Flag a concern for the nursing team. Use only for symptoms that need review."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "flag_type": {"type": "string"},
                    "severity": {"type": "string", "enum": ["low", "moderate", "high", "critical"]},
                    "reason": {"type": "string"}
                },
                "required": ["flag_type", "severity", "reason"]
            }),
        },
        ToolDefinition {
            name: ToolName::AskMore.as_str().to_string(),
            description: "Record that more information is being requested from the patient.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"questions": {"type": "array", "items": {"type": "string"}}}
            }),
        },
        ToolDefinition {
            name: ToolName::LogCheckin.as_str().to_string(),
            description: "Close the check-in as normal after confirming at least two symptoms are normal."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "summary": {"type": "string"},
                    "confirmed_normal": {"type": "array", "items": {"type": "string"}}
                },
                "required": ["summary"]
            }),
        },
        ToolDefinition {
            name: ToolName::HandoffToNurse.as_str().to_string(),
            description: "Hand the conversation to a nurse immediately. Use for emergencies or when the patient asks for a person."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {"reason": {"type": "string"}},
                "required": ["reason"]
            }),
        },
    ]
}

pub struct LlmResponseComposer {
    client: Arc<dyn LlmClient>,
    guardrails: GuardrailPolicy,
    timeout: Duration,
}

impl LlmResponseComposer {
    pub fn new(client: Arc<dyn LlmClient>, guardrails: GuardrailPolicy, timeout: Duration) -> Self {
        Self { client, guardrails, timeout }
    }

    pub async fn compose(&self, context: &CompositionContext<'_>) -> ComposedReply {
        match select_strategy(context.hint) {
            ResponseStrategy::Forced { text, tool_call } => ComposedReply {
                text: text.to_string(),
                tool_calls: vec![tool_call],
                path: CompositionPath::Forced,
            },
            ResponseStrategy::Generative => self.generate(context).await,
        }
    }

    async fn generate(&self, context: &CompositionContext<'_>) -> ComposedReply {
        let tools = tool_definitions();
        let prompt = user_prompt(context);
        let call = self.client.chat_with_tools(GENERATIVE_SYSTEM_PROMPT, &prompt, &tools);

        let reply = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(error)) => {
                warn!(
                    event_name = "agent.composer.collaborator_failed",
                    error = %error,
                    "generative collaborator failed"
                );
                return fallback(context.hint);
            }
            Err(_) => {
                warn!(
                    event_name = "agent.composer.collaborator_failed",
                    timeout_ms = self.timeout.as_millis() as u64,
                    "generative collaborator timed out"
                );
                return fallback(context.hint);
            }
        };

        match self.guardrails.evaluate(&reply) {
            GuardrailDecision::Allow => {}
            GuardrailDecision::Deny { reason_code, detail, fallback_path }
            | GuardrailDecision::Degrade { reason_code, detail, fallback_path } => {
                warn!(
                    event_name = "agent.composer.reply_rejected",
                    reason_code,
                    fallback_path,
                    detail = %detail,
                    "generated reply replaced by template"
                );
                return fallback(context.hint);
            }
        }

        for call in &reply.tool_calls {
            if !GuardrailPolicy::is_known_tool(&call.name) {
                warn!(
                    event_name = "agent.composer.unknown_tool",
                    tool = %call.name,
                    "collaborator requested a tool outside the vocabulary"
                );
            }
        }

        let ChatReply { text, tool_calls } = reply;
        ComposedReply { text, tool_calls, path: CompositionPath::Generative }
    }
}

fn fallback(hint: &DecisionHint) -> ComposedReply {
    ComposedReply { text: template_reply(hint), tool_calls: Vec::new(), path: CompositionPath::Fallback }
}

fn user_prompt(context: &CompositionContext<'_>) -> String {
    let history: Vec<serde_json::Value> = context
        .history
        .iter()
        .map(|turn| {
            json!({
                "role": match turn.role {
                    MessageRole::Patient => "patient",
                    MessageRole::Agent => "agent",
                },
                "content": turn.content,
            })
        })
        .collect();

    json!({
        "condition": context.condition.as_str(),
        "condition_name": context.condition.display_name(),
        "education_tier": context.tier.as_str(),
        "text": context.patient_text,
        "hint": context.hint,
        "history": history,
        "tools": ToolName::ALL.iter().map(ToolName::as_str).collect::<Vec<_>>(),
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use carepath_core::domain::decision::{DecisionHint, Severity};
    use carepath_core::domain::protocol::{ConditionCode, EducationTier};
    use carepath_core::domain::tool::{ToolCall, ToolName};
    use serde_json::json;

    use super::{
        select_strategy, CompositionContext, CompositionPath, LlmResponseComposer,
        ResponseStrategy, CLOSE_REPLY, CRITICAL_REPLY, HIGH_REPLY,
    };
    use crate::guardrails::GuardrailPolicy;
    use crate::llm::{ChatReply, LlmClient, ToolDefinition};

    struct ScriptedClient {
        reply: Option<ChatReply>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(reply: Option<ChatReply>) -> Arc<Self> {
            Arc::new(Self { reply, calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedClient {
        async fn chat_json(&self, _system_prompt: &str, _user_prompt: &str) -> Result<String> {
            Err(anyhow!("not used"))
        }

        async fn chat_with_tools(
            &self,
            _system_prompt: &str,
            _user_prompt: &str,
            tools: &[ToolDefinition],
        ) -> Result<ChatReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(tools.len(), ToolName::ALL.len());
            self.reply.clone().ok_or_else(|| anyhow!("upstream 503"))
        }

        fn model_name(&self) -> &str {
            "scripted"
        }

        fn provider_name(&self) -> &str {
            "test"
        }
    }

    fn flag(severity: Severity) -> DecisionHint {
        DecisionHint::Flag {
            flag_type: "HF_CHEST_PAIN".to_string(),
            severity,
            reason: "chest pain".to_string(),
            follow_up: vec![],
        }
    }

    fn ask_more() -> DecisionHint {
        DecisionHint::AskMore { questions: vec!["How is your breathing today?".to_string()] }
    }

    async fn compose(client: Arc<ScriptedClient>, hint: &DecisionHint) -> super::ComposedReply {
        let composer =
            LlmResponseComposer::new(client, GuardrailPolicy::default(), Duration::from_secs(1));
        composer
            .compose(&CompositionContext {
                condition: ConditionCode::Hf,
                tier: EducationTier::Medium,
                patient_text: "hello",
                hint,
                history: &[],
            })
            .await
    }

    #[test]
    fn flags_select_forced_strategies_by_severity() {
        let ResponseStrategy::Forced { text, tool_call } = select_strategy(&flag(Severity::Critical))
        else {
            panic!("critical must be forced");
        };
        assert_eq!(text, CRITICAL_REPLY);
        assert!(text.contains("within 30 minutes"));
        assert!(text.contains("emergency services"));
        assert_eq!(tool_call.tool_name(), Some(ToolName::HandoffToNurse));

        let ResponseStrategy::Forced { text, tool_call } = select_strategy(&flag(Severity::High))
        else {
            panic!("high must be forced");
        };
        assert_eq!(text, HIGH_REPLY);
        assert!(text.contains("2 hours"));
        assert_eq!(tool_call.tool_name(), Some(ToolName::RaiseFlag));
        assert_eq!(tool_call.str_param("severity"), Some("high"));

        assert!(matches!(
            select_strategy(&flag(Severity::Moderate)),
            ResponseStrategy::Forced { .. }
        ));
        assert_eq!(select_strategy(&ask_more()), ResponseStrategy::Generative);
        assert_eq!(
            select_strategy(&DecisionHint::Close { reason: "stable".to_string() }),
            ResponseStrategy::Generative
        );
    }

    #[tokio::test]
    async fn forced_path_skips_collaborator() {
        let client = ScriptedClient::new(None);
        let reply = compose(client.clone(), &flag(Severity::Critical)).await;

        assert_eq!(client.calls.load(Ordering::SeqCst), 0);
        assert_eq!(reply.path, CompositionPath::Forced);
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].name, "handoff_to_nurse");
    }

    #[tokio::test]
    async fn generated_reply_passes_through() {
        let client = ScriptedClient::new(Some(ChatReply {
            text: "Glad to hear it. Any swelling in your ankles?".to_string(),
            tool_calls: vec![ToolCall::new(ToolName::AskMore, json!({}))],
        }));
        let reply = compose(client, &ask_more()).await;

        assert_eq!(reply.path, CompositionPath::Generative);
        assert_eq!(reply.text, "Glad to hear it. Any swelling in your ankles?");
        assert_eq!(reply.tool_calls.len(), 1);
    }

    #[tokio::test]
    async fn tool_calls_without_text_fall_back_to_template() {
        let client = ScriptedClient::new(Some(ChatReply {
            text: String::new(),
            tool_calls: vec![ToolCall::new(ToolName::LogCheckin, json!({"summary": "fine"}))],
        }));
        let reply = compose(client, &DecisionHint::Close { reason: "stable".to_string() }).await;

        assert_eq!(reply.path, CompositionPath::Fallback);
        assert_eq!(reply.text, CLOSE_REPLY);
        assert!(reply.tool_calls.is_empty());
    }

    #[tokio::test]
    async fn collaborator_error_falls_back_to_question() {
        let reply = compose(ScriptedClient::new(None), &ask_more()).await;

        assert_eq!(reply.path, CompositionPath::Fallback);
        assert!(reply.text.contains("How is your breathing today?"));
        assert!(reply.tool_calls.is_empty());
    }
}

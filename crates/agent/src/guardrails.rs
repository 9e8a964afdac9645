use carepath_core::domain::tool::ToolName;

use crate::llm::ChatReply;

/// Phrases that read as dosing or prescribing instructions.
const MEDICATION_ADVICE: &[&str] = &[
    "increase your dose",
    "decrease your dose",
    "double your dose",
    "lower your dose",
    "raise your dose",
    "take an extra",
    "skip your next dose",
    "stop taking your",
    "you should take",
    " mg of ",
    "milligrams of",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GuardrailDecision {
    Allow,
    Deny { reason_code: &'static str, detail: String, fallback_path: &'static str },
    Degrade { reason_code: &'static str, detail: String, fallback_path: &'static str },
}

/// Checks a generated reply before it reaches the patient.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GuardrailPolicy {
    pub max_reply_chars: usize,
    pub max_tool_calls: usize,
    pub block_medication_advice: bool,
}

impl Default for GuardrailPolicy {
    fn default() -> Self {
        Self { max_reply_chars: 1_200, max_tool_calls: 4, block_medication_advice: true }
    }
}

impl GuardrailPolicy {
    pub fn evaluate(&self, reply: &ChatReply) -> GuardrailDecision {
        if reply.text.trim().is_empty() {
            return GuardrailDecision::Deny {
                reason_code: if reply.tool_calls.is_empty() {
                    "empty_reply"
                } else {
                    "tool_calls_without_text"
                },
                detail: format!("reply carried {} tool call(s) and no text", reply.tool_calls.len()),
                fallback_path: "hint_template",
            };
        }

        if self.block_medication_advice {
            let lowered = reply.text.to_lowercase();
            if let Some(phrase) = MEDICATION_ADVICE.iter().find(|phrase| lowered.contains(*phrase)) {
                return GuardrailDecision::Deny {
                    reason_code: "medication_advice",
                    detail: format!("reply contains `{}`", phrase.trim()),
                    fallback_path: "hint_template",
                };
            }
        }

        if reply.text.chars().count() > self.max_reply_chars {
            return GuardrailDecision::Degrade {
                reason_code: "reply_too_long",
                detail: format!("reply exceeds {} characters", self.max_reply_chars),
                fallback_path: "hint_template",
            };
        }

        if reply.tool_calls.len() > self.max_tool_calls {
            return GuardrailDecision::Degrade {
                reason_code: "too_many_tool_calls",
                detail: format!("{} tool calls requested", reply.tool_calls.len()),
                fallback_path: "hint_template",
            };
        }

        GuardrailDecision::Allow
    }

    /// True when the name belongs to the fixed tool vocabulary.
    pub fn is_known_tool(name: &str) -> bool {
        ToolName::parse(name).is_some()
    }
}

#[cfg(test)]
mod tests {
    use carepath_core::domain::tool::{ToolCall, ToolName};
    use serde_json::json;

    use super::{GuardrailDecision, GuardrailPolicy};
    use crate::llm::ChatReply;

    fn reply(text: &str, tools: usize) -> ChatReply {
        ChatReply {
            text: text.to_string(),
            tool_calls: (0..tools).map(|_| ToolCall::new(ToolName::AskMore, json!({}))).collect(),
        }
    }

    #[test]
    fn ordinary_reply_is_allowed() {
        let decision = GuardrailPolicy::default()
            .evaluate(&reply("How is your breathing today compared to yesterday?", 1));
        assert_eq!(decision, GuardrailDecision::Allow);
    }

    #[test]
    fn tool_calls_without_text_are_denied() {
        let decision = GuardrailPolicy::default().evaluate(&reply("   ", 2));
        let GuardrailDecision::Deny { reason_code, fallback_path, .. } = decision else {
            panic!("expected deny, got {decision:?}");
        };
        assert_eq!(reason_code, "tool_calls_without_text");
        assert_eq!(fallback_path, "hint_template");
    }

    #[test]
    fn dosing_instructions_are_denied() {
        let decision = GuardrailPolicy::default()
            .evaluate(&reply("You could double your dose of furosemide tonight.", 0));
        assert!(matches!(
            decision,
            GuardrailDecision::Deny { reason_code: "medication_advice", .. }
        ));
    }

    #[test]
    fn oversized_reply_degrades() {
        let policy = GuardrailPolicy { max_reply_chars: 10, ..GuardrailPolicy::default() };
        let decision = policy.evaluate(&reply("This reply is far too long.", 0));
        assert!(matches!(decision, GuardrailDecision::Degrade { reason_code: "reply_too_long", .. }));
    }

    #[test]
    fn vocabulary_check() {
        assert!(GuardrailPolicy::is_known_tool("handoff_to_nurse"));
        assert!(!GuardrailPolicy::is_known_tool("prescribe"));
    }
}

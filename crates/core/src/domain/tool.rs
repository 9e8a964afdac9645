use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The fixed vocabulary the response composer may request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolName {
    RaiseFlag,
    AskMore,
    LogCheckin,
    HandoffToNurse,
}

impl ToolName {
    pub const ALL: [ToolName; 4] =
        [Self::RaiseFlag, Self::AskMore, Self::LogCheckin, Self::HandoffToNurse];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RaiseFlag => "raise_flag",
            Self::AskMore => "ask_more",
            Self::LogCheckin => "log_checkin",
            Self::HandoffToNurse => "handoff_to_nurse",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "raise_flag" => Some(Self::RaiseFlag),
            "ask_more" => Some(Self::AskMore),
            "log_checkin" => Some(Self::LogCheckin),
            "handoff_to_nurse" => Some(Self::HandoffToNurse),
            _ => None,
        }
    }
}

/// A requested action. The name stays a string because collaborators can
/// return names outside the vocabulary; the dispatcher reports those as failures.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub parameters: Value,
}

impl ToolCall {
    pub fn new(name: ToolName, parameters: Value) -> Self {
        Self { name: name.as_str().to_string(), parameters }
    }

    pub fn tool_name(&self) -> Option<ToolName> {
        ToolName::parse(&self.name)
    }

    pub fn str_param(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn list_param(&self, key: &str) -> Vec<String> {
        match self.parameters.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_str)
                .map(|item| item.trim().to_string())
                .filter(|item| !item.is_empty())
                .collect(),
            Some(Value::String(item)) if !item.trim().is_empty() => vec![item.trim().to_string()],
            _ => Vec::new(),
        }
    }

    /// Stable key for one call made during one turn. Replaying the same turn
    /// produces the same key, which storage uses to reject duplicates.
    pub fn operation_key(&self, interaction_id: &str, turn_sequence: u32) -> String {
        let mut hasher = blake3::Hasher::new();
        hasher.update(interaction_id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(turn_sequence.to_string().as_bytes());
        hasher.update(b"\x1f");
        hasher.update(self.name.as_bytes());
        hasher.update(b"\x1f");
        // serde_json maps are ordered, so the encoding is canonical.
        hasher.update(self.parameters.to_string().as_bytes());
        format!("op_{}", hasher.finalize().to_hex())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool: String,
    pub success: bool,
    pub entity_id: Option<String>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(tool: impl Into<String>, entity_id: Option<String>) -> Self {
        Self { tool: tool.into(), success: true, entity_id, error: None }
    }

    pub fn failed(tool: impl Into<String>, error: impl Into<String>) -> Self {
        Self { tool: tool.into(), success: false, entity_id: None, error: Some(error.into()) }
    }
}

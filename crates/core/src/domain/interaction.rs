use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::protocol::{EpisodeId, PatientId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InteractionId(pub String);

impl InteractionId {
    pub fn generate() -> Self {
        Self(format!("INT-{}", Uuid::new_v4()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub String);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    Patient,
    Agent,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Patient => "patient",
            Self::Agent => "agent",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "patient" => Some(Self::Patient),
            "agent" => Some(Self::Agent),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInteraction {
    pub id: InteractionId,
    pub patient_id: PatientId,
    pub episode_id: EpisodeId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AgentInteraction {
    pub fn start(patient_id: PatientId, episode_id: EpisodeId, now: DateTime<Utc>) -> Self {
        Self { id: InteractionId::generate(), patient_id, episode_id, created_at: now, updated_at: now }
    }
}

/// Message content as supplied by a caller. Storage assigns the id and
/// sequence number.
#[derive(Clone, Debug, PartialEq)]
pub struct NewMessage {
    pub role: MessageRole,
    pub content: String,
    pub tool_metadata: Option<Value>,
}

impl NewMessage {
    pub fn patient(content: impl Into<String>) -> Self {
        Self { role: MessageRole::Patient, content: content.into(), tool_metadata: None }
    }

    pub fn agent(content: impl Into<String>, tool_metadata: Option<Value>) -> Self {
        Self { role: MessageRole::Agent, content: content.into(), tool_metadata }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub id: MessageId,
    pub interaction_id: InteractionId,
    pub role: MessageRole,
    pub content: String,
    pub sequence_number: u32,
    pub tool_metadata: Option<Value>,
    pub created_at: DateTime<Utc>,
}

/// One prior turn handed to the signal extractor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: MessageRole,
    pub content: String,
}

impl From<&AgentMessage> for ConversationTurn {
    fn from(message: &AgentMessage) -> Self {
        Self { role: message.role, content: message.content.clone() }
    }
}

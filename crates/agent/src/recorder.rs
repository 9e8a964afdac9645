use std::sync::Arc;

use carepath_core::domain::interaction::{
    AgentInteraction, AgentMessage, ConversationTurn, InteractionId, NewMessage,
};
use carepath_core::domain::protocol::{EpisodeId, PatientId};
use carepath_core::errors::{ApplicationError, DomainError};
use carepath_db::repositories::InteractionRepository;
use chrono::{DateTime, Utc};
use serde_json::Value;

/// Threads and their append-only messages. Sequence numbers come from storage.
pub struct InteractionRecorder {
    repository: Arc<dyn InteractionRepository>,
    history_window: usize,
}

impl InteractionRecorder {
    pub fn new(repository: Arc<dyn InteractionRepository>, history_window: usize) -> Self {
        Self { repository, history_window }
    }

    /// Continues the given thread, or starts one when no id is supplied.
    pub async fn open(
        &self,
        patient_id: &PatientId,
        episode_id: &EpisodeId,
        interaction_id: Option<&InteractionId>,
        now: DateTime<Utc>,
    ) -> Result<AgentInteraction, ApplicationError> {
        if let Some(id) = interaction_id {
            let existing = self
                .repository
                .find_interaction(id)
                .await?
                .ok_or_else(|| ApplicationError::NotFound(format!("interaction `{}`", id.0)))?;
            if &existing.episode_id != episode_id || &existing.patient_id != patient_id {
                return Err(DomainError::InvariantViolation(format!(
                    "interaction `{}` belongs to a different episode or patient",
                    id.0
                ))
                .into());
            }
            return Ok(existing);
        }

        let interaction = AgentInteraction::start(patient_id.clone(), episode_id.clone(), now);
        self.repository.create_interaction(interaction.clone()).await?;
        Ok(interaction)
    }

    /// The latest messages within the configured window, oldest first.
    pub async fn history(
        &self,
        interaction_id: &InteractionId,
    ) -> Result<Vec<ConversationTurn>, ApplicationError> {
        if self.history_window == 0 {
            return Ok(Vec::new());
        }
        let messages = self.repository.recent_messages(interaction_id, self.history_window).await?;
        Ok(messages.iter().map(ConversationTurn::from).collect())
    }

    pub async fn record_patient(
        &self,
        interaction_id: &InteractionId,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<AgentMessage, ApplicationError> {
        Ok(self.repository.append_message(interaction_id, NewMessage::patient(text), now).await?)
    }

    pub async fn record_agent(
        &self,
        interaction_id: &InteractionId,
        text: &str,
        tool_metadata: Value,
        now: DateTime<Utc>,
    ) -> Result<AgentMessage, ApplicationError> {
        Ok(self
            .repository
            .append_message(interaction_id, NewMessage::agent(text, Some(tool_metadata)), now)
            .await?)
    }
}

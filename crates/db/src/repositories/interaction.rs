use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};
use uuid::Uuid;

use carepath_core::domain::interaction::{
    AgentInteraction, AgentMessage, InteractionId, MessageId, MessageRole, NewMessage,
};
use carepath_core::domain::protocol::{EpisodeId, PatientId};

use super::rows::{parse_label, parse_timestamp, parse_u32};
use super::{InteractionRepository, RepositoryError};
use crate::DbPool;

pub struct SqlInteractionRepository {
    pool: DbPool,
}

impl SqlInteractionRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl InteractionRepository for SqlInteractionRepository {
    async fn create_interaction(&self, interaction: AgentInteraction) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO agent_interaction (id, patient_id, episode_id, next_sequence, created_at, updated_at)
             VALUES (?, ?, ?, 0, ?, ?)",
        )
        .bind(&interaction.id.0)
        .bind(&interaction.patient_id.0)
        .bind(&interaction.episode_id.0)
        .bind(interaction.created_at.to_rfc3339())
        .bind(interaction.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_interaction(
        &self,
        id: &InteractionId,
    ) -> Result<Option<AgentInteraction>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, patient_id, episode_id, created_at, updated_at
             FROM agent_interaction
             WHERE id = ?",
        )
        .bind(&id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.map(interaction_from_row).transpose()
    }

    async fn append_message(
        &self,
        interaction_id: &InteractionId,
        message: NewMessage,
        now: DateTime<Utc>,
    ) -> Result<AgentMessage, RepositoryError> {
        let tool_metadata_json = message
            .tool_metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|error| RepositoryError::Decode(format!("tool metadata: {error}")))?;

        let mut tx = self.pool.begin().await?;

        // Claiming the number and inserting the row share one transaction; the
        // UPDATE takes the write lock before anything is read.
        let sequence = sqlx::query(
            "UPDATE agent_interaction
             SET next_sequence = next_sequence + 1, updated_at = ?
             WHERE id = ?
             RETURNING next_sequence",
        )
        .bind(now.to_rfc3339())
        .bind(&interaction_id.0)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| RepositoryError::NotFound(format!("interaction `{}`", interaction_id.0)))?
        .try_get::<i64, _>("next_sequence")?;
        let sequence_number = parse_u32("next_sequence", sequence)?;

        let id = MessageId(format!("MSG-{}", Uuid::new_v4()));
        sqlx::query(
            "INSERT INTO agent_message (
                id, interaction_id, role, content, sequence_number, tool_metadata_json, created_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id.0)
        .bind(&interaction_id.0)
        .bind(message.role.as_str())
        .bind(&message.content)
        .bind(i64::from(sequence_number))
        .bind(tool_metadata_json.as_deref())
        .bind(now.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(AgentMessage {
            id,
            interaction_id: interaction_id.clone(),
            role: message.role,
            content: message.content,
            sequence_number,
            tool_metadata: message.tool_metadata,
            created_at: now,
        })
    }

    async fn recent_messages(
        &self,
        interaction_id: &InteractionId,
        limit: usize,
    ) -> Result<Vec<AgentMessage>, RepositoryError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = sqlx::query(
            "SELECT id, interaction_id, role, content, sequence_number, tool_metadata_json, created_at
             FROM agent_message
             WHERE interaction_id = ?
             ORDER BY sequence_number DESC
             LIMIT ?",
        )
        .bind(&interaction_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = rows.into_iter().map(message_from_row).collect::<Result<Vec<_>, _>>()?;
        messages.reverse();
        Ok(messages)
    }
}

fn interaction_from_row(row: SqliteRow) -> Result<AgentInteraction, RepositoryError> {
    Ok(AgentInteraction {
        id: InteractionId(row.try_get("id")?),
        patient_id: PatientId(row.try_get("patient_id")?),
        episode_id: EpisodeId(row.try_get("episode_id")?),
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn message_from_row(row: SqliteRow) -> Result<AgentMessage, RepositoryError> {
    let tool_metadata = row
        .try_get::<Option<String>, _>("tool_metadata_json")?
        .map(|raw| {
            serde_json::from_str(&raw)
                .map_err(|error| RepositoryError::Decode(format!("tool_metadata_json: {error}")))
        })
        .transpose()?;

    Ok(AgentMessage {
        id: MessageId(row.try_get("id")?),
        interaction_id: InteractionId(row.try_get("interaction_id")?),
        role: parse_label("role", row.try_get("role")?, MessageRole::parse)?,
        content: row.try_get("content")?,
        sequence_number: parse_u32("sequence_number", row.try_get("sequence_number")?)?,
        tool_metadata,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

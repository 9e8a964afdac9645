use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use carepath_core::domain::decision::Severity;
use carepath_core::domain::escalation::{
    EscalationStatus, EscalationTask, EscalationTaskId, EscalationTransition, Priority,
    ResolutionOutcome,
};
use carepath_core::domain::interaction::InteractionId;
use carepath_core::domain::protocol::{EpisodeId, PatientId};

use super::rows::{parse_label, parse_optional_timestamp, parse_timestamp};
use super::{EscalationRepository, RepositoryError};
use crate::DbPool;

const TASK_COLUMNS: &str = "id, episode_id, patient_id, interaction_id, severity, priority,
    reason_codes_json, summary, status, assigned_to, assigned_at, sla_due_at,
    resolution_outcome, resolution_notes, resolved_by, resolved_at, idempotency_key,
    created_at, updated_at";

pub struct SqlEscalationRepository {
    pool: DbPool,
}

impl SqlEscalationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<EscalationTask>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM escalation_task WHERE idempotency_key = ?"
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(task_from_row).transpose()
    }
}

#[async_trait::async_trait]
impl EscalationRepository for SqlEscalationRepository {
    async fn create(&self, task: EscalationTask) -> Result<EscalationTask, RepositoryError> {
        let reason_codes_json = serde_json::to_string(&task.reason_codes)
            .map_err(|error| RepositoryError::Decode(format!("reason codes: {error}")))?;

        let result = sqlx::query(
            "INSERT INTO escalation_task (
                id, episode_id, patient_id, interaction_id, severity, priority,
                reason_codes_json, summary, status, assigned_to, assigned_at, sla_due_at,
                resolution_outcome, resolution_notes, resolved_by, resolved_at, idempotency_key,
                created_at, updated_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(idempotency_key) DO NOTHING",
        )
        .bind(&task.id.0)
        .bind(&task.episode_id.0)
        .bind(&task.patient_id.0)
        .bind(task.interaction_id.as_ref().map(|id| id.0.as_str()))
        .bind(task.severity.as_str())
        .bind(task.priority.as_str())
        .bind(reason_codes_json)
        .bind(&task.summary)
        .bind(task.status.as_str())
        .bind(task.assigned_to.as_deref())
        .bind(task.assigned_at.map(|value| value.to_rfc3339()))
        .bind(task.sla_due_at.to_rfc3339())
        .bind(task.resolution_outcome.map(|outcome| outcome.as_str()))
        .bind(task.resolution_notes.as_deref())
        .bind(task.resolved_by.as_deref())
        .bind(task.resolved_at.map(|value| value.to_rfc3339()))
        .bind(task.idempotency_key.as_deref())
        .bind(task.created_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(task);
        }

        let key = task.idempotency_key.as_deref().unwrap_or_default();
        self.find_by_idempotency_key(key).await?.ok_or_else(|| {
            RepositoryError::NotFound(format!("escalation task with idempotency key `{key}`"))
        })
    }

    async fn find_by_id(
        &self,
        id: &EscalationTaskId,
    ) -> Result<Option<EscalationTask>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM escalation_task WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await?;

        row.map(task_from_row).transpose()
    }

    async fn try_assign(
        &self,
        id: &EscalationTaskId,
        operator: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE escalation_task
             SET assigned_to = ?, assigned_at = ?, status = 'in_progress', updated_at = ?
             WHERE id = ? AND assigned_to IS NULL AND status = 'open'",
        )
        .bind(operator)
        .bind(now.to_rfc3339())
        .bind(now.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_resolved(&self, task: &EscalationTask) -> Result<bool, RepositoryError> {
        let result = sqlx::query(
            "UPDATE escalation_task
             SET status = 'resolved',
                 resolution_outcome = ?,
                 resolution_notes = ?,
                 resolved_by = ?,
                 resolved_at = ?,
                 updated_at = ?
             WHERE id = ? AND status <> 'resolved'",
        )
        .bind(task.resolution_outcome.map(|outcome| outcome.as_str()))
        .bind(task.resolution_notes.as_deref())
        .bind(task.resolved_by.as_deref())
        .bind(task.resolved_at.map(|value| value.to_rfc3339()))
        .bind(task.updated_at.to_rfc3339())
        .bind(&task.id.0)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn list_unresolved(&self) -> Result<Vec<EscalationTask>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM escalation_task
             WHERE status <> 'resolved'
             ORDER BY sla_due_at ASC, created_at ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(task_from_row).collect()
    }

    async fn append_transition(
        &self,
        transition: EscalationTransition,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO escalation_transition_audit (
                id, task_id, from_status, to_status, actor, note, occurred_at
             ) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&transition.id)
        .bind(&transition.task_id.0)
        .bind(transition.from_status.as_ref().map(EscalationStatus::as_str))
        .bind(transition.to_status.as_str())
        .bind(&transition.actor)
        .bind(transition.note.as_deref())
        .bind(transition.occurred_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_transitions(
        &self,
        task_id: &EscalationTaskId,
    ) -> Result<Vec<EscalationTransition>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, task_id, from_status, to_status, actor, note, occurred_at
             FROM escalation_transition_audit
             WHERE task_id = ?
             ORDER BY occurred_at ASC, rowid ASC",
        )
        .bind(&task_id.0)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(transition_from_row).collect()
    }
}

fn task_from_row(row: SqliteRow) -> Result<EscalationTask, RepositoryError> {
    let reason_codes_raw = row.try_get::<String, _>("reason_codes_json")?;
    let reason_codes = serde_json::from_str(&reason_codes_raw)
        .map_err(|error| RepositoryError::Decode(format!("reason_codes_json: {error}")))?;

    let resolution_outcome = row
        .try_get::<Option<String>, _>("resolution_outcome")?
        .map(|value| parse_label("resolution_outcome", value, ResolutionOutcome::parse))
        .transpose()?;

    Ok(EscalationTask {
        id: EscalationTaskId(row.try_get("id")?),
        episode_id: EpisodeId(row.try_get("episode_id")?),
        patient_id: PatientId(row.try_get("patient_id")?),
        interaction_id: row.try_get::<Option<String>, _>("interaction_id")?.map(InteractionId),
        severity: parse_label("severity", row.try_get("severity")?, Severity::parse)?,
        priority: parse_label("priority", row.try_get("priority")?, Priority::parse)?,
        reason_codes,
        summary: row.try_get("summary")?,
        status: parse_label("status", row.try_get("status")?, EscalationStatus::parse)?,
        assigned_to: row.try_get("assigned_to")?,
        assigned_at: parse_optional_timestamp("assigned_at", row.try_get("assigned_at")?)?,
        sla_due_at: parse_timestamp("sla_due_at", row.try_get("sla_due_at")?)?,
        resolution_outcome,
        resolution_notes: row.try_get("resolution_notes")?,
        resolved_by: row.try_get("resolved_by")?,
        resolved_at: parse_optional_timestamp("resolved_at", row.try_get("resolved_at")?)?,
        idempotency_key: row.try_get("idempotency_key")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
        updated_at: parse_timestamp("updated_at", row.try_get("updated_at")?)?,
    })
}

fn transition_from_row(row: SqliteRow) -> Result<EscalationTransition, RepositoryError> {
    let from_status = row
        .try_get::<Option<String>, _>("from_status")?
        .map(|value| parse_label("from_status", value, EscalationStatus::parse))
        .transpose()?;

    Ok(EscalationTransition {
        id: row.try_get("id")?,
        task_id: EscalationTaskId(row.try_get("task_id")?),
        from_status,
        to_status: parse_label("to_status", row.try_get("to_status")?, EscalationStatus::parse)?,
        actor: row.try_get("actor")?,
        note: row.try_get("note")?,
        occurred_at: parse_timestamp("occurred_at", row.try_get("occurred_at")?)?,
    })
}

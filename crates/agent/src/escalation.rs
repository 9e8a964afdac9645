//! Escalation task lifecycle: open, assign, resolve, and SLA reporting.
//!
//! Transitions are validated on the domain type first and then committed with a
//! conditional write, so two nurses racing for the same task cannot both win. Every
//! committed transition is appended to the task's audit trail. The trail is written
//! after the state change, so a failed trail write is logged and the committed
//! change is still reported.

use std::sync::Arc;

use carepath_core::domain::decision::Severity;
use carepath_core::domain::escalation::{
    AssignmentOutcome, EscalationStatus, EscalationTask, EscalationTaskId, EscalationTransition,
    NewEscalation, ResolutionOutcome,
};
use carepath_core::errors::{ApplicationError, DomainError};
use carepath_db::repositories::EscalationRepository;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

/// Deadline status of one task, computed at read time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SlaView {
    pub task_id: EscalationTaskId,
    pub severity: Severity,
    pub status: EscalationStatus,
    pub sla_due_at: DateTime<Utc>,
    pub breached: bool,
    pub minutes_remaining: i64,
}

impl SlaView {
    pub fn of(task: &EscalationTask, now: DateTime<Utc>) -> Self {
        Self {
            task_id: task.id.clone(),
            severity: task.severity,
            status: task.status,
            sla_due_at: task.sla_due_at,
            breached: task.is_sla_breached(now),
            minutes_remaining: task.minutes_remaining(now),
        }
    }
}

pub struct EscalationManager {
    repository: Arc<dyn EscalationRepository>,
}

impl EscalationManager {
    pub fn new(repository: Arc<dyn EscalationRepository>) -> Self {
        Self { repository }
    }

    /// Creates the task, or returns the existing one when its idempotency key was
    /// already used.
    pub async fn open(
        &self,
        new: NewEscalation,
        actor: &str,
        now: DateTime<Utc>,
    ) -> Result<EscalationTask, ApplicationError> {
        let candidate = EscalationTask::open(new, now);
        let candidate_id = candidate.id.clone();
        let stored = self.repository.create(candidate).await?;

        if stored.id != candidate_id {
            info!(
                event_name = "agent.escalation.replayed",
                task_id = %stored.id.0,
                "escalation already exists for this operation"
            );
            return Ok(stored);
        }

        self.record_transition(EscalationTransition::record(
            &stored.id,
            None,
            EscalationStatus::Open,
            actor,
            Some(stored.summary.clone()),
            now,
        ))
        .await;

        info!(
            event_name = "agent.escalation.opened",
            task_id = %stored.id.0,
            episode_id = %stored.episode_id.0,
            severity = stored.severity.as_str(),
            sla_due_at = %stored.sla_due_at.to_rfc3339(),
            "escalation task opened"
        );
        Ok(stored)
    }

    pub async fn assign(
        &self,
        id: &EscalationTaskId,
        operator: &str,
        now: DateTime<Utc>,
    ) -> Result<(EscalationTask, AssignmentOutcome), ApplicationError> {
        let mut task = self.find(id).await?;
        let previous = task.status;

        if let outcome @ AssignmentOutcome::AlreadyAssigned { .. } = task.assign(operator, now)? {
            return Ok((task, outcome));
        }

        if !self.repository.try_assign(id, operator.trim(), now).await? {
            // Another operator committed first.
            let current = self.find(id).await?;
            return match current.assigned_to.clone() {
                Some(assignee) => Ok((current, AssignmentOutcome::AlreadyAssigned { assignee })),
                None => Err(DomainError::InvalidEscalationTransition {
                    from: current.status,
                    to: EscalationStatus::InProgress,
                }
                .into()),
            };
        }

        self.record_transition(EscalationTransition::record(
            id,
            Some(previous),
            EscalationStatus::InProgress,
            operator.trim(),
            None,
            now,
        ))
        .await;

        info!(
            event_name = "agent.escalation.assigned",
            task_id = %id.0,
            assignee = operator.trim(),
            "escalation task assigned"
        );
        Ok((task, AssignmentOutcome::Assigned))
    }

    pub async fn resolve(
        &self,
        id: &EscalationTaskId,
        outcome: Option<ResolutionOutcome>,
        notes: &str,
        resolver: &str,
        now: DateTime<Utc>,
    ) -> Result<EscalationTask, ApplicationError> {
        let mut task = self.find(id).await?;
        let previous = task.status;
        task.resolve(outcome, notes, resolver, now)?;

        if !self.repository.mark_resolved(&task).await? {
            return Err(DomainError::InvalidEscalationTransition {
                from: EscalationStatus::Resolved,
                to: EscalationStatus::Resolved,
            }
            .into());
        }

        self.record_transition(EscalationTransition::record(
            id,
            Some(previous),
            EscalationStatus::Resolved,
            resolver.trim(),
            Some(notes.to_string()),
            now,
        ))
        .await;

        info!(
            event_name = "agent.escalation.resolved",
            task_id = %id.0,
            outcome = task.resolution_outcome.map(|outcome| outcome.as_str()).unwrap_or_default(),
            breached = task.resolved_at.is_some_and(|resolved| resolved > task.sla_due_at),
            "escalation task resolved"
        );
        Ok(task)
    }

    /// Unresolved tasks whose deadline has passed, earliest deadline first.
    pub async fn list_breached(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<EscalationTask>, ApplicationError> {
        let open = self.repository.list_unresolved().await?;
        Ok(open.into_iter().filter(|task| task.is_sla_breached(now)).collect())
    }

    pub async fn sla_view(
        &self,
        id: &EscalationTaskId,
        now: DateTime<Utc>,
    ) -> Result<SlaView, ApplicationError> {
        Ok(SlaView::of(&self.find(id).await?, now))
    }

    /// Deadline status of every unresolved task.
    pub async fn sla_report(&self, now: DateTime<Utc>) -> Result<Vec<SlaView>, ApplicationError> {
        let open = self.repository.list_unresolved().await?;
        Ok(open.iter().map(|task| SlaView::of(task, now)).collect())
    }

    pub async fn transitions(
        &self,
        id: &EscalationTaskId,
    ) -> Result<Vec<EscalationTransition>, ApplicationError> {
        Ok(self.repository.list_transitions(id).await?)
    }

    async fn record_transition(&self, transition: EscalationTransition) {
        let task_id = transition.task_id.0.clone();
        let to = transition.to_status;
        if let Err(failure) = self.repository.append_transition(transition).await {
            error!(
                event_name = "agent.escalation.trail_failed",
                task_id = %task_id,
                to_status = to.as_str(),
                error = %failure,
                "escalation transition committed but its audit row was not written"
            );
        }
    }

    async fn find(&self, id: &EscalationTaskId) -> Result<EscalationTask, ApplicationError> {
        self.repository
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApplicationError::NotFound(format!("escalation task `{}`", id.0)))
    }
}

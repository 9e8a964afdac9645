use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use carepath_core::domain::escalation::{
    EscalationStatus, EscalationTask, EscalationTaskId, EscalationTransition,
};
use carepath_core::domain::interaction::{
    AgentInteraction, AgentMessage, InteractionId, MessageId, NewMessage,
};
use carepath_core::domain::protocol::{EpisodeId, ProtocolAssignment};

use super::{EscalationRepository, InteractionRepository, ProtocolRepository, RepositoryError};

#[derive(Default)]
pub struct InMemoryProtocolRepository {
    assignments: RwLock<HashMap<String, ProtocolAssignment>>,
}

#[async_trait::async_trait]
impl ProtocolRepository for InMemoryProtocolRepository {
    async fn find_active(
        &self,
        episode_id: &EpisodeId,
    ) -> Result<Option<ProtocolAssignment>, RepositoryError> {
        let assignments = self.assignments.read().await;
        Ok(assignments.get(&episode_id.0).filter(|assignment| assignment.active).cloned())
    }

    async fn create_if_absent(
        &self,
        assignment: ProtocolAssignment,
    ) -> Result<ProtocolAssignment, RepositoryError> {
        let mut assignments = self.assignments.write().await;
        if let Some(existing) =
            assignments.get(&assignment.episode_id.0).filter(|existing| existing.active)
        {
            return Ok(existing.clone());
        }
        assignments.insert(assignment.episode_id.0.clone(), assignment.clone());
        Ok(assignment)
    }
}

struct Thread {
    interaction: AgentInteraction,
    messages: Vec<AgentMessage>,
}

#[derive(Default)]
pub struct InMemoryInteractionRepository {
    threads: RwLock<HashMap<String, Thread>>,
}

#[async_trait::async_trait]
impl InteractionRepository for InMemoryInteractionRepository {
    async fn create_interaction(&self, interaction: AgentInteraction) -> Result<(), RepositoryError> {
        let mut threads = self.threads.write().await;
        threads
            .entry(interaction.id.0.clone())
            .or_insert(Thread { interaction, messages: Vec::new() });
        Ok(())
    }

    async fn find_interaction(
        &self,
        id: &InteractionId,
    ) -> Result<Option<AgentInteraction>, RepositoryError> {
        let threads = self.threads.read().await;
        Ok(threads.get(&id.0).map(|thread| thread.interaction.clone()))
    }

    async fn append_message(
        &self,
        interaction_id: &InteractionId,
        message: NewMessage,
        now: DateTime<Utc>,
    ) -> Result<AgentMessage, RepositoryError> {
        // The write guard serialises appends, so numbering stays dense.
        let mut threads = self.threads.write().await;
        let thread = threads
            .get_mut(&interaction_id.0)
            .ok_or_else(|| RepositoryError::NotFound(format!("interaction `{}`", interaction_id.0)))?;

        let sequence_number =
            thread.messages.last().map(|last| last.sequence_number + 1).unwrap_or(1);
        let stored = AgentMessage {
            id: MessageId(format!("MSG-{}", Uuid::new_v4())),
            interaction_id: interaction_id.clone(),
            role: message.role,
            content: message.content,
            sequence_number,
            tool_metadata: message.tool_metadata,
            created_at: now,
        };
        thread.messages.push(stored.clone());
        thread.interaction.updated_at = now;
        Ok(stored)
    }

    async fn recent_messages(
        &self,
        interaction_id: &InteractionId,
        limit: usize,
    ) -> Result<Vec<AgentMessage>, RepositoryError> {
        let threads = self.threads.read().await;
        let Some(thread) = threads.get(&interaction_id.0) else {
            return Ok(Vec::new());
        };
        let skip = thread.messages.len().saturating_sub(limit);
        Ok(thread.messages[skip..].to_vec())
    }
}

#[derive(Default)]
pub struct InMemoryEscalationRepository {
    tasks: RwLock<HashMap<String, EscalationTask>>,
    transitions: RwLock<Vec<EscalationTransition>>,
}

#[async_trait::async_trait]
impl EscalationRepository for InMemoryEscalationRepository {
    async fn create(&self, task: EscalationTask) -> Result<EscalationTask, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        if let Some(key) = task.idempotency_key.as_deref() {
            if let Some(existing) =
                tasks.values().find(|stored| stored.idempotency_key.as_deref() == Some(key))
            {
                return Ok(existing.clone());
            }
        }
        tasks.insert(task.id.0.clone(), task.clone());
        Ok(task)
    }

    async fn find_by_id(
        &self,
        id: &EscalationTaskId,
    ) -> Result<Option<EscalationTask>, RepositoryError> {
        let tasks = self.tasks.read().await;
        Ok(tasks.get(&id.0).cloned())
    }

    async fn try_assign(
        &self,
        id: &EscalationTaskId,
        operator: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        let Some(task) = tasks.get_mut(&id.0) else {
            return Ok(false);
        };
        if task.assigned_to.is_some() || task.status != EscalationStatus::Open {
            return Ok(false);
        }
        task.assigned_to = Some(operator.to_string());
        task.assigned_at = Some(now);
        task.status = EscalationStatus::InProgress;
        task.updated_at = now;
        Ok(true)
    }

    async fn mark_resolved(&self, task: &EscalationTask) -> Result<bool, RepositoryError> {
        let mut tasks = self.tasks.write().await;
        let Some(stored) = tasks.get_mut(&task.id.0) else {
            return Ok(false);
        };
        if stored.status == EscalationStatus::Resolved {
            return Ok(false);
        }
        stored.status = EscalationStatus::Resolved;
        stored.resolution_outcome = task.resolution_outcome;
        stored.resolution_notes = task.resolution_notes.clone();
        stored.resolved_by = task.resolved_by.clone();
        stored.resolved_at = task.resolved_at;
        stored.updated_at = task.updated_at;
        Ok(true)
    }

    async fn list_unresolved(&self) -> Result<Vec<EscalationTask>, RepositoryError> {
        let tasks = self.tasks.read().await;
        let mut open: Vec<_> = tasks
            .values()
            .filter(|task| task.status != EscalationStatus::Resolved)
            .cloned()
            .collect();
        open.sort_by(|left, right| {
            left.sla_due_at.cmp(&right.sla_due_at).then(left.created_at.cmp(&right.created_at))
        });
        Ok(open)
    }

    async fn append_transition(
        &self,
        transition: EscalationTransition,
    ) -> Result<(), RepositoryError> {
        self.transitions.write().await.push(transition);
        Ok(())
    }

    async fn list_transitions(
        &self,
        task_id: &EscalationTaskId,
    ) -> Result<Vec<EscalationTransition>, RepositoryError> {
        let transitions = self.transitions.read().await;
        Ok(transitions.iter().filter(|transition| &transition.task_id == task_id).cloned().collect())
    }
}

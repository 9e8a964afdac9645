use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use carepath_core::domain::escalation::{EscalationTask, EscalationTaskId, EscalationTransition};
use carepath_core::domain::interaction::{
    AgentInteraction, AgentMessage, InteractionId, NewMessage,
};
use carepath_core::domain::protocol::{EpisodeId, ProtocolAssignment};
use carepath_core::errors::ApplicationError;

pub mod escalation;
pub mod interaction;
pub mod memory;
pub mod protocol;
mod rows;

pub use escalation::SqlEscalationRepository;
pub use interaction::SqlInteractionRepository;
pub use memory::{
    InMemoryEscalationRepository, InMemoryInteractionRepository, InMemoryProtocolRepository,
};
pub use protocol::SqlProtocolRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<RepositoryError> for ApplicationError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound(what) => ApplicationError::NotFound(what),
            other => ApplicationError::Persistence(other.to_string()),
        }
    }
}

#[async_trait]
pub trait ProtocolRepository: Send + Sync {
    async fn find_active(
        &self,
        episode_id: &EpisodeId,
    ) -> Result<Option<ProtocolAssignment>, RepositoryError>;

    /// Stores the assignment unless the episode already has an active one, and
    /// returns whichever assignment is active afterwards.
    async fn create_if_absent(
        &self,
        assignment: ProtocolAssignment,
    ) -> Result<ProtocolAssignment, RepositoryError>;
}

#[async_trait]
pub trait InteractionRepository: Send + Sync {
    async fn create_interaction(&self, interaction: AgentInteraction) -> Result<(), RepositoryError>;

    async fn find_interaction(
        &self,
        id: &InteractionId,
    ) -> Result<Option<AgentInteraction>, RepositoryError>;

    /// Appends a message and assigns it the next sequence number for the
    /// interaction. Numbering starts at 1 and never skips or repeats, including
    /// under concurrent appends.
    async fn append_message(
        &self,
        interaction_id: &InteractionId,
        message: NewMessage,
        now: DateTime<Utc>,
    ) -> Result<AgentMessage, RepositoryError>;

    /// The most recent `limit` messages, oldest first.
    async fn recent_messages(
        &self,
        interaction_id: &InteractionId,
        limit: usize,
    ) -> Result<Vec<AgentMessage>, RepositoryError>;
}

#[async_trait]
pub trait EscalationRepository: Send + Sync {
    /// Inserts the task. When another task already carries the same idempotency
    /// key, nothing is written and the existing task is returned.
    async fn create(&self, task: EscalationTask) -> Result<EscalationTask, RepositoryError>;

    async fn find_by_id(
        &self,
        id: &EscalationTaskId,
    ) -> Result<Option<EscalationTask>, RepositoryError>;

    /// Sets the assignee only while the task is open and unassigned. Returns
    /// whether this call won the assignment.
    async fn try_assign(
        &self,
        id: &EscalationTaskId,
        operator: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, RepositoryError>;

    /// Persists resolution fields for a task that is not yet resolved. Returns
    /// false when the stored task was already resolved.
    async fn mark_resolved(&self, task: &EscalationTask) -> Result<bool, RepositoryError>;

    async fn list_unresolved(&self) -> Result<Vec<EscalationTask>, RepositoryError>;

    async fn append_transition(
        &self,
        transition: EscalationTransition,
    ) -> Result<(), RepositoryError>;

    async fn list_transitions(
        &self,
        task_id: &EscalationTaskId,
    ) -> Result<Vec<EscalationTransition>, RepositoryError>;
}

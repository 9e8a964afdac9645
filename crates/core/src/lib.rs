pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod rules;

pub use audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink};
pub use domain::decision::{DecisionHint, Severity};
pub use domain::escalation::{
    AssignmentOutcome, EscalationStatus, EscalationTask, EscalationTaskId, EscalationTransition,
    NewEscalation, Priority, ResolutionOutcome,
};
pub use domain::interaction::{
    AgentInteraction, AgentMessage, ConversationTurn, InteractionId, MessageId, MessageRole,
    NewMessage,
};
pub use domain::protocol::{
    ConditionCode, EducationTier, EpisodeId, PatientId, ProtocolAssignment, ProtocolAssignmentId,
};
pub use domain::signal::SignalRecord;
pub use domain::tool::{ToolCall, ToolName, ToolResult};
pub use errors::{ApplicationError, DomainError, InterfaceError};
pub use rules::{ProtocolRules, RuleEvaluator};

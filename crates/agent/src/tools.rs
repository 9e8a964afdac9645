use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use carepath_core::domain::decision::Severity;
use carepath_core::domain::escalation::NewEscalation;
use carepath_core::domain::interaction::InteractionId;
use carepath_core::domain::protocol::{EpisodeId, PatientId};
use carepath_core::domain::tool::{ToolCall, ToolName, ToolResult};
use chrono::{DateTime, Utc};
use tracing::{error, warn};

use crate::escalation::EscalationManager;

/// Where a tool call came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolContext {
    pub patient_id: PatientId,
    pub episode_id: EpisodeId,
    pub interaction_id: InteractionId,
    /// Sequence number of the patient message that started the turn.
    pub turn_sequence: u32,
    pub patient_text: String,
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> ToolName;

    /// Returns the id of any entity the call created.
    async fn execute(&self, call: &ToolCall, context: &ToolContext) -> Result<Option<String>>;
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Box<dyn Tool>>,
}

impl ToolRegistry {
    /// The four tools the response composer may request.
    pub fn standard(escalations: Arc<EscalationManager>) -> Self {
        let mut registry = Self::default();
        registry.register(RaiseFlagTool::new(escalations.clone()));
        registry.register(HandoffToNurseTool::new(escalations));
        registry.register(LogCheckinTool);
        registry.register(AskMoreTool);
        registry
    }

    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.tools.insert(tool.name().as_str().to_string(), Box::new(tool));
    }

    pub fn get(&self, name: &str) -> Option<&dyn Tool> {
        self.tools.get(name).map(|tool| &**tool)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

pub struct RaiseFlagTool {
    escalations: Arc<EscalationManager>,
}

impl RaiseFlagTool {
    pub fn new(escalations: Arc<EscalationManager>) -> Self {
        Self { escalations }
    }
}

#[async_trait]
impl Tool for RaiseFlagTool {
    fn name(&self) -> ToolName {
        ToolName::RaiseFlag
    }

    async fn execute(&self, call: &ToolCall, context: &ToolContext) -> Result<Option<String>> {
        // Labels outside the scale get the longest deadline.
        let severity = call.str_param("severity").and_then(Severity::parse).unwrap_or(Severity::Low);
        let task = self
            .escalations
            .open(escalation_for(call, context, severity), "agent", context.now)
            .await?;
        Ok(Some(task.id.0))
    }
}

/// Always critical, whatever severity the caller passed.
pub struct HandoffToNurseTool {
    escalations: Arc<EscalationManager>,
}

impl HandoffToNurseTool {
    pub fn new(escalations: Arc<EscalationManager>) -> Self {
        Self { escalations }
    }
}

#[async_trait]
impl Tool for HandoffToNurseTool {
    fn name(&self) -> ToolName {
        ToolName::HandoffToNurse
    }

    async fn execute(&self, call: &ToolCall, context: &ToolContext) -> Result<Option<String>> {
        let mut new = escalation_for(call, context, Severity::Critical);
        if new.reason_codes.is_empty() {
            new.reason_codes.push("NURSE_HANDOFF".to_string());
        }
        let task = self.escalations.open(new, "agent", context.now).await?;
        Ok(Some(task.id.0))
    }
}

pub struct LogCheckinTool;

#[async_trait]
impl Tool for LogCheckinTool {
    fn name(&self) -> ToolName {
        ToolName::LogCheckin
    }

    async fn execute(&self, _call: &ToolCall, _context: &ToolContext) -> Result<Option<String>> {
        Ok(None)
    }
}

pub struct AskMoreTool;

#[async_trait]
impl Tool for AskMoreTool {
    fn name(&self) -> ToolName {
        ToolName::AskMore
    }

    async fn execute(&self, _call: &ToolCall, _context: &ToolContext) -> Result<Option<String>> {
        Ok(None)
    }
}

fn escalation_for(call: &ToolCall, context: &ToolContext, severity: Severity) -> NewEscalation {
    let mut reason_codes = Vec::new();
    if let Some(flag_type) = call.str_param("flag_type") {
        reason_codes.push(flag_type.to_string());
    }
    for code in call.list_param("reason_codes") {
        if !reason_codes.contains(&code) {
            reason_codes.push(code);
        }
    }

    NewEscalation {
        episode_id: context.episode_id.clone(),
        patient_id: context.patient_id.clone(),
        interaction_id: Some(context.interaction_id.clone()),
        severity,
        reason_codes,
        summary: call
            .str_param("reason")
            .or_else(|| call.str_param("summary"))
            .unwrap_or(context.patient_text.as_str())
            .to_string(),
        idempotency_key: Some(call.operation_key(&context.interaction_id.0, context.turn_sequence)),
    }
}

/// Runs committed tool calls one after another. A failing call yields a failed
/// result and the remaining calls still run.
pub struct ToolDispatcher {
    registry: ToolRegistry,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, calls: &[ToolCall], context: &ToolContext) -> Vec<ToolResult> {
        let mut results = Vec::with_capacity(calls.len());

        for call in calls {
            let Some(tool) = self.registry.get(&call.name) else {
                warn!(
                    event_name = "agent.tools.unknown",
                    tool = %call.name,
                    interaction_id = %context.interaction_id.0,
                    "tool call outside the vocabulary"
                );
                results.push(ToolResult::failed(&call.name, format!("unknown tool `{}`", call.name)));
                continue;
            };

            match tool.execute(call, context).await {
                Ok(entity_id) => results.push(ToolResult::ok(&call.name, entity_id)),
                Err(failure) => {
                    error!(
                        event_name = "agent.tools.dispatch_failed",
                        tool = %call.name,
                        episode_id = %context.episode_id.0,
                        interaction_id = %context.interaction_id.0,
                        error = %failure,
                        "tool call failed"
                    );
                    results.push(ToolResult::failed(&call.name, failure.to_string()));
                }
            }
        }

        results
    }
}

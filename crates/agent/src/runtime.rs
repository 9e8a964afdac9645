use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use carepath_core::audit::{AuditCategory, AuditContext, AuditOutcome, AuditSink};
use carepath_core::config::AppConfig;
use carepath_core::domain::decision::DecisionHint;
use carepath_core::domain::interaction::{AgentInteraction, InteractionId};
use carepath_core::domain::protocol::{ConditionCode, EpisodeId, PatientId};
use carepath_core::domain::signal::ExtractionSource;
use carepath_core::domain::tool::ToolResult;
use carepath_core::errors::ApplicationError;
use carepath_core::rules::RuleEvaluator;
use carepath_db::repositories::{
    EscalationRepository, InMemoryEscalationRepository, InMemoryInteractionRepository,
    InMemoryProtocolRepository, InteractionRepository, ProtocolRepository,
    SqlEscalationRepository, SqlInteractionRepository, SqlProtocolRepository,
};
use carepath_db::DbPool;
use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::composer::{CompositionContext, LlmResponseComposer};
use crate::escalation::EscalationManager;
use crate::extraction::{
    ExtractionRequest, FallbackExtractor, FallbackPolicy, LlmSignalExtractor,
};
use crate::guardrails::GuardrailPolicy;
use crate::keywords::KeywordExtractor;
use crate::llm::LlmClient;
use crate::protocol::ProtocolAccessor;
use crate::recorder::InteractionRecorder;
use crate::tools::{ToolContext, ToolDispatcher, ToolRegistry};

/// Storage handles the engine runs against.
#[derive(Clone)]
pub struct Repositories {
    pub protocols: Arc<dyn ProtocolRepository>,
    pub interactions: Arc<dyn InteractionRepository>,
    pub escalations: Arc<dyn EscalationRepository>,
}

impl Repositories {
    pub fn sql(pool: DbPool) -> Self {
        Self {
            protocols: Arc::new(SqlProtocolRepository::new(pool.clone())),
            interactions: Arc::new(SqlInteractionRepository::new(pool.clone())),
            escalations: Arc::new(SqlEscalationRepository::new(pool)),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            protocols: Arc::new(InMemoryProtocolRepository::default()),
            interactions: Arc::new(InMemoryInteractionRepository::default()),
            escalations: Arc::new(InMemoryEscalationRepository::default()),
        }
    }
}

/// One patient utterance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TurnRequest {
    pub patient_id: PatientId,
    pub episode_id: EpisodeId,
    pub text: String,
    /// Only consulted when the episode has no protocol yet.
    pub condition_code: Option<String>,
    pub interaction_id: Option<InteractionId>,
    pub correlation_id: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub reply_text: String,
    pub decision_hint: DecisionHint,
    pub tool_results: Vec<ToolResult>,
    pub interaction_id: InteractionId,
}

/// Runs a turn through protocol lookup, extraction, evaluation, composition,
/// dispatch and recording. Steps are sequential and share no transaction.
pub struct TurnEngine {
    protocols: ProtocolAccessor,
    extractor: FallbackExtractor,
    evaluator: RuleEvaluator,
    composer: LlmResponseComposer,
    dispatcher: ToolDispatcher,
    recorder: InteractionRecorder,
    escalations: Arc<EscalationManager>,
    audit: Arc<dyn AuditSink>,
}

impl TurnEngine {
    pub fn build(
        config: &AppConfig,
        repositories: &Repositories,
        client: Arc<dyn LlmClient>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let escalations = Arc::new(EscalationManager::new(repositories.escalations.clone()));
        let extractor = FallbackExtractor::new(
            Arc::new(LlmSignalExtractor::new(client.clone())),
            KeywordExtractor::new()?,
            FallbackPolicy::from_config(&config.engine, &config.llm),
        );

        Ok(Self {
            protocols: ProtocolAccessor::new(
                repositories.protocols.clone(),
                config.engine.default_education_tier,
            ),
            extractor,
            evaluator: RuleEvaluator::new(),
            composer: LlmResponseComposer::new(
                client,
                GuardrailPolicy::default(),
                Duration::from_millis(config.engine.composition_timeout_ms),
            ),
            dispatcher: ToolDispatcher::new(ToolRegistry::standard(escalations.clone())),
            recorder: InteractionRecorder::new(
                repositories.interactions.clone(),
                config.engine.history_window,
            ),
            escalations,
            audit,
        })
    }

    pub fn escalations(&self) -> Arc<EscalationManager> {
        self.escalations.clone()
    }

    pub async fn handle_turn(&self, request: TurnRequest) -> Result<TurnOutcome, ApplicationError> {
        let now = Utc::now();
        let correlation_id =
            request.correlation_id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
        let condition = request.condition_code.as_deref().and_then(ConditionCode::parse);

        let protocol = self.protocols.load_or_create(&request.episode_id, condition, now).await?;
        let mut log_degraded = false;
        let interaction = match self
            .recorder
            .open(&request.patient_id, &request.episode_id, request.interaction_id.as_ref(), now)
            .await
        {
            Ok(interaction) => interaction,
            // A new thread that cannot be stored still gets an answer; a named
            // thread that does not exist is the caller's mistake.
            Err(ApplicationError::Persistence(failure)) if request.interaction_id.is_none() => {
                error!(
                    event_name = "agent.turn.record_failed",
                    correlation_id = %correlation_id,
                    episode_id = %request.episode_id.0,
                    stage = "open",
                    error = %failure,
                    "interaction could not be stored"
                );
                log_degraded = true;
                AgentInteraction::start(request.patient_id.clone(), request.episode_id.clone(), now)
            }
            Err(other) => return Err(other),
        };
        let audit = AuditContext::new(
            Some(request.episode_id.clone()),
            Some(interaction.id.clone()),
            correlation_id.clone(),
            "agent",
        );

        // History is read before the new message so it holds prior turns only.
        let history = match self.recorder.history(&interaction.id).await {
            Ok(history) => history,
            Err(failure) => {
                warn!(
                    event_name = "agent.turn.history_unavailable",
                    correlation_id = %correlation_id,
                    interaction_id = %interaction.id.0,
                    error = %failure,
                    "continuing without conversation history"
                );
                log_degraded = true;
                Vec::new()
            }
        };
        let turn_sequence =
            match self.recorder.record_patient(&interaction.id, &request.text, now).await {
                Ok(message) => message.sequence_number,
                Err(failure) => {
                    error!(
                        event_name = "agent.turn.record_failed",
                        correlation_id = %correlation_id,
                        interaction_id = %interaction.id.0,
                        stage = "patient_message",
                        error = %failure,
                        "patient message could not be recorded"
                    );
                    log_degraded = true;
                    detached_turn_sequence(&correlation_id)
                }
            };

        let signal = self
            .extractor
            .extract(&ExtractionRequest {
                text: request.text.clone(),
                condition: protocol.assignment.condition_code,
                tier: protocol.assignment.education_tier,
                history: history.clone(),
                patterns: protocol.rules.patterns.clone(),
            })
            .await;
        self.audit.emit(
            audit
                .event(
                    "extraction.completed",
                    AuditCategory::Extraction,
                    match signal.source {
                        ExtractionSource::Collaborator => AuditOutcome::Success,
                        ExtractionSource::Fallback => AuditOutcome::Degraded,
                    },
                )
                .with_metadata("symptoms", signal.symptoms.join(","))
                .with_metadata("severity", signal.severity.as_str()),
        );

        let evaluation = self.evaluator.evaluate_traced(&protocol.rules, &signal);
        let hint = evaluation.hint;
        let mut decided = audit
            .event("decision.evaluated", AuditCategory::Decision, AuditOutcome::Success)
            .with_metadata("hint", hint.kind());
        if let Some(rule) = evaluation.matched_rule {
            decided = decided.with_metadata("rule", format!("{}[{}]", rule.section, rule.index));
        }
        self.audit.emit(decided);

        let composed = self
            .composer
            .compose(&CompositionContext {
                condition: protocol.assignment.condition_code,
                tier: protocol.assignment.education_tier,
                patient_text: &request.text,
                hint: &hint,
                history: &history,
            })
            .await;

        let tool_results = self
            .dispatcher
            .dispatch(
                &composed.tool_calls,
                &ToolContext {
                    patient_id: request.patient_id.clone(),
                    episode_id: request.episode_id.clone(),
                    interaction_id: interaction.id.clone(),
                    turn_sequence,
                    patient_text: request.text.clone(),
                    now,
                },
            )
            .await;
        for result in &tool_results {
            let outcome = if result.success { AuditOutcome::Success } else { AuditOutcome::Failed };
            let mut event = audit
                .event("tool.dispatched", AuditCategory::Dispatch, outcome)
                .with_metadata("tool", result.tool.as_str());
            if let Some(entity_id) = &result.entity_id {
                event = event.with_metadata("entity_id", entity_id.as_str());
            }
            if let Some(failure) = &result.error {
                event = event.with_metadata("error", failure.as_str());
            }
            self.audit.emit(event);
        }

        let metadata = json!({
            "decision_hint": &hint,
            "signal": &signal,
            "composition": composed.path,
            "tool_calls": &composed.tool_calls,
            "tool_results": &tool_results,
        });
        if let Err(failure) =
            self.recorder.record_agent(&interaction.id, &composed.text, metadata, now).await
        {
            // The reply and any escalation already exist; the patient still gets them.
            error!(
                event_name = "agent.turn.record_failed",
                correlation_id = %correlation_id,
                interaction_id = %interaction.id.0,
                stage = "agent_message",
                error = %failure,
                "agent reply could not be recorded"
            );
            log_degraded = true;
        }

        info!(
            event_name = "agent.turn.completed",
            correlation_id = %correlation_id,
            episode_id = %request.episode_id.0,
            interaction_id = %interaction.id.0,
            hint = hint.kind(),
            composition = composed.path.as_str(),
            extraction = ?signal.source,
            tools = tool_results.len(),
            log_degraded,
            "turn handled"
        );
        let completion = if log_degraded { AuditOutcome::Degraded } else { AuditOutcome::Success };
        self.audit.emit(
            audit
                .event("turn.completed", AuditCategory::Turn, completion)
                .with_metadata("composition", composed.path.as_str()),
        );

        Ok(TurnOutcome {
            reply_text: composed.text,
            decision_hint: hint,
            tool_results,
            interaction_id: interaction.id,
        })
    }
}

/// Stands in for the patient message's sequence number when the message could
/// not be stored, so tool operation keys stay stable for a replayed request.
/// The high bit keeps it apart from numbers issued by storage.
fn detached_turn_sequence(correlation_id: &str) -> u32 {
    let digest = blake3::hash(correlation_id.as_bytes());
    let bytes = digest.as_bytes();
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) | 0x8000_0000
}

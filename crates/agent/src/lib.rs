//! Agent Runtime - per-turn orchestration for post-discharge check-ins
//!
//! A patient message moves through a fixed sequence:
//! 1. **Protocol** (`protocol`) - load or create the episode's rule set
//! 2. **Extraction** (`extraction`, `keywords`) - free text to a `SignalRecord`,
//!    falling back to the keyword extractor when the collaborator fails
//! 3. **Evaluation** - deterministic rules produce a `DecisionHint`
//! 4. **Composition** (`composer`, `guardrails`) - forced replies for flags,
//!    generated replies otherwise
//! 5. **Dispatch** (`tools`, `escalation`) - tool calls open escalation tasks
//! 6. **Recording** (`recorder`) - both sides of the turn are appended
//!
//! # Safety Principle
//!
//! The language model never decides severity or escalation. Flags always take
//! the forced path; the model only phrases replies for closes and follow-ups.

pub mod composer;
pub mod escalation;
pub mod extraction;
pub mod guardrails;
pub mod keywords;
pub mod llm;
pub mod protocol;
pub mod recorder;
pub mod runtime;
pub mod tools;

pub use escalation::{EscalationManager, SlaView};
pub use llm::{build_client, LlmClient};
pub use runtime::{Repositories, TurnEngine, TurnOutcome, TurnRequest};

pub mod dsl;
pub mod evaluator;
pub mod patterns;
pub mod templates;

pub use dsl::{
    BooleanCheck, ClosureRule, Comparison, FlagDescriptor, NumericField, Predicate,
    ProtocolRules, RedFlagRule, RuleError, RuleSection,
};
pub use evaluator::{Evaluation, RuleEvaluator, RuleRef, GENERIC_QUESTIONS};
pub use patterns::{match_patterns, validate_selection, ProtocolPattern};
pub use templates::template_for;

pub mod decision;
pub mod escalation;
pub mod interaction;
pub mod protocol;
pub mod signal;
pub mod tool;

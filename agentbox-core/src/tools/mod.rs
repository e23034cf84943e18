//! Tool façade and external collaborator interfaces.
//!
//! [`TerminalTool`] exposes the sandbox to the rest of the system as four
//! JSON operations. The [`PolicyEngine`] and [`ToolExecutionRepository`]
//! collaborators are consumed as trait interfaces only; their absence never
//! changes the pass/fail semantics of the sandbox itself.

mod policy;
mod terminal_tool;

pub use policy::{
    PolicyDecision, PolicyEngine, PolicyEvaluation, RiskLevel, ToolExecutionRecord,
    ToolExecutionRepository,
};
pub use terminal_tool::{TerminalTool, TerminalToolLimits};

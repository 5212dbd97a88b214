//! Workflow definition model and discovery.

pub mod loader;
pub mod workflow;

pub use loader::{WorkflowLoader, WorkflowSummary};
pub use workflow::{FailurePolicy, StepAction, StepDefinition, WorkflowDefinition};

//! The workflow orchestration engine.
//!
//! A workflow is a linear program: steps execute strictly in declared
//! order, data flows forward through the variable store, and the ledger
//! of step outcomes flows backward into later steps' conditions.

pub mod dispatch;
pub mod expression;
pub mod git_context;
pub mod progress;
pub mod retry;
pub mod runner;
pub mod variables;

pub use dispatch::{StepAttempt, StepDispatcher, StepFailure, PASS_MARKER};
pub use git_context::GitContext;
pub use progress::{ConsoleProgress, NullProgress, ProgressSink};
pub use runner::WorkflowRunner;
pub use variables::VariableStore;

use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Final outcome of one step. The ledger keeps exactly one of these per
/// step id, reflecting the last dispatch attempt.
#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub id: String,
    pub passed: bool,
    pub output: String,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl StepResult {
    /// A step whose condition evaluated false. Skipped steps never block
    /// success and capture nothing.
    pub fn skipped(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            passed: true,
            output: String::new(),
            skipped: true,
            failure_reason: None,
        }
    }
}

/// Aggregate result of one run. Always produced; the runner never
/// surfaces business-logic failures as errors.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRunResult {
    pub workflow_name: String,
    pub passed: bool,
    pub steps: Vec<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted_at: Option<String>,
}

/// Cooperative cancellation, checked once per step-loop iteration.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

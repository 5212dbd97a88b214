//! Progress reporting for workflow runs.
//!
//! The sink is write-only: the engine pushes ordered, human-readable
//! events into it and never reads anything back.

use super::{StepResult, WorkflowRunResult};
use crate::config::StepDefinition;
use std::io::Write;

pub trait ProgressSink: Send + Sync {
    /// A step is about to be dispatched.
    fn step_started(&self, index: usize, total: usize, step: &StepDefinition);

    /// A streamed chunk of model output, forwarded as it arrives.
    fn chunk(&self, text: &str);

    /// A failed attempt is about to be retried.
    fn retrying(&self, step_id: &str, attempt: u32, max_attempts: u32);

    /// A step reached its final state (passed, failed, or skipped).
    fn step_finished(&self, result: &StepResult);

    /// The run concluded.
    fn run_finished(&self, result: &WorkflowRunResult);
}

/// Plain line-oriented console output.
pub struct ConsoleProgress;

impl ProgressSink for ConsoleProgress {
    fn step_started(&self, index: usize, total: usize, step: &StepDefinition) {
        let label = step.description.as_deref().unwrap_or(&step.id);
        println!("🔄 [{}/{}] {}", index + 1, total, label);
    }

    fn chunk(&self, text: &str) {
        print!("{text}");
        std::io::stdout().flush().ok();
    }

    fn retrying(&self, step_id: &str, attempt: u32, max_attempts: u32) {
        println!("⏳ Retrying {step_id} (attempt {attempt}/{max_attempts})");
    }

    fn step_finished(&self, result: &StepResult) {
        if result.skipped {
            println!("⏭  {} skipped", result.id);
        } else if result.passed {
            println!("✅ {} passed", result.id);
        } else {
            let reason = result.failure_reason.as_deref().unwrap_or("failed");
            eprintln!("❌ {} failed: {}", result.id, reason);
        }
    }

    fn run_finished(&self, result: &WorkflowRunResult) {
        match &result.aborted_at {
            Some(step_id) => eprintln!(
                "❌ Workflow '{}' aborted at step '{}'",
                result.workflow_name, step_id
            ),
            None if result.passed => {
                println!("✅ Workflow '{}' completed", result.workflow_name)
            }
            None => println!(
                "⚠️  Workflow '{}' completed with failures",
                result.workflow_name
            ),
        }
    }
}

/// Discards everything. Used in tests and embedding contexts that render
/// results themselves.
pub struct NullProgress;

impl ProgressSink for NullProgress {
    fn step_started(&self, _index: usize, _total: usize, _step: &StepDefinition) {}
    fn chunk(&self, _text: &str) {}
    fn retrying(&self, _step_id: &str, _attempt: u32, _max_attempts: u32) {}
    fn step_finished(&self, _result: &StepResult) {}
    fn run_finished(&self, _result: &WorkflowRunResult) {}
}

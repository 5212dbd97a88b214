//! The workflow runner: sequential step execution with conditions,
//! retries, failure policies, and output capture.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use super::dispatch::StepDispatcher;
use super::expression::{self, StepFlags};
use super::git_context::GitContext;
use super::progress::ProgressSink;
use super::retry;
use super::variables::VariableStore;
use super::{CancelFlag, StepResult, WorkflowRunResult};
use crate::config::WorkflowDefinition;
use crate::library::DocumentLibrary;
use crate::llm::ChatClient;
use crate::subprocess::SubprocessManager;

/// Owns the variable store and outcome ledger for the duration of one
/// run. Concurrent runs need one runner instance each.
pub struct WorkflowRunner {
    dispatcher: StepDispatcher,
    git: GitContext,
    sink: Arc<dyn ProgressSink>,
    cancel: CancelFlag,
}

impl WorkflowRunner {
    pub fn new(
        subprocess: SubprocessManager,
        library: DocumentLibrary,
        chat: Arc<dyn ChatClient>,
        workdir: PathBuf,
        sink: Arc<dyn ProgressSink>,
        cancel: CancelFlag,
    ) -> Self {
        let git = GitContext::new(subprocess.clone(), workdir);
        let dispatcher = StepDispatcher::new(subprocess, library, chat, git.clone());
        Self {
            dispatcher,
            git,
            sink,
            cancel,
        }
    }

    pub async fn run(&self, definition: &WorkflowDefinition) -> WorkflowRunResult {
        let workflow_name = definition.name.clone().unwrap_or_default();
        tracing::info!("Running workflow '{workflow_name}'");

        let mut store = VariableStore::new();
        self.git.seed(&mut store).await;

        let mut ledger: HashMap<String, StepFlags> = HashMap::new();
        let mut results: Vec<StepResult> = Vec::new();
        let mut aborted_at: Option<String> = None;
        let total = definition.steps.len();

        for (index, step) in definition.steps.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!("Run cancelled before step '{}'", step.id);
                break;
            }

            if let Some(condition) = &step.condition {
                match expression::evaluate(condition, &|id| ledger.get(id).copied()) {
                    Ok(true) => {}
                    Ok(false) => {
                        let result = StepResult::skipped(&step.id);
                        self.sink.step_finished(&result);
                        Self::record(&mut ledger, &mut results, result);
                        continue;
                    }
                    Err(e) => {
                        let result = StepResult {
                            id: step.id.clone(),
                            passed: false,
                            output: String::new(),
                            skipped: false,
                            failure_reason: Some(e.to_string()),
                        };
                        self.sink.step_finished(&result);
                        Self::record(&mut ledger, &mut results, result);
                        if step.on_failure.aborts_run() {
                            aborted_at = Some(step.id.clone());
                            break;
                        }
                        continue;
                    }
                }
            }

            self.sink.step_started(index, total, step);

            let attempt = retry::run_with_retry(
                &step.id,
                step.on_failure.max_attempts(),
                self.sink.as_ref(),
                || self.dispatcher.dispatch(step, &store, self.sink.as_ref()),
            )
            .await;

            let result = StepResult {
                id: step.id.clone(),
                passed: attempt.passed,
                output: attempt.output,
                skipped: false,
                failure_reason: attempt.failure.map(|f| f.to_string()),
            };

            // Capture after the final attempt, pass or fail, so later
            // steps can branch on observed output.
            if let Some(name) = &step.capture_as {
                if !result.output.is_empty() {
                    store.set(name.clone(), result.output.clone());
                }
            }

            self.sink.step_finished(&result);
            let failed = !result.passed;
            Self::record(&mut ledger, &mut results, result);

            if failed && step.on_failure.aborts_run() {
                aborted_at = Some(step.id.clone());
                break;
            }
        }

        let passed = results.iter().all(|r| r.passed);
        let run_result = WorkflowRunResult {
            workflow_name,
            passed,
            steps: results,
            aborted_at,
        };
        self.sink.run_finished(&run_result);
        run_result
    }

    fn record(
        ledger: &mut HashMap<String, StepFlags>,
        results: &mut Vec<StepResult>,
        result: StepResult,
    ) {
        ledger.insert(
            result.id.clone(),
            StepFlags {
                passed: result.passed,
                skipped: result.skipped,
            },
        );
        results.push(result);
    }
}

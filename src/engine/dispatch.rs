//! Step dispatch: input resolution, the three step kinds, and outcome
//! judging.

use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;

use super::git_context::GitContext;
use super::progress::ProgressSink;
use super::variables::VariableStore;
use crate::config::{StepAction, StepDefinition};
use crate::library::{DocumentKind, DocumentLibrary};
use crate::llm::{ChatClient, ChatError, ChatRequest};
use crate::subprocess::{ProcessCommandBuilder, SubprocessManager};

/// Marker an agent is instructed to end its response with.
pub const PASS_MARKER: &str = "[PASS]";
pub const FAIL_MARKER: &str = "[FAIL]";

const MAX_REASON_LEN: usize = 200;

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone)]
pub struct StepAttempt {
    pub passed: bool,
    pub output: String,
    pub failure: Option<StepFailure>,
}

impl StepAttempt {
    fn pass(output: String) -> Self {
        Self {
            passed: true,
            output,
            failure: None,
        }
    }

    fn fail(output: String, failure: StepFailure) -> Self {
        Self {
            passed: false,
            output,
            failure: Some(failure),
        }
    }
}

/// Failure classification. Configuration problems and a missing model
/// are final; execution and expectation failures may be retried.
#[derive(Debug, Clone)]
pub enum StepFailure {
    Config(String),
    NoModel,
    Execution(String),
    Expectation(String),
}

impl StepFailure {
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepFailure::Execution(_) | StepFailure::Expectation(_))
    }
}

impl std::fmt::Display for StepFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepFailure::Config(msg) => write!(f, "{msg}"),
            StepFailure::NoModel => write!(f, "no model available"),
            StepFailure::Execution(msg) => write!(f, "{msg}"),
            StepFailure::Expectation(msg) => write!(f, "{msg}"),
        }
    }
}

/// Dispatches one step definition to the matching executor.
pub struct StepDispatcher {
    subprocess: SubprocessManager,
    library: DocumentLibrary,
    chat: Arc<dyn ChatClient>,
    git: GitContext,
}

impl StepDispatcher {
    pub fn new(
        subprocess: SubprocessManager,
        library: DocumentLibrary,
        chat: Arc<dyn ChatClient>,
        git: GitContext,
    ) -> Self {
        Self {
            subprocess,
            library,
            chat,
            git,
        }
    }

    pub async fn dispatch(
        &self,
        step: &StepDefinition,
        store: &VariableStore,
        sink: &dyn ProgressSink,
    ) -> StepAttempt {
        let input = match self.resolve_input(step, store).await {
            Ok(input) => input,
            Err(failure) => return StepAttempt::fail(String::new(), failure),
        };

        match step.action() {
            Some(StepAction::Agent(name)) => self.run_agent(step, name, input, sink).await,
            Some(StepAction::Prompt(name)) => self.run_prompt(step, name, input, store, sink).await,
            Some(StepAction::Shell(command)) => self.run_shell(step, command, store).await,
            None => StepAttempt::fail(
                String::new(),
                StepFailure::Config(format!("step '{}' declares no runnable action", step.id)),
            ),
        }
    }

    /// Resolve the step's declared input: an exact `{{var}}` reference,
    /// a built-in source, or literal text with interpolation.
    async fn resolve_input(
        &self,
        step: &StepDefinition,
        store: &VariableStore,
    ) -> Result<String, StepFailure> {
        let Some(input) = &step.input else {
            return Ok(String::new());
        };

        if let Some(name) = VariableStore::exact_reference(input) {
            return Ok(store.get(name).unwrap_or_default().to_string());
        }

        match input.as_str() {
            "git_diff_staged" => self.resolve_staged_diff().await,
            "git_diff_last_commit" => Ok(self.builtin_source(&["diff", "HEAD~1", "HEAD"], input).await),
            "commit_message_last" => Ok(self.builtin_source(&["log", "-1", "--pretty=%B"], input).await),
            _ => Ok(store.interpolate(input)),
        }
    }

    async fn builtin_source(&self, args: &[&str], name: &str) -> String {
        match self.git.capture(args).await {
            Ok(output) => output,
            Err(e) => {
                tracing::warn!("Builtin input source {name} failed: {e}");
                format!("(failed to read {name}: {e})")
            }
        }
    }

    /// `git_diff_staged` with one auto-staging remediation: an empty
    /// staged diff triggers `git add -u` and a single re-resolution.
    async fn resolve_staged_diff(&self) -> Result<String, StepFailure> {
        let diff = self.builtin_source(&["diff", "--cached"], "git_diff_staged").await;
        if !diff.is_empty() {
            return Ok(diff);
        }

        tracing::debug!("Staged diff empty, staging tracked modifications");
        self.git.stage_tracked().await;

        let diff = self.builtin_source(&["diff", "--cached"], "git_diff_staged").await;
        if diff.is_empty() {
            Err(StepFailure::Execution("no changes to stage".to_string()))
        } else {
            Ok(diff)
        }
    }

    async fn run_agent(
        &self,
        step: &StepDefinition,
        name: &str,
        input: String,
        sink: &dyn ProgressSink,
    ) -> StepAttempt {
        let Some(doc) = self.library.resolve(DocumentKind::Agent, name).await else {
            return StepAttempt::fail(
                String::new(),
                StepFailure::Config(format!("agent document not found: {name}")),
            );
        };

        let system = format!(
            "{}\n\nEnd your response with {PASS_MARKER} if the work passes review, or {FAIL_MARKER} if it does not.",
            doc.body
        );
        let request = ChatRequest {
            system,
            user: input,
            model_hint: doc.model_hint,
        };

        let output = match self.stream_chat(request, sink).await {
            Ok(output) => output,
            Err(failure) => return StepAttempt::fail(String::new(), failure),
        };

        let marker = step.expect.as_deref().unwrap_or(PASS_MARKER);
        if output.contains(marker) {
            StepAttempt::pass(output)
        } else {
            StepAttempt::fail(
                output,
                StepFailure::Expectation(format!("expected response to contain '{marker}'")),
            )
        }
    }

    async fn run_prompt(
        &self,
        step: &StepDefinition,
        name: &str,
        input: String,
        store: &VariableStore,
        sink: &dyn ProgressSink,
    ) -> StepAttempt {
        let Some(doc) = self.library.resolve(DocumentKind::Prompt, name).await else {
            return StepAttempt::fail(
                String::new(),
                StepFailure::Config(format!("prompt document not found: {name}")),
            );
        };

        let body = store.interpolate(&doc.body);
        let user = if input.is_empty() {
            body
        } else {
            format!("{body}\n\n## Input\n\n{input}")
        };
        let request = ChatRequest {
            system: String::new(),
            user,
            model_hint: doc.model_hint,
        };

        let raw = match self.stream_chat(request, sink).await {
            Ok(output) => output,
            Err(failure) => return StepAttempt::fail(String::new(), failure),
        };

        // Judge on the raw response; captured output is de-fenced so
        // later shell steps can consume it as literal text.
        let judged = match &step.expect {
            Some(expected) if !raw.contains(expected) => Some(StepFailure::Expectation(format!(
                "expected response to contain '{expected}'"
            ))),
            _ => None,
        };

        let output = if step.capture_as.is_some() {
            strip_code_fence(&raw)
        } else {
            raw
        };

        match judged {
            None => StepAttempt::pass(output),
            Some(failure) => StepAttempt::fail(output, failure),
        }
    }

    async fn run_shell(
        &self,
        step: &StepDefinition,
        command_text: &str,
        store: &VariableStore,
    ) -> StepAttempt {
        let command = store.interpolate(command_text);
        let mut builder = ProcessCommandBuilder::new("sh")
            .args(["-c", command.as_str()])
            .current_dir(self.git.workdir());
        if let Some(secs) = step.timeout {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let output = match self.subprocess.runner().run(builder.build()).await {
            Ok(output) => output,
            Err(e) => {
                return StepAttempt::fail(
                    String::new(),
                    StepFailure::Execution(truncate_reason(&e.to_string())),
                );
            }
        };

        let stdout = output.stdout.trim().to_string();
        match &step.expect {
            Some(expected) => {
                if stdout.contains(expected) {
                    StepAttempt::pass(stdout)
                } else {
                    StepAttempt::fail(
                        stdout,
                        StepFailure::Expectation(format!(
                            "expected output to contain '{expected}'"
                        )),
                    )
                }
            }
            None if output.status.success() => StepAttempt::pass(stdout),
            None => {
                let reason = if output.stderr.trim().is_empty() {
                    format!("process exited with code {}", output.status.code().unwrap_or(-1))
                } else {
                    output.stderr.trim().to_string()
                };
                StepAttempt::fail(stdout, StepFailure::Execution(truncate_reason(&reason)))
            }
        }
    }

    /// Send one chat request, forwarding each chunk to the sink while
    /// accumulating the full response for judging.
    async fn stream_chat(
        &self,
        request: ChatRequest,
        sink: &dyn ProgressSink,
    ) -> Result<String, StepFailure> {
        let mut stream = self.chat.send(request).await.map_err(map_chat_error)?;

        let mut accumulated = String::new();
        while let Some(chunk) = stream.next().await {
            let text = chunk.map_err(map_chat_error)?;
            sink.chunk(&text);
            accumulated.push_str(&text);
        }
        Ok(accumulated)
    }
}

fn map_chat_error(error: ChatError) -> StepFailure {
    match error {
        ChatError::NoModelAvailable => StepFailure::NoModel,
        ChatError::Transport(msg) => StepFailure::Execution(truncate_reason(&msg)),
    }
}

fn truncate_reason(reason: &str) -> String {
    if reason.chars().count() <= MAX_REASON_LEN {
        reason.to_string()
    } else {
        reason.chars().take(MAX_REASON_LEN).collect()
    }
}

/// Remove a leading/trailing code fence (with optional language tag) or
/// a single-backtick wrapper. Text without a wrapper is returned as-is.
fn strip_code_fence(text: &str) -> String {
    let trimmed = text.trim();

    if let Some(rest) = trimmed.strip_prefix("```") {
        if let Some(body) = rest.strip_suffix("```") {
            // Drop the language tag on the opening line, if any.
            let body = match body.split_once('\n') {
                Some((first_line, remainder)) if !first_line.contains(' ') => remainder,
                _ => body,
            };
            return body.trim().to_string();
        }
    }

    if trimmed.len() >= 2 && trimmed.starts_with('`') && trimmed.ends_with('`') {
        let inner = &trimmed[1..trimmed.len() - 1];
        if !inner.contains('`') {
            return inner.to_string();
        }
    }

    text.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::progress::NullProgress;
    use crate::llm::MockChatClient;
    use crate::subprocess::MockProcessRunner;
    use std::io::Write;
    use tempfile::TempDir;

    struct Fixture {
        dispatcher: StepDispatcher,
        mock_runner: MockProcessRunner,
        chat: MockChatClient,
        _library_dir: TempDir,
    }

    fn fixture() -> Fixture {
        let (subprocess, mock_runner) = SubprocessManager::mock();
        let library_dir = tempfile::tempdir().unwrap();
        let library = DocumentLibrary::with_roots(vec![library_dir.path().to_path_buf()]);
        let chat = MockChatClient::new();
        let git = GitContext::new(subprocess.clone(), library_dir.path());
        let dispatcher = StepDispatcher::new(subprocess, library, Arc::new(chat.clone()), git);
        Fixture {
            dispatcher,
            mock_runner,
            chat,
            _library_dir: library_dir,
        }
    }

    fn write_document(dir: &TempDir, kind: &str, name: &str, content: &str) {
        let docs = dir.path().join(kind);
        std::fs::create_dir_all(&docs).unwrap();
        let mut f = std::fs::File::create(docs.join(format!("{name}.md"))).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    fn shell_step(id: &str, command: &str) -> StepDefinition {
        StepDefinition {
            id: id.to_string(),
            agent: None,
            prompt: None,
            shell: Some(command.to_string()),
            input: None,
            capture_as: None,
            expect: None,
            on_failure: Default::default(),
            condition: None,
            timeout: None,
            description: None,
        }
    }

    #[tokio::test]
    async fn shell_step_passes_on_zero_exit() {
        let mut fx = fixture();
        fx.mock_runner
            .expect_command("sh")
            .returns_stdout("hello\n")
            .returns_success()
            .finish();

        let attempt = fx
            .dispatcher
            .dispatch(&shell_step("a", "echo hello"), &VariableStore::new(), &NullProgress)
            .await;
        assert!(attempt.passed);
        assert_eq!(attempt.output, "hello");
    }

    #[tokio::test]
    async fn shell_step_failure_truncates_stderr_reason() {
        let mut fx = fixture();
        let long_stderr = "e".repeat(500);
        fx.mock_runner
            .expect_command("sh")
            .returns_stderr(&long_stderr)
            .returns_exit_code(1)
            .finish();

        let attempt = fx
            .dispatcher
            .dispatch(&shell_step("a", "exit 1"), &VariableStore::new(), &NullProgress)
            .await;
        assert!(!attempt.passed);
        let failure = attempt.failure.unwrap();
        assert!(failure.is_retryable());
        assert_eq!(failure.to_string().chars().count(), 200);
    }

    #[tokio::test]
    async fn shell_step_judges_by_expected_substring() {
        let mut fx = fixture();
        fx.mock_runner
            .expect_command("sh")
            .returns_stdout("12 tests passed\n")
            .returns_success()
            .times(1)
            .finish();
        fx.mock_runner
            .expect_command("sh")
            .returns_stdout("2 tests failed\n")
            .returns_success()
            .finish();

        let mut step = shell_step("t", "run-tests");
        step.expect = Some("tests passed".to_string());

        let first = fx
            .dispatcher
            .dispatch(&step, &VariableStore::new(), &NullProgress)
            .await;
        assert!(first.passed);

        let second = fx
            .dispatcher
            .dispatch(&step, &VariableStore::new(), &NullProgress)
            .await;
        assert!(!second.passed);
        assert!(matches!(
            second.failure,
            Some(StepFailure::Expectation(_))
        ));
    }

    #[tokio::test]
    async fn shell_command_is_interpolated() {
        let mut fx = fixture();
        fx.mock_runner
            .expect_command("sh")
            .with_args(|args| args.get(1).is_some_and(|a| a == "git push origin HEAD:main"))
            .returns_success()
            .finish();

        let mut store = VariableStore::new();
        store.set("push_command", "push origin HEAD:main");
        let attempt = fx
            .dispatcher
            .dispatch(&shell_step("push", "git {{push_command}}"), &store, &NullProgress)
            .await;
        assert!(attempt.passed);
    }

    #[tokio::test]
    async fn input_resolves_exact_variable_reference() {
        let mut fx = fixture();
        fx.mock_runner
            .expect_command("sh")
            .returns_success()
            .finish();

        let mut step = shell_step("s", "true");
        step.input = Some("{{notes}}".to_string());

        let mut store = VariableStore::new();
        store.set("notes", "captured earlier");
        let attempt = fx.dispatcher.dispatch(&step, &store, &NullProgress).await;
        assert!(attempt.passed);

        // Unset reference resolves to empty input rather than an error.
        let attempt = fx
            .dispatcher
            .dispatch(&step, &VariableStore::new(), &NullProgress)
            .await;
        assert!(attempt.passed);
    }

    #[tokio::test]
    async fn staged_diff_auto_stages_once_then_fails() {
        let mut fx = fixture();
        // Both staged-diff reads return empty; the add in between succeeds.
        fx.mock_runner
            .expect_command("git")
            .with_args(|args| args.first().is_some_and(|a| a == "diff"))
            .returns_stdout("")
            .finish();
        fx.mock_runner
            .expect_command("git")
            .with_args(|args| args.first().is_some_and(|a| a == "add"))
            .returns_success()
            .finish();

        let mut step = shell_step("review", "true");
        step.input = Some("git_diff_staged".to_string());

        let attempt = fx
            .dispatcher
            .dispatch(&step, &VariableStore::new(), &NullProgress)
            .await;
        assert!(!attempt.passed);
        assert_eq!(attempt.failure.unwrap().to_string(), "no changes to stage");
        assert_eq!(fx.mock_runner.call_count("git"), 3);
    }

    #[tokio::test]
    async fn staged_diff_remediation_recovers_new_changes() {
        let mut fx = fixture();
        fx.mock_runner
            .expect_command("git")
            .with_args(|args| args.first().is_some_and(|a| a == "diff"))
            .returns_stdout("")
            .times(1)
            .finish();
        fx.mock_runner
            .expect_command("git")
            .with_args(|args| args.first().is_some_and(|a| a == "add"))
            .returns_success()
            .finish();
        fx.mock_runner
            .expect_command("git")
            .with_args(|args| args.first().is_some_and(|a| a == "diff"))
            .returns_stdout("diff --git a/x b/x\n")
            .finish();
        fx.mock_runner
            .expect_command("sh")
            .returns_success()
            .finish();

        let mut step = shell_step("review", "true");
        step.input = Some("git_diff_staged".to_string());

        let attempt = fx
            .dispatcher
            .dispatch(&step, &VariableStore::new(), &NullProgress)
            .await;
        assert!(attempt.passed);
    }

    #[tokio::test]
    async fn builtin_source_failure_falls_back_to_error_literal() {
        let mut fx = fixture();
        // git fails; the sh step still runs with the fallback text.
        fx.mock_runner
            .expect_command("sh")
            .returns_success()
            .finish();

        let mut step = shell_step("s", "true");
        step.input = Some("commit_message_last".to_string());

        let attempt = fx
            .dispatcher
            .dispatch(&step, &VariableStore::new(), &NullProgress)
            .await;
        assert!(attempt.passed);
    }

    #[tokio::test]
    async fn agent_step_requires_its_document() {
        let fx = fixture();
        let step = StepDefinition {
            agent: Some("missing-reviewer".to_string()),
            shell: None,
            ..shell_step("r", "unused")
        };

        let attempt = fx
            .dispatcher
            .dispatch(&step, &VariableStore::new(), &NullProgress)
            .await;
        assert!(!attempt.passed);
        let failure = attempt.failure.unwrap();
        assert!(!failure.is_retryable());
        assert!(failure.to_string().contains("missing-reviewer"));
    }

    #[tokio::test]
    async fn agent_step_judges_by_default_pass_marker() {
        let fx = fixture();
        write_document(
            &fx._library_dir,
            "agents",
            "reviewer",
            "---\nmodel: opus\n---\nYou review code.",
        );
        fx.chat.respond_with(&["looks good\n", "[PASS]\n"]);

        let step = StepDefinition {
            agent: Some("reviewer".to_string()),
            shell: None,
            ..shell_step("r", "unused")
        };

        let attempt = fx
            .dispatcher
            .dispatch(&step, &VariableStore::new(), &NullProgress)
            .await;
        assert!(attempt.passed);
        assert!(attempt.output.contains("[PASS]"));

        let requests = fx.chat.requests();
        assert_eq!(requests[0].model_hint.as_deref(), Some("opus"));
        assert!(requests[0].system.contains("You review code."));
        assert!(requests[0].system.contains(PASS_MARKER));
    }

    #[tokio::test]
    async fn agent_failure_without_marker_is_expectation_mismatch() {
        let fx = fixture();
        write_document(&fx._library_dir, "agents", "reviewer", "You review code.");
        fx.chat.respond_with(&["this has problems\n", "[FAIL]\n"]);

        let step = StepDefinition {
            agent: Some("reviewer".to_string()),
            shell: None,
            ..shell_step("r", "unused")
        };

        let attempt = fx
            .dispatcher
            .dispatch(&step, &VariableStore::new(), &NullProgress)
            .await;
        assert!(!attempt.passed);
        assert!(matches!(attempt.failure, Some(StepFailure::Expectation(_))));
    }

    #[tokio::test]
    async fn missing_model_is_not_retryable() {
        let fx = fixture();
        write_document(&fx._library_dir, "agents", "reviewer", "You review code.");
        fx.chat.fail_with(ChatError::NoModelAvailable);

        let step = StepDefinition {
            agent: Some("reviewer".to_string()),
            shell: None,
            ..shell_step("r", "unused")
        };

        let attempt = fx
            .dispatcher
            .dispatch(&step, &VariableStore::new(), &NullProgress)
            .await;
        let failure = attempt.failure.unwrap();
        assert!(!failure.is_retryable());
        assert_eq!(failure.to_string(), "no model available");
    }

    #[tokio::test]
    async fn prompt_step_interpolates_and_labels_input() {
        let fx = fixture();
        write_document(
            &fx._library_dir,
            "prompts",
            "commit-message",
            "Write a commit message for branch {{branch}}.",
        );
        fx.chat.respond_with(&["fix: resolve parser panic"]);

        let mut step = StepDefinition {
            prompt: Some("commit-message".to_string()),
            shell: None,
            ..shell_step("msg", "unused")
        };
        step.input = Some("the diff text".to_string());

        let mut store = VariableStore::new();
        store.set("branch", "main");

        let attempt = fx.dispatcher.dispatch(&step, &store, &NullProgress).await;
        assert!(attempt.passed);

        let request = &fx.chat.requests()[0];
        assert!(request.user.starts_with("Write a commit message for branch main."));
        assert!(request.user.contains("## Input\n\nthe diff text"));
    }

    #[tokio::test]
    async fn captured_prompt_output_is_defenced() {
        let fx = fixture();
        write_document(&fx._library_dir, "prompts", "gen", "Generate.");
        fx.chat
            .respond_with(&["```rust\n", "fn main() {}\n", "```"]);

        let mut step = StepDefinition {
            prompt: Some("gen".to_string()),
            shell: None,
            ..shell_step("gen", "unused")
        };
        step.capture_as = Some("code".to_string());

        let attempt = fx
            .dispatcher
            .dispatch(&step, &VariableStore::new(), &NullProgress)
            .await;
        assert!(attempt.passed);
        assert_eq!(attempt.output, "fn main() {}");
    }

    #[test]
    fn strip_code_fence_cases() {
        assert_eq!(strip_code_fence("```\ntext\n```"), "text");
        assert_eq!(strip_code_fence("```yaml\nkey: value\n```"), "key: value");
        assert_eq!(strip_code_fence("`inline`"), "inline");
        assert_eq!(strip_code_fence("plain text"), "plain text");
        assert_eq!(strip_code_fence("a ``` middle"), "a ``` middle");
    }
}

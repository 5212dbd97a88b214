use super::*;
use futures::StreamExt;
use std::time::Duration;

#[tokio::test]
async fn production_runner_captures_stdout() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("echo").arg("hello world").build();

    let output = runner.run(command).await.unwrap();
    assert!(output.status.success());
    assert_eq!(output.stdout.trim(), "hello world");
    assert!(output.stderr.is_empty());
}

#[tokio::test]
async fn production_runner_reports_exit_code() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("sh")
        .args(["-c", "exit 3"])
        .build();

    let output = runner.run(command).await.unwrap();
    assert!(!output.status.success());
    assert_eq!(output.status.code(), Some(3));
}

#[tokio::test]
async fn production_runner_command_not_found() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("nonexistent-command-12345").build();

    let result = runner.run(command).await;
    assert!(matches!(
        result.unwrap_err(),
        ProcessError::CommandNotFound(_)
    ));
}

#[tokio::test]
async fn production_runner_times_out() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("sleep")
        .arg("5")
        .timeout(Duration::from_millis(100))
        .build();

    let result = runner.run(command).await;
    assert!(matches!(result.unwrap_err(), ProcessError::Timeout(_)));
}

#[tokio::test]
async fn production_runner_feeds_stdin() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("cat")
        .stdin("from stdin".to_string())
        .build();

    let output = runner.run(command).await.unwrap();
    assert_eq!(output.stdout, "from stdin");
}

#[tokio::test]
async fn production_runner_streams_lines() {
    let runner = TokioProcessRunner;
    let command = ProcessCommandBuilder::new("sh")
        .args(["-c", "echo one; echo two"])
        .build();

    let stream = runner.run_streaming(command).await.unwrap();
    let lines: Vec<String> = stream.stdout.filter_map(|l| async { l.ok() }).collect().await;
    assert_eq!(lines, vec!["one", "two"]);
    assert!(stream.status.await.unwrap().success());
}

#[tokio::test]
async fn mock_runner_matches_args() {
    let mut mock = MockProcessRunner::new();

    mock.expect_command("git")
        .with_args(|args| args == ["status"])
        .returns_stdout("On branch main\n")
        .returns_success()
        .finish();

    let output = mock
        .run(ProcessCommandBuilder::new("git").arg("status").build())
        .await
        .unwrap();

    assert!(output.status.success());
    assert_eq!(output.stdout, "On branch main\n");
    assert_eq!(mock.call_count("git"), 1);
}

#[tokio::test]
async fn mock_runner_consumes_bounded_expectations_in_order() {
    let mut mock = MockProcessRunner::new();

    mock.expect_command("git")
        .returns_stdout("first")
        .times(1)
        .finish();
    mock.expect_command("git")
        .returns_stdout("second")
        .finish();

    let cmd = || ProcessCommandBuilder::new("git").arg("log").build();
    assert_eq!(mock.run(cmd()).await.unwrap().stdout, "first");
    assert_eq!(mock.run(cmd()).await.unwrap().stdout, "second");
    assert_eq!(mock.run(cmd()).await.unwrap().stdout, "second");
}

#[tokio::test]
async fn mock_runner_rejects_unexpected_commands() {
    let mock = MockProcessRunner::new();
    let result = mock
        .run(ProcessCommandBuilder::new("unexpected").build())
        .await;
    assert!(matches!(
        result.unwrap_err(),
        ProcessError::MockExpectationNotMet(_)
    ));
}

//! Bounded retry around step dispatch.

use std::future::Future;

use super::dispatch::StepAttempt;
use super::progress::ProgressSink;

/// Call `dispatch` up to `max_attempts + 1` times, returning at the
/// first pass. Non-retryable failures return immediately. Only the final
/// attempt's result is handed back to the caller, so the ledger never
/// sees intermediate attempts.
pub async fn run_with_retry<F, Fut>(
    step_id: &str,
    max_attempts: u32,
    sink: &dyn ProgressSink,
    mut dispatch: F,
) -> StepAttempt
where
    F: FnMut() -> Fut,
    Fut: Future<Output = StepAttempt>,
{
    let mut attempt = dispatch().await;

    let mut retries = 0;
    while !attempt.passed && retries < max_attempts {
        let retryable = attempt
            .failure
            .as_ref()
            .is_some_and(|failure| failure.is_retryable());
        if !retryable {
            break;
        }

        retries += 1;
        sink.retrying(step_id, retries, max_attempts);
        tracing::debug!("Retrying step {step_id} (attempt {retries}/{max_attempts})");
        attempt = dispatch().await;
    }

    attempt
}

// Fixed-interval run polling. No backoff; a failed status request ends the poll.

use std::time::Duration;
use tracing::{debug, info};

use super::{AssistantApi, ChatError, ChatMessage, RunStatus};
use crate::config::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_POLL_MAX_ATTEMPTS};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Wait before every status check
    pub interval: Duration,
    /// Status checks before giving up
    pub max_attempts: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        PollConfig {
            interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_attempts: DEFAULT_POLL_MAX_ATTEMPTS,
        }
    }
}

/// Check a run's status every `interval` until it is terminal
pub async fn poll_run<A>(
    api: &A,
    thread_id: &str,
    run_id: &str,
    config: &PollConfig,
) -> Result<RunStatus, ChatError>
where
    A: AssistantApi + ?Sized,
{
    for attempt in 1..=config.max_attempts {
        tokio::time::sleep(config.interval).await;

        let status = api.run_status(thread_id, run_id).await?;
        debug!(run_id, attempt, ?status, "polled run");

        if status.is_terminal() {
            return Ok(status);
        }
    }

    Err(ChatError::PollExhausted {
        run_id: run_id.to_string(),
        attempts: config.max_attempts,
    })
}

/// Post a user message, run the assistant and return the thread's messages
/// once the run completes.
pub async fn send_and_wait<A>(
    api: &A,
    thread_id: &str,
    content: &str,
    config: &PollConfig,
) -> Result<Vec<ChatMessage>, ChatError>
where
    A: AssistantApi + ?Sized,
{
    api.post_message(thread_id, content).await?;
    let run = api.create_run(thread_id).await?;

    let status = if run.status.is_terminal() {
        run.status
    } else {
        poll_run(api, thread_id, &run.id, config).await?
    };

    if status != RunStatus::Completed {
        return Err(ChatError::RunEnded(status));
    }

    info!(thread_id, run_id = %run.id, "assistant run completed");
    api.list_messages(thread_id).await
}

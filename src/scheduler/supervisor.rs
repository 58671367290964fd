use std::future::Future;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use super::backoff::BackoffPolicy;

/// Keep a long-running task alive.
///
/// Each run of `task` is spawned on its own tokio task so panics are contained.
/// Whenever a run ends (error, panic or unexpected return) the supervisor
/// waits for the policy delay and starts a fresh run. Returns only when the
/// spawned run was cancelled.
pub async fn supervise<F, Fut>(name: &'static str, policy: BackoffPolicy, mut task: F)
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    let mut attempt: u32 = 0;
    loop {
        info!(task = name, "Starting supervised task");
        let started = Instant::now();

        match tokio::spawn(task()).await {
            Ok(Ok(())) => warn!(task = name, "Supervised task exited"),
            Ok(Err(e)) => error!(task = name, "Supervised task failed: {:#}", e),
            Err(e) if e.is_panic() => error!(task = name, "Supervised task panicked"),
            Err(_) => {
                info!(task = name, "Supervised task cancelled");
                return;
            }
        }

        // A run that stayed up longer than the longest delay counts as healthy
        if started.elapsed() >= policy.base_delay(u32::MAX) {
            attempt = 0;
        }
        let delay = policy.delay(attempt);
        attempt = attempt.saturating_add(1);

        info!(
            task = name,
            "Restarting in {}s (attempt {})",
            delay.as_secs(),
            attempt
        );
        tokio::time::sleep(delay).await;
    }
}

/// Spawn [`supervise`] as a detached background task
pub fn spawn_supervised<F, Fut>(name: &'static str, policy: BackoffPolicy, task: F) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(supervise(name, policy, task))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_restarts_after_error_and_panic() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);
        let started = tokio::time::Instant::now();

        let handle = spawn_supervised(
            "test",
            BackoffPolicy::fixed(Duration::from_secs(300)),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    match counter.fetch_add(1, Ordering::SeqCst) {
                        0 => anyhow::bail!("transport closed"),
                        1 => panic!("boom"),
                        _ => std::future::pending::<Result<()>>().await,
                    }
                }
            },
        );

        tokio::time::sleep(Duration::from_secs(3600)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(600));

        handle.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_cooldown_before_restart() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&runs);

        let handle = spawn_supervised(
            "test",
            BackoffPolicy::fixed(Duration::from_secs(300)),
            move || {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            },
        );

        tokio::time::sleep(Duration::from_secs(299)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        handle.abort();
    }
}

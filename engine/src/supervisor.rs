use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::metrics as m;

const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const STABLE_THRESHOLD: Duration = Duration::from_secs(60);

/// Runs a long-lived task, restarting it with exponential backoff when it
/// fails. The factory is called on every restart so each run gets fresh
/// connections and subscriptions.
///
/// Returns `Ok(())` only when the task itself exits cleanly; errors are
/// logged, counted and retried.
pub async fn supervised<F, Fut>(name: &'static str, mut factory: F) -> anyhow::Result<()>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    let mut backoff = INITIAL_BACKOFF;
    let mut total_restarts: u64 = 0;

    loop {
        let started_at = Instant::now();

        match factory().await {
            Ok(()) => {
                tracing::info!(task = name, "supervised_task_exited_cleanly");
                return Ok(());
            }
            Err(e) => {
                total_restarts += 1;
                let ran_for = started_at.elapsed();
                if ran_for > STABLE_THRESHOLD {
                    backoff = INITIAL_BACKOFF;
                }

                metrics::counter!(m::TASK_RESTARTS, "task" => name).increment(1);
                tracing::error!(
                    task = name,
                    error = %e,
                    ran_for_secs = ran_for.as_secs(),
                    backoff_ms = backoff.as_millis() as u64,
                    total_restarts,
                    "supervised_task_restarting"
                );

                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(MAX_BACKOFF);
            }
        }
    }
}

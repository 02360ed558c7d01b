//! Long-running worker tasks: the input-queue consumer and the pending
//! validation deadline sweeper.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Semaphore};
use tokio::time::sleep;

use crate::app_state::AppState;
use crate::pipeline;
use crate::services::queue::INPUT_QUEUE;

/// Short pop timeout so the loop observes shutdown promptly.
const POP_TIMEOUT: Duration = Duration::from_secs(5);

/// Consume the input queue until shutdown. Each job runs on its own task;
/// the semaphore caps how many are in flight at once.
pub async fn run(app: AppState, mut shutdown: watch::Receiver<bool>) {
    let concurrency = app.config.ocr_worker_concurrency;
    let slots = Arc::new(Semaphore::new(concurrency));

    tracing::info!(
        queue = INPUT_QUEUE,
        concurrency,
        tiers = ?app.providers.active_tiers(),
        "Worker ready, consuming jobs"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let popped = tokio::select! {
            _ = shutdown.changed() => break,
            popped = app.queue.pop(INPUT_QUEUE, POP_TIMEOUT) => popped,
        };

        match popped {
            Ok(Some(raw)) => {
                let permit = match slots.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => break,
                };
                let app = app.clone();
                tokio::spawn(async move {
                    pipeline::handle_raw_message(&app, &raw).await;
                    drop(permit);
                });
            }
            Ok(None) => {
                tracing::trace!("No jobs available");
            }
            Err(e) => {
                tracing::error!(error = %e, "Queue pop failed, backing off");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }

    // Let in-flight tier attempts finish or park themselves as pending
    // state; suspended jobs are recovered later via callback or TTL.
    let _ = slots.acquire_many(concurrency as u32).await;
    tracing::info!("Worker loop stopped");
}

/// Periodically claim validation deadlines that elapsed without a callback.
pub async fn run_sweeper(app: AppState, mut shutdown: watch::Receiver<bool>) {
    let mut ticker =
        tokio::time::interval(Duration::from_secs(app.config.ocr_sweep_interval_seconds));
    // the immediate first tick would race startup, skip it
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => pipeline::sweep_expired(&app).await,
        }
    }
    tracing::info!("Sweeper stopped");
}

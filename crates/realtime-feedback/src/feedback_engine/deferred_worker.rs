//! Worker loop executing settled debounce windows
//!
//! Receives `Fired` jobs from the scheduler and runs each on its own task.
//! Tasks wait for a semaphore permit before running, so the loop itself never
//! blocks and always observes shutdown. Jobs still queued for a permit at
//! shutdown are dropped.

use std::sync::Arc;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::feedback::{ChangeEvent, FeedbackId};
use crate::feedback_engine::debounce::Fired;
use crate::feedback_engine::engine::EngineCore;

/// Payload retained by the scheduler for a pending deferred run.
#[derive(Debug, Clone)]
pub struct DeferredJob {
    pub event: Arc<ChangeEvent>,
    /// Id of the instant feedback the deferred notification completes
    pub feedback_id: FeedbackId,
}

pub(crate) fn spawn_deferred_worker(
    core: Arc<EngineCore>,
    receiver: mpsc::UnboundedReceiver<Fired<DeferredJob>>,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run_worker_loop(core, receiver, shutdown))
}

async fn run_worker_loop(
    core: Arc<EngineCore>,
    mut receiver: mpsc::UnboundedReceiver<Fired<DeferredJob>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let permits = Arc::new(Semaphore::new(core.config().max_concurrent_deferred));
    info!(
        "Deferred worker started ({} concurrent runs)",
        core.config().max_concurrent_deferred
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            fired = receiver.recv() => {
                match fired {
                    Some(fired) => {
                        let core = Arc::clone(&core);
                        let permits = Arc::clone(&permits);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            let Ok(_permit) = permits.acquire_owned().await else {
                                return;
                            };
                            if *shutdown.borrow() {
                                debug!("Dropping deferred run for {} after shutdown", fired.key.session_id);
                                return;
                            }
                            core.run_deferred(fired).await;
                        });
                    }
                    None => {
                        debug!("Deferred job channel closed");
                        break;
                    }
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }

    info!("Deferred worker shutting down");
}

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::saver::{SaveTrigger, WorkflowSaver};

/// Periodic save task. Stops when cancelled or dropped; a save already in
/// progress is allowed to finish.
pub struct AutosaveHandle {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl AutosaveHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Cancel and wait for the task to exit.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "autosave task ended abnormally");
            }
        }
    }
}

impl Drop for AutosaveHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Save every `period` while there is something to save. A tick that lands
/// while a save is in flight is skipped, not queued.
pub fn spawn_autosave(saver: Arc<WorkflowSaver>, period: Duration) -> AutosaveHandle {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    let task = tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                () = token.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if saver.is_busy() {
                debug!("autosave tick skipped, save in flight");
                continue;
            }
            if !saver.needs_autosave() {
                continue;
            }
            // Failures are logged by the saver; the next tick retries.
            let _ = saver.save(SaveTrigger::Auto).await;
        }
        debug!("autosave stopped");
    });
    AutosaveHandle {
        cancel,
        task: Some(task),
    }
}

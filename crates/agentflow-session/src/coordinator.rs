//! Stream coordinator: opens agent streams and pumps their events, in order,
//! into a [`StreamSink`].
//!
//! Every stream gets a generation number. Sinks use it to drop anything a
//! cancelled or superseded stream still manages to deliver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agentflow_client::AgentApi;
use agentflow_core::{AgentEvent, ApiError, AppId, SessionId};

/// What a stream produced.
#[derive(Clone, Debug)]
pub enum StreamItem {
    Event(AgentEvent),
    /// The stream could not be opened or broke mid-way.
    Failed(ApiError),
    /// Ended without `done`/`error`.
    Closed,
}

/// Consumer of one coordinator's streams.
pub trait StreamSink: Send + Sync + 'static {
    /// Handle one item. Returning false stops the stream.
    fn deliver(&self, generation: u64, item: StreamItem) -> bool;
}

/// Client-side grip on one stream.
#[derive(Clone, Debug)]
pub struct StreamHandle {
    generation: u64,
    cancel: CancellationToken,
}

impl StreamHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

pub struct StreamCoordinator {
    agent: Arc<dyn AgentApi>,
    generation: AtomicU64,
    active: Arc<Mutex<Option<StreamHandle>>>,
}

impl StreamCoordinator {
    pub fn new(agent: Arc<dyn AgentApi>) -> Self {
        Self {
            agent,
            generation: AtomicU64::new(0),
            active: Arc::new(Mutex::new(None)),
        }
    }

    /// Open a stream and spawn the task feeding `sink`. One stream at a time
    /// is the caller's responsibility; a second `start` simply becomes the
    /// active one.
    pub fn start(
        &self,
        app_id: AppId,
        message: String,
        session_id: Option<SessionId>,
        sink: Arc<dyn StreamSink>,
    ) -> (StreamHandle, JoinHandle<()>) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = StreamHandle {
            generation,
            cancel: CancellationToken::new(),
        };
        *self.active.lock() = Some(handle.clone());
        info!(%app_id, generation, resumed = session_id.is_some(), "starting agent stream");

        let agent = self.agent.clone();
        let active = self.active.clone();
        let pump_handle = handle.clone();
        let task = tokio::spawn(async move {
            pump(agent, app_id, message, session_id, &pump_handle, sink).await;
            let mut slot = active.lock();
            if slot.as_ref().map(StreamHandle::generation) == Some(pump_handle.generation) {
                *slot = None;
            }
        });
        (handle, task)
    }

    /// Stop a stream. Safe to repeat and to call after it finished.
    pub fn cancel(&self, handle: &StreamHandle) {
        if !handle.cancel.is_cancelled() {
            debug!(generation = handle.generation, "cancelling agent stream");
        }
        handle.cancel.cancel();
        let mut slot = self.active.lock();
        if slot.as_ref().map(StreamHandle::generation) == Some(handle.generation) {
            *slot = None;
        }
    }

    /// Cancel whatever stream is active. Returns its generation.
    pub fn cancel_active(&self) -> Option<u64> {
        let handle = self.active.lock().take()?;
        handle.cancel.cancel();
        Some(handle.generation)
    }

    pub fn active(&self) -> Option<StreamHandle> {
        self.active.lock().clone()
    }
}

async fn pump(
    agent: Arc<dyn AgentApi>,
    app_id: AppId,
    message: String,
    session_id: Option<SessionId>,
    handle: &StreamHandle,
    sink: Arc<dyn StreamSink>,
) {
    let generation = handle.generation;
    let opened = tokio::select! {
        biased;
        () = handle.cancel.cancelled() => return,
        opened = agent.start_chat(&app_id, &message, session_id.as_ref()) => opened,
    };
    let mut stream = match opened {
        Ok(stream) => stream,
        Err(e) => {
            warn!(generation, error = %e, kind = e.error_kind(), "failed to open agent stream");
            let _ = sink.deliver(generation, StreamItem::Failed(e));
            return;
        }
    };

    loop {
        let next = tokio::select! {
            biased;
            () = handle.cancel.cancelled() => {
                debug!(generation, "agent stream dropped after cancel");
                return;
            }
            next = stream.next() => next,
        };
        match next {
            Some(Ok(event)) => {
                let terminal = event.is_terminal();
                if !sink.deliver(generation, StreamItem::Event(event)) || terminal {
                    return;
                }
            }
            Some(Err(e)) => {
                warn!(generation, error = %e, kind = e.error_kind(), "agent stream failed");
                let _ = sink.deliver(generation, StreamItem::Failed(e));
                return;
            }
            None => {
                let _ = sink.deliver(generation, StreamItem::Closed);
                return;
            }
        }
    }
}

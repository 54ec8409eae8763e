//! [`BuildSession`]: one user's agent conversation about one app, wired to
//! the collaborators it needs.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use agentflow_client::{AgentApi, AppApi};
use agentflow_core::models::WorkflowDraft;
use agentflow_core::{ApiError, AppId, SessionId, TranscriptEntry};
use agentflow_store::SessionIdentity;

use crate::autosave::{spawn_autosave, AutosaveHandle};
use crate::confirmation::{self, ConfirmTicket};
use crate::coordinator::{StreamCoordinator, StreamItem, StreamSink};
use crate::dispatcher::{self, Effect, STREAM_CLOSED_MESSAGE};
use crate::error::{SaveError, SessionError};
use crate::reconciler::{AppData, ReloadTarget, ResourceReconciler, SharedAppData};
use crate::saver::{SaveOutcome, SaveTrigger, WorkflowSaver};
use crate::state::{CenterView, CompletionSummary, PendingAction, SessionState};

struct Inner {
    app_id: AppId,
    agent: Arc<dyn AgentApi>,
    identity: Arc<SessionIdentity>,
    state: Mutex<SessionState>,
    coordinator: StreamCoordinator,
    reconciler: Arc<ResourceReconciler>,
    saver: Arc<WorkflowSaver>,
    /// Stream pumps, reloads and server-side cancels still running.
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Inner {
    fn apply(&self, effects: Vec<Effect>) {
        for effect in effects {
            match effect {
                Effect::PersistSession(id) => {
                    if self.identity.set(&id) {
                        info!(session_id = %id, "agent session id updated");
                    }
                }
                Effect::Reload(target) => {
                    let reconciler = self.reconciler.clone();
                    self.track(tokio::spawn(async move {
                        let _ = reconciler.reload(target).await;
                    }));
                }
            }
        }
    }

    fn track(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock();
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    async fn finish_confirmation(&self, ticket: ConfirmTicket) -> Result<(), SessionError> {
        let result = self
            .agent
            .confirm_action(&self.app_id, &ticket.session_id, &ticket.action_id, ticket.approved)
            .await;
        let failure = result.as_ref().err().cloned();
        let effects = confirmation::complete(&mut self.state.lock(), &ticket, result);
        self.apply(effects);
        match failure {
            Some(e) => Err(SessionError::Api(e)),
            None => {
                info!(action_id = %ticket.action_id, approved = ticket.approved, "action resolved");
                Ok(())
            }
        }
    }
}

impl StreamSink for Inner {
    fn deliver(&self, generation: u64, item: StreamItem) -> bool {
        let effects = {
            let mut state = self.state.lock();
            if state.active_generation() != Some(generation) {
                debug!(generation, "discarding item from inactive stream");
                return false;
            }
            match item {
                StreamItem::Event(event) => {
                    let held = self.identity.get();
                    dispatcher::dispatch(&mut state, &event, held.as_ref())
                }
                StreamItem::Failed(e) => {
                    dispatcher::fail_stream(&mut state, &e.to_string());
                    Vec::new()
                }
                StreamItem::Closed => {
                    warn!(generation, "agent stream closed without done");
                    dispatcher::fail_stream(&mut state, STREAM_CLOSED_MESSAGE);
                    Vec::new()
                }
            }
        };
        self.apply(effects);
        true
    }
}

/// An agent build session for one app.
///
/// Conversation state lives in memory; only the agent session id is
/// persisted, through the [`SessionIdentity`] handed in.
pub struct BuildSession {
    inner: Arc<Inner>,
}

impl BuildSession {
    pub fn new(
        app_id: AppId,
        agent: Arc<dyn AgentApi>,
        apps: Arc<dyn AppApi>,
        identity: Arc<SessionIdentity>,
    ) -> Self {
        let data = SharedAppData::default();
        let saver = Arc::new(WorkflowSaver::new(app_id.clone(), apps.clone(), data.clone()));
        let reconciler = Arc::new(ResourceReconciler::new(
            app_id.clone(),
            apps,
            data,
            saver.clone(),
        ));
        Self {
            inner: Arc::new(Inner {
                app_id,
                coordinator: StreamCoordinator::new(agent.clone()),
                agent,
                identity,
                state: Mutex::new(SessionState::new()),
                reconciler,
                saver,
                tasks: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn app_id(&self) -> &AppId {
        &self.inner.app_id
    }

    /// Fetch the app, its tables, versions and bound workflow. An app with no
    /// bound workflow gets an empty draft named after it.
    pub async fn load(&self) -> Result<(), SessionError> {
        self.inner.reconciler.load().await?;
        if self.inner.saver.draft_id().is_none() {
            let name = self
                .inner
                .reconciler
                .data()
                .app
                .map(|a| a.name)
                .unwrap_or_default();
            self.inner.saver.replace_draft(WorkflowDraft::empty(name));
        }
        Ok(())
    }

    /// Send a user message and start streaming the agent's answer.
    /// Returns the stream's generation.
    #[instrument(skip(self, message), fields(app_id = %self.inner.app_id))]
    pub fn send(&self, message: &str) -> Result<u64, SessionError> {
        let message = message.trim();
        if message.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let mut state = self.inner.state.lock();
        if state.is_streaming() {
            return Err(SessionError::AlreadyStreaming);
        }
        state.transcript.push_user(message);
        let sink: Arc<dyn StreamSink> = self.inner.clone();
        let (handle, task) = self.inner.coordinator.start(
            self.inner.app_id.clone(),
            message.to_string(),
            self.inner.identity.get(),
            sink,
        );
        // The pump cannot deliver before this lock is released.
        state.begin_stream(handle.generation());
        drop(state);
        self.inner.track(task);
        Ok(handle.generation())
    }

    /// Stop the active stream. Also asks the server to stop, best-effort.
    /// Returns false when nothing was streaming.
    pub fn stop(&self) -> bool {
        let stopped = {
            let mut state = self.inner.state.lock();
            let stopped = dispatcher::stop_stream(&mut state);
            let _ = self.inner.coordinator.cancel_active();
            stopped
        };
        if !stopped {
            return false;
        }
        info!(app_id = %self.inner.app_id, "stream stopped by user");
        if let Some(session_id) = self.inner.identity.get() {
            let agent = self.inner.agent.clone();
            let app_id = self.inner.app_id.clone();
            self.inner.track(tokio::spawn(async move {
                if let Err(e) = agent.cancel_session(&app_id, &session_id).await {
                    warn!(session_id = %session_id, error = %e, "server-side cancel failed");
                }
            }));
        }
        true
    }

    /// Approve or reject the pending action. The backend call runs to
    /// completion even if the returned future is dropped.
    pub async fn resolve(&self, approved: bool) -> Result<(), SessionError> {
        let ticket = {
            let mut state = self.inner.state.lock();
            confirmation::begin(&mut state, self.inner.identity.get().as_ref(), approved)?
        };
        let inner = self.inner.clone();
        match tokio::spawn(async move { inner.finish_confirmation(ticket).await }).await {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "confirmation task failed");
                Err(SessionError::Api(ApiError::Cancelled))
            }
        }
    }

    pub async fn approve(&self) -> Result<(), SessionError> {
        self.resolve(true).await
    }

    pub async fn reject(&self) -> Result<(), SessionError> {
        self.resolve(false).await
    }

    /// Start a new conversation: clear the transcript, the pending action
    /// and the stored session id.
    pub fn reset(&self) -> Result<(), SessionError> {
        {
            let mut state = self.inner.state.lock();
            if state.is_streaming() {
                return Err(SessionError::AlreadyStreaming);
            }
            state.transcript.clear();
            state.pending = None;
            state.last_completion = None;
        }
        self.inner.identity.clear();
        info!(app_id = %self.inner.app_id, "conversation reset");
        Ok(())
    }

    pub async fn save(&self) -> Result<SaveOutcome, SaveError> {
        self.inner.saver.save(SaveTrigger::Manual).await
    }

    pub fn start_autosave(&self, period: Duration) -> AutosaveHandle {
        spawn_autosave(self.inner.saver.clone(), period)
    }

    pub async fn reload(&self, target: ReloadTarget) -> bool {
        self.inner.reconciler.reload(target).await
    }

    /// Wait until every background task (stream, reloads, cancels) has
    /// finished, including ones started while waiting.
    pub async fn settle(&self) {
        loop {
            let tasks = std::mem::take(&mut *self.inner.tasks.lock());
            if tasks.is_empty() {
                return;
            }
            for task in tasks {
                if let Err(e) = task.await {
                    warn!(error = %e, "background task ended abnormally");
                }
            }
        }
    }

    pub fn transcript(&self) -> Vec<TranscriptEntry> {
        self.inner.state.lock().transcript.entries().to_vec()
    }

    pub fn snapshot(&self) -> SessionState {
        self.inner.state.lock().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.inner.state.lock().is_streaming()
    }

    pub fn pending_action(&self) -> Option<PendingAction> {
        self.inner.state.lock().pending.clone()
    }

    pub fn center_view(&self) -> CenterView {
        self.inner.state.lock().center_view
    }

    pub fn set_center_view(&self, view: CenterView) {
        self.inner.state.lock().center_view = view;
    }

    pub fn last_completion(&self) -> Option<CompletionSummary> {
        self.inner.state.lock().last_completion.clone()
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.inner.identity.get()
    }

    pub fn app_data(&self) -> AppData {
        self.inner.reconciler.data()
    }

    pub fn saver(&self) -> &Arc<WorkflowSaver> {
        &self.inner.saver
    }
}

impl Drop for BuildSession {
    fn drop(&mut self) {
        let _ = self.inner.coordinator.cancel_active();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_client::{MockBackend, MockOp, MockStream};
    use agentflow_core::{AgentEvent, Role};

    fn session(backend: &Arc<MockBackend>) -> BuildSession {
        BuildSession::new(
            AppId::from_raw("app_1"),
            backend.clone(),
            backend.clone(),
            Arc::new(SessionIdentity::in_memory()),
        )
    }

    #[tokio::test]
    async fn send_rejects_empty_and_concurrent() {
        let backend = Arc::new(MockBackend::with_app("app_1", "Fleet"));
        backend.push_stream(MockStream::Hanging(vec![]));
        let s = session(&backend);

        assert!(matches!(s.send("   "), Err(SessionError::EmptyMessage)));
        s.send("build me a CRM").unwrap();
        assert!(s.is_streaming());
        assert!(matches!(s.send("again"), Err(SessionError::AlreadyStreaming)));
        assert!(matches!(s.reset(), Err(SessionError::AlreadyStreaming)));

        assert!(s.stop());
        s.settle().await;
        assert_eq!(backend.chat_calls().len(), 1);
        assert_eq!(backend.chat_calls()[0].message, "build me a CRM");
    }

    #[tokio::test]
    async fn stream_failure_is_reported_once() {
        let backend = Arc::new(MockBackend::with_app("app_1", "Fleet"));
        backend.push_stream(MockStream::Rejected(ApiError::Network("refused".into())));
        let s = session(&backend);

        s.send("hi").unwrap();
        s.settle().await;
        assert!(!s.is_streaming());
        let transcript = s.transcript();
        assert_eq!(transcript.len(), 2);
        assert_eq!(transcript[1].role(), Role::Assistant);
        assert_eq!(transcript[1].content, "Error: network error: refused");
    }

    #[tokio::test]
    async fn eof_without_done_is_an_error() {
        let backend = Arc::new(MockBackend::with_app("app_1", "Fleet"));
        backend.push_stream(MockStream::Events(vec![AgentEvent::message("partial")]));
        let s = session(&backend);

        s.send("hi").unwrap();
        s.settle().await;
        assert!(!s.is_streaming());
        assert_eq!(
            s.transcript().last().unwrap().content,
            format!("Error: {STREAM_CLOSED_MESSAGE}")
        );
        assert_eq!(backend.calls(MockOp::GetApp), 0);
    }

    #[tokio::test]
    async fn load_synthesizes_named_draft() {
        let backend = Arc::new(MockBackend::with_app("app_1", "Fleet"));
        let s = session(&backend);
        s.load().await.unwrap();
        assert_eq!(s.saver().draft().name, "Fleet");
        assert!(s.saver().draft_id().is_none());
        assert!(!s.saver().is_dirty());
    }

    #[tokio::test]
    async fn reset_clears_conversation_and_identity() {
        let backend = Arc::new(MockBackend::with_app("app_1", "Fleet"));
        backend.push_stream(MockStream::Events(vec![
            AgentEvent::confirmation_required("act_1", "delete_table").with_session("s1"),
            AgentEvent::done(),
        ]));
        let s = session(&backend);
        s.send("drop it").unwrap();
        s.settle().await;
        assert_eq!(s.session_id(), Some(SessionId::from_raw("s1")));
        assert!(s.pending_action().is_some());

        s.reset().unwrap();
        assert!(s.transcript().is_empty());
        assert!(s.pending_action().is_none());
        assert!(s.session_id().is_none());
    }
}

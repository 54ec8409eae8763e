//! Scripted in-memory backend for deterministic tests without a server.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use futures::{stream, StreamExt};
use parking_lot::Mutex;

use agentflow_core::models::{
    App, AppVersion, CreateVersionRequest, DatabaseTable, VersionPage, Workflow, WorkflowPayload,
};
use agentflow_core::{ActionId, AgentEvent, ApiError, AppId, SessionId, VersionId, WorkflowId};

use crate::api::{AgentApi, AppApi, EventStream};

/// Pre-programmed answer to one `start_chat` call.
pub enum MockStream {
    /// Yield the events, then end.
    Events(Vec<AgentEvent>),
    /// Sleep before each event.
    Paced(Duration, Vec<AgentEvent>),
    /// Yield the events, then stay open until dropped.
    Hanging(Vec<AgentEvent>),
    /// Yield the events, then fail with a transport error.
    Broken(Vec<AgentEvent>, ApiError),
    /// Fail `start_chat` itself.
    Rejected(ApiError),
}

impl MockStream {
    /// A plain assistant reply followed by `done`.
    pub fn reply(text: &str) -> Self {
        Self::Events(vec![AgentEvent::message(text), AgentEvent::done()])
    }

    fn into_stream(self) -> Result<EventStream, ApiError> {
        let stream: EventStream = match self {
            Self::Events(events) => Box::pin(ok_stream(events)),
            Self::Paced(delay, events) => Box::pin(stream::iter(events).then(move |e| async move {
                tokio::time::sleep(delay).await;
                Ok::<_, ApiError>(e)
            })),
            Self::Hanging(events) => Box::pin(ok_stream(events).chain(stream::pending())),
            Self::Broken(events, error) => {
                Box::pin(ok_stream(events).chain(stream::once(async move { Err(error) })))
            }
            Self::Rejected(error) => return Err(error),
        };
        Ok(stream)
    }
}

fn ok_stream(
    events: Vec<AgentEvent>,
) -> impl futures::Stream<Item = Result<AgentEvent, ApiError>> + Send {
    stream::iter(events.into_iter().map(Ok))
}

/// Backend operations, for call counting, failure injection and delays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MockOp {
    StartChat,
    Confirm,
    Cancel,
    GetApp,
    GetWorkflow,
    CreateWorkflow,
    UpdateWorkflow,
    CreateVersion,
    ListVersions,
    ListTables,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChatCall {
    pub app_id: AppId,
    pub message: String,
    pub session_id: Option<SessionId>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmCall {
    pub session_id: SessionId,
    pub action_id: ActionId,
    pub approved: bool,
}

#[derive(Default)]
struct State {
    streams: VecDeque<MockStream>,
    chats: Vec<ChatCall>,
    confirms: Vec<ConfirmCall>,
    cancels: Vec<SessionId>,
    app: Option<App>,
    workflows: HashMap<WorkflowId, Workflow>,
    versions: Vec<AppVersion>,
    tables: Vec<DatabaseTable>,
    failures: HashMap<MockOp, VecDeque<ApiError>>,
    delays: HashMap<MockOp, Duration>,
    counts: HashMap<MockOp, usize>,
    next_id: u64,
}

impl State {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }
}

/// In-memory stand-in for both [`AgentApi`] and [`AppApi`].
///
/// App records behave like a tiny server: created workflows can be fetched
/// and updated, and creating a version makes it the app's current version.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<State>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend holding an app with no version and no workflow.
    pub fn with_app(app_id: &str, name: &str) -> Self {
        let backend = Self::new();
        backend.set_app(App {
            id: AppId::from_raw(app_id),
            name: name.to_string(),
            current_version_id: None,
            current_version: None,
        });
        backend
    }

    pub fn set_app(&self, app: App) {
        self.state.lock().app = Some(app);
    }

    pub fn app(&self) -> Option<App> {
        self.state.lock().app.clone()
    }

    pub fn push_stream(&self, stream: MockStream) {
        self.state.lock().streams.push_back(stream);
    }

    pub fn add_workflow(&self, workflow: Workflow) {
        let _ = self
            .state
            .lock()
            .workflows
            .insert(workflow.id.clone(), workflow);
    }

    pub fn workflow(&self, id: &WorkflowId) -> Option<Workflow> {
        self.state.lock().workflows.get(id).cloned()
    }

    pub fn versions(&self) -> Vec<AppVersion> {
        self.state.lock().versions.clone()
    }

    pub fn set_tables(&self, tables: Vec<DatabaseTable>) {
        self.state.lock().tables = tables;
    }

    /// Make the next call of `op` fail with `error`. Queues up.
    pub fn fail_next(&self, op: MockOp, error: ApiError) {
        self.state
            .lock()
            .failures
            .entry(op)
            .or_default()
            .push_back(error);
    }

    /// Delay every call of `op` before answering.
    pub fn set_delay(&self, op: MockOp, delay: Duration) {
        let _ = self.state.lock().delays.insert(op, delay);
    }

    /// Number of calls of `op`, including failed ones.
    pub fn calls(&self, op: MockOp) -> usize {
        self.state.lock().counts.get(&op).copied().unwrap_or(0)
    }

    pub fn chat_calls(&self) -> Vec<ChatCall> {
        self.state.lock().chats.clone()
    }

    pub fn confirm_calls(&self) -> Vec<ConfirmCall> {
        self.state.lock().confirms.clone()
    }

    pub fn cancel_calls(&self) -> Vec<SessionId> {
        self.state.lock().cancels.clone()
    }

    /// Count the call, wait out any delay, then apply an injected failure.
    async fn enter(&self, op: MockOp) -> Result<(), ApiError> {
        let (delay, failure) = {
            let mut state = self.state.lock();
            *state.counts.entry(op).or_default() += 1;
            let delay = state.delays.get(&op).copied();
            let failure = state.failures.get_mut(&op).and_then(VecDeque::pop_front);
            (delay, failure)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn check_app(&self, app_id: &AppId) -> Result<(), ApiError> {
        match &self.state.lock().app {
            Some(app) if &app.id == app_id => Ok(()),
            _ => Err(ApiError::NotFound(format!("app {app_id}"))),
        }
    }
}

#[async_trait]
impl AgentApi for MockBackend {
    async fn start_chat(
        &self,
        app_id: &AppId,
        message: &str,
        session_id: Option<&SessionId>,
    ) -> Result<EventStream, ApiError> {
        self.state.lock().chats.push(ChatCall {
            app_id: app_id.clone(),
            message: message.to_string(),
            session_id: session_id.cloned(),
        });
        self.enter(MockOp::StartChat).await?;
        let scripted = self.state.lock().streams.pop_front();
        match scripted {
            Some(stream) => stream.into_stream(),
            None => Err(ApiError::Status {
                status: 500,
                body: "MockBackend: no stream scripted".into(),
            }),
        }
    }

    async fn confirm_action(
        &self,
        _app_id: &AppId,
        session_id: &SessionId,
        action_id: &ActionId,
        approved: bool,
    ) -> Result<(), ApiError> {
        self.state.lock().confirms.push(ConfirmCall {
            session_id: session_id.clone(),
            action_id: action_id.clone(),
            approved,
        });
        self.enter(MockOp::Confirm).await
    }

    async fn cancel_session(&self, _app_id: &AppId, session_id: &SessionId) -> Result<(), ApiError> {
        self.state.lock().cancels.push(session_id.clone());
        self.enter(MockOp::Cancel).await
    }
}

#[async_trait]
impl AppApi for MockBackend {
    async fn get_app(&self, app_id: &AppId) -> Result<App, ApiError> {
        self.enter(MockOp::GetApp).await?;
        self.check_app(app_id)?;
        self.app()
            .ok_or_else(|| ApiError::NotFound(format!("app {app_id}")))
    }

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Workflow, ApiError> {
        self.enter(MockOp::GetWorkflow).await?;
        self.workflow(id)
            .ok_or_else(|| ApiError::NotFound(format!("workflow {id}")))
    }

    async fn create_workflow(&self, payload: &WorkflowPayload) -> Result<Workflow, ApiError> {
        self.enter(MockOp::CreateWorkflow).await?;
        let mut state = self.state.lock();
        let workflow = Workflow {
            id: WorkflowId::from_raw(state.next_id("wf")),
            name: payload.name.clone(),
            definition: payload.definition.clone(),
            version: Some(1),
        };
        let _ = state.workflows.insert(workflow.id.clone(), workflow.clone());
        Ok(workflow)
    }

    async fn update_workflow(
        &self,
        id: &WorkflowId,
        payload: &WorkflowPayload,
    ) -> Result<Workflow, ApiError> {
        self.enter(MockOp::UpdateWorkflow).await?;
        let mut state = self.state.lock();
        let workflow = state
            .workflows
            .get_mut(id)
            .ok_or_else(|| ApiError::NotFound(format!("workflow {id}")))?;
        workflow.name = payload.name.clone();
        workflow.definition = payload.definition.clone();
        workflow.version = Some(workflow.version.unwrap_or(0) + 1);
        Ok(workflow.clone())
    }

    async fn create_version(
        &self,
        app_id: &AppId,
        request: &CreateVersionRequest,
    ) -> Result<AppVersion, ApiError> {
        self.enter(MockOp::CreateVersion).await?;
        self.check_app(app_id)?;
        let mut state = self.state.lock();
        let id = state.next_id("ver");
        let version = AppVersion {
            id: VersionId::from_raw(id),
            version: Some(format!("v{}", state.versions.len() + 1)),
            workflow_id: Some(request.workflow_id.clone()),
            ui_schema: request.ui_schema.clone(),
            db_schema: request.db_schema.clone(),
            changelog: request.changelog.clone(),
            created_at: None,
        };
        state.versions.insert(0, version.clone());
        if let Some(app) = state.app.as_mut() {
            app.current_version_id = Some(version.id.clone());
            app.current_version = Some(version.clone());
        }
        Ok(version)
    }

    async fn list_versions(&self, app_id: &AppId) -> Result<VersionPage, ApiError> {
        self.enter(MockOp::ListVersions).await?;
        self.check_app(app_id)?;
        let items = self.versions();
        Ok(VersionPage {
            total: items.len() as u64,
            page: 1,
            page_size: 20,
            items,
        })
    }

    async fn list_tables(&self, app_id: &AppId) -> Result<Vec<DatabaseTable>, ApiError> {
        self.enter(MockOp::ListTables).await?;
        self.check_app(app_id)?;
        Ok(self.state.lock().tables.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::models::WorkflowDefinition;

    fn payload(name: &str) -> WorkflowPayload {
        WorkflowPayload {
            name: name.into(),
            definition: WorkflowDefinition::default(),
        }
    }

    #[tokio::test]
    async fn scripted_streams_in_order() {
        let backend = MockBackend::with_app("app_1", "Fleet");
        backend.push_stream(MockStream::reply("one"));
        backend.push_stream(MockStream::Rejected(ApiError::Network("refused".into())));

        let app = AppId::from_raw("app_1");
        let events: Vec<_> = backend.start_chat(&app, "a", None).await.unwrap().collect().await;
        assert_eq!(events.len(), 2);
        assert!(backend.start_chat(&app, "b", None).await.is_err());
        assert!(backend.start_chat(&app, "c", None).await.is_err());
        assert_eq!(backend.chat_calls().len(), 3);
        assert_eq!(backend.calls(MockOp::StartChat), 3);
    }

    #[tokio::test]
    async fn broken_stream_ends_with_transport_error() {
        let backend = MockBackend::with_app("app_1", "Fleet");
        backend.push_stream(MockStream::Broken(
            vec![AgentEvent::thought("x")],
            ApiError::StreamInterrupted("reset".into()),
        ));
        let events: Vec<_> = backend
            .start_chat(&AppId::from_raw("app_1"), "a", None)
            .await
            .unwrap()
            .collect()
            .await;
        assert!(events[0].is_ok());
        assert!(matches!(events[1], Err(ApiError::StreamInterrupted(_))));
    }

    #[tokio::test]
    async fn workflow_create_then_update_bumps_version() {
        let backend = MockBackend::new();
        let created = backend.create_workflow(&payload("A")).await.unwrap();
        let updated = backend.update_workflow(&created.id, &payload("B")).await.unwrap();
        assert_eq!(updated.name, "B");
        assert_eq!(updated.version, Some(2));
        assert_eq!(backend.calls(MockOp::CreateWorkflow), 1);
        assert_eq!(backend.calls(MockOp::UpdateWorkflow), 1);
    }

    #[tokio::test]
    async fn create_version_becomes_current() {
        let backend = MockBackend::with_app("app_1", "Fleet");
        let app_id = AppId::from_raw("app_1");
        let version = backend
            .create_version(
                &app_id,
                &CreateVersionRequest {
                    workflow_id: WorkflowId::from_raw("wf_9"),
                    ui_schema: None,
                    db_schema: None,
                    changelog: None,
                },
            )
            .await
            .unwrap();
        let app = backend.get_app(&app_id).await.unwrap();
        assert_eq!(app.current_version_id, Some(version.id));
        assert_eq!(app.bound_workflow_id().map(|w| w.as_str()), Some("wf_9"));
    }

    #[tokio::test]
    async fn injected_failure_applies_once() {
        let backend = MockBackend::with_app("app_1", "Fleet");
        backend.fail_next(MockOp::ListTables, ApiError::from_status(500, "db down".into()));
        let app_id = AppId::from_raw("app_1");
        assert!(backend.list_tables(&app_id).await.is_err());
        assert!(backend.list_tables(&app_id).await.is_ok());
        assert_eq!(backend.calls(MockOp::ListTables), 2);
    }
}

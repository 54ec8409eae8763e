use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use agentflow_core::models::{
    App, AppVersion, CreateVersionRequest, DatabaseTable, VersionPage, Workflow, WorkflowPayload,
};
use agentflow_core::{ActionId, AgentEvent, ApiError, AppId, SessionId, WorkflowId};

/// Ordered events of one agent stream. Finite: ends after `done`/`error`,
/// a transport failure, or when dropped.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent, ApiError>> + Send>>;

/// Conversation with the build agent.
#[async_trait]
pub trait AgentApi: Send + Sync {
    /// Open a chat stream. `session_id` continues an existing conversation.
    async fn start_chat(
        &self,
        app_id: &AppId,
        message: &str,
        session_id: Option<&SessionId>,
    ) -> Result<EventStream, ApiError>;

    /// Approve or reject a pending sensitive action.
    async fn confirm_action(
        &self,
        app_id: &AppId,
        session_id: &SessionId,
        action_id: &ActionId,
        approved: bool,
    ) -> Result<(), ApiError>;

    /// Ask the server to stop work for a session.
    async fn cancel_session(&self, app_id: &AppId, session_id: &SessionId) -> Result<(), ApiError>;
}

/// App, workflow, version and table records.
#[async_trait]
pub trait AppApi: Send + Sync {
    async fn get_app(&self, app_id: &AppId) -> Result<App, ApiError>;

    async fn get_workflow(&self, id: &WorkflowId) -> Result<Workflow, ApiError>;

    async fn create_workflow(&self, payload: &WorkflowPayload) -> Result<Workflow, ApiError>;

    async fn update_workflow(
        &self,
        id: &WorkflowId,
        payload: &WorkflowPayload,
    ) -> Result<Workflow, ApiError>;

    async fn create_version(
        &self,
        app_id: &AppId,
        request: &CreateVersionRequest,
    ) -> Result<AppVersion, ApiError>;

    async fn list_versions(&self, app_id: &AppId) -> Result<VersionPage, ApiError>;

    async fn list_tables(&self, app_id: &AppId) -> Result<Vec<DatabaseTable>, ApiError>;
}

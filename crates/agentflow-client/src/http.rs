use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method, RequestBuilder, Response};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use agentflow_core::models::{
    App, AppVersion, CreateVersionRequest, DatabaseTable, VersionPage, Workflow, WorkflowPayload,
};
use agentflow_core::{ActionId, ApiError, AppId, SessionId, WorkflowId};
use agentflow_settings::ApiSettings;

use crate::api::{AgentApi, AppApi, EventStream};
use crate::sse::SseEventStream;

const VERSION_PAGE_SIZE: u32 = 20;

/// Standard response wrapper: `{code, message, data}`.
#[derive(Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
}

#[derive(Serialize)]
struct ConfirmRequest<'a> {
    session_id: &'a str,
    action_id: &'a str,
    approved: bool,
}

#[derive(Serialize)]
struct CancelRequest<'a> {
    session_id: &'a str,
}

/// Backend access over HTTP with bearer auth.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    token: Option<SecretString>,
    request_timeout: Duration,
    stream_idle_timeout: Duration,
}

impl HttpBackend {
    pub fn new(settings: &ApiSettings) -> Result<Self, ApiError> {
        let client = Client::builder()
            .connect_timeout(settings.connect_timeout())
            .build()
            .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            token: settings.token.clone().map(SecretString::from),
            request_timeout: settings.request_timeout(),
            stream_idle_timeout: settings.stream_idle_timeout(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.request_accepting(method, path, "application/json")
    }

    fn request_accepting(&self, method: Method, path: &str, accept: &str) -> RequestBuilder {
        let mut req = self
            .client
            .request(method, format!("{}{}", self.base_url, path))
            .header("accept", accept);
        if let Some(token) = &self.token {
            req = req.header("authorization", format!("Bearer {}", token.expose_secret()));
        }
        req
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response, ApiError> {
        let resp = req
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::from_status(status, error_message(body)));
        }
        Ok(resp)
    }

    /// Send a plain request and return the envelope's `data` as JSON.
    async fn call(&self, req: RequestBuilder) -> Result<Value, ApiError> {
        let resp = self.send(req.timeout(self.request_timeout)).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        let envelope: Envelope<Value> = serde_json::from_slice(&bytes)?;
        Ok(envelope.data.unwrap_or(Value::Null))
    }
}

/// Prefer the envelope's `message` over the raw body.
fn error_message(body: String) -> String {
    serde_json::from_str::<Envelope<Value>>(&body)
        .ok()
        .and_then(|e| e.message)
        .filter(|m| !m.is_empty())
        .unwrap_or(body)
}

/// `data` is either the record or `{<key>: record}`.
fn unwrap_keyed<T: DeserializeOwned>(mut data: Value, key: &str) -> Result<T, ApiError> {
    if data.get(key).is_some_and(Value::is_object) {
        return Ok(serde_json::from_value(data[key].take())?);
    }
    Ok(serde_json::from_value(data)?)
}

/// Version lists arrive as `{items, total}`, `{versions}` or a bare array.
fn decode_version_page(data: Value) -> Result<VersionPage, ApiError> {
    if data.get("items").is_some_and(Value::is_array) {
        return Ok(serde_json::from_value(data)?);
    }
    let items = match data {
        Value::Array(_) => data,
        Value::Object(mut map) => map.remove("versions").unwrap_or(Value::Array(Vec::new())),
        _ => Value::Array(Vec::new()),
    };
    let items: Vec<AppVersion> = serde_json::from_value(items)?;
    Ok(VersionPage {
        total: items.len() as u64,
        page: 1,
        page_size: VERSION_PAGE_SIZE,
        items,
    })
}

#[async_trait]
impl AgentApi for HttpBackend {
    #[instrument(skip(self, message))]
    async fn start_chat(
        &self,
        app_id: &AppId,
        message: &str,
        session_id: Option<&SessionId>,
    ) -> Result<EventStream, ApiError> {
        let body = ChatRequest {
            message,
            session_id: session_id.map(|s| s.as_str()),
        };
        let req = self
            .request_accepting(
                Method::POST,
                &format!("/workspaces/{app_id}/agent/chat"),
                "text/event-stream",
            )
            .json(&body);
        let resp = self.send(req).await?;
        debug!("agent stream opened");

        let stream = SseEventStream::new(resp.bytes_stream(), self.stream_idle_timeout);
        Ok(Box::pin(stream))
    }

    #[instrument(skip(self))]
    async fn confirm_action(
        &self,
        app_id: &AppId,
        session_id: &SessionId,
        action_id: &ActionId,
        approved: bool,
    ) -> Result<(), ApiError> {
        let body = ConfirmRequest {
            session_id: session_id.as_str(),
            action_id: action_id.as_str(),
            approved,
        };
        let req = self
            .request(Method::POST, &format!("/workspaces/{app_id}/agent/confirm"))
            .json(&body);
        self.call(req).await.map(|_| ())
    }

    #[instrument(skip(self))]
    async fn cancel_session(&self, app_id: &AppId, session_id: &SessionId) -> Result<(), ApiError> {
        let body = CancelRequest {
            session_id: session_id.as_str(),
        };
        let req = self
            .request(Method::POST, &format!("/workspaces/{app_id}/agent/cancel"))
            .json(&body);
        self.call(req).await.map(|_| ())
    }
}

#[async_trait]
impl AppApi for HttpBackend {
    #[instrument(skip(self))]
    async fn get_app(&self, app_id: &AppId) -> Result<App, ApiError> {
        let data = self
            .call(self.request(Method::GET, &format!("/workspaces/{app_id}")))
            .await?;
        unwrap_keyed(data, "workspace")
    }

    #[instrument(skip(self))]
    async fn get_workflow(&self, id: &WorkflowId) -> Result<Workflow, ApiError> {
        let data = self
            .call(self.request(Method::GET, &format!("/workflows/{id}")))
            .await?;
        unwrap_keyed(data, "workflow")
    }

    #[instrument(skip(self, payload), fields(name = %payload.name))]
    async fn create_workflow(&self, payload: &WorkflowPayload) -> Result<Workflow, ApiError> {
        let data = self
            .call(self.request(Method::POST, "/workflows").json(payload))
            .await?;
        unwrap_keyed(data, "workflow")
    }

    #[instrument(skip(self, payload))]
    async fn update_workflow(
        &self,
        id: &WorkflowId,
        payload: &WorkflowPayload,
    ) -> Result<Workflow, ApiError> {
        let data = self
            .call(self.request(Method::PATCH, &format!("/workflows/{id}")).json(payload))
            .await?;
        unwrap_keyed(data, "workflow")
    }

    #[instrument(skip(self, request), fields(workflow_id = %request.workflow_id))]
    async fn create_version(
        &self,
        app_id: &AppId,
        request: &CreateVersionRequest,
    ) -> Result<AppVersion, ApiError> {
        let data = self
            .call(
                self.request(Method::POST, &format!("/workspaces/{app_id}/versions"))
                    .json(request),
            )
            .await?;
        unwrap_keyed(data, "version")
    }

    #[instrument(skip(self))]
    async fn list_versions(&self, app_id: &AppId) -> Result<VersionPage, ApiError> {
        let req = self
            .request(Method::GET, &format!("/workspaces/{app_id}/versions"))
            .query(&[("page", 1), ("page_size", VERSION_PAGE_SIZE)]);
        let data = self.call(req).await?;
        decode_version_page(data)
    }

    #[instrument(skip(self))]
    async fn list_tables(&self, app_id: &AppId) -> Result<Vec<DatabaseTable>, ApiError> {
        let data = self
            .call(self.request(Method::GET, &format!("/workspaces/{app_id}/database/tables")))
            .await?;
        match data {
            Value::Null => Ok(Vec::new()),
            Value::Array(_) => Ok(serde_json::from_value(data)?),
            mut other => match other.get_mut("tables").map(Value::take) {
                Some(Value::Null) | None => Ok(Vec::new()),
                Some(tables) => Ok(serde_json::from_value(tables)?),
            },
        }
    }
}

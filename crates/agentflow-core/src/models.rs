//! App, version, workflow and table records as the backend returns them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::{AppId, VersionId, WorkflowId};

/// An app under construction. `current_version` is embedded by the app fetch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: AppId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version_id: Option<VersionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_version: Option<AppVersion>,
}

impl App {
    /// Workflow bound to the current version, if any.
    pub fn bound_workflow_id(&self) -> Option<&WorkflowId> {
        self.current_version
            .as_ref()
            .and_then(|v| v.workflow_id.as_ref())
            .filter(|id| !id.is_empty())
    }

    pub fn has_current_version(&self) -> bool {
        self.current_version_id.as_ref().is_some_and(|id| !id.is_empty())
    }
}

/// Immutable snapshot binding a workflow, UI schema and DB schema to an app.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppVersion {
    pub id: VersionId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<WorkflowId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ui_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VersionPage {
    #[serde(default)]
    pub items: Vec<AppVersion>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub page_size: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateVersionRequest {
    pub workflow_id: WorkflowId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ui_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub db_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub changelog: Option<String>,
}

/// Graph part of a workflow document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub nodes: Vec<Value>,
    #[serde(default)]
    pub edges: Vec<Value>,
}

/// Persisted workflow document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub definition: WorkflowDefinition,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,
}

/// Body of a workflow create or update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkflowPayload {
    pub name: String,
    pub definition: WorkflowDefinition,
}

/// In-memory, editable mirror of a workflow document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WorkflowDraft {
    pub id: Option<WorkflowId>,
    pub name: String,
    pub nodes: Vec<Value>,
    pub edges: Vec<Value>,
    pub version: Option<u32>,
}

impl WorkflowDraft {
    /// Empty draft for an app that has no workflow yet.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn to_payload(&self) -> WorkflowPayload {
        WorkflowPayload {
            name: self.name.clone(),
            definition: WorkflowDefinition {
                nodes: self.nodes.clone(),
                edges: self.edges.clone(),
            },
        }
    }
}

impl From<Workflow> for WorkflowDraft {
    fn from(wf: Workflow) -> Self {
        Self {
            id: Some(wf.id),
            name: wf.name,
            nodes: wf.definition.nodes,
            edges: wf.definition.edges,
            version: wf.version,
        }
    }
}

/// Table in the app's database catalog.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseTable {
    pub name: String,
    #[serde(default)]
    pub row_count_est: i64,
    #[serde(default)]
    pub column_count: u32,
}

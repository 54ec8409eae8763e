//! Workflow save and one-time version binding.
//!
//! A save writes the draft as a workflow document (update when an id is
//! known, create otherwise) and, if the app has neither a current version nor
//! a bound workflow, creates the first [`AppVersion`](agentflow_core::models::AppVersion)
//! pointing at it. Steps are not transactional: a document write that
//! succeeded stays written when the version step fails, and the next save
//! starts over from the first step.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, instrument, warn};

use agentflow_client::AppApi;
use agentflow_core::models::{CreateVersionRequest, WorkflowDraft};
use agentflow_core::{AppId, VersionId, WorkflowId};

use crate::error::{SaveError, SaveStep};
use crate::reconciler::SharedAppData;

pub const VERSION_CHANGELOG: &str = "Workflow update";
pub const UNTITLED_WORKFLOW: &str = "Untitled workflow";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveStatus {
    Saved,
    Unsaved,
    Saving,
    Error,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveTrigger {
    Manual,
    Auto,
}

/// What a successful save did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveOutcome {
    pub workflow_id: WorkflowId,
    pub created_workflow: bool,
    pub created_version: Option<VersionId>,
}

struct DraftState {
    draft: WorkflowDraft,
    /// Bumped on every local edit or replacement.
    revision: u64,
    /// Revision last written to the backend.
    saved_revision: u64,
    status: SaveStatus,
    last_saved_at: Option<DateTime<Utc>>,
    last_error: Option<String>,
}

impl DraftState {
    fn is_dirty(&self) -> bool {
        self.revision != self.saved_revision
    }
}

/// Clears the busy flag however the save ends.
struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owner of the editable workflow draft and its save status.
pub struct WorkflowSaver {
    app_id: AppId,
    api: Arc<dyn AppApi>,
    data: SharedAppData,
    state: Mutex<DraftState>,
    busy: AtomicBool,
}

impl WorkflowSaver {
    pub fn new(app_id: AppId, api: Arc<dyn AppApi>, data: SharedAppData) -> Self {
        Self {
            app_id,
            api,
            data,
            state: Mutex::new(DraftState {
                draft: WorkflowDraft::default(),
                revision: 0,
                saved_revision: 0,
                status: SaveStatus::Saved,
                last_saved_at: None,
                last_error: None,
            }),
            busy: AtomicBool::new(false),
        }
    }

    pub fn draft(&self) -> WorkflowDraft {
        self.state.lock().draft.clone()
    }

    pub fn draft_id(&self) -> Option<WorkflowId> {
        self.state.lock().draft.id.clone()
    }

    pub fn status(&self) -> SaveStatus {
        self.state.lock().status
    }

    pub fn last_saved_at(&self) -> Option<DateTime<Utc>> {
        self.state.lock().last_saved_at
    }

    pub fn last_error(&self) -> Option<String> {
        self.state.lock().last_error.clone()
    }

    /// Local edits not yet written.
    pub fn is_dirty(&self) -> bool {
        self.state.lock().is_dirty()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Whether a timer tick should save: there are unsaved edits or the last
    /// attempt failed, and nothing is in flight.
    pub fn needs_autosave(&self) -> bool {
        if self.is_busy() {
            return false;
        }
        let state = self.state.lock();
        state.is_dirty() || state.status == SaveStatus::Error
    }

    /// Mutate the draft. The only way edits enter the draft.
    pub fn edit<F>(&self, f: F)
    where
        F: FnOnce(&mut WorkflowDraft),
    {
        let mut state = self.state.lock();
        f(&mut state.draft);
        state.revision += 1;
        if state.status != SaveStatus::Saving {
            state.status = SaveStatus::Unsaved;
        }
    }

    /// Swap in a draft freshly loaded from the backend. It is clean.
    pub fn replace_draft(&self, draft: WorkflowDraft) {
        let mut state = self.state.lock();
        debug!(workflow_id = ?draft.id, dirty = state.is_dirty(), "replacing draft");
        state.draft = draft;
        state.revision += 1;
        state.saved_revision = state.revision;
        if state.status != SaveStatus::Saving {
            state.status = SaveStatus::Saved;
        }
    }

    /// Write the draft. Fails with [`SaveError::Busy`] if a save is already
    /// running; never queues.
    #[instrument(skip(self), fields(app_id = %self.app_id))]
    pub async fn save(&self, trigger: SaveTrigger) -> Result<SaveOutcome, SaveError> {
        let Some(_busy) = BusyGuard::acquire(&self.busy) else {
            debug!("save skipped, another save is in flight");
            return Err(SaveError::Busy);
        };

        let (mut draft, revision) = {
            let mut state = self.state.lock();
            state.status = SaveStatus::Saving;
            (state.draft.clone(), state.revision)
        };
        let (bound, has_version, app_name, ui_schema, db_schema) = {
            let data = self.data.lock();
            let current = data.app.as_ref().and_then(|a| a.current_version.as_ref());
            (
                data.bound_workflow_id().cloned(),
                data.has_current_version(),
                data.app.as_ref().map(|a| a.name.clone()).unwrap_or_default(),
                current.and_then(|v| v.ui_schema.clone()),
                current.and_then(|v| v.db_schema.clone()),
            )
        };
        if draft.name.trim().is_empty() {
            draft.name = if app_name.is_empty() {
                UNTITLED_WORKFLOW.to_string()
            } else {
                app_name
            };
        }

        let result = self
            .write(&draft, bound.clone(), !has_version && bound.is_none(), ui_schema, db_schema)
            .await;

        match result {
            Ok(outcome) => {
                {
                    let mut state = self.state.lock();
                    if state.draft.id.is_none() {
                        state.draft.id = Some(outcome.workflow_id.clone());
                    }
                    state.saved_revision = state.saved_revision.max(revision);
                    state.status = if state.is_dirty() {
                        SaveStatus::Unsaved
                    } else {
                        SaveStatus::Saved
                    };
                    state.last_saved_at = Some(Utc::now());
                    state.last_error = None;
                }
                info!(
                    ?trigger,
                    workflow_id = %outcome.workflow_id,
                    created_workflow = outcome.created_workflow,
                    created_version = outcome.created_version.is_some(),
                    "workflow saved"
                );
                self.refresh_versions().await;
                Ok(outcome)
            }
            Err(e) => {
                let mut state = self.state.lock();
                state.status = SaveStatus::Error;
                state.last_error = Some(e.to_string());
                warn!(?trigger, error = %e, "workflow save failed");
                Err(e)
            }
        }
    }

    async fn write(
        &self,
        draft: &WorkflowDraft,
        bound: Option<WorkflowId>,
        bind_version: bool,
        ui_schema: Option<Value>,
        db_schema: Option<Value>,
    ) -> Result<SaveOutcome, SaveError> {
        let payload = draft.to_payload();
        let (workflow, created_workflow) = match bound.or_else(|| draft.id.clone()) {
            Some(id) => {
                let wf = self
                    .api
                    .update_workflow(&id, &payload)
                    .await
                    .map_err(|source| SaveError::Api {
                        step: SaveStep::UpdateWorkflow,
                        source,
                    })?;
                (wf, false)
            }
            None => {
                let wf = self
                    .api
                    .create_workflow(&payload)
                    .await
                    .map_err(|source| SaveError::Api {
                        step: SaveStep::CreateWorkflow,
                        source,
                    })?;
                // Record the id now so a failed version step is followed
                // by an update, not a second create.
                let mut state = self.state.lock();
                if state.draft.id.is_none() {
                    state.draft.id = Some(wf.id.clone());
                }
                (wf, true)
            }
        };

        {
            let mut state = self.state.lock();
            if state.draft.id.as_ref() == Some(&workflow.id) {
                state.draft.version = workflow.version;
            }
        }

        let created_version = if bind_version {
            let request = CreateVersionRequest {
                workflow_id: workflow.id.clone(),
                ui_schema: Some(ui_schema.unwrap_or_else(|| json!({}))),
                db_schema: Some(db_schema.unwrap_or_else(|| json!({}))),
                changelog: Some(VERSION_CHANGELOG.to_string()),
            };
            let version = self
                .api
                .create_version(&self.app_id, &request)
                .await
                .map_err(|source| SaveError::Api {
                    step: SaveStep::CreateVersion,
                    source,
                })?;
            let id = version.id.clone();
            if let Some(app) = self.data.lock().app.as_mut() {
                app.current_version_id = Some(id.clone());
                app.current_version = Some(version);
            }
            Some(id)
        } else {
            None
        };

        Ok(SaveOutcome {
            workflow_id: workflow.id,
            created_workflow,
            created_version,
        })
    }

    async fn refresh_versions(&self) {
        match self.api.list_versions(&self.app_id).await {
            Ok(versions) => self.data.lock().versions = versions,
            Err(e) => warn!(error = %e, "version list refresh after save failed"),
        }
    }
}

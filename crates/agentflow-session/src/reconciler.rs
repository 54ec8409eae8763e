//! Maps tool effects to reloads and keeps the app-data cache current.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, instrument, warn};

use agentflow_client::AppApi;
use agentflow_core::models::{App, DatabaseTable, VersionPage, WorkflowDraft};
use agentflow_core::{AffectedResource, ApiError, AppId, WorkflowId};

use crate::saver::WorkflowSaver;

/// A collaborator fetch that refreshes part of [`AppData`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReloadTarget {
    /// App record and, through it, the bound workflow.
    AppData,
    Tables,
    Versions,
}

/// Reloads owed for one mutated resource. Never more than one per event.
pub fn targets_for(resource: AffectedResource) -> &'static [ReloadTarget] {
    match resource {
        AffectedResource::Workflow | AffectedResource::UiSchema => &[ReloadTarget::AppData],
        AffectedResource::Database => &[ReloadTarget::Tables],
    }
}

/// Last fetched copy of the app's records.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppData {
    pub app: Option<App>,
    pub tables: Vec<DatabaseTable>,
    pub versions: VersionPage,
}

impl AppData {
    pub fn bound_workflow_id(&self) -> Option<&WorkflowId> {
        self.app.as_ref().and_then(App::bound_workflow_id)
    }

    pub fn has_current_version(&self) -> bool {
        self.app.as_ref().is_some_and(App::has_current_version)
    }
}

pub type SharedAppData = Arc<Mutex<AppData>>;

pub struct ResourceReconciler {
    app_id: AppId,
    api: Arc<dyn AppApi>,
    data: SharedAppData,
    saver: Arc<WorkflowSaver>,
}

impl ResourceReconciler {
    pub fn new(
        app_id: AppId,
        api: Arc<dyn AppApi>,
        data: SharedAppData,
        saver: Arc<WorkflowSaver>,
    ) -> Self {
        Self {
            app_id,
            api,
            data,
            saver,
        }
    }

    pub fn data(&self) -> AppData {
        self.data.lock().clone()
    }

    /// Initial fetch. The app itself is required; tables and versions are
    /// best-effort like any other reload.
    #[instrument(skip(self), fields(app_id = %self.app_id))]
    pub async fn load(&self) -> Result<(), ApiError> {
        self.reload_app().await?;
        let _ = self.reload(ReloadTarget::Tables).await;
        let _ = self.reload(ReloadTarget::Versions).await;
        Ok(())
    }

    /// Run one reload. Failures are logged and reported as `false`, never
    /// propagated.
    #[instrument(skip(self), fields(app_id = %self.app_id))]
    pub async fn reload(&self, target: ReloadTarget) -> bool {
        let result = match target {
            ReloadTarget::AppData => self.reload_app().await,
            ReloadTarget::Tables => self.reload_tables().await,
            ReloadTarget::Versions => self.reload_versions().await,
        };
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(?target, error = %e, kind = e.error_kind(), "reload failed");
                false
            }
        }
    }

    async fn reload_app(&self) -> Result<(), ApiError> {
        let app = self.api.get_app(&self.app_id).await?;
        let bound = app.bound_workflow_id().cloned();
        self.data.lock().app = Some(app);
        self.sync_draft(bound).await
    }

    /// A database that is not provisioned yet answers with an error; that
    /// reads as "no tables".
    async fn reload_tables(&self) -> Result<(), ApiError> {
        match self.api.list_tables(&self.app_id).await {
            Ok(tables) => {
                self.data.lock().tables = tables;
                Ok(())
            }
            Err(e) => {
                self.data.lock().tables.clear();
                Err(e)
            }
        }
    }

    async fn reload_versions(&self) -> Result<(), ApiError> {
        let versions = self.api.list_versions(&self.app_id).await?;
        self.data.lock().versions = versions;
        Ok(())
    }

    /// Replace the draft when the app now points at a different workflow.
    async fn sync_draft(&self, bound: Option<WorkflowId>) -> Result<(), ApiError> {
        let Some(bound) = bound else {
            return Ok(());
        };
        if self.saver.draft_id().as_ref() == Some(&bound) {
            return Ok(());
        }
        let workflow = self.api.get_workflow(&bound).await?;
        debug!(workflow_id = %bound, "bound workflow changed, replacing draft");
        self.saver.replace_draft(WorkflowDraft::from(workflow));
        Ok(())
    }
}

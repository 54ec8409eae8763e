//! # agentflow-session
//!
//! Client side of an agent-driven build session:
//!
//! - [`dispatcher`] folds stream events into [`SessionState`] and returns effects
//! - [`coordinator`] owns the in-flight stream and its cancellation
//! - [`confirmation`] gates the single pending sensitive action
//! - [`reconciler`] turns effects into reloads of the app-data cache
//! - [`saver`] and [`autosave`] persist the workflow draft
//! - [`BuildSession`] ties them together

pub mod autosave;
pub mod confirmation;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod reconciler;
pub mod saver;
pub mod session;
pub mod state;

pub use autosave::{spawn_autosave, AutosaveHandle};
pub use coordinator::{StreamCoordinator, StreamHandle, StreamItem, StreamSink};
pub use dispatcher::{dispatch, Effect};
pub use error::{SaveError, SaveStep, SessionError};
pub use reconciler::{targets_for, AppData, ReloadTarget, ResourceReconciler};
pub use saver::{SaveOutcome, SaveStatus, SaveTrigger, WorkflowSaver};
pub use session::BuildSession;
pub use state::{CenterView, CompletionSummary, PendingAction, SessionState};

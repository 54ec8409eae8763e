//! Errors returned by session operations and by workflow saves.

use agentflow_core::ApiError;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("a stream is already active")]
    AlreadyStreaming,

    #[error("message is empty")]
    EmptyMessage,

    #[error("no action is awaiting confirmation")]
    NoPendingAction,

    #[error("action already resolved")]
    AlreadyResolved,

    #[error("confirmation already in flight")]
    ResolutionInFlight,

    #[error("no agent session established")]
    NoSession,

    #[error("api error: {0}")]
    Api(#[from] ApiError),
}

/// Save step that failed. A retry always starts over from the first step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveStep {
    CreateWorkflow,
    UpdateWorkflow,
    CreateVersion,
}

impl std::fmt::Display for SaveStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::CreateWorkflow => "create workflow",
            Self::UpdateWorkflow => "update workflow",
            Self::CreateVersion => "create version",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SaveError {
    #[error("a save is already in flight")]
    Busy,

    #[error("{step} failed: {source}")]
    Api {
        step: SaveStep,
        #[source]
        source: ApiError,
    },
}

pub mod errors;
pub mod events;
pub mod ids;
pub mod models;
pub mod transcript;

pub use errors::ApiError;
pub use events::{AffectedResource, AgentEvent, EventPayload, ToolOutcome};
pub use ids::{ActionId, AppId, EntryId, SessionId, VersionId, WorkflowId};
pub use transcript::{EntryKind, Role, Transcript, TranscriptEntry};

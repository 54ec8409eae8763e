//! In-memory state of a build session: transcript, pending action, view
//! and the active stream slot.

use std::collections::BTreeSet;

use serde::Serialize;

use agentflow_core::{ActionId, AffectedResource, Transcript};

/// Main panel shown next to the conversation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CenterView {
    #[default]
    Workflow,
    Database,
    Preview,
}

/// The single sensitive action awaiting the user's decision.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PendingAction {
    pub action_id: ActionId,
    pub tool_name: String,
    /// Set only after the backend acknowledged the decision.
    pub resolved: bool,
    /// A decision has been sent and not yet answered.
    pub resolving: bool,
}

impl PendingAction {
    pub fn new(action_id: ActionId, tool_name: impl Into<String>) -> Self {
        Self {
            action_id,
            tool_name: tool_name.into(),
            resolved: false,
            resolving: false,
        }
    }

    /// Whether approve/reject should be offered.
    pub fn awaiting_decision(&self) -> bool {
        !self.resolved && !self.resolving
    }
}

/// What one stream changed, published on `done` when tools ran.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct CompletionSummary {
    pub affected: BTreeSet<AffectedResource>,
    pub tool_calls: usize,
}

impl CompletionSummary {
    pub fn touched(&self, resource: AffectedResource) -> bool {
        self.affected.contains(&resource)
    }
}

/// Client-side state of one build session. Memory only.
#[derive(Clone, Debug, Default)]
pub struct SessionState {
    pub transcript: Transcript,
    pub pending: Option<PendingAction>,
    pub center_view: CenterView,
    pub last_completion: Option<CompletionSummary>,
    stream: Option<u64>,
    run: CompletionSummary,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    /// Generation of the stream currently feeding this state.
    pub fn active_generation(&self) -> Option<u64> {
        self.stream
    }

    pub(crate) fn begin_stream(&mut self, generation: u64) {
        self.stream = Some(generation);
        self.run = CompletionSummary::default();
    }

    /// Idle again. Returns false if no stream was active, so callers can
    /// tell whether they were the one to end it.
    pub(crate) fn end_stream(&mut self) -> bool {
        self.stream.take().is_some()
    }

    pub(crate) fn run_mut(&mut self) -> &mut CompletionSummary {
        &mut self.run
    }

    pub(crate) fn take_run(&mut self) -> CompletionSummary {
        std::mem::take(&mut self.run)
    }
}

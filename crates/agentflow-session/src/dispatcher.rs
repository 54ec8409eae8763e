//! Event dispatcher: folds one agent event into [`SessionState`] and returns
//! the side effects the caller must run. No I/O happens here.

use tracing::debug;

use agentflow_core::{AffectedResource, AgentEvent, EntryKind, EventPayload, SessionId, ToolOutcome};

use crate::reconciler::{self, ReloadTarget};
use crate::state::{CenterView, PendingAction, SessionState};

/// Work requested by a state transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// The backend assigned or rotated the session id.
    PersistSession(SessionId),
    Reload(ReloadTarget),
}

pub const STOPPED_MESSAGE: &str = "Stopped by user.";
pub const STREAM_CLOSED_MESSAGE: &str = "stream closed unexpectedly";

/// Apply `event` to `state`. `held` is the session id currently stored.
pub fn dispatch(state: &mut SessionState, event: &AgentEvent, held: Option<&SessionId>) -> Vec<Effect> {
    let mut effects = Vec::new();

    if let Some(id) = &event.session_id {
        if held != Some(id) {
            effects.push(Effect::PersistSession(id.clone()));
        }
    }

    match &event.payload {
        EventPayload::Thought { content } => {
            state.transcript.upsert_thinking(content.as_str());
        }
        EventPayload::ToolCall { tool_name } => {
            state.run_mut().tool_calls += 1;
            state.transcript.push(
                EntryKind::ToolCall {
                    tool_name: tool_name.clone(),
                },
                format!("Calling tool: {tool_name}"),
            );
        }
        EventPayload::ToolResult {
            tool_name,
            outcome,
            affected_resource,
        } => {
            if let Some(resource) = inferred_resource(tool_name, outcome) {
                state.run_mut().affected.insert(resource);
            }
            state.transcript.push(
                EntryKind::ToolResult {
                    tool_name: tool_name.clone(),
                    outcome: outcome.clone(),
                    affected_resource: *affected_resource,
                },
                tool_result_text(outcome),
            );
            if let Some(resource) = *affected_resource {
                state.run_mut().affected.insert(resource);
                if resource == AffectedResource::Database {
                    state.center_view = CenterView::Database;
                }
                effects.extend(reconciler::targets_for(resource).iter().copied().map(Effect::Reload));
            }
        }
        EventPayload::ConfirmationRequired {
            action_id,
            tool_name,
            content,
        } => {
            if let Some(prev) = state.pending.as_ref().filter(|p| !p.resolved) {
                debug!(previous = %prev.action_id, action_id = %action_id, "overwriting unresolved pending action");
            }
            state.pending = Some(PendingAction::new(action_id.clone(), tool_name.as_str()));
            let text = content
                .clone()
                .unwrap_or_else(|| format!("Confirm action: {tool_name}"));
            state.transcript.push(
                EntryKind::Confirmation {
                    tool_name: tool_name.clone(),
                    action_id: action_id.clone(),
                },
                text,
            );
        }
        EventPayload::Message { content } => {
            state.transcript.push_assistant(content.as_str());
        }
        EventPayload::Done => {
            let run = state.take_run();
            if run.tool_calls > 0 {
                state.last_completion = Some(run);
            }
            state.end_stream();
            effects.push(Effect::Reload(ReloadTarget::AppData));
            effects.push(Effect::Reload(ReloadTarget::Versions));
        }
        EventPayload::Error { error } => {
            fail_stream(state, if error.is_empty() { "Unknown error" } else { error });
        }
        EventPayload::Unknown { event_type } => {
            debug!(event_type, "ignoring unknown event type");
        }
    }

    effects
}

/// End the stream with a visible error entry. Shared by protocol `error`
/// events and transport failures.
pub fn fail_stream(state: &mut SessionState, message: &str) {
    state.transcript.push_assistant(format!("Error: {message}"));
    state.end_stream();
}

/// User-initiated stop. Returns false when nothing was streaming.
pub fn stop_stream(state: &mut SessionState) -> bool {
    if !state.end_stream() {
        return false;
    }
    state.transcript.push_assistant(STOPPED_MESSAGE);
    true
}

fn tool_result_text(outcome: &ToolOutcome) -> String {
    outcome
        .output
        .clone()
        .filter(|o| !o.is_empty())
        .or_else(|| outcome.error.clone())
        .unwrap_or_default()
}

/// Resource a successful tool implies even when the event names none.
/// Feeds the completion summary only.
fn inferred_resource(tool_name: &str, outcome: &ToolOutcome) -> Option<AffectedResource> {
    if !outcome.success {
        return None;
    }
    match tool_name {
        "generate_ui_schema" | "modify_ui_schema" => Some(AffectedResource::UiSchema),
        "create_table" | "alter_table" | "insert_data" => Some(AffectedResource::Database),
        "create_workflow" | "modify_workflow" => Some(AffectedResource::Workflow),
        _ => None,
    }
}

//! Confirmation gate for the single pending sensitive action.
//!
//! Resolution is split around the network call: [`begin`] checks the
//! preconditions and marks the action as in flight, [`complete`] applies the
//! backend's answer. The action only counts as resolved once the backend
//! acknowledged it.

use tracing::{debug, warn};

use agentflow_core::{ActionId, ApiError, SessionId};

use crate::dispatcher::Effect;
use crate::error::SessionError;
use crate::reconciler::ReloadTarget;
use crate::state::SessionState;

pub const APPROVED_MESSAGE: &str = "Action approved. Executing...";
pub const REJECTED_MESSAGE: &str = "Action rejected.";

/// A decision on its way to the backend.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfirmTicket {
    pub session_id: SessionId,
    pub action_id: ActionId,
    pub approved: bool,
}

pub fn begin(
    state: &mut SessionState,
    session_id: Option<&SessionId>,
    approved: bool,
) -> Result<ConfirmTicket, SessionError> {
    let pending = state.pending.as_mut().ok_or(SessionError::NoPendingAction)?;
    if pending.resolved {
        return Err(SessionError::AlreadyResolved);
    }
    if pending.resolving {
        return Err(SessionError::ResolutionInFlight);
    }
    let session_id = session_id.cloned().ok_or(SessionError::NoSession)?;
    pending.resolving = true;
    debug!(action_id = %pending.action_id, approved, "sending confirmation");
    Ok(ConfirmTicket {
        session_id,
        action_id: pending.action_id.clone(),
        approved,
    })
}

/// Apply the backend's answer to `ticket`. A newer pending action that
/// replaced the ticket's one is left alone.
pub fn complete(
    state: &mut SessionState,
    ticket: &ConfirmTicket,
    result: Result<(), ApiError>,
) -> Vec<Effect> {
    let current = state
        .pending
        .as_mut()
        .filter(|p| p.action_id == ticket.action_id);

    match result {
        Ok(()) => {
            if let Some(pending) = current {
                pending.resolved = true;
                pending.resolving = false;
            }
            let outcome = if ticket.approved {
                APPROVED_MESSAGE
            } else {
                REJECTED_MESSAGE
            };
            state.transcript.push_assistant(outcome);
            if ticket.approved {
                vec![
                    Effect::Reload(ReloadTarget::AppData),
                    Effect::Reload(ReloadTarget::Versions),
                ]
            } else {
                Vec::new()
            }
        }
        Err(e) => {
            warn!(action_id = %ticket.action_id, error = %e, "confirmation failed");
            if let Some(pending) = current {
                pending.resolving = false;
            }
            state
                .transcript
                .push_assistant(format!("Error: Failed to process confirmation: {e}"));
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::Role;

    use crate::state::PendingAction;

    fn with_pending(id: &str) -> SessionState {
        let mut state = SessionState::new();
        state.pending = Some(PendingAction::new(ActionId::from_raw(id), "delete_table"));
        state
    }

    fn session() -> SessionId {
        SessionId::from_raw("s1")
    }

    #[test]
    fn preconditions_in_order() {
        let mut state = SessionState::new();
        assert!(matches!(
            begin(&mut state, Some(&session()), true),
            Err(SessionError::NoPendingAction)
        ));

        let mut state = with_pending("act_1");
        assert!(matches!(begin(&mut state, None, true), Err(SessionError::NoSession)));
        assert!(!state.pending.as_ref().unwrap().resolving);

        let ticket = begin(&mut state, Some(&session()), true).unwrap();
        assert_eq!(ticket.action_id, ActionId::from_raw("act_1"));
        assert!(matches!(
            begin(&mut state, Some(&session()), true),
            Err(SessionError::ResolutionInFlight)
        ));
    }

    #[test]
    fn approval_resolves_and_reloads() {
        let mut state = with_pending("act_1");
        let ticket = begin(&mut state, Some(&session()), true).unwrap();
        let effects = complete(&mut state, &ticket, Ok(()));

        assert!(state.pending.as_ref().unwrap().resolved);
        assert_eq!(state.transcript.last().unwrap().content, APPROVED_MESSAGE);
        assert_eq!(
            effects,
            vec![
                Effect::Reload(ReloadTarget::AppData),
                Effect::Reload(ReloadTarget::Versions)
            ]
        );

        assert!(matches!(
            begin(&mut state, Some(&session()), true),
            Err(SessionError::AlreadyResolved)
        ));
        assert_eq!(state.transcript.count(Role::Assistant), 1);
    }

    #[test]
    fn rejection_resolves_without_reload() {
        let mut state = with_pending("act_1");
        let ticket = begin(&mut state, Some(&session()), false).unwrap();
        assert!(complete(&mut state, &ticket, Ok(())).is_empty());
        assert!(state.pending.as_ref().unwrap().resolved);
        assert_eq!(state.transcript.last().unwrap().content, REJECTED_MESSAGE);
    }

    #[test]
    fn failure_leaves_action_open_for_retry() {
        let mut state = with_pending("act_1");
        let ticket = begin(&mut state, Some(&session()), true).unwrap();
        let effects = complete(&mut state, &ticket, Err(ApiError::Network("refused".into())));

        assert!(effects.is_empty());
        let pending = state.pending.as_ref().unwrap();
        assert!(!pending.resolved);
        assert!(pending.awaiting_decision());
        assert!(state
            .transcript
            .last()
            .unwrap()
            .content
            .starts_with("Error: Failed to process confirmation"));
        assert!(begin(&mut state, Some(&session()), true).is_ok());
    }

    #[test]
    fn newer_action_is_not_resolved_by_old_answer() {
        let mut state = with_pending("act_1");
        let ticket = begin(&mut state, Some(&session()), true).unwrap();
        state.pending = Some(PendingAction::new(ActionId::from_raw("act_2"), "drop_column"));

        complete(&mut state, &ticket, Ok(()));
        let pending = state.pending.as_ref().unwrap();
        assert_eq!(pending.action_id, ActionId::from_raw("act_2"));
        assert!(!pending.resolved);
    }
}

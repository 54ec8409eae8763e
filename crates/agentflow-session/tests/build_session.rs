//! End-to-end behaviour of `BuildSession` against the scripted mock backend.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use agentflow_client::{MockBackend, MockOp, MockStream};
use agentflow_core::models::{App, AppVersion, Workflow, WorkflowDefinition};
use agentflow_core::{
    AffectedResource, AgentEvent, ApiError, AppId, Role, SessionId, ToolOutcome, VersionId,
    WorkflowId,
};
use agentflow_session::{BuildSession, CenterView, SaveStatus, SessionError};
use agentflow_store::{Database, KvRepo, SessionIdentity, SqliteSessionStore};

const APP: &str = "app_1";

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn backend() -> Arc<MockBackend> {
    Arc::new(MockBackend::with_app(APP, "Fleet"))
}

fn session_with(backend: &Arc<MockBackend>, identity: Arc<SessionIdentity>) -> BuildSession {
    BuildSession::new(AppId::from_raw(APP), backend.clone(), backend.clone(), identity)
}

fn session(backend: &Arc<MockBackend>) -> BuildSession {
    session_with(backend, Arc::new(SessionIdentity::in_memory()))
}

fn sqlite_identity(db: &Database) -> Arc<SessionIdentity> {
    Arc::new(SessionIdentity::new(Box::new(SqliteSessionStore::new(
        KvRepo::new(db.clone()),
        "agentflow.agent_session_id",
    ))))
}

async fn run(session: &BuildSession, message: &str) {
    session.send(message).unwrap();
    session.settle().await;
    assert!(!session.is_streaming());
}

async fn wait_for_entries(session: &BuildSession, n: usize) {
    while session.transcript().len() < n {
        tokio::task::yield_now().await;
    }
}

// ---------------------------------------------------------------------------
// Transcript
// ---------------------------------------------------------------------------

#[tokio::test]
async fn first_session_id_is_persisted_and_message_shown() {
    let backend = backend();
    backend.push_stream(MockStream::Events(vec![
        AgentEvent::message("hi").with_session("s1"),
        AgentEvent::done().with_session("s1"),
    ]));
    let s = session(&backend);
    assert!(s.session_id().is_none());

    run(&s, "hello").await;
    assert_eq!(s.session_id(), Some(SessionId::from_raw("s1")));
    let transcript = s.transcript();
    assert_eq!(transcript.len(), 2);
    assert_eq!(transcript[0].role(), Role::User);
    assert_eq!(transcript[1].role(), Role::Assistant);
    assert_eq!(transcript[1].content, "hi");
}

#[tokio::test]
async fn next_message_resumes_the_session() {
    let backend = backend();
    backend.push_stream(MockStream::Events(vec![
        AgentEvent::message("one").with_session("s1"),
        AgentEvent::done(),
    ]));
    backend.push_stream(MockStream::Events(vec![
        AgentEvent::message("two").with_session("s2"),
        AgentEvent::done(),
    ]));
    let s = session(&backend);

    run(&s, "first").await;
    run(&s, "second").await;
    let calls = backend.chat_calls();
    assert_eq!(calls[0].session_id, None);
    assert_eq!(calls[1].session_id, Some(SessionId::from_raw("s1")));
    assert_eq!(s.session_id(), Some(SessionId::from_raw("s2")));
}

#[tokio::test]
async fn session_id_survives_restart() {
    let db = Database::in_memory().unwrap();
    let backend = backend();
    backend.push_stream(MockStream::Events(vec![AgentEvent::done().with_session("s1")]));
    let s = session_with(&backend, sqlite_identity(&db));
    run(&s, "hello").await;
    drop(s);

    let restarted = session_with(&backend, sqlite_identity(&db));
    assert_eq!(restarted.session_id(), Some(SessionId::from_raw("s1")));
}

#[tokio::test]
async fn thoughts_coalesce_and_other_events_map_one_to_one() {
    let backend = backend();
    backend.push_stream(MockStream::Events(vec![
        AgentEvent::thought("I"),
        AgentEvent::thought("I will"),
        AgentEvent::thought("I will add a table"),
        AgentEvent::tool_call("create_table"),
        AgentEvent::tool_result("create_table", ToolOutcome::ok("created orders"), None),
        AgentEvent::tool_call("insert_data"),
        AgentEvent::tool_result("insert_data", ToolOutcome::failed("constraint"), None),
        AgentEvent::message("Done."),
        AgentEvent::done(),
    ]));
    let s = session(&backend);
    run(&s, "add orders").await;

    let transcript = s.transcript();
    assert_eq!(transcript.iter().filter(|e| e.role() == Role::AgentThinking).count(), 1);
    assert_eq!(transcript[1].content, "I will add a table");
    assert_eq!(transcript.iter().filter(|e| e.role() == Role::ToolCall).count(), 2);
    assert_eq!(transcript.iter().filter(|e| e.role() == Role::ToolResult).count(), 2);
    assert_eq!(transcript.iter().filter(|e| e.role() == Role::Assistant).count(), 1);
    assert_eq!(transcript.len(), 1 + 1 + 4 + 1);

    let summary = s.last_completion().unwrap();
    assert_eq!(summary.tool_calls, 2);
    assert!(summary.touched(AffectedResource::Database));
}

#[tokio::test]
async fn protocol_error_ends_stream() {
    let backend = backend();
    backend.push_stream(MockStream::Events(vec![
        AgentEvent::thought("hmm"),
        AgentEvent::error("model overloaded"),
        AgentEvent::message("never shown"),
    ]));
    let s = session(&backend);
    run(&s, "hi").await;

    let last = s.transcript().last().cloned().unwrap();
    assert_eq!(last.content, "Error: model overloaded");
    assert!(s.last_completion().is_none());
    assert_eq!(backend.calls(MockOp::GetApp), 0);
}

#[tokio::test]
async fn transport_error_mid_stream_ends_stream_once() {
    let backend = backend();
    backend.push_stream(MockStream::Broken(
        vec![AgentEvent::message("partial")],
        ApiError::StreamInterrupted("connection reset".into()),
    ));
    let s = session(&backend);
    run(&s, "hi").await;

    let transcript = s.transcript();
    let errors: Vec<_> = transcript
        .iter()
        .filter(|e| e.content.starts_with("Error:"))
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].content.contains("connection reset"));

    // Recoverable by sending again.
    backend.push_stream(MockStream::reply("back"));
    run(&s, "retry").await;
    assert_eq!(s.transcript().last().unwrap().content, "back");
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_after_any_number_of_events_appends_one_stop_entry() {
    for events_before_stop in 0..4 {
        let backend = backend();
        let events: Vec<_> = (0..events_before_stop)
            .map(|i| AgentEvent::message(format!("m{i}")).with_session("s1"))
            .collect();
        backend.push_stream(MockStream::Hanging(events));
        let s = session(&backend);

        s.send("go").unwrap();
        wait_for_entries(&s, 1 + events_before_stop).await;
        assert!(s.is_streaming());
        assert!(s.stop());
        assert!(!s.stop());
        s.settle().await;

        assert!(!s.is_streaming());
        let transcript = s.transcript();
        assert_eq!(transcript.len(), 1 + events_before_stop + 1);
        assert_eq!(transcript.last().unwrap().content, "Stopped by user.");
        let expected_cancels = usize::from(events_before_stop > 0);
        assert_eq!(backend.cancel_calls().len(), expected_cancels);
    }
}

#[tokio::test]
async fn events_after_stop_are_discarded() {
    let backend = backend();
    backend.push_stream(MockStream::Paced(
        Duration::from_millis(20),
        vec![
            AgentEvent::message("first"),
            AgentEvent::message("second"),
            AgentEvent::done(),
        ],
    ));
    let s = session(&backend);
    s.send("go").unwrap();
    wait_for_entries(&s, 2).await;
    s.stop();
    tokio::time::sleep(Duration::from_millis(80)).await;
    s.settle().await;

    let transcript = s.transcript();
    assert_eq!(transcript.len(), 3);
    assert_eq!(transcript.last().unwrap().content, "Stopped by user.");
}

#[tokio::test]
async fn failed_server_cancel_is_not_surfaced() {
    let backend = backend();
    backend.fail_next(MockOp::Cancel, ApiError::Network("refused".into()));
    backend.push_stream(MockStream::Hanging(vec![AgentEvent::thought("x").with_session("s1")]));
    let s = session(&backend);
    s.send("go").unwrap();
    wait_for_entries(&s, 2).await;
    s.stop();
    s.settle().await;

    assert_eq!(backend.cancel_calls(), vec![SessionId::from_raw("s1")]);
    assert_eq!(s.transcript().last().unwrap().content, "Stopped by user.");
}

// ---------------------------------------------------------------------------
// Confirmation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn approve_then_approve_again_fails_without_second_entry() {
    let backend = backend();
    backend.push_stream(MockStream::Events(vec![
        AgentEvent::confirmation_required("act_1", "delete_table").with_session("s1"),
        AgentEvent::done(),
    ]));
    let s = session(&backend);
    run(&s, "drop the orders table").await;
    assert!(s.pending_action().unwrap().awaiting_decision());
    let get_app_before = backend.calls(MockOp::GetApp);

    s.approve().await.unwrap();
    s.settle().await;
    let entries_after_first = s.transcript().len();
    assert_eq!(s.transcript().last().unwrap().content, "Action approved. Executing...");
    assert!(s.pending_action().unwrap().resolved);
    assert_eq!(backend.calls(MockOp::GetApp), get_app_before + 1);

    assert!(matches!(s.approve().await, Err(SessionError::AlreadyResolved)));
    assert!(matches!(s.reject().await, Err(SessionError::AlreadyResolved)));
    assert_eq!(s.transcript().len(), entries_after_first);
    assert_eq!(backend.confirm_calls().len(), 1);
    assert_eq!(backend.confirm_calls()[0].action_id.as_str(), "act_1");
}

#[tokio::test]
async fn confirmation_failure_allows_retry() {
    let backend = backend();
    backend.push_stream(MockStream::Events(vec![
        AgentEvent::confirmation_required("act_1", "delete_table").with_session("s1"),
        AgentEvent::done(),
    ]));
    backend.fail_next(MockOp::Confirm, ApiError::from_status(502, "bad gateway".into()));
    let s = session(&backend);
    run(&s, "drop it").await;

    assert!(matches!(s.reject().await, Err(SessionError::Api(_))));
    assert!(!s.pending_action().unwrap().resolved);
    assert!(s
        .transcript()
        .last()
        .unwrap()
        .content
        .starts_with("Error: Failed to process confirmation"));

    s.reject().await.unwrap();
    assert_eq!(s.transcript().last().unwrap().content, "Action rejected.");
    assert_eq!(backend.confirm_calls().len(), 2);
}

#[tokio::test]
async fn confirmation_needs_a_session() {
    let backend = backend();
    backend.push_stream(MockStream::Events(vec![
        AgentEvent::confirmation_required("act_1", "delete_table"),
        AgentEvent::done(),
    ]));
    let s = session(&backend);
    assert!(matches!(s.approve().await, Err(SessionError::NoPendingAction)));
    run(&s, "drop it").await;
    assert!(matches!(s.approve().await, Err(SessionError::NoSession)));
    assert!(backend.confirm_calls().is_empty());
}

// ---------------------------------------------------------------------------
// Reloads
// ---------------------------------------------------------------------------

#[tokio::test]
async fn database_result_reloads_tables_and_switches_view() {
    let backend = backend();
    backend.push_stream(MockStream::Hanging(vec![AgentEvent::tool_result(
        "create_table",
        ToolOutcome {
            success: true,
            ..Default::default()
        },
        Some(AffectedResource::Database),
    )]));
    let s = session(&backend);
    assert_eq!(s.center_view(), CenterView::Workflow);

    s.send("add a table").unwrap();
    wait_for_entries(&s, 2).await;
    while backend.calls(MockOp::ListTables) == 0 {
        tokio::task::yield_now().await;
    }
    assert_eq!(s.center_view(), CenterView::Database);
    assert_eq!(backend.calls(MockOp::GetApp), 0);
    s.stop();
    s.settle().await;
}

#[tokio::test]
async fn done_reloads_app_and_versions() {
    let backend = backend();
    backend.push_stream(MockStream::reply("ok"));
    let s = session(&backend);
    run(&s, "hi").await;
    assert_eq!(backend.calls(MockOp::GetApp), 1);
    assert_eq!(backend.calls(MockOp::ListVersions), 1);
    assert_eq!(s.app_data().app.unwrap().name, "Fleet");
}

#[tokio::test]
async fn reload_failure_does_not_block_the_stream() {
    let backend = backend();
    backend.fail_next(MockOp::GetApp, ApiError::Network("refused".into()));
    backend.push_stream(MockStream::Events(vec![
        AgentEvent::tool_result("modify_ui_schema", ToolOutcome::ok("ok"), Some(AffectedResource::UiSchema)),
        AgentEvent::message("updated the form"),
        AgentEvent::done(),
    ]));
    let s = session(&backend);
    run(&s, "tweak").await;
    assert_eq!(s.transcript().last().unwrap().content, "updated the form");
    assert_eq!(backend.calls(MockOp::GetApp), 2);
}

#[tokio::test]
async fn workflow_created_by_agent_replaces_draft() {
    let backend = backend();
    let s = session(&backend);
    s.load().await.unwrap();
    assert!(s.saver().draft_id().is_none());

    backend.add_workflow(Workflow {
        id: WorkflowId::from_raw("wf_agent"),
        name: "Order intake".into(),
        definition: WorkflowDefinition {
            nodes: vec![json!({"id": "start"})],
            edges: vec![],
        },
        version: Some(1),
    });
    backend.set_app(App {
        id: AppId::from_raw(APP),
        name: "Fleet".into(),
        current_version_id: Some(VersionId::from_raw("v1")),
        current_version: Some(AppVersion {
            id: VersionId::from_raw("v1"),
            version: Some("v1".into()),
            workflow_id: Some(WorkflowId::from_raw("wf_agent")),
            ui_schema: None,
            db_schema: None,
            changelog: None,
            created_at: None,
        }),
    });
    backend.push_stream(MockStream::Events(vec![
        AgentEvent::tool_result("create_workflow", ToolOutcome::ok("ok"), Some(AffectedResource::Workflow)),
        AgentEvent::done(),
    ]));
    run(&s, "build the intake flow").await;

    let draft = s.saver().draft();
    assert_eq!(draft.id, Some(WorkflowId::from_raw("wf_agent")));
    assert_eq!(draft.nodes.len(), 1);
    assert_eq!(s.saver().status(), SaveStatus::Saved);
}

// ---------------------------------------------------------------------------
// Save and autosave
// ---------------------------------------------------------------------------

#[tokio::test]
async fn save_binds_version_once() {
    let backend = backend();
    let s = session(&backend);
    s.load().await.unwrap();

    s.save().await.unwrap();
    assert_eq!(backend.calls(MockOp::CreateWorkflow), 1);
    assert_eq!(backend.calls(MockOp::CreateVersion), 1);

    s.save().await.unwrap();
    assert_eq!(backend.calls(MockOp::CreateWorkflow), 1);
    assert_eq!(backend.calls(MockOp::UpdateWorkflow), 1);
    assert_eq!(backend.calls(MockOp::CreateVersion), 1);
    assert_eq!(s.app_data().versions.items.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn autosave_ticks_during_inflight_save_are_noops() {
    let backend = backend();
    backend.set_delay(MockOp::UpdateWorkflow, Duration::from_secs(75));
    let s = session(&backend);
    s.load().await.unwrap();
    s.save().await.unwrap();

    let _autosave = s.start_autosave(Duration::from_secs(30));
    s.saver().edit(|d| d.nodes.push(json!({"id": "n1"})));

    // Tick at 30s starts a save that runs until 105s; 60s and 90s are skipped.
    tokio::time::sleep(Duration::from_secs(100)).await;
    assert!(s.saver().is_busy());
    assert_eq!(backend.calls(MockOp::UpdateWorkflow), 1);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(!s.saver().is_busy());
    assert!(!s.saver().is_dirty());
    assert_eq!(backend.calls(MockOp::UpdateWorkflow), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_autosave_is_retried_from_scratch() {
    let backend = backend();
    let s = session(&backend);
    s.load().await.unwrap();
    backend.fail_next(MockOp::CreateWorkflow, ApiError::from_status(500, "boom".into()));
    let _autosave = s.start_autosave(Duration::from_secs(30));
    s.saver().edit(|d| d.name = "Intake".into());

    tokio::time::sleep(Duration::from_secs(31)).await;
    assert_eq!(s.saver().status(), SaveStatus::Error);
    assert!(s.saver().is_dirty());

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(s.saver().status(), SaveStatus::Saved);
    assert_eq!(backend.calls(MockOp::CreateWorkflow), 2);
    assert_eq!(backend.calls(MockOp::CreateVersion), 1);
}

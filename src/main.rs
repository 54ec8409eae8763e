use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;

use agentflow_client::HttpBackend;
use agentflow_core::{AppId, Role};
use agentflow_session::{BuildSession, ReloadTarget};
use agentflow_settings::{load_settings, load_settings_from_path, AgentflowSettings, SessionSettings};
use agentflow_store::{Database, KvRepo, SessionIdentity, SqliteSessionStore};
use agentflow_telemetry::{init_telemetry, TelemetryConfig};

#[derive(Parser)]
#[command(name = "agentflow", about = "Build an app together with its agent from the terminal")]
struct Cli {
    /// Settings file. Defaults to ~/.agentflow/settings.json.
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Talk to the build agent about one app.
    Chat {
        /// App (workspace) id.
        #[arg(long)]
        app: String,
    },
}

const HELP: &str = "\
commands:
  <text>     send a message to the agent
  /stop      stop the running answer
  /approve   approve the pending action
  /reject    reject the pending action
  /save      save the workflow now
  /status    show session and save state
  /new       start a new conversation
  /quit      exit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.settings {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("loading settings")?;

    let _telemetry = init_telemetry(TelemetryConfig::from_strings(
        &settings.logging.level,
        &settings.logging.module_levels,
        settings.logging.json,
    ));

    match cli.command {
        Command::Chat { app } => chat(&settings, AppId::from_raw(app)).await,
    }
}

/// Session id storage. Falls back to memory when the state file cannot be
/// opened.
fn open_identity(settings: &SessionSettings) -> SessionIdentity {
    if settings.store_path.is_empty() {
        return SessionIdentity::in_memory();
    }
    match Database::open(Path::new(&settings.store_path)) {
        Ok(db) => SessionIdentity::new(Box::new(SqliteSessionStore::new(
            KvRepo::new(db),
            settings.namespace.clone(),
        ))),
        Err(e) => {
            tracing::warn!(path = %settings.store_path, error = %e, "state store unavailable, session id kept in memory");
            SessionIdentity::in_memory()
        }
    }
}

async fn chat(settings: &AgentflowSettings, app_id: AppId) -> anyhow::Result<()> {
    let backend = Arc::new(HttpBackend::new(&settings.api).context("building HTTP client")?);
    let identity = Arc::new(open_identity(&settings.session));
    let persistent = identity.is_persistent();
    let session = Arc::new(BuildSession::new(
        app_id.clone(),
        backend.clone(),
        backend,
        identity,
    ));
    session
        .load()
        .await
        .with_context(|| format!("loading app {app_id}"))?;
    tracing::info!(app_id = %app_id, session_id = ?session.session_id(), persistent, "build session ready");

    let autosave = settings
        .autosave
        .enabled
        .then(|| session.start_autosave(settings.autosave.interval()));
    let printer = spawn_printer(session.clone());
    println!("{HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match handle_line(&session, line.trim()).await {
            Ok(true) => {}
            Ok(false) => break,
            Err(e) => eprintln!("error: {e:#}"),
        }
    }

    session.stop();
    if let Some(autosave) = autosave {
        autosave.shutdown().await;
    }
    if session.saver().is_dirty() {
        if let Err(e) = session.save().await {
            eprintln!("error: final save failed: {e}");
        }
    }
    session.settle().await;
    printer.abort();
    Ok(())
}

/// Returns false to quit.
async fn handle_line(session: &BuildSession, line: &str) -> anyhow::Result<bool> {
    match line {
        "" => {}
        "/quit" | "/exit" => return Ok(false),
        "/help" => println!("{HELP}"),
        "/stop" => {
            if !session.stop() {
                println!("nothing is running");
            }
        }
        "/approve" => session.approve().await?,
        "/reject" => session.reject().await?,
        "/save" => {
            let outcome = session.save().await?;
            println!("saved workflow {}", outcome.workflow_id);
            if let Some(version) = outcome.created_version {
                println!("bound to new version {version}");
            }
        }
        "/status" => print_status(session).await,
        "/new" => {
            session.reset()?;
            println!("new conversation");
        }
        cmd if cmd.starts_with('/') => println!("unknown command {cmd}, try /help"),
        message => {
            session.send(message)?;
        }
    }
    Ok(true)
}

async fn print_status(session: &BuildSession) {
    let _ = session.reload(ReloadTarget::Versions).await;
    let data = session.app_data();
    let saver = session.saver();
    println!(
        "app: {}",
        data.app.as_ref().map_or("?", |a| a.name.as_str())
    );
    println!(
        "session: {}",
        session
            .session_id()
            .map_or_else(|| "none".to_string(), |s| s.to_string())
    );
    println!("streaming: {}", session.is_streaming());
    match session.pending_action() {
        Some(p) if p.awaiting_decision() => {
            println!("pending: {} ({}), /approve or /reject", p.tool_name, p.action_id)
        }
        _ => println!("pending: none"),
    }
    println!(
        "workflow: {} [{:?}]",
        saver.draft_id().map_or_else(|| "unsaved".to_string(), |id| id.to_string()),
        saver.status()
    );
    if let Some(at) = saver.last_saved_at() {
        println!("last saved: {}", at.to_rfc3339());
    }
    if let Some(err) = saver.last_error() {
        println!("last save error: {err}");
    }
    println!("view: {:?}", session.center_view());
    println!("tables: {}, versions: {}", data.tables.len(), data.versions.total);
    if let Some(summary) = session.last_completion() {
        let touched: Vec<_> = summary.affected.iter().map(|r| r.as_str()).collect();
        println!(
            "last run: {} tool calls, touched [{}]",
            summary.tool_calls,
            touched.join(", ")
        );
    }
}

/// Echo new transcript entries. A trailing thinking entry is held back
/// until something follows it, since it is still being rewritten.
fn spawn_printer(session: Arc<BuildSession>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut printed = 0usize;
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        loop {
            ticker.tick().await;
            let entries = session.transcript();
            if entries.len() < printed {
                printed = 0;
            }
            let mut ready = entries.len();
            if session.is_streaming()
                && entries.last().is_some_and(|e| e.role() == Role::AgentThinking)
            {
                ready -= 1;
            }
            for entry in entries.iter().take(ready).skip(printed) {
                match entry.role() {
                    Role::User => {}
                    Role::Assistant => println!("agent> {}", entry.content),
                    Role::AgentThinking => println!("  (thinking) {}", entry.content),
                    Role::ToolCall => println!("  > {}", entry.content),
                    Role::ToolResult => println!("  < {}", entry.content),
                    Role::Confirmation => {
                        println!("  ! {} (/approve or /reject)", entry.content)
                    }
                }
            }
            printed = printed.max(ready);
        }
    })
}

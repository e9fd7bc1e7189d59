//! desk-runner: headless host for one Anomaly Desk view session.
//!
//! Usage:
//!   desk-runner --api http://localhost:8000
//!   desk-runner --config desk.json --identity-db ids.db --ipc-mode

use anomaly_desk_core::{
    config::DeskConfig,
    session::{DeskSession, DismissReport},
    sync::LoadPhase,
    types::{CollectionKind, ItemId},
};
use anyhow::Result;
use std::env;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    SetFilter { filter: String },
    SetTab { tab: CollectionKind },
    Dismiss { kind: CollectionKind, item_id: String },
    Reload,
    Quit,
}

enum Event {
    Line(Option<String>),
    Completed(DismissReport),
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let config = build_config(&args)?;

    if !ipc_mode {
        println!("Anomaly Desk: desk-runner");
        println!("  api:          {}", config.base_url());
        println!("  identity db:  {}", config.identity_db);
        println!();
    }

    let mut session = open_session(&config).await?;

    if ipc_mode {
        run_ipc_loop(&mut session).await?;
    } else {
        print_summary(&session);
    }

    session.teardown();
    Ok(())
}

fn build_config(args: &[String]) -> Result<DeskConfig> {
    let mut config = match flag_value(args, "--config") {
        Some(path) => DeskConfig::load(path)?,
        None => DeskConfig::default(),
    };
    if let Some(api) = flag_value(args, "--api") {
        config.api_base_url = api.to_string();
    }
    if let Some(db) = flag_value(args, "--identity-db") {
        config.identity_db = db.to_string();
    }
    Ok(config)
}

/// Build a session and run its initial load. A failed load is not fatal:
/// the session reports `failed` and the error through its view.
async fn open_session(config: &DeskConfig) -> Result<DeskSession> {
    let session = DeskSession::from_config(config)?;
    if let Err(e) = session.initialize().await {
        log::warn!("initial load failed: {e}");
    }
    Ok(session)
}

async fn run_ipc_loop(session: &mut DeskSession) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        let pending = session.has_pending();
        let event = tokio::select! {
            line = lines.next_line() => Event::Line(line?),
            Some(report) = session.next_completed(), if pending => Event::Completed(report),
        };

        let line = match event {
            Event::Completed(report) => {
                // A failed dismiss is already recorded as the view's error.
                if let Some(error) = &report.error {
                    log::warn!("dismiss {} failed: {error}", report.key);
                }
                emit_state(&mut stdout, session).await?;
                continue;
            }
            Event::Line(None) => break, // EOF
            Event::Line(Some(line)) => line,
        };
        if line.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&line) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                write_line(&mut stdout, &err_json.to_string()).await?;
                continue;
            }
        };

        match cmd {
            IpcCommand::Quit => break,
            IpcCommand::GetState => {}
            IpcCommand::SetFilter { filter } => session.set_filter(filter),
            IpcCommand::SetTab { tab } => session.set_tab(tab),
            IpcCommand::Dismiss { kind, item_id } => {
                if let Some(report) = session.spawn_dismiss(kind, ItemId::from(item_id)) {
                    log::info!("dismiss {} not started: {report:?}", report.key);
                }
            }
            IpcCommand::Reload => {
                if let Err(e) = session.reload().await {
                    log::warn!("reload failed: {e}");
                }
            }
        }
        emit_state(&mut stdout, session).await?;
    }
    Ok(())
}

async fn emit_state(stdout: &mut Stdout, session: &DeskSession) -> Result<()> {
    let view = session.view();
    write_line(stdout, &serde_json::to_string(&view)?).await
}

async fn write_line(stdout: &mut Stdout, line: &str) -> Result<()> {
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await?;
    Ok(())
}

fn print_summary(session: &DeskSession) {
    let view = session.view();

    println!("=== LOAD SUMMARY ===");
    println!("  phase:      {}", phase_label(view.phase));
    if let Some(error) = &view.error {
        println!("  error:      {error}");
    }
    println!("  anomalies:  {}", view.anomaly_count);
    println!("  autofixes:  {}", view.autofix_count);
    println!("  customers:  {}", view.customers.len());

    if !view.anomalies.is_empty() {
        println!();
        println!("=== ANOMALIES ===");
        for a in &view.anomalies {
            println!(
                "  {} | {} | {}",
                a.account_number,
                a.issue,
                a.recommended_fix.display()
            );
        }
    }

    println!();
    println!("=== AUTO-FIXES BY CHANGE TYPE ===");
    if view.change_type_summary.is_empty() {
        println!("  (none)");
    } else {
        for (change_type, count) in &view.change_type_summary {
            println!("  {change_type}: {count}");
        }
    }
}

fn phase_label(phase: LoadPhase) -> &'static str {
    match phase {
        LoadPhase::Loading => "loading",
        LoadPhase::Ready => "ready",
        LoadPhase::Failed => "failed",
    }
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}

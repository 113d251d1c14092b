mod academic;
mod access;
mod audit;
mod backup;
mod config;
mod db;
mod error;
mod fees;
mod ipc;
mod ledger;
mod money;
mod notify;
mod reports;
mod students;

use std::io::{self, BufRead, Write};
use tracing_subscriber::{fmt, EnvFilter};

fn init_tracing(filter: &str) {
    let filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("schoold=info"));
    // stdout carries the protocol; logs go to stderr.
    fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_ansi(false)
        .init();
}

fn main() {
    let env_file = dotenvy::dotenv();
    let config = config::Config::from_env();
    init_tracing(&config.log_filter);
    if let Ok(path) = &env_file {
        tracing::debug!(path = %path.display(), "loaded .env");
    }
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        notify_backend = ?config.notify_backend,
        "schoold starting"
    );

    let startup_workspace = config.workspace.clone();
    let mut state = ipc::AppState::new(config);
    if let Some(path) = startup_workspace {
        match db::open_db(&path) {
            Ok(conn) => {
                tracing::info!(workspace = %path.to_string_lossy(), "workspace opened");
                state.workspace = Some(path);
                state.db = Some(conn);
            }
            Err(e) => tracing::error!(
                workspace = %path.to_string_lossy(),
                error = %format!("{e:#}"),
                "could not open workspace; waiting for workspace.select"
            ),
        }
    }

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply without id.
                let reply = serde_json::json!({
                    "ok": false,
                    "error": { "code": "bad_json", "message": e.to_string() },
                });
                let _ = writeln!(stdout, "{}", reply);
                let _ = stdout.flush();
                continue;
            }
        };

        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
    tracing::info!("stdin closed; shutting down");
}

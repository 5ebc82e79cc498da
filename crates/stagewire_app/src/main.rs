// SPDX-License-Identifier: MIT OR Apache-2.0
//! stagewire host.
//!
//! Runs a dataflow graph and exposes it to one client speaking the JSON
//! envelope protocol over stdin/stdout.
//!
//! ## Usage
//!
//! ```text
//! stagewire [settings.ron]
//! ```
//!
//! Without an argument `stagewire.ron` in the working directory is used. A
//! missing settings file is created with defaults. Logs go to stderr; stdout
//! carries protocol traffic only.

mod graph_file;
mod settings;
mod stdio;

use graph_file::{load_graph, save_graph};
use settings::{Settings, SETTINGS_FILE_NAME};
use stagewire_graph::{register_builtin_nodes, GraphContext, IdGenerator, Registry};
use stagewire_protocol::{ConnectionRouter, MessageReceiver, Middleware};
use stdio::{spawn_stdout_writer, StdioSender, STDIO_IDENTITY};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

fn main() -> Result<(), Box<dyn Error>> {
    let settings_path = std::env::args_os()
        .nth(1)
        .map_or_else(|| PathBuf::from(SETTINGS_FILE_NAME), PathBuf::from);
    let first_run = !settings_path.exists();
    let settings = Settings::load_or_default(&settings_path)?;
    let settings_dir = settings_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
        .to_path_buf();

    init_tracing(&settings.log_filter);
    tracing::info!("Starting stagewire v{}", env!("CARGO_PKG_VERSION"));
    if first_run {
        match settings.save(&settings_path) {
            Ok(()) => tracing::info!(path = %settings_path.display(), "Wrote default settings"),
            Err(e) => tracing::warn!(path = %settings_path.display(), "Could not write default settings: {e}"),
        }
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(run(settings, settings_dir))
}

/// Install the stderr subscriber, `RUST_LOG` taking precedence over settings
fn init_tracing(default_filter: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

async fn run(settings: Settings, settings_dir: PathBuf) -> Result<(), Box<dyn Error>> {
    let mut registry = Registry::new();
    register_builtin_nodes(&mut registry);
    let ctx = GraphContext::new(IdGenerator::with_mode(settings.uid_mode.clone()), registry);

    let router = ConnectionRouter::new();
    let mut middleware = Middleware::new(&ctx, router.clone())
        .with_upload_root(settings.base_path(&settings_dir))
        .with_app_name(settings.name.clone());

    let graph_path = settings.graph_path(&settings_dir);
    if graph_path.exists() {
        // No ports exist yet, so numbering can start over for the load
        ctx.ids().reset_runtime_ids();
        if let Err(e) = load_graph(&graph_path, middleware.root_mut()) {
            tracing::error!(path = %graph_path.display(), "Failed to load graph: {e}");
        }
    }

    let (tx, writer) = spawn_stdout_writer();
    router.register(
        STDIO_IDENTITY,
        Arc::new(StdioSender::new(tx, settings.host_address.clone())),
    );
    middleware.on_connect(STDIO_IDENTITY);

    let mut reader = BufReader::new(io::stdin());
    let mut line = String::new();
    loop {
        line.clear();
        tokio::select! {
            read = reader.read_line(&mut line) => {
                match read {
                    Ok(0) => {
                        tracing::info!("stdin closed");
                        break;
                    }
                    Ok(_) => {}
                    // Still disconnect and autosave below
                    Err(e) => {
                        tracing::error!("stdin read error: {e}");
                        break;
                    }
                }
                let text = line.trim();
                if !text.is_empty() {
                    middleware.on_text(text, STDIO_IDENTITY);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted");
                break;
            }
        }
    }

    // Unregistering drops the last sender so the writer drains and exits
    middleware.on_disconnect(STDIO_IDENTITY);

    if settings.autosave {
        if let Err(e) = save_graph(&graph_path, middleware.root()) {
            tracing::error!(path = %graph_path.display(), "Failed to save graph: {e}");
        }
    }

    writer.await?;
    tracing::info!("Shutdown complete");
    Ok(())
}

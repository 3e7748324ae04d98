// Draft room entry point.
//
// Startup sequence:
// 1. Initialize tracing (log to file; stdout carries the protocol)
// 2. Load config
// 3. Open database
// 4. Import the player pool CSV, if configured
// 5. Build the engine and create any configured drafts storage lacks
// 6. Run the protocol loop on stdin/stdout until stdin closes

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::BufReader;
use tokio::sync::mpsc;
use tracing::info;

use draftroom_app::app;
use draftroom_app::auth::ConfigAuthorizer;
use draftroom_app::config;
use draftroom_app::pool;
use draftroom_core::db::Database;
use draftroom_core::engine::AllocationEngine;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Initialize tracing
    init_tracing()?;
    info!("Draft room starting up");

    // 2. Load config
    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: {} drafts, {} admins, {} team identities",
        config.drafts.len(),
        config.admin.identities.len(),
        config.identities.len()
    );

    // 3. Open database
    let db = Arc::new(Database::open(&config.database.path).context("failed to open database")?);
    info!("Database opened at {}", config.database.path);

    // 4. Import the player pool
    if let Some(csv) = &config.pool.csv {
        pool::import_pool_csv(&db, Path::new(csv))
            .with_context(|| format!("failed to import player pool from {csv}"))?;
    }

    // 5. Build the engine. Drafts already in storage resume where they left off.
    let (event_tx, event_rx) = mpsc::channel(1024);
    let engine = Arc::new(AllocationEngine::new(
        Arc::clone(&db),
        Arc::new(event_tx),
        config.engine.settings(),
    ));
    let created = app::ensure_configured_drafts(&engine, &config)
        .context("failed to create configured drafts")?;
    if !created.is_empty() {
        info!("Created drafts: {}", created.join(", "));
    }

    let auth = Arc::new(ConfigAuthorizer::from_config(&config));
    let state = Arc::new(app::AppState::new(engine, auth));

    // 6. Protocol loop
    info!("Ready; reading requests from stdin");
    app::run(
        BufReader::new(tokio::io::stdin()),
        tokio::io::stdout(),
        event_rx,
        state,
    )
    .await
    .context("application loop failed")?;

    info!("Draft room shut down cleanly");
    Ok(())
}

/// Initialize tracing to log to a file (stdout is the protocol stream).
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let log_dir = std::env::current_dir()?.join("logs");
    std::fs::create_dir_all(&log_dir)?;

    let log_file = std::fs::File::create(log_dir.join("draftroom.log"))?;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("draftroom_core=info,draftroom_app=info,warn")),
        )
        .with_writer(log_file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}

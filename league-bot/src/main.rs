// League bot entry point.
//
// Startup sequence:
// 1. Initialize tracing
// 2. Load config and the bot token
// 3. Open the ledger
// 4. Spawn the app loop
// 5. Run the gateway connection until it drops or Ctrl+C

use league_bot::app;
use league_bot::config;
use league_bot::db;
use league_bot::gateway;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    info!("League bot starting up");

    let config = config::load_config().context("failed to load configuration")?;
    info!(
        "Config loaded: prefix={:?}, {} team bindings",
        config.command_prefix,
        config.teams.len()
    );
    let token = config::token_from_env().context("bot token unavailable")?;

    let ledger = db::Ledger::open(&config.db_path)
        .with_context(|| format!("failed to open ledger at {}", config.db_path))?;
    info!("Ledger opened at {}", config.db_path);

    let (event_tx, event_rx) = mpsc::channel(256);
    let (action_tx, action_rx) = mpsc::channel(256);

    let gateway_url = config.gateway_url.clone();
    let state = app::AppState::new(config, ledger);
    let mut app_handle = tokio::spawn(app::run(event_rx, action_tx, state));

    // Gateway first: when both halves stop together its error is the cause.
    let result = tokio::select! {
        biased;
        result = gateway::run(&gateway_url, &token, event_tx, action_rx) => {
            result.context("gateway connection lost")
        }
        joined = &mut app_handle => {
            match joined {
                Ok(result) => result.context("application loop failed"),
                Err(e) => Err(anyhow::Error::new(e).context("application task panicked")),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
            Ok(())
        }
    };

    app_handle.abort();

    match &result {
        Ok(()) => info!("League bot shut down cleanly"),
        Err(e) => error!("League bot stopping: {:#}", e),
    }
    result
}

/// Initialize tracing to stderr, filtered by `RUST_LOG`.
fn init_tracing() -> anyhow::Result<()> {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("league_bot=info,warn")),
        )
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    Ok(())
}

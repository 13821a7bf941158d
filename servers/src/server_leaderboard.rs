//! # Leaderboard Server
//!
//! HTTP and WebSocket front end for the ranking engine.
//!
//! - **Scores**: `POST /scores` records a score for the calling user.
//! - **Leaderboards**: per game, global and per game per day, plus single-user
//!   rank lookups by id or username.
//! - **History**: `GET /users/{id}/history`, own history or any history for
//!   admins.
//! - **Live updates**: `/ws` pushes a fresh top-N snapshot of the game and
//!   global boards after every submission.
//!
//! Caller identity arrives in the `x-user-id` and `x-user-role` headers set
//! by the authenticating gateway in front of this process.
//!
//! Configuration is layered: defaults, then `server_leaderboard.conf` (JSON),
//! then environment variables and command-line flags. A `.env` file is read
//! at startup if present.

use std::time::Duration;

use anyhow::Result;
use tokio_graceful::Shutdown;
use tracing::{error, info};

mod leaderboard_logic;
use leaderboard_logic::{config, downstream, state};

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let config = config::load_config()?;
    let _log_guard = lib_ranking::loggers::setup_logging(
        "server_leaderboard",
        &config.settings.log_dir,
        &config.settings.log_level,
    )?;
    info!(port = config.port, "configuration loaded");

    let app_state = state::AppState::connect(&config.settings).await?;
    let listener = downstream::bind(config.port).await?;

    let shutdown: Shutdown = Shutdown::default();

    let server_state = app_state.clone();
    shutdown.spawn_task_fn(move |guard| async move {
        let signal = async move { guard.cancelled().await };
        if let Err(e) = downstream::run(listener, server_state, signal).await {
            error!("server error: {}", e);
        }
    });

    match shutdown.shutdown_with_limit(Duration::from_secs(10)).await {
        Ok(elapsed) => {
            info!(
                "shutdown: gracefully {}s after shutdown signal received",
                elapsed.as_secs_f64()
            );
        }
        Err(e) => {
            info!("shutdown: forcefully due to timeout: {}", e);
        }
    }

    app_state.broadcaster.shutdown().await;
    info!("Bye!");

    Ok(())
}

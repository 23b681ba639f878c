//! Main application entry point for the Waypoint relay
//!
//! Loads configuration, sets up logging, starts the relay server and waits for
//! a termination signal before shutting it down gracefully.

mod cli;
mod config;
mod logging;
mod signals;

use anyhow::{anyhow, Result};
use cli::CliArgs;
use config::AppConfig;
use std::sync::Arc;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info, warn};
use waypoint_server::RelayServer;

/// Interval between health lines.
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

/// Main application struct
pub struct Application {
    config: AppConfig,
    server: Arc<RelayServer>,
}

impl Application {
    /// Loads and validates configuration, sets up logging and creates the server.
    pub async fn new(args: CliArgs) -> Result<Self> {
        // Load configuration first (before logging setup)
        let mut config = AppConfig::load_from_file(&args.config_path).await?;
        config.apply_cli(&args);

        config
            .validate()
            .map_err(|e| anyhow!("Configuration validation failed: {e}"))?;

        logging::setup_logging(&config.logging.level, config.logging.json_format)?;

        let server = Arc::new(RelayServer::new(config.to_server_config()?));

        info!(
            "🚀 Waypoint relay v{} | config: {}",
            env!("CARGO_PKG_VERSION"),
            args.config_path.display()
        );

        Ok(Self { config, server })
    }

    /// Runs the server until a termination signal arrives, then shuts it down.
    pub async fn run(self) -> Result<()> {
        info!("📋 Configuration Summary:");
        info!("  🌐 Bind address: {}", self.config.server.bind_address);
        info!("  👥 Max connections: {}", self.config.server.max_connections);
        info!(
            "  📬 Mailbox capacity: {} frames",
            self.config.server.mailbox_capacity
        );
        info!(
            "  ⏱️ Write timeout: {}ms",
            self.config.server.write_timeout_ms
        );
        info!(
            "  🚦 Invalid messages: {:?}",
            self.config.server.invalid_message_policy
        );

        // Bind before reporting readiness so address errors surface immediately.
        let listener = self.server.bind()?;

        let mut server_handle = {
            let server = self.server.clone();
            tokio::spawn(async move { server.serve(listener).await })
        };

        let monitoring_handle = {
            let hub = self.server.hub();

            tokio::spawn(async move {
                let mut ticker = interval(HEALTH_INTERVAL);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                // The first tick completes immediately.
                ticker.tick().await;

                loop {
                    ticker.tick().await;

                    match hub.stats().await {
                        Ok(stats) => info!(
                            "📊 System Health - {} connections | {} players",
                            stats.connections, stats.players
                        ),
                        Err(_) => break,
                    }
                }
            })
        };

        info!("✅ Waypoint relay is now running!");
        info!("🛑 Press Ctrl+C to gracefully shutdown");

        let outcome = tokio::select! {
            signal = signals::wait_for_shutdown_signal() => {
                if let Err(e) = signal {
                    warn!("Signal handling failed, shutting down: {}", e);
                }
                info!("🛑 Shutdown signal received, initiating graceful shutdown...");
                self.server.shutdown().await?;
                server_handle.await
            }
            finished = &mut server_handle => finished,
        };

        monitoring_handle.abort();

        match outcome {
            Ok(Ok(())) => {
                info!("✅ Waypoint relay shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => Err(e.into()),
            Err(e) => Err(anyhow!("Server task failed: {e}")),
        }
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = CliArgs::parse();

    let app = match Application::new(args).await {
        Ok(app) => app,
        Err(e) => {
            eprintln!("❌ Failed to start application: {e:?}");
            std::process::exit(1);
        }
    };

    if let Err(e) = app.run().await {
        error!("❌ Application error: {:?}", e);
        std::process::exit(1);
    }

    Ok(())
}

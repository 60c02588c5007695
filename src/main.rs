mod api;
mod bootstrap;
mod config;
mod error;
mod filter;
mod pipeline;
mod platform;
mod reconciler;
mod shutdown;
mod store;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::Bot;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::ApiState;
use crate::bootstrap::Bootstrapper;
use crate::config::Config;
use crate::error::StartupError;
use crate::filter::ConversationFilter;
use crate::pipeline::Pipeline;
use crate::platform::telegram::{self, TelegramHandle};
use crate::reconciler::Reconciler;
use crate::shutdown::{AbortOnDrop, ShutdownCoordinator};
use crate::store::{SqliteStore, StoreLifecycle, StoreOptions};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,chatkeeper=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration; an explicit path must exist, the default may not
    let (config_path, required) = match std::env::args().nth(1) {
        Some(path) => (PathBuf::from(path), true),
        None => (PathBuf::from("config.toml"), false),
    };

    info!("Loading configuration from: {}", config_path.display());
    let config = Config::load(&config_path, required)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    info!("Configuration loaded successfully");
    info!("  Target chat: {}", config.telegram.target_chat_id);
    info!("  Preferred port: {}", config.server.port);
    info!("  Database: {}", config.storage.database_path.display());

    let filter = ConversationFilter::new(config.telegram.target_chat_id.clone());
    if !filter.is_configured() {
        error!("TARGET_ID is not set; every update will be rejected");
    }

    let options = StoreOptions {
        auto_migrate: config.storage.auto_migrate,
        operation_timeout: config.storage.operation_timeout(),
    };
    let store = Arc::new(
        SqliteStore::open(&config.storage.database_path, &options)
            .map_err(StartupError::StorageUnreachable)?,
    );

    let mut boot = Bootstrapper::new(config.server.clone());
    boot.check_storage(store.as_ref()).await?;
    let (listener, port) = boot.bind_listener().await?;

    let (server_stop_tx, server_stop_rx) = oneshot::channel::<()>();
    let app = api::router(ApiState::new(store.clone()));
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async {
                let _ = server_stop_rx.await;
            })
            .await
    });

    let pipeline = Arc::new(Pipeline::new(filter, Reconciler::new(store.clone())));
    boot.mark_running()?;
    info!("Startup phase: {:?}", boot.phase());
    let TelegramHandle {
        shutdown: dispatcher_token,
        task: dispatcher_task,
    } = telegram::spawn(Bot::new(&config.telegram.bot_token), pipeline);

    info!("Bot started, storage ready, API on port {}", port);

    shutdown::wait_for_signal().await;

    let mut coordinator = ShutdownCoordinator::new(config.shutdown.grace_period());

    // Dropped with the step if the drain overruns the grace period.
    let dispatcher_task = AbortOnDrop::new(dispatcher_task);
    coordinator.add_step("stop update delivery", move || async move {
        match dispatcher_token.shutdown() {
            // Waits for in-flight handlers to finish.
            Ok(stopped) => stopped.await,
            Err(_) => {
                warn!("Telegram dispatcher was not running");
                return Ok(());
            }
        }
        dispatcher_task
            .await
            .context("Telegram dispatcher task failed")
    });

    let closing = store.clone();
    coordinator.add_step("close storage", move || async move {
        closing.close().await.context("Failed to close message store")
    });

    coordinator.add_step("close listener", move || async move {
        let _ = server_stop_tx.send(());
        server
            .await
            .context("API server task failed")?
            .context("API server error")
    });

    let report = coordinator.run().await;
    if report.is_clean() {
        info!("Shutdown complete");
    } else {
        warn!("Shutdown finished with errors: {:?}", report.steps);
    }

    Ok(())
}

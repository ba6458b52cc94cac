use autodeploy::api;
use autodeploy::config::{ConfigSource, DEFAULT_CONFIG_PATH, load_config};
use autodeploy::logging::setup_logging;
use autodeploy::{AppState, SharedState};
use std::future;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();

    if let Err(e) = run().await {
        eprintln!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> autodeploy::error::Result<()> {
    let config_path =
        std::env::var("AUTODEPLOY_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

    let (config, source) = load_config(&config_path)?;
    let config = config.with_token_override(std::env::var("AUTODEPLOY_TOKEN").ok());

    let _log_guard = setup_logging(config.server_log_dir.as_deref())?;

    match &source {
        ConfigSource::File(path) => {
            info!("Config file found at {:?}. Using user defined values.", path)
        }
        ConfigSource::Defaults => {
            info!("No config file found at {:?}. Using default values.", config_path)
        }
    }
    if config.token.is_empty() {
        warn!("No token configured; clone URLs will carry an empty credential");
    }

    let state: SharedState = Arc::new(AppState::new(&config));
    let app = api::router(Arc::clone(&state), &config.path);

    let bind_address = config.bind_address();
    let listener = TcpListener::bind(&bind_address).await?;
    info!("Server listening on {} ...", bind_address);
    info!("Auto deploy path: {}", config.path);
    info!(
        "Build script {:?}, logs in {:?}",
        config.script, config.log_dir
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!(
        running = state.registry.running_count(),
        "Server stopped; waiting for running builds"
    );
    state.registry.shutdown(config.shutdown_grace()).await;
    info!("All builds finished");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

//! voiceline server entry point

use std::net::SocketAddr;

use tracing_subscriber::EnvFilter;

use voiceline_config::load_settings;
use voiceline_server::{create_router, AppState, ServerError};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let env_name = std::env::var("VOICELINE_ENV").ok();
    let settings = load_settings(env_name.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.observability.log_level));
    if settings.observability.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let addr: SocketAddr = format!("{}:{}", settings.server.host, settings.server.port)
        .parse()
        .map_err(|e| {
            ServerError::Config(voiceline_config::ConfigError::InvalidValue {
                field: "server.host/port".to_string(),
                message: format!("{e}"),
            })
        })?;

    let state = AppState::new(settings);
    let registry = state.registry.clone();
    let app = create_router(state);

    tracing::info!("voiceline listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received, closing sessions");
            registry.close_all().await;
        })
        .await?;

    Ok(())
}

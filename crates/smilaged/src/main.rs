use anyhow::Result;
use smilage_engine::backends::load_model_manager;
use smilage_engine::{Config, Gallery};
use tracing_subscriber::EnvFilter;

mod error;
mod routes;
mod state;
mod ws;

use state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("smilaged starting");

    let config = Config::load()?;
    tracing::info!(
        model_dir = %config.model_dir.display(),
        captures_dir = %config.captures_dir.display(),
        policy = ?config.capture_policy(),
        "configuration loaded"
    );

    // Model loading touches the filesystem and builds ONNX sessions.
    let models = {
        let config = config.clone();
        tokio::task::spawn_blocking(move || load_model_manager(&config)).await?
    };
    let gallery = Gallery::open(&config.captures_dir)?;

    let addr = format!("{}:{}", config.host, config.port);
    let app = routes::create_router(AppState::new(config, models, gallery));

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, "smilaged ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("smilaged shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

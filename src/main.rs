use std::sync::Arc;

use anyhow::Context;
use chess_vision::{
    Analyzer, EnginePool, GroqClient, OnnxDetector, artifacts::ArtifactStore, config::Config,
    server,
};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("chess_vision=info,tower_http=info")),
        )
        .init();

    let config = Config::parse();

    let detector = OnnxDetector::from_file(&config.detector_model, config.detector())
        .with_context(|| format!("loading detector model {}", config.detector_model.display()))?;
    let engines = EnginePool::new(config.engine());
    let generator = GroqClient::new(config.generator()).context("building generation client")?;
    let artifacts =
        ArtifactStore::open(&config.artifacts_dir, "/artifacts", config.manifest_cache)
            .await
            .with_context(|| {
                format!("opening artifact store {}", config.artifacts_dir.display())
            })?;

    let analyzer = Analyzer::new(
        Arc::new(detector),
        Arc::new(engines),
        Arc::new(generator),
        Arc::new(artifacts),
        config.pipeline(),
    );
    let app = server::router(Arc::new(analyzer));

    let listener = TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("binding {}", config.addr))?;
    info!(addr = %config.addr, "chess vision API listening");
    axum::serve(listener, app).await?;
    Ok(())
}

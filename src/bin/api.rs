use std::sync::Arc;
use taal_coach_orchestrator::{agent::build_orchestrator, api::start_server, Settings};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env()?;

    info!(
        port = settings.port,
        provider = ?settings.chat_provider,
        model = %settings.chat_model,
        "Taal coach orchestrator - API server"
    );

    let orchestrator = Arc::new(build_orchestrator(&settings)?);
    info!(model = orchestrator.model_name(), "Orchestrator initialized");

    start_server(orchestrator, settings.port).await?;

    Ok(())
}

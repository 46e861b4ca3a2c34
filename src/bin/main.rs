//! One chat turn from the command line.
//!
//! `orchestrator <user-id> <message...>`; the user id may be any string.

use taal_coach_orchestrator::{agent::build_orchestrator, api::parse_or_stable_uuid, Settings, TurnRequest};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let user = args.next().unwrap_or_default();
    let message = args.collect::<Vec<_>>().join(" ");

    let Some(user_id) = parse_or_stable_uuid(Some(&user)) else {
        eprintln!("usage: orchestrator <user-id> <message...>");
        std::process::exit(2);
    };
    if message.trim().is_empty() {
        eprintln!("usage: orchestrator <user-id> <message...>");
        std::process::exit(2);
    }

    let settings = Settings::from_env()?;
    let orchestrator = build_orchestrator(&settings)?;

    info!(user_id = %user_id, model = orchestrator.model_name(), "Running one chat turn");

    let outcome = orchestrator
        .run_turn(TurnRequest {
            user_id: Some(user_id.to_string()),
            ..TurnRequest::new(message)
        })
        .await?;

    println!("{}", outcome.response);

    // let memory consolidation finish before the process exits
    if let Some(task) = outcome.memory_task {
        task.await?;
    }

    Ok(())
}

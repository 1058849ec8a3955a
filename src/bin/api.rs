use financial_analyst_agent::{
    agent::{AgentConfig, Orchestrator},
    api::start_server,
    correction::CorrectionPolicy,
    reasoner::GeminiReasoner,
    sandbox::{Sandbox, SandboxConfig},
    tools::create_default_registry,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let gemini_api_key = std::env::var("GEMINI_API_KEY").unwrap_or_else(|_| {
        eprintln!("⚠️  GEMINI_API_KEY not set in .env");
        eprintln!("📌 See .env.example for setup instructions");
        String::new()
    });

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8000".to_string())
        .parse()?;

    info!("🚀 Financial Analyst Agent - API Server");
    info!("📍 Port: {}", api_port);

    // Create components
    let sandbox = Arc::new(Sandbox::new(SandboxConfig::from_env()));
    let registry = create_default_registry(sandbox);
    let reasoner = Box::new(GeminiReasoner::new(gemini_api_key, registry.describe()));

    let orchestrator = Arc::new(Orchestrator::new(
        reasoner,
        registry,
        CorrectionPolicy::default(),
        AgentConfig::from_env(),
    ));

    info!("✅ Agent initialized");
    info!("📡 Starting API server...");

    start_server(orchestrator, api_port).await?;

    Ok(())
}

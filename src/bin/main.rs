use financial_analyst_agent::{
    agent::{AgentConfig, Orchestrator},
    correction::CorrectionPolicy,
    models::{AgentState, ReasoningOutcome, Role, ToolRequest},
    reasoner::ScriptedReasoner,
    sandbox::{Sandbox, SandboxConfig},
    tools::{create_default_registry, PYTHON_INTERPRETER},
};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    info!("Financial Analyst Agent - demo run");

    // Offline demo: a scripted reasoner computes a volatility figure in the
    // sandbox and reports it, exercising the whole loop without API keys.
    let sandbox = Arc::new(Sandbox::new(SandboxConfig::from_env()));
    let registry = create_default_registry(sandbox);

    let code = r#"
prices = [189.84, 191.04, 188.32, 192.53, 191.45]
returns = [(b - a) / a for a, b in zip(prices, prices[1:])]
mean = sum(returns) / len(returns)
variance = sum((r - mean) ** 2 for r in returns) / len(returns)
print(f"daily volatility: {variance ** 0.5 * 100:.2f}%")
"#;

    let reasoner = ScriptedReasoner::new([
        ReasoningOutcome::ToolCall(ToolRequest {
            tool_name: PYTHON_INTERPRETER.to_string(),
            arguments: json!({ "code": code }),
        }),
        ReasoningOutcome::FinalAnswer(
            "Based on last week's closes, AAPL's daily volatility was about 1.4%.".to_string(),
        ),
    ]);

    let orchestrator = Orchestrator::new(
        Box::new(reasoner),
        registry,
        CorrectionPolicy::default(),
        AgentConfig::from_env(),
    );

    let question = "What was AAPL's daily price volatility last week?";
    info!(question, "Running agent");

    let final_state = orchestrator.run(AgentState::from_question(question)).await;

    println!("\n=== AGENT RESULT ===");
    println!("Iterations: {}", final_state.iteration_count);
    println!("Artifacts:  {}", final_state.collected_artifacts.len());
    println!("\nTranscript:");
    for message in &final_state.messages {
        let role = match message.role {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        };
        println!("  [{}] {}", role, message.content);
    }

    Ok(())
}

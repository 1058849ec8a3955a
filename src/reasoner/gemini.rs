//! Gemini-powered reasoner
//!
//! Renders the conversation into a prompt, asks the model to answer with a
//! single strict JSON object, and validates that object at the boundary.
//! A schema violation is a `MalformedReasoning` error; untyped model
//! output never reaches the orchestrator.

use crate::error::AgentError;
use crate::gemini::GeminiClient;
use crate::models::{Message, ReasoningOutcome, Role, ToolRequest};
use crate::sandbox::{ARTIFACT_END, ARTIFACT_START};
use crate::Result;
use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use super::Reasoner;

/// Retrieved data beyond this is summarized away to keep prompts bounded.
const MAX_DATA_CONTEXT_CHARS: usize = 2000;

pub struct GeminiReasoner {
    client: GeminiClient,
    tool_catalog: String,
}

impl GeminiReasoner {
    /// `tool_catalog` is the registry's one-line-per-tool description,
    /// injected into the system prompt so the model only requests tools
    /// that actually exist.
    pub fn new(api_key: String, tool_catalog: String) -> Self {
        Self {
            client: GeminiClient::new(api_key),
            tool_catalog,
        }
    }

    fn system_prompt(&self) -> String {
        format!(
            r#"You are a financial research agent. You answer questions about markets,
stocks, and economic data by searching the web for live data and by writing
Python code to compute metrics and render charts.

Available tools:
{tools}

On every turn respond with EXACTLY ONE JSON object, no prose, no markdown:
- To call a tool:   {{"action": "tool", "tool_name": "<name>", "arguments": {{...}}}}
- To answer:        {{"action": "final", "answer": "<your answer>"}}

When writing code for python_interpreter, pass it as the "code" argument and:
- Use yfinance, pandas, numpy, matplotlib
- Validate data exists before accessing it (check for empty frames)
- Convert Series values to float() before formatting
- For charts: matplotlib.use('Agg'), render to BytesIO, base64-encode, then
  print the payload between {start} and {end} markers on their own lines
- Print every value you need to see; unprinted expressions are lost

Answer with actual numbers from tool output. If a tool result already
contains what the user asked for, emit the final answer instead of calling
more tools."#,
            tools = self.tool_catalog,
            start = ARTIFACT_START,
            end = ARTIFACT_END,
        )
    }
}

#[async_trait]
impl Reasoner for GeminiReasoner {
    async fn reason(
        &self,
        conversation: &[Message],
        data_context: Option<&str>,
    ) -> Result<ReasoningOutcome> {
        let prompt = render_transcript(conversation, data_context);

        let (raw, confidence) = self.client.generate(&self.system_prompt(), &prompt).await?;

        debug!(confidence, "Reasoner: model responded");

        parse_outcome(&raw)
    }
}

/// Render the full conversation (not just the last turn) plus retrieved
/// data into the user prompt.
fn render_transcript(conversation: &[Message], data_context: Option<&str>) -> String {
    let mut out = String::new();

    if let Some(ctx) = data_context {
        let truncated: String = ctx.chars().take(MAX_DATA_CONTEXT_CHARS).collect();
        out.push_str("Retrieved data so far:\n");
        out.push_str(&truncated);
        out.push_str("\n\n");
    }

    out.push_str("Conversation:\n");
    for message in conversation {
        let role = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::Tool => "Tool result",
        };
        out.push_str(role);
        out.push_str(": ");
        out.push_str(&message.content);
        out.push('\n');
    }

    out.push_str("\nDecide the next step.");
    out
}

/// Validate raw model output against the outcome schema.
fn parse_outcome(raw: &str) -> Result<ReasoningOutcome> {
    let json_str = extract_json_object(raw).ok_or_else(|| {
        AgentError::MalformedReasoning(format!(
            "no JSON object in model output: {}",
            snippet(raw)
        ))
    })?;

    let value: Value = serde_json::from_str(json_str).map_err(|e| {
        AgentError::MalformedReasoning(format!("model output is not valid JSON: {}", e))
    })?;

    match value.get("action").and_then(Value::as_str) {
        Some("tool") => {
            let tool_name = value
                .get("tool_name")
                .and_then(Value::as_str)
                .filter(|name| !name.trim().is_empty())
                .ok_or_else(|| {
                    AgentError::MalformedReasoning(
                        "tool action without a tool_name".to_string(),
                    )
                })?;

            let arguments = value
                .get("arguments")
                .cloned()
                .unwrap_or_else(|| Value::Object(Default::default()));

            if !arguments.is_object() {
                return Err(AgentError::MalformedReasoning(
                    "tool arguments must be a JSON object".to_string(),
                ));
            }

            Ok(ReasoningOutcome::ToolCall(ToolRequest {
                tool_name: tool_name.to_string(),
                arguments,
            }))
        }
        Some("final") => {
            let answer = value
                .get("answer")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    AgentError::MalformedReasoning(
                        "final action without an answer".to_string(),
                    )
                })?;

            Ok(ReasoningOutcome::FinalAnswer(answer.to_string()))
        }
        other => Err(AgentError::MalformedReasoning(format!(
            "unknown action: {:?}",
            other
        ))),
    }
}

/// Find the outermost `{ ... }` block, tolerating markdown fences and prose
/// the model sometimes wraps around its JSON.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end >= start).then(|| &text[start..=end])
}

fn snippet(text: &str) -> String {
    text.chars().take(120).collect()
}

//! Tool trait, registry, and dispatch
//!
//! Tools are the agent's external capabilities: live web retrieval and
//! Python code execution. Dispatch validates the requested name and
//! arguments before any tool body runs, and every failure is classified
//! into the closed error taxonomy so the correction policy can act on it.

use crate::models::{ToolError, ToolErrorKind, ToolOutput, ToolRequest, ToolResult};
use crate::sandbox::{ExecutionResult, Sandbox};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Retrieval tool name, as the reasoner requests it.
pub const WEB_SEARCH: &str = "web_search";
/// Code-execution tool name.
pub const PYTHON_INTERPRETER: &str = "python_interpreter";

/// Trait for a single callable capability.
#[async_trait::async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;
    /// JSON schema for the tool's arguments; dispatch enforces `required`.
    fn parameters_schema(&self) -> Value;
    async fn execute(&self, request: &ToolRequest) -> ToolResult;
}

/// Tool registry for looking up and executing tools
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn list(&self) -> Vec<&str> {
        self.tools.keys().map(|s| s.as_str()).collect()
    }

    /// One line per tool, for the reasoner's system prompt.
    pub fn describe(&self) -> String {
        let mut lines: Vec<String> = self
            .tools
            .values()
            .map(|tool| format!("- {}: {}", tool.name(), tool.description()))
            .collect();
        lines.sort();
        lines.join("\n")
    }

    /// Validate and execute a tool request.
    ///
    /// An unknown tool name or arguments that fail the declared schema are
    /// rejected here; no tool body runs for either.
    pub async fn dispatch(&self, request: &ToolRequest) -> ToolResult {
        let Some(tool) = self.get(&request.tool_name) else {
            warn!(tool_name = %request.tool_name, "Dispatch: unknown tool");
            return Err(ToolError::new(
                ToolErrorKind::UnknownTool,
                format!("no tool named '{}' is registered", request.tool_name),
            ));
        };

        validate_arguments(&tool.parameters_schema(), &request.arguments)?;

        let start = Instant::now();
        let result = tool.execute(request).await;

        debug!(
            tool_name = %request.tool_name,
            elapsed_ms = start.elapsed().as_millis() as u64,
            ok = result.is_ok(),
            "Dispatch complete"
        );

        result
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Check a request's arguments against a tool's declared schema.
///
/// Enforces that arguments form a JSON object and that every `required`
/// parameter is present and non-null.
fn validate_arguments(schema: &Value, arguments: &Value) -> Result<(), ToolError> {
    let Some(arguments) = arguments.as_object() else {
        return Err(ToolError::new(
            ToolErrorKind::MalformedToolRequest,
            "arguments must be a JSON object",
        ));
    };

    let required = schema
        .get("required")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for name in required.iter().filter_map(Value::as_str) {
        match arguments.get(name) {
            Some(value) if !value.is_null() => {}
            _ => {
                return Err(ToolError::new(
                    ToolErrorKind::MalformedToolRequest,
                    format!("missing required argument '{}'", name),
                ))
            }
        }
    }

    Ok(())
}

/// Remove a markdown code fence the model may have wrapped around a script.
pub fn strip_code_fences(code: &str) -> &str {
    let mut code = code.trim();
    if let Some(rest) = code.strip_prefix("```python") {
        code = rest;
    } else if let Some(rest) = code.strip_prefix("```") {
        code = rest;
    }
    if let Some(rest) = code.strip_suffix("```") {
        code = rest;
    }
    code.trim()
}

//
// ================= Web Search =================
//

/// Live retrieval via a Tavily-style search API.
pub struct WebSearchTool {
    client: Client,
    api_key: String,
    endpoint: String,
    max_results: usize,
}

impl WebSearchTool {
    pub fn new(api_key: String, endpoint: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .timeout(Duration::from_secs(15))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            client,
            api_key,
            endpoint,
            max_results: 3,
        }
    }

    pub fn from_env() -> Self {
        let api_key = env::var("TAVILY_API_KEY").unwrap_or_default();
        let endpoint = env::var("SEARCH_API_URL")
            .unwrap_or_else(|_| "https://api.tavily.com/search".to_string());
        Self::new(api_key, endpoint)
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    content: String,
}

#[async_trait::async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &'static str {
        WEB_SEARCH
    }

    fn description(&self) -> &'static str {
        "Search the web for live market data, prices, and financial news"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "Search query"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, request: &ToolRequest) -> ToolResult {
        let query = request
            .arguments
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ToolError::new(ToolErrorKind::MalformedToolRequest, "expected 'query'")
            })?;

        if self.api_key.is_empty() {
            return Err(ToolError::new(
                ToolErrorKind::Unavailable,
                "TAVILY_API_KEY is not configured",
            ));
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({
                "api_key": self.api_key,
                "query": query,
                "max_results": self.max_results,
            }))
            .send()
            .await
            .map_err(|e| {
                ToolError::new(
                    ToolErrorKind::Unavailable,
                    format!("search request failed: {}", e),
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::new(
                ToolErrorKind::Unavailable,
                format!("search API returned {}", status),
            ));
        }

        let parsed: SearchResponse = response.json().await.map_err(|e| {
            ToolError::new(
                ToolErrorKind::Unavailable,
                format!("invalid search response: {}", e),
            )
        })?;

        let snippets: Vec<String> = parsed
            .results
            .iter()
            .take(self.max_results)
            .map(|hit| format!("- {} ({}): {}", hit.title, hit.url, hit.content))
            .collect();

        if snippets.is_empty() {
            return Ok(ToolOutput::text("No results found for that query."));
        }

        Ok(ToolOutput::text(snippets.join("\n")))
    }
}

//
// ================= Python Interpreter =================
//

/// Forwards generated scripts to the execution sandbox.
pub struct PythonInterpreterTool {
    sandbox: Arc<Sandbox>,
}

impl PythonInterpreterTool {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        Self { sandbox }
    }
}

#[async_trait::async_trait]
impl Tool for PythonInterpreterTool {
    fn name(&self) -> &'static str {
        PYTHON_INTERPRETER
    }

    fn description(&self) -> &'static str {
        "Execute a Python script and return printed output. Use print(...) to surface values"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "code": {
                    "type": "string",
                    "description": "Python source to execute"
                }
            },
            "required": ["code"]
        })
    }

    async fn execute(&self, request: &ToolRequest) -> ToolResult {
        let code = request
            .arguments
            .get("code")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ToolError::new(ToolErrorKind::MalformedToolRequest, "expected 'code'")
            })?;

        let code = strip_code_fences(code);

        match self.sandbox.execute(code).await {
            ExecutionResult::Success { stdout, artifacts } => {
                let content = if stdout.is_empty() {
                    "Code executed successfully (nothing was printed).".to_string()
                } else {
                    stdout
                };
                Ok(ToolOutput { content, artifacts })
            }
            ExecutionResult::Failure {
                kind,
                message,
                partial_stdout,
            } => {
                let detail = if partial_stdout.is_empty() {
                    message
                } else {
                    format!("{}\n--- partial output ---\n{}", message, partial_stdout)
                };
                Err(ToolError::new(kind, detail))
            }
        }
    }
}

/// Create the default registry: web retrieval + sandboxed code execution.
pub fn create_default_registry(sandbox: Arc<Sandbox>) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(WebSearchTool::from_env()));
    registry.register(Arc::new(PythonInterpreterTool::new(sandbox)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct SpyTool {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl Tool for SpyTool {
        fn name(&self) -> &'static str {
            "spy"
        }

        fn description(&self) -> &'static str {
            "Counts invocations"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "query": { "type": "string" }
                },
                "required": ["query"]
            })
        }

        async fn execute(&self, _request: &ToolRequest) -> ToolResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(ToolOutput::text("spied"))
        }
    }

    fn spy_registry() -> (ToolRegistry, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(SpyTool {
            calls: calls.clone(),
        }));
        (registry, calls)
    }

    #[tokio::test]
    async fn test_unknown_tool_never_invokes_a_body() {
        let (registry, calls) = spy_registry();

        for _ in 0..3 {
            let result = registry
                .dispatch(&ToolRequest {
                    tool_name: "does_not_exist".to_string(),
                    arguments: json!({"query": "AAPL"}),
                })
                .await;

            let err = result.unwrap_err();
            assert_eq!(err.kind, ToolErrorKind::UnknownTool);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_required_argument_rejected_before_execution() {
        let (registry, calls) = spy_registry();

        let result = registry
            .dispatch(&ToolRequest {
                tool_name: "spy".to_string(),
                arguments: json!({}),
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::MalformedToolRequest);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_non_object_arguments_rejected() {
        let (registry, calls) = spy_registry();

        let result = registry
            .dispatch(&ToolRequest {
                tool_name: "spy".to_string(),
                arguments: json!("just a string"),
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.kind, ToolErrorKind::MalformedToolRequest);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_valid_request_reaches_tool() {
        let (registry, calls) = spy_registry();

        let result = registry
            .dispatch(&ToolRequest {
                tool_name: "spy".to_string(),
                arguments: json!({"query": "AAPL"}),
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_strip_code_fences() {
        assert_eq!(strip_code_fences("print(1)"), "print(1)");
        assert_eq!(strip_code_fences("```python\nprint(1)\n```"), "print(1)");
        assert_eq!(strip_code_fences("```\nprint(1)\n```"), "print(1)");
    }
}

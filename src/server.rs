//! Line-delimited tool protocol over stdin/stdout.
//!
//! Each request is one JSON object per line:
//!
//! ```json
//! {"id": 1, "tool": "search_index", "params": {"query": "deployment"}}
//! ```
//!
//! and each response mirrors the id:
//!
//! ```json
//! {"id": 1, "result": {"query": "deployment", "count": 2, "results": [...]}}
//! {"id": 2, "error": {"code": "invalid_input", "message": "query is required"}}
//! ```
//!
//! Stdout carries only protocol responses; all logging goes to stderr or
//! the configured log file. Handler errors become error responses, and a
//! panicking handler is contained so the loop keeps serving.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, error};

use crate::error::{Error, Result};
use crate::tools::{ToolContext, ToolRegistry};

/// One request line.
#[derive(Debug, Deserialize)]
struct ToolRequest {
    #[serde(default)]
    id: Value,
    tool: String,
    #[serde(default)]
    params: Value,
}

/// One response line.
#[derive(Debug, Serialize)]
pub struct ToolResponse {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

impl ToolResponse {
    fn ok(id: Value, result: Value) -> Self {
        Self {
            id,
            result: Some(result),
            error: None,
        }
    }

    fn err(id: Value, error: &Error) -> Self {
        Self {
            id,
            result: None,
            error: Some(ErrorBody {
                code: error.code().to_string(),
                message: error.to_string(),
            }),
        }
    }
}

/// Serve the tool protocol until stdin closes.
pub async fn run_stdio(ctx: ToolContext) -> anyhow::Result<()> {
    let registry = Arc::new(ToolRegistry::with_builtins());
    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(registry.clone(), ctx.clone(), &line).await;
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        stdout.write_all(encoded.as_bytes()).await?;
        stdout.flush().await?;
    }

    debug!("stdin closed, shutting down");
    Ok(())
}

/// Parse and dispatch one request line.
pub async fn handle_line(
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
    line: &str,
) -> ToolResponse {
    let request: ToolRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(err) => {
            let error = Error::invalid_input(format!("malformed request: {err}"));
            return ToolResponse::err(Value::Null, &error);
        }
    };

    let id = request.id.clone();
    match dispatch(registry, ctx, request.tool, request.params).await {
        Ok(result) => ToolResponse::ok(id, result),
        Err(err) => ToolResponse::err(id, &err),
    }
}

/// Run one tool behind a panic barrier: a panicking handler yields an
/// `internal_error` response instead of taking the process down.
async fn dispatch(
    registry: Arc<ToolRegistry>,
    ctx: ToolContext,
    tool: String,
    params: Value,
) -> Result<Value> {
    let handle = tokio::spawn(async move {
        let tool = registry
            .find(&tool)
            .ok_or_else(|| Error::invalid_input(format!("unknown tool: {tool}")))?;
        tool.execute(params, &ctx).await
    });

    match handle.await {
        Ok(result) => result,
        Err(err) if err.is_panic() => {
            error!("tool handler panicked: {err}");
            Err(Error::Internal("tool handler panicked".to_string()))
        }
        Err(err) => Err(Error::Internal(format!("tool handler aborted: {err}"))),
    }
}

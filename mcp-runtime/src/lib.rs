use std::sync::Arc;

use clap::{Args, Subcommand};
use serde_json::{Map, Value, json};
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};

pub mod backend;
pub mod bridge;
pub mod config;
pub mod dispatch;
pub mod protocol;
pub mod registry;
pub mod util;
pub mod watcher;

pub use bridge::{RefreshSummary, ToolBridge};
pub use config::{BridgeConfig, DefaultSources};
pub use protocol::{RpcError, ToolError};

use protocol::{
    MCP_PROTOCOL_VERSION, MCP_SERVER_NAME, build_tool_call_response, error_response,
    success_response,
};
use util::to_pretty_json;

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the tool bridge as an MCP server over stdio
    Serve(McpServeArgs),
}

#[derive(Args, Clone, Debug)]
pub struct McpServeArgs {
    /// Backend base URL (otherwise TOOLBRIDGE_BACKEND_URL)
    #[arg(long, env = "TOOLBRIDGE_BACKEND_URL")]
    pub backend_url: Option<String>,
    /// Subject forwarded to the backend on every tool call
    #[arg(long, env = "TOOLBRIDGE_MCP_SUBJECT")]
    pub subject: Option<String>,
    /// Load the catalog once and skip background refresh
    #[arg(long)]
    pub no_watch: bool,
}

pub async fn run(command: McpCommands) -> i32 {
    match command {
        McpCommands::Serve(args) => match serve(args).await {
            Ok(()) => 0,
            Err(err) => {
                let payload = json!({
                    "error": "mcp_server_error",
                    "message": err,
                });
                eprintln!("{}", to_pretty_json(&payload));
                1
            }
        },
    }
}

async fn serve(args: McpServeArgs) -> Result<(), String> {
    let config = BridgeConfig::from_env(args.backend_url.as_deref()).map_err(|e| e.to_string())?;
    let bridge = Arc::new(ToolBridge::new(config).map_err(|e| e.to_string())?);

    if let Ok(summary) = bridge.initial_load_with_retry().await {
        tracing::info!(
            event = "mcp_stdio_ready",
            tools = summary.tool_count,
            "catalog loaded"
        );
    }
    if !args.no_watch {
        bridge.start_watcher().await;
    }

    let server = McpServer::new(Arc::clone(&bridge), args.subject);
    let result = server.serve_stdio().await;
    bridge.shutdown();
    result
}

/// Handle one decoded JSON-RPC payload (single message or batch) received
/// over HTTP for an already authenticated subject.
pub async fn handle_http_jsonrpc(
    bridge: &Arc<ToolBridge>,
    subject: Option<String>,
    incoming: Value,
) -> Vec<Value> {
    McpServer::new(Arc::clone(bridge), subject)
        .handle_payload(incoming)
        .await
}

/// JSON-RPC response for a body that could not be decoded at all.
pub fn parse_error_response(detail: impl std::fmt::Display) -> Value {
    error_response(
        Value::Null,
        RpcError::parse_error(format!("Parse error: {detail}")),
    )
}

struct McpServer {
    bridge: Arc<ToolBridge>,
    subject: Option<String>,
}

impl McpServer {
    fn new(bridge: Arc<ToolBridge>, subject: Option<String>) -> Self {
        Self { bridge, subject }
    }

    async fn serve_stdio(&self) -> Result<(), String> {
        let mut reader = BufReader::new(io::stdin());
        let mut writer = io::stdout();
        self.serve_framed(&mut reader, &mut writer).await
    }

    /// One frame in, zero or more frames out, until the client closes the
    /// stream. A body that is not JSON gets a -32700 reply and the loop
    /// keeps going.
    async fn serve_framed<R, W>(&self, reader: &mut R, writer: &mut W) -> Result<(), String>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        while let Some(frame) = read_frame(reader)
            .await
            .map_err(|e| format!("stdio read failed: {e}"))?
        {
            let replies = match serde_json::from_slice::<Value>(&frame) {
                Ok(payload) => self.handle_payload(payload).await,
                Err(err) => vec![parse_error_response(err)],
            };
            for reply in &replies {
                write_framed_json(writer, reply)
                    .await
                    .map_err(|e| format!("stdio write failed: {e}"))?;
            }
        }
        Ok(())
    }

    async fn handle_payload(&self, payload: Value) -> Vec<Value> {
        match payload {
            Value::Array(batch) if batch.is_empty() => vec![error_response(
                Value::Null,
                RpcError::invalid_request("empty batch"),
            )],
            Value::Array(batch) => {
                let mut replies = Vec::with_capacity(batch.len());
                for message in batch {
                    replies.extend(self.handle_message(message).await);
                }
                replies
            }
            message => self.handle_message(message).await.into_iter().collect(),
        }
    }

    async fn handle_message(&self, message: Value) -> Option<Value> {
        let Value::Object(mut fields) = message else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("message is not a JSON object"),
            ));
        };

        let id = fields.remove("id");
        if fields.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Some(error_response(
                id.unwrap_or(Value::Null),
                RpcError::invalid_request("unsupported jsonrpc version, expected \"2.0\""),
            ));
        }

        let method = match fields.remove("method") {
            Some(Value::String(method)) => method,
            // a client response; this server sends no requests
            _ => return None,
        };
        let params = fields.remove("params").unwrap_or(Value::Null);

        let Some(id) = id else {
            tracing::debug!(event = "mcp_notification", method = %method, "notification ignored");
            return None;
        };
        Some(match self.handle_request(&method, params).await {
            Ok(result) => success_response(id, result),
            Err(err) => error_response(id, err),
        })
    }

    async fn handle_request(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_result()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(json!({ "tools": self.bridge.registry().list().await })),
            "tools/call" => self.call_tool(params).await,
            other => Err(RpcError::method_not_found(other)),
        }
    }

    fn initialize_result(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": { "tools": { "listChanged": false } },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION"),
            },
            "instructions": "Tools mirror the backend REST catalog and change when the backend is redeployed. Call tools/list again if a tool is reported unknown; get_version reports the current build."
        })
    }

    async fn call_tool(&self, params: Value) -> Result<Value, RpcError> {
        let Value::Object(mut params) = params else {
            return Err(RpcError::invalid_params("tools/call expects an object of params"));
        };
        let name = match params.remove("name") {
            Some(Value::String(name)) => name,
            _ => return Err(RpcError::invalid_params("tools/call is missing a string 'name'")),
        };
        let args = match params.remove("arguments") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(args)) => args,
            Some(_) => {
                return Err(RpcError::invalid_params(format!(
                    "arguments for '{name}' must be a JSON object"
                )));
            }
        };

        let outcome = self
            .bridge
            .call_tool(&name, &args, self.subject.as_deref())
            .await;
        if let Err(err) = &outcome {
            tracing::info!(
                event = "tool_call_failed",
                tool = %name,
                code = %err.code,
                "tool call returned an error result"
            );
        }
        Ok(build_tool_call_response(outcome))
    }
}

fn invalid_data(message: &'static str) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}

/// Read one `Content-Length` framed body. `Ok(None)` when the stream ends
/// between frames.
async fn read_frame<R>(reader: &mut R) -> std::io::Result<Option<Vec<u8>>>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length = None;
    let mut in_headers = false;

    loop {
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            if in_headers {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "stream closed inside frame headers",
                ));
            }
            return Ok(None);
        }

        let header = line.trim_end();
        if header.is_empty() {
            if in_headers {
                break;
            }
            continue;
        }
        in_headers = true;

        if let Some((name, value)) = header.split_once(':') {
            if name.trim().eq_ignore_ascii_case("content-length") {
                let length = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| invalid_data("bad Content-Length value"))?;
                content_length = Some(length);
            }
        }
    }

    let length = content_length.ok_or_else(|| invalid_data("frame has no Content-Length"))?;
    let mut body = vec![0_u8; length];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

async fn write_framed_json<W>(writer: &mut W, value: &Value) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let body = serde_json::to_vec(value)?;
    let header = format!(
        "Content-Length: {}\r\nContent-Type: application/json\r\n\r\n",
        body.len()
    );
    writer.write_all(header.as_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn loaded_bridge(server: &MockServer) -> Arc<ToolBridge> {
        Mock::given(method("GET"))
            .and(path("/version"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"build": "100"})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/catalog"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {
                    "name": "get_price",
                    "description": "Latest price for a ticker",
                    "method": "GET",
                    "path": "/api/price/{ticker}",
                    "params": [
                        {"name": "ticker", "type": "string", "required": true, "in": "path"}
                    ]
                },
                {"name": "", "method": "GET", "path": "/api/broken"},
                {"name": "escape", "method": "GET", "path": "/api/../admin"}
            ])))
            .mount(server)
            .await;

        let mut config = BridgeConfig::new(server.uri());
        config.dispatch_timeout = Duration::from_secs(2);
        let bridge = Arc::new(ToolBridge::new(config).unwrap());
        bridge.refresh().await.unwrap();
        bridge
    }

    fn call(id: i64, name: &str, arguments: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "tools/call",
            "params": {"name": name, "arguments": arguments}
        })
    }

    #[tokio::test]
    async fn tools_list_exposes_valid_entries_and_version_tool() {
        let server = MockServer::start().await;
        let bridge = loaded_bridge(&server).await;
        let responses = handle_http_jsonrpc(
            &bridge,
            None,
            json!({"jsonrpc": "2.0", "id": 1, "method": "tools/list"}),
        )
        .await;
        let names: Vec<&str> = responses[0]["result"]["tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|tool| tool["name"].as_str())
            .collect();
        assert_eq!(names, vec!["get_price", "get_version"]);
        assert_eq!(
            responses[0]["result"]["tools"][0]["inputSchema"]["required"],
            json!(["ticker"])
        );
    }

    #[tokio::test]
    async fn missing_path_param_is_tool_error_without_backend_call() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/price/ABC"))
            .respond_with(ResponseTemplate::new(200).set_body_string(r#"{"price":12.5}"#))
            .expect(1)
            .mount(&server)
            .await;
        let bridge = loaded_bridge(&server).await;

        let responses = handle_http_jsonrpc(&bridge, None, call(1, "get_price", json!({}))).await;
        let result = &responses[0]["result"];
        assert_eq!(result["isError"], json!(true));
        assert!(result["content"][0]["text"].as_str().unwrap().contains("ticker"));

        let responses = handle_http_jsonrpc(
            &bridge,
            Some("alice".to_string()),
            call(2, "get_price", json!({"ticker": "ABC"})),
        )
        .await;
        let result = &responses[0]["result"];
        assert_eq!(result["isError"], json!(false));
        assert_eq!(result["content"][0]["text"], json!(r#"{"price":12.5}"#));
    }

    #[tokio::test]
    async fn batches_skip_notifications_and_report_unknown_methods() {
        let server = MockServer::start().await;
        let bridge = loaded_bridge(&server).await;
        let responses = handle_http_jsonrpc(
            &bridge,
            None,
            json!([
                {"jsonrpc": "2.0", "method": "notifications/initialized"},
                {"jsonrpc": "2.0", "id": "a", "method": "ping"},
                {"jsonrpc": "2.0", "id": "b", "method": "resources/list"},
                {"jsonrpc": "1.0", "id": "c", "method": "ping"}
            ]),
        )
        .await;
        assert_eq!(responses.len(), 3);
        assert_eq!(responses[0]["result"], json!({}));
        assert_eq!(responses[1]["error"]["code"], json!(-32601));
        assert_eq!(responses[2]["error"]["code"], json!(-32600));

        let responses = handle_http_jsonrpc(&bridge, None, json!([])).await;
        assert_eq!(responses[0]["error"]["code"], json!(-32600));
    }

    #[tokio::test]
    async fn tools_call_rejects_non_object_arguments() {
        let server = MockServer::start().await;
        let bridge = loaded_bridge(&server).await;
        let responses =
            handle_http_jsonrpc(&bridge, None, call(9, "get_price", json!(["ABC"]))).await;
        assert_eq!(responses[0]["error"]["code"], json!(-32602));
    }

    #[tokio::test]
    async fn initialize_reports_server_info() {
        let server = MockServer::start().await;
        let bridge = loaded_bridge(&server).await;
        let responses = handle_http_jsonrpc(
            &bridge,
            None,
            json!({"jsonrpc": "2.0", "id": 0, "method": "initialize", "params": {}}),
        )
        .await;
        let result = &responses[0]["result"];
        assert_eq!(result["protocolVersion"], json!(MCP_PROTOCOL_VERSION));
        assert_eq!(result["serverInfo"]["name"], json!("toolbridge"));
    }

    #[tokio::test]
    async fn framed_stdio_answers_requests_and_parse_errors() {
        let server = MockServer::start().await;
        let bridge = loaded_bridge(&server).await;
        let ping = br#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        let garbage = b"{not json";
        let mut input = Vec::new();
        for body in [&ping[..], &garbage[..]] {
            input.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
            input.extend_from_slice(body);
        }

        let mut reader = &input[..];
        let mut output = Vec::new();
        McpServer::new(bridge, None)
            .serve_framed(&mut reader, &mut output)
            .await
            .unwrap();

        let mut frames = &output[..];
        let first = read_frame(&mut frames).await.unwrap().unwrap();
        let first: Value = serde_json::from_slice(&first).unwrap();
        assert_eq!(first["id"], json!(1));
        assert_eq!(first["result"], json!({}));

        let second = read_frame(&mut frames).await.unwrap().unwrap();
        let second: Value = serde_json::from_slice(&second).unwrap();
        assert_eq!(second["error"]["code"], json!(-32700));
        assert!(read_frame(&mut frames).await.unwrap().is_none());
    }
}

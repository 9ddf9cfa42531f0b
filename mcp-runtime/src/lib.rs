use std::sync::Arc;

use clap::{Args, Subcommand};
use serde_json::{Map, Value, json};
use tokio::io::{self, BufReader};
use uuid::Uuid;
use vision_core::error::codes;
use vision_core::{
    Credential, Resolution, SessionId, SessionResolver, StoreBackend, StoreConfig, StoreError,
    open_store,
};

mod tools;
mod util;

use tools::{ApiVerb, ToolDefinition, find_tool, query_pairs, tool_definitions};
use util::{client, parse_response_body, read_framed_json, to_pretty_json, write_framed_json};

pub const DEFAULT_API_URL: &str = "https://beta.api.1492.vision";

const MCP_PROTOCOL_VERSION: &str = "2024-11-05";
const MCP_SERVER_NAME: &str = "vision-mcp";
const ACCESS_TOKEN_HEADER: &str = "access_token";

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run a 1492.Vision MCP server over stdio
    Serve(McpServeArgs),
}

#[derive(Args, Clone)]
pub struct McpServeArgs {
    /// 1492.Vision API key bound to this stdio session
    #[arg(long, env = "VISION_API_KEY", hide_env_values = true)]
    pub api_key: Option<String>,
    /// Credential store backend (overrides VISION_STORE_BACKEND)
    #[arg(long, value_parser = ["redis", "memory"])]
    pub store: Option<String>,
}

pub async fn run(api_url: &str, command: McpCommands) -> i32 {
    match command {
        McpCommands::Serve(args) => match serve_stdio_session(api_url, args).await {
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

/// One stdio process is one session: bind the key at startup, drop it on exit.
async fn serve_stdio_session(api_url: &str, args: McpServeArgs) -> Result<(), String> {
    let mut store_config = StoreConfig::from_env();
    if let Some(backend) = args.store.as_deref().and_then(StoreBackend::from_name) {
        store_config.backend = backend;
    }

    let store = open_store(&store_config)
        .await
        .map_err(|e| format!("Failed to open credential store: {e}"))?;
    let resolver = SessionResolver::new(Arc::clone(&store), &store_config);
    let session = SessionId::parse(&format!("stdio-{}", Uuid::new_v4()))
        .map_err(|e| format!("Failed to mint stdio session id: {e}"))?;

    let mut server = McpServer::new(
        McpRuntimeConfig {
            api_url: api_url.to_string(),
        },
        resolver.clone(),
    );
    match args.api_key.map(Credential::new) {
        Some(Ok(credential)) => {
            // Failure is logged by the resolver; the first tool call binds again.
            let _ = resolver.bind(&session, &credential).await;
            server = server.with_session_credential(session.clone(), credential);
        }
        Some(Err(_)) | None => tracing::warn!(
            event = "stdio_session_without_credential",
            session = %session.fingerprint(),
            "no API key configured; tool calls will return auth_missing"
        ),
    }

    let context = InvocationContext::for_session(session.as_str());
    let result = server.serve_stdio(&context).await;

    let _ = resolver.unbind(&session).await;
    store.close().await;
    result
}

#[derive(Clone, Debug)]
pub struct McpRuntimeConfig {
    pub api_url: String,
}

impl Default for McpRuntimeConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
        }
    }
}

/// What the transport knows about the caller of one message.
#[derive(Clone, Debug, Default)]
pub struct InvocationContext {
    session_id: Option<String>,
}

impl InvocationContext {
    pub fn new(session_id: Option<String>) -> Self {
        Self { session_id }
    }

    pub fn for_session(session_id: &str) -> Self {
        Self::new(Some(session_id.to_string()))
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }
}

/// Shared MCP server state. Cheap to clone; one instance serves every session.
#[derive(Clone)]
pub struct McpServer {
    config: McpRuntimeConfig,
    http: reqwest::Client,
    resolver: SessionResolver,
    session_credential: Option<(SessionId, Credential)>,
}

impl McpServer {
    pub fn new(config: McpRuntimeConfig, resolver: SessionResolver) -> Self {
        Self {
            config,
            http: client(),
            resolver,
            session_credential: None,
        }
    }

    /// Credential the process was started with for `session`. It is bound again
    /// whenever the store has no binding for that session (a bind lost to an
    /// outage at startup, or an expired TTL). Other sessions are unaffected.
    pub fn with_session_credential(mut self, session: SessionId, credential: Credential) -> Self {
        self.session_credential = Some((session, credential));
        self
    }

    pub fn resolver(&self) -> &SessionResolver {
        &self.resolver
    }

    pub async fn serve_stdio(&self, context: &InvocationContext) -> Result<(), String> {
        tracing::info!(
            event = "mcp_stdio_started",
            server = MCP_SERVER_NAME,
            version = env!("CARGO_PKG_VERSION"),
            api_url = %self.config.api_url,
            "serving MCP over stdio"
        );

        let stdin = io::stdin();
        let mut reader = BufReader::new(stdin);
        let mut stdout = io::stdout();

        loop {
            let incoming = read_framed_json(&mut reader)
                .await
                .map_err(|e| format!("Failed to read MCP message: {e}"))?;
            let Some(incoming) = incoming else {
                break;
            };

            let responses = self.handle_incoming_message(context, incoming).await;
            for response in responses {
                write_framed_json(&mut stdout, &response)
                    .await
                    .map_err(|e| format!("Failed to write MCP response: {e}"))?;
            }
        }

        Ok(())
    }

    pub async fn handle_incoming_message(
        &self,
        context: &InvocationContext,
        incoming: Value,
    ) -> Vec<Value> {
        let mut responses = Vec::new();

        if let Some(batch) = incoming.as_array() {
            if batch.is_empty() {
                responses.push(error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ));
                return responses;
            }
            for item in batch {
                if let Some(response) = self.handle_single_message(context, item.clone()).await {
                    responses.push(response);
                }
            }
            return responses;
        }

        if let Some(response) = self.handle_single_message(context, incoming).await {
            responses.push(response);
        }
        responses
    }

    async fn handle_single_message(
        &self,
        context: &InvocationContext,
        incoming: Value,
    ) -> Option<Value> {
        let Some(obj) = incoming.as_object() else {
            return Some(error_response(
                Value::Null,
                RpcError::invalid_request("Request must be a JSON object"),
            ));
        };

        if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            let id = obj.get("id").cloned().unwrap_or(Value::Null);
            return Some(error_response(
                id,
                RpcError::invalid_request("jsonrpc must be '2.0'"),
            ));
        }

        let Some(method) = obj.get("method").and_then(Value::as_str) else {
            // Most likely a client response; server does not issue outbound requests.
            return None;
        };

        let params = obj.get("params").cloned().unwrap_or(Value::Null);
        if let Some(id) = obj.get("id").cloned() {
            let result = self.handle_request(context, method, params).await;
            Some(match result {
                Ok(payload) => success_response(id, payload),
                Err(err) => error_response(id, err),
            })
        } else {
            // Notifications (initialized, cancelled, ...) need no reply.
            None
        }
    }

    async fn handle_request(
        &self,
        context: &InvocationContext,
        method: &str,
        params: Value,
    ) -> Result<Value, RpcError> {
        match method {
            "initialize" => Ok(self.initialize_payload()),
            "ping" => Ok(json!({})),
            "tools/list" => Ok(self.tools_list_payload()),
            "tools/call" => self.handle_tools_call(context, params).await,
            "resources/list" => Ok(json!({ "resources": [] })),
            "prompts/list" => Ok(json!({ "prompts": [] })),
            _ => Err(RpcError::method_not_found(method)),
        }
    }

    fn initialize_payload(&self) -> Value {
        json!({
            "protocolVersion": MCP_PROTOCOL_VERSION,
            "capabilities": {
                "tools": {
                    "listChanged": false
                }
            },
            "serverInfo": {
                "name": MCP_SERVER_NAME,
                "version": env!("CARGO_PKG_VERSION")
            },
            "instructions": "Tools query the 1492.Vision API with the API key bound to this session. If a tool returns auth_missing, start a new session with your API key. If it returns credential_store_unavailable, retry later."
        })
    }

    fn tools_list_payload(&self) -> Value {
        let tools: Vec<Value> = tool_definitions()
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema(),
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    async fn handle_tools_call(
        &self,
        context: &InvocationContext,
        params: Value,
    ) -> Result<Value, RpcError> {
        let params = params
            .as_object()
            .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;

        let name = params
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;

        let args = match params.get("arguments") {
            Some(Value::Object(map)) => map.clone(),
            Some(Value::Null) | None => Map::new(),
            Some(_) => {
                return Err(RpcError::invalid_params(
                    "tools/call 'arguments' must be an object",
                ));
            }
        };

        let Some(tool) = find_tool(name) else {
            let err = ToolError::new(codes::UNKNOWN_TOOL, format!("Unknown tool: {name}"))
                .with_field("name");
            return Ok(error_tool_call_response(name, &err));
        };

        match self.dispatch_tool(context, tool, &args).await {
            Ok(envelope) => {
                tracing::info!(event = "mcp_tool_call", tool = name, outcome = "success");
                // The text block relays the upstream JSON as-is.
                let text = to_pretty_json(&envelope["data"]);
                Ok(build_tool_call_response(text, envelope, false))
            }
            Err(err) => {
                tracing::info!(
                    event = "mcp_tool_call",
                    tool = name,
                    outcome = "error",
                    error_code = %err.code
                );
                Ok(error_tool_call_response(name, &err))
            }
        }
    }

    /// Validate, resolve the session's credential, then make exactly one upstream request.
    /// Nothing leaves the process unless a credential is bound.
    async fn dispatch_tool(
        &self,
        context: &InvocationContext,
        tool: &ToolDefinition,
        args: &Map<String, Value>,
    ) -> Result<Value, ToolError> {
        let args = tool.normalize_arguments(args)?;
        let session = SessionId::from_context(context.session_id()).map_err(|e| {
            ToolError::new(codes::INVALID_SESSION, e.to_string())
                .with_field("session_id")
                .with_docs_hint("Start a new MCP session; the transport did not supply a usable session id.")
        })?;

        let credential = self.resolve_credential(&session).await?;

        let result = self.send_api_request(tool, &args, &credential).await?;
        if !result.is_success() {
            return Err(ToolError::new(
                codes::UPSTREAM_ERROR,
                format!("Request failed with status code {}", result.status),
            )
            .with_details(result.to_value()));
        }

        Ok(json!({
            "status": "success",
            "tool": tool.name,
            "endpoint": tool.endpoint,
            "data": result.body
        }))
    }

    async fn resolve_credential(&self, session: &SessionId) -> Result<Credential, ToolError> {
        match self.resolver.resolve(session).await {
            Resolution::Bound(credential) => Ok(credential),
            Resolution::BackendUnavailable(err) => Err(ToolError::store_unavailable(&err)),
            Resolution::Unauthenticated => match &self.session_credential {
                Some((owner, credential)) if owner == session => {
                    self.resolver
                        .bind(session, credential)
                        .await
                        .map_err(|err| ToolError::store_unavailable(&err))?;
                    Ok(credential.clone())
                }
                _ => Err(ToolError::unauthenticated()),
            },
        }
    }

    async fn send_api_request(
        &self,
        tool: &ToolDefinition,
        args: &Map<String, Value>,
        credential: &Credential,
    ) -> Result<ApiCallResult, ToolError> {
        let mut url = reqwest::Url::parse(&format!(
            "{}{}",
            self.config.api_url.trim_end_matches('/'),
            tool.endpoint
        ))
        .map_err(|e| ToolError::new("invalid_url", format!("Invalid API URL/path: {e}")))?;

        let mut request = match tool.verb {
            ApiVerb::Get => {
                let pairs = query_pairs(args);
                if !pairs.is_empty() {
                    let mut qp = url.query_pairs_mut();
                    for (k, v) in &pairs {
                        qp.append_pair(k, v);
                    }
                }
                self.http.request(tool.verb.as_method(), url)
            }
            ApiVerb::Post => self
                .http
                .request(tool.verb.as_method(), url)
                .json(&Value::Object(args.clone())),
        };
        request = request
            .header("Accept", "application/json")
            .header(ACCESS_TOKEN_HEADER, credential.expose());

        let response = request.send().await.map_err(|e| {
            tracing::error!(
                event = "upstream_request_failed",
                tool = tool.name,
                endpoint = tool.endpoint,
                error = %e.without_url(),
                "1492.Vision API unreachable"
            );
            ToolError::new(
                codes::CONNECTION_ERROR,
                format!("Failed to reach 1492.Vision API at {}", self.config.api_url),
            )
            .with_docs_hint("Ensure VISION_API_URL points at the 1492.Vision API.")
        })?;

        let status = response.status().as_u16();
        let bytes = response.bytes().await.map_err(|e| {
            ToolError::new(
                "response_error",
                format!("Failed to read API response body: {}", e.without_url()),
            )
        })?;

        Ok(ApiCallResult {
            status,
            body: parse_response_body(&bytes),
        })
    }
}

/// True when the message (or any element of a batch) is an `initialize` request.
pub fn is_initialize_request(incoming: &Value) -> bool {
    let is_init = |msg: &Value| msg.get("method").and_then(Value::as_str) == Some("initialize");
    match incoming {
        Value::Array(batch) => batch.iter().any(is_init),
        other => is_init(other),
    }
}

#[derive(Debug)]
pub struct RpcError {
    code: i64,
    message: String,
}

impl RpcError {
    /// Body was not valid JSON; transports report this before dispatch.
    pub fn parse_error() -> Self {
        Self {
            code: -32700,
            message: "Parse error".to_string(),
        }
    }

    fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
        }
    }

    fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
        }
    }

    fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone)]
struct ToolError {
    code: String,
    message: String,
    field: Option<String>,
    docs_hint: Option<String>,
    details: Option<Value>,
}

impl ToolError {
    fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            field: None,
            docs_hint: None,
            details: None,
        }
    }

    fn unauthenticated() -> Self {
        Self::new(codes::UNAUTHENTICATED, "API key not found for this session")
            .with_docs_hint(
                "Over HTTP, re-initialize with `Authorization: Bearer <api key>` or `X-Api-Key`. Over stdio, set VISION_API_KEY.",
            )
    }

    fn store_unavailable(err: &StoreError) -> Self {
        Self::new(
            codes::STORE_UNAVAILABLE,
            "Could not check this session's API key: credential store unavailable",
        )
        .with_docs_hint("This is a server-side outage, not an authentication failure. Retry later.")
        .with_details(json!({
            "retryable": err.is_retryable(),
            "reason": err.to_string()
        }))
    }

    fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    fn with_docs_hint(mut self, docs_hint: impl Into<String>) -> Self {
        self.docs_hint = Some(docs_hint.into());
        self
    }

    fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    fn to_value(&self) -> Value {
        let mut payload = json!({
            "error": self.code,
            "message": self.message
        });
        if let Some(field) = &self.field {
            payload["field"] = Value::String(field.clone());
        }
        if let Some(docs_hint) = &self.docs_hint {
            payload["docs_hint"] = Value::String(docs_hint.clone());
        }
        if let Some(details) = &self.details {
            payload["details"] = details.clone();
        }
        payload
    }
}

#[derive(Debug)]
struct ApiCallResult {
    status: u16,
    body: Value,
}

impl ApiCallResult {
    fn is_success(&self) -> bool {
        (200..=299).contains(&self.status)
    }

    fn to_value(&self) -> Value {
        json!({
            "ok": self.is_success(),
            "status": self.status,
            "body": self.body
        })
    }
}

fn error_tool_call_response(tool_name: &str, err: &ToolError) -> Value {
    let envelope = json!({
        "status": "error",
        "tool": tool_name,
        "error": err.to_value()
    });
    build_tool_call_response(to_pretty_json(&envelope), envelope, true)
}

fn build_tool_call_response(text: String, envelope: Value, is_error: bool) -> Value {
    if is_error {
        json!({
            "isError": true,
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    } else {
        json!({
            "content": [{ "type": "text", "text": text }],
            "structuredContent": envelope
        })
    }
}

fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn error_response(id: Value, error: RpcError) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    })
}

use serde::Serialize;

/// Structured error body returned by the HTTP transport.
/// Carries enough information for an agent to tell what went wrong and whether to retry.
#[derive(Debug, Serialize)]
pub struct ApiError {
    /// Machine-readable error code (e.g. "invalid_session", "store_unavailable")
    pub error: String,
    /// Human/agent-readable description of what went wrong
    pub message: String,
    /// Which field or header caused the error (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    /// Request ID for tracing and debugging
    pub request_id: String,
    /// Hint about what the correct usage looks like
    #[serde(skip_serializing_if = "Option::is_none")]
    pub docs_hint: Option<String>,
    /// Whether repeating the same request later may succeed
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retryable: bool,
}

/// Error codes shared by the runtime and the HTTP transport
pub mod codes {
    pub const VALIDATION_FAILED: &str = "validation_failed";
    pub const INVALID_SESSION: &str = "invalid_session";
    pub const UNAUTHENTICATED: &str = "auth_missing";
    pub const STORE_UNAVAILABLE: &str = "credential_store_unavailable";
    pub const UNKNOWN_TOOL: &str = "unknown_tool";
    pub const UPSTREAM_ERROR: &str = "upstream_error";
    pub const CONNECTION_ERROR: &str = "connection_error";
    pub const INTERNAL_ERROR: &str = "internal_error";
}

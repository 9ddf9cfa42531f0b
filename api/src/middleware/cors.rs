use axum::http::{HeaderName, HeaderValue, Method};
use tower_http::cors::CorsLayer;

use crate::routes::mcp_http::{API_KEY_HEADER, SESSION_HEADER};

const CONNECTOR_ORIGINS: &[&str] = &["https://claude.ai", "https://chatgpt.com"];

/// Build a CORS layer from the `VISION_CORS_ORIGINS` env var.
///
/// Browser-based MCP clients need to send `Mcp-Session-Id` and `X-Api-Key`
/// and read `Mcp-Session-Id` back from the initialize response.
pub fn build_cors_layer() -> CorsLayer {
    let origins_str = std::env::var("VISION_CORS_ORIGINS").unwrap_or_default();
    CorsLayer::new()
        .allow_origin(parse_origins(&origins_str))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            HeaderName::from_static("authorization"),
            HeaderName::from_static("content-type"),
            HeaderName::from_static(SESSION_HEADER),
            HeaderName::from_static(API_KEY_HEADER),
        ])
        .expose_headers([HeaderName::from_static(SESSION_HEADER)])
        .max_age(std::time::Duration::from_secs(3600))
}

fn parse_origins(raw: &str) -> Vec<HeaderValue> {
    let mut origin_values: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToOwned::to_owned)
        .collect();

    for connector_origin in CONNECTOR_ORIGINS {
        if !origin_values
            .iter()
            .any(|existing| existing.eq_ignore_ascii_case(connector_origin))
        {
            origin_values.push((*connector_origin).to_string());
        }
    }

    origin_values
        .into_iter()
        .filter_map(|origin| origin.parse::<HeaderValue>().ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configured_origins_come_first_without_duplicates() {
        let origins = parse_origins(" https://app.example.com ,, https://CLAUDE.ai");
        assert_eq!(origins[0], "https://app.example.com");
        assert_eq!(origins.len(), 3);
        assert!(origins.iter().any(|o| o == "https://chatgpt.com"));
    }

    #[test]
    fn connector_origins_are_always_allowed() {
        assert_eq!(parse_origins("").len(), CONNECTOR_ORIGINS.len());
    }
}

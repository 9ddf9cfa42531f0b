use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub store: &'static str,
}

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// Reports whether the credential store answers within its timeout
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let resolver = state.resolver();
    let store_ok = resolver.ping().await.is_ok();

    let status = if store_ok { "ok" } else { "degraded" };
    let http_status = if store_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(HealthResponse {
            status: status.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            store: resolver.store().backend(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;
    use vision_core::{MemoryStore, SessionResolver, StoreConfig};
    use vision_mcp_runtime::{McpRuntimeConfig, McpServer};

    use super::*;

    fn app(store: Arc<MemoryStore>) -> Router {
        let resolver = SessionResolver::new(store, &StoreConfig::default());
        let mcp = McpServer::new(McpRuntimeConfig::default(), resolver);
        router().with_state(AppState::new(mcp))
    }

    async fn status_of(app: Router) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn healthy_store_reports_ok() {
        let (status, body) = status_of(app(Arc::new(MemoryStore::new()))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["store"], "memory");
    }

    #[tokio::test]
    async fn unreachable_store_reports_degraded() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let (status, body) = status_of(app(store)).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");
    }
}

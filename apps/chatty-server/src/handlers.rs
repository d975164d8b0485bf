use std::sync::Arc;

use axum::http::{header, HeaderValue, Method, StatusCode, Uri};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{extract::State, Json, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::gateway::{ws_handler, Gateway};

pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub metrics: PrometheusHandle,
}

pub fn router(state: Arc<AppState>, allowed_origin: HeaderValue) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(allowed_origin)
        .allow_credentials(true)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]);

    Router::new()
        .route("/healthz", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/ws", get(ws_handler))
        .fallback(not_found_handler)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "connections": state.gateway.registry().len(),
    }))
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let body = state.metrics.render();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

async fn not_found_handler(uri: Uri) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "status": "fail",
            "message": format!("Can't find {} on this server!", uri.path()),
        })),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use event_bus::LocalBus;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::Value;
    use tower::ServiceExt;

    fn test_router() -> Router {
        let state = Arc::new(AppState {
            gateway: Gateway::new(Arc::new(LocalBus::new())),
            metrics: PrometheusBuilder::new().build_recorder().handle(),
        });
        router(state, HeaderValue::from_static("http://localhost:3000"))
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let response = test_router()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_json(response).await,
            json!({"status": "ok", "connections": 0})
        );
    }

    #[tokio::test]
    async fn unmatched_route_returns_literal_fail_payload() {
        let response = test_router()
            .oneshot(Request::builder().uri("/unknown").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            body_json(response).await,
            json!({
                "status": "fail",
                "message": "Can't find /unknown on this server!",
            })
        );
    }

    fn upgrade_request(uri: &str) -> Request<Body> {
        Request::builder()
            .uri(uri)
            .header(header::CONNECTION, "upgrade")
            .header(header::UPGRADE, "websocket")
            .header(header::SEC_WEBSOCKET_VERSION, "13")
            .header(header::SEC_WEBSOCKET_KEY, "dGhlIHNhbXBsZSBub25jZQ==")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn empty_rooms_param_is_a_classified_bad_request() {
        let response = test_router().oneshot(upgrade_request("/ws?rooms=")).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({
                "message": "rooms must not be empty",
                "statusCode": 400,
                "status": "Bad Request",
            })
        );
    }

    #[tokio::test]
    async fn empty_room_segments_are_rejected() {
        for uri in ["/ws?rooms=general,", "/ws?rooms=,,"] {
            let response = test_router().oneshot(upgrade_request(uri)).await.unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "uri: {uri}");
        }
    }
}

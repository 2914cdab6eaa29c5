//! Axum router configuration with middleware.
//!
//! Routes: `POST /v1/tools/call`, `GET /v1/tools`, `POST /v1/events`,
//! `GET /health`.
//! Middleware: CORS, tracing.

use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/tools", get(handlers::tools::list_tools))
        .route("/tools/call", post(handlers::tools::call_tool))
        .route("/events", post(handlers::events::inject_message));

    Router::new()
        .route("/health", get(handlers::health::health))
        .nest("/v1", api_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use secrecy::ExposeSecret;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use switchboard_core::auth::CreateKeyRequest;

    use crate::state::tests::test_state;

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn call(secret: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/tools/call")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {secret}"))
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_needs_no_key() {
        let (state, _dir) = test_state().await;
        let (status, body) = send(
            build_router(state),
            Request::get("/health").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["bots"]["total_bots"], 0);
    }

    #[tokio::test]
    async fn missing_key_is_unauthorized() {
        let (state, _dir) = test_state().await;
        let (status, body) = send(
            build_router(state),
            Request::get("/v1/tools").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["errorCode"], "AUTH_INVALID");
    }

    #[tokio::test]
    async fn listing_and_call_with_admin_key() {
        let (state, _dir) = test_state().await;
        let admin = state.ensure_admin_key().await.unwrap().unwrap();
        let secret = admin.secret.expose_secret().to_string();
        let router = build_router(state);

        let (status, body) = send(
            router.clone(),
            Request::get("/v1/tools")
                .header("x-api-key", &secret)
                .body(Body::empty())
                .unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = body["tools"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|t| t["name"].as_str())
            .collect();
        assert!(names.contains(&"send_message"));
        assert_eq!(body["count"].as_u64().unwrap() as usize, names.len());

        let (status, body) = send(
            router,
            call(
                &secret,
                json!({"toolName": "send_message", "params": {"chat_id": 5, "text": "hi"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["result"]["message_id"].is_i64());
    }

    #[tokio::test]
    async fn tool_errors_carry_mapped_status() {
        let (state, _dir) = test_state().await;
        let reader = state
            .access
            .create_key(CreateKeyRequest {
                name: "reader".into(),
                role: "read_only".into(),
                custom_permissions: None,
                expires_at: None,
            })
            .await
            .unwrap();
        let secret = reader.secret.expose_secret().to_string();
        let router = build_router(state);

        let (status, body) = send(
            router.clone(),
            call(
                &secret,
                json!({"toolName": "send_message", "params": {"chat_id": 5, "text": "hi"}}),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["errorCode"], "PERMISSION_DENIED");

        let (status, body) = send(
            router.clone(),
            call(&secret, json!({"toolName": "no_such_tool", "params": {}})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errorCode"], "TOOL_NOT_FOUND");

        let (status, body) = send(router, call(&secret, json!({"params": {}}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errorCode"], "INVALID_REQUEST");
    }

    fn event(secret: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/v1/events")
            .header("content-type", "application/json")
            .header("x-api-key", secret)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn posted_event_reaches_running_bot() {
        let (state, _dir) = test_state().await;
        state.register_builtin_bots().await.unwrap();
        let cancel = tokio_util::sync::CancellationToken::new();
        let handles = state.spawn_background(&cancel);
        let admin = state.ensure_admin_key().await.unwrap().unwrap();
        let secret = admin.secret.expose_secret().to_string();
        let router = build_router(state.clone());

        let (status, body) = send(
            router.clone(),
            event(&secret, json!({"chatId": 40, "senderId": 3, "text": "help please"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert!(body["message_id"].is_i64());

        let mut replied = false;
        for _ in 0..100 {
            let messages = state.backend.list_messages(40, 10).await.unwrap();
            if messages.iter().any(|m| m.sender_id.is_none()) {
                replied = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert!(replied);

        let (status, _) = send(router, event(&secret, json!({"chatId": 40}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        cancel.cancel();
        for handle in handles {
            handle.await.unwrap();
        }
    }

    #[tokio::test]
    async fn posting_events_needs_bot_admin() {
        let (state, _dir) = test_state().await;
        let reader = state
            .access
            .create_key(CreateKeyRequest {
                name: "reader".into(),
                role: "read_only".into(),
                custom_permissions: None,
                expires_at: None,
            })
            .await
            .unwrap();
        let secret = reader.secret.expose_secret().to_string();

        let (status, body) = send(
            build_router(state),
            event(&secret, json!({"chatId": 1, "senderId": 2, "text": "hi"})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["errorCode"], "PERMISSION_DENIED");
    }
}

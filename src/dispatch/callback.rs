//! HTTP callback sink for gateway events.
//!
//! The gateway POSTs sync payloads to `/msg/SyncMessage/{wxid}` and retries
//! on anything but a prompt 200, so the handler answers immediately and
//! processes asynchronously. Bodies above 5 MiB are rejected with 400.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::wechat::SyncPayload;

use super::Dispatcher;

/// Maximum accepted body size; a body of exactly this size passes.
pub const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

#[derive(Clone)]
struct CallbackState {
    dispatcher: Arc<Dispatcher>,
}

/// Build the callback router for one WeChat identity.
pub fn router(my_wxid: &str, dispatcher: Arc<Dispatcher>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(&format!("/msg/SyncMessage/{my_wxid}"), post(handle_sync))
        .route("/health", get(handle_health))
        .layer(cors)
        // Slightly above the documented cap so the handler can answer 400
        // (not 413) for declared oversizes; the layer still stops runaway
        // chunked bodies.
        .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_BYTES + 4096))
        .with_state(CallbackState { dispatcher })
}

/// Serve the callback sink until `shutdown` flips.
pub async fn serve(
    my_wxid: &str,
    port: u16,
    dispatcher: Arc<Dispatcher>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = router(my_wxid, dispatcher);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "callback sink listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await?;
    Ok(())
}

async fn handle_sync(
    State(state): State<CallbackState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Some(len) = headers
        .get(axum::http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
    {
        if len > MAX_BODY_BYTES {
            warn!(len, "callback body too large");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "message": "请求体过大"})),
            );
        }
    }

    let payload: SyncPayload = match serde_json::from_slice(&body) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "callback body is not valid JSON");
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"success": false, "message": "JSON格式错误"})),
            );
        }
    };

    // Respond before processing so the gateway never retries.
    let dispatcher = state.dispatcher;
    tokio::spawn(async move {
        dispatcher.handle_payload(payload).await;
    });

    (
        StatusCode::OK,
        Json(json!({"success": true, "message": "已接收"})),
    )
}

async fn handle_health() -> impl IntoResponse {
    Json(json!({"status": "healthy", "service": "wx2tg"}))
}

// ── Tests ───────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{StatusNotifier, WorkHandler, WorkerPool};
    use crate::wechat::AddMsg;
    use std::sync::Mutex as StdMutex;
    use tower::ServiceExt;

    fn test_router() -> (Router, Arc<StdMutex<Vec<i64>>>) {
        let handled: Arc<StdMutex<Vec<i64>>> = Arc::new(StdMutex::new(Vec::new()));
        let handled_ref = Arc::clone(&handled);
        let handler: WorkHandler<AddMsg> = Arc::new(move |_key, msg: AddMsg| {
            let handled = Arc::clone(&handled_ref);
            Box::pin(async move {
                handled.lock().expect("lock").push(msg.msg_id);
            })
        });
        let pool = WorkerPool::new(handler);
        let notifier: StatusNotifier = Arc::new(|_| Box::pin(async {}));
        let dispatcher = Dispatcher::new("me", 100, pool, notifier);
        (router("me", dispatcher), handled)
    }

    async fn post_body(app: Router, uri: &str, body: &str) -> StatusCode {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .header("content-length", body.len())
            .body(axum::body::Body::from(body.to_owned()))
            .expect("request");
        app.oneshot(request).await.expect("response").status()
    }

    #[tokio::test]
    async fn sync_returns_200_and_enqueues() {
        let (app, handled) = test_router();
        let body = r#"{"Message":"成功","Data":{"AddMsgs":[{"MsgId":7,"MsgType":1,
            "FromUserName":{"string":"u1"},"ToUserName":{"string":"me"},
            "Content":{"string":"hi"},"CreateTime":1}]}}"#;
        let status = post_body(app, "/msg/SyncMessage/me", body).await;
        assert_eq!(status, StatusCode::OK);

        // Processing happens after the response; give it a beat.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(*handled.lock().expect("lock"), vec![7]);
    }

    #[tokio::test]
    async fn wrong_path_is_404() {
        let (app, _) = test_router();
        let status = post_body(app, "/msg/SyncMessage/somebody-else", "{}").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_json_is_400() {
        let (app, _) = test_router();
        let status = post_body(app, "/msg/SyncMessage/me", "{not json").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn oversized_content_length_is_400() {
        let (app, _) = test_router();
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/msg/SyncMessage/me")
            .header("content-type", "application/json")
            .header("content-length", MAX_BODY_BYTES + 1)
            .body(axum::body::Body::from("{}"))
            .expect("request");
        let status = app.oneshot(request).await.expect("response").status();
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_endpoint() {
        let (app, _) = test_router();
        let request = axum::http::Request::builder()
            .method("GET")
            .uri("/health")
            .body(axum::body::Body::empty())
            .expect("request");
        let response = app.oneshot(request).await.expect("response");
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), 1024)
            .await
            .expect("body");
        let value: serde_json::Value = serde_json::from_slice(&bytes).expect("json");
        assert_eq!(value["status"], "healthy");
    }
}

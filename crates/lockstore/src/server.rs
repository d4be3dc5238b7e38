//! HTTP surface of `lockd`: exposes any [`LockStore`] to remote processes

use crate::protocol::{AcquireRequest, AcquireResponse, ErrorBody, SetValueRequest, TokenQuery, ValueResponse};
use crate::{LockError, LockHandle, LockStore};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Upper bound on how long one acquire request may park a server task.
const MAX_WAIT: Duration = Duration::from_secs(120);

impl IntoResponse for LockError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            LockError::WaitTimeout { .. } => (StatusCode::REQUEST_TIMEOUT, "WAIT_TIMEOUT"),
            LockError::NotHeld(_) => (StatusCode::CONFLICT, "NOT_HELD"),
            LockError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "STORAGE_ERROR"),
            LockError::Codec(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CODEC_ERROR"),
            LockError::Transport(_) => (StatusCode::BAD_GATEWAY, "TRANSPORT_ERROR"),
            LockError::Backend(_) => (StatusCode::INTERNAL_SERVER_ERROR, "BACKEND_ERROR"),
        };
        if status.is_server_error() {
            warn!("lock request failed: {}", self);
        }

        let body = Json(ErrorBody {
            error: error_code.to_string(),
            message: self.to_string(),
        });
        (status, body).into_response()
    }
}

/// Build the lock server router on top of `store`.
pub fn lock_router(store: Arc<dyn LockStore>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/locks/:name/acquire", post(acquire_handler))
        .route("/locks/:name/value", get(get_value_handler).put(set_value_handler))
        .route("/locks/:name/release", post(release_handler))
        .with_state(store)
}

fn handle_for(name: String, token: String) -> LockHandle {
    LockHandle::new(name, token, Duration::ZERO, None)
}

async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn acquire_handler(
    State(store): State<Arc<dyn LockStore>>,
    Path(name): Path<String>,
    Json(request): Json<AcquireRequest>,
) -> Result<Json<AcquireResponse>, LockError> {
    let wait = Duration::from_millis(request.wait_ms).min(MAX_WAIT);
    let handle = store
        .acquire(&name, Duration::from_millis(request.ttl_ms), wait)
        .await?;
    Ok(Json(handle.into()))
}

async fn get_value_handler(
    State(store): State<Arc<dyn LockStore>>,
    Path(name): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Json<ValueResponse>, LockError> {
    let value = store.get_value(&handle_for(name, query.token)).await?;
    Ok(Json(ValueResponse { value }))
}

async fn set_value_handler(
    State(store): State<Arc<dyn LockStore>>,
    Path(name): Path<String>,
    Json(request): Json<SetValueRequest>,
) -> Result<StatusCode, LockError> {
    store
        .set_value(&handle_for(name, request.token), &request.value)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn release_handler(
    State(store): State<Arc<dyn LockStore>>,
    Path(name): Path<String>,
    Json(request): Json<TokenQuery>,
) -> Result<StatusCode, LockError> {
    store.release(handle_for(name, request.token)).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryLockStore;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    fn acquire_request(name: &str, wait_ms: u64) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(format!("/locks/{}/acquire", name))
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "ttl_ms": 5000, "wait_ms": wait_ms }).to_string(),
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_acquire_conflict_and_release() {
        let store = Arc::new(MemoryLockStore::new());
        let app = lock_router(store.clone());

        let response = app.clone().oneshot(acquire_request("net-sequence", 0)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let acquired: AcquireResponse = serde_json::from_slice(&body).unwrap();
        assert_eq!(acquired.name, "net-sequence");

        let response = app.clone().oneshot(acquire_request("net-sequence", 0)).await.unwrap();
        assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);

        let release = Request::builder()
            .method("POST")
            .uri("/locks/net-sequence/release")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "token": acquired.token }).to_string(),
            ))
            .unwrap();
        let response = app.clone().oneshot(release).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        assert!(!store.is_held("net-sequence"));
    }

    #[tokio::test]
    async fn test_wrong_token_is_conflict() {
        let store = Arc::new(MemoryLockStore::new());
        let app = lock_router(store.clone());
        let _held = store
            .acquire("net-brokenflag", Duration::from_secs(5), Duration::ZERO)
            .await
            .unwrap();

        let request = Request::builder()
            .method("PUT")
            .uri("/locks/net-brokenflag/value")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({ "token": "not-mine", "value": "no" }).to_string(),
            ))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let error: ErrorBody = serde_json::from_slice(&body).unwrap();
        assert_eq!(error.error, "NOT_HELD");
    }
}

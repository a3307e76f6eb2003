//! ingest endpoint for replies and change capture. the status tells the
//! sending transport whether to redeliver

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use canopy_api::messages::{ChangeNotification, CompressionResult, UnzipResult};
use canopy_api::ErrorKind;
use tower_http::trace::TraceLayer;

use crate::bus::{self, Message};
use crate::error;
use crate::state::ArcShared;

impl IntoResponse for error::Error {
    fn into_response(self) -> Response {
        let kind = self.error_kind();
        let status = StatusCode::from(&kind);

        match kind {
            ErrorKind::InternalFailure => tracing::error!("failed to handle event: {self:#}"),
            ErrorKind::Transient => tracing::warn!("event handling unavailable: {self}"),
            _ => tracing::debug!("event rejected: {self}"),
        }

        let body = serde_json::json!({
            "kind": kind,
            "message": self.get_context(),
        });

        (status, Json(body)).into_response()
    }
}

async fn ping() -> (StatusCode, &'static str) {
    (StatusCode::OK, "pong")
}

async fn ingest(state: &ArcShared, msg: Message) -> error::Result<StatusCode> {
    bus::handle(state, &msg).await?;

    Ok(StatusCode::ACCEPTED)
}

async fn change(
    State(state): State<ArcShared>,
    Json(notify): Json<ChangeNotification>,
) -> error::Result<StatusCode> {
    ingest(&state, Message::Change(notify)).await
}

async fn compression(
    State(state): State<ArcShared>,
    Json(result): Json<CompressionResult>,
) -> error::Result<StatusCode> {
    ingest(&state, Message::CompressionResult(result)).await
}

async fn unzip(
    State(state): State<ArcShared>,
    Json(result): Json<UnzipResult>,
) -> error::Result<StatusCode> {
    ingest(&state, Message::UnzipResult(result)).await
}

pub fn routes(state: &ArcShared) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/events/change", post(change))
        .route("/events/compression", post(compression))
        .route("/events/unzip", post(unzip))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::clone(state))
}

#[cfg(test)]
mod test {
    use super::*;

    use axum::body::Body;
    use axum::http::{header, Method, Request};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::lock;
    use crate::test_support::Env;

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .expect("failed to build request")
    }

    #[tokio::test]
    async fn ping_responds() {
        let env = Env::new();

        let response = routes(&env.state)
            .oneshot(Request::get("/ping").body(Body::empty()).expect("failed to build request"))
            .await
            .expect("request failed");

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn compression_result_attaches() {
        let env = Env::new();
        let file = env.file("a.png", None, 1).await;

        let response = routes(&env.state)
            .oneshot(post_json("/events/compression", json!({
                "identifier": file.key,
                "producedExternalContentId": "thumb-1"
            })))
            .await
            .expect("request failed");

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(env.node(&file.key).await.thumbnail.as_deref(), Some("thumb-1"));
    }

    #[tokio::test]
    async fn status_follows_error_kind() {
        let env = Env::new();
        let file = env.file("a.png", None, 1).await;

        let malformed = routes(&env.state)
            .oneshot(post_json("/events/unzip", json!({
                "correlationPayload": "not json",
                "entries": []
            })))
            .await
            .expect("request failed");

        assert_eq!(malformed.status(), StatusCode::UNPROCESSABLE_ENTITY);

        let mut held = env.state.locks()
            .acquire(lock::file(&file.key))
            .await
            .expect("failed to hold lock");

        let busy = routes(&env.state)
            .oneshot(post_json("/events/compression", json!({
                "identifier": file.key,
                "producedExternalContentId": "thumb-1"
            })))
            .await
            .expect("request failed");

        held.release().await;

        assert_eq!(busy.status(), StatusCode::SERVICE_UNAVAILABLE);

        let ignored = routes(&env.state)
            .oneshot(post_json("/events/change", json!({
                "table": "tags",
                "changeType": "INSERT",
                "columns": {}
            })))
            .await
            .expect("request failed");

        assert_eq!(ignored.status(), StatusCode::ACCEPTED);
    }
}

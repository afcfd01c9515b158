//! HTTP server for the avatar save boundary
//!
//! Provides /health and POST /api/avatar endpoints. Uploaded blobs are
//! written to a temp file and renamed into place, then the shared
//! metadata file is updated, so a concurrent batch run never observes a
//! torn write.

use avatar_cache::{avatar_file_name, FileMetadataStore, MetadataStore};
use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{info, warn};

/// Shared state for the HTTP server
pub struct ServerState {
    pub avatar_dir: PathBuf,
    pub store: FileMetadataStore,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(avatar_dir: PathBuf, store: FileMetadataStore) -> Self {
        Self {
            avatar_dir,
            store,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Health check response
#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    avatars: usize,
}

#[derive(Serialize)]
struct SaveResponse {
    username: String,
    size: usize,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/avatar", post(save_avatar))
        .layer(tower_http::cors::CorsLayer::permissive())
        .with_state(state)
}

/// Start the HTTP server
pub async fn start_server(state: SharedState, port: u16) -> std::io::Result<()> {
    let router = create_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await
}

async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let meta = state.store.load().await;
    let uptime_secs = (Utc::now() - state.started_at).num_seconds() as u64;

    Json(HealthResponse {
        status: "ok",
        uptime_secs,
        avatars: meta.avatars.len(),
    })
}

/// Persist a client-pushed avatar blob and update the shared metadata
async fn save_avatar(State(state): State<SharedState>, mut multipart: Multipart) -> Response {
    let mut username: Option<String> = None;
    let mut data: Option<Vec<u8>> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => return bad_request(format!("malformed multipart body: {}", e)),
        };
        match field.name() {
            Some("username") => match field.text().await {
                Ok(text) => username = Some(text),
                Err(e) => return bad_request(format!("unreadable username field: {}", e)),
            },
            Some("avatar") => match field.bytes().await {
                Ok(bytes) => data = Some(bytes.to_vec()),
                Err(e) => return bad_request(format!("unreadable avatar field: {}", e)),
            },
            _ => {}
        }
    }

    let Some(username) = username else {
        return bad_request("missing username field".to_string());
    };
    let Some(data) = data else {
        return bad_request("missing avatar field".to_string());
    };
    if data.is_empty() {
        return bad_request("empty avatar blob".to_string());
    }
    if !is_safe_key(&username) {
        return bad_request(format!("invalid username '{}'", username));
    }

    match persist_avatar(&state, &username, &data).await {
        Ok(()) => {
            info!(username = %username, size = data.len(), "Saved client-pushed avatar");
            Json(SaveResponse {
                username,
                size: data.len(),
            })
            .into_response()
        }
        Err(e) => {
            warn!(username = %username, error = %e, "Failed to save avatar");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to save avatar".to_string(),
                }),
            )
                .into_response()
        }
    }
}

/// Write the blob next to its final name, rename into place, then record
/// the refresh in the shared metadata file.
async fn persist_avatar(
    state: &ServerState,
    username: &str,
    data: &[u8],
) -> avatar_cache::Result<()> {
    fs::create_dir_all(&state.avatar_dir).await?;

    let dest = state.avatar_dir.join(avatar_file_name(username));
    let tmp = dest.with_extension("png.tmp");
    if let Err(e) = fs::write(&tmp, data).await {
        let _ = fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    fs::rename(&tmp, &dest).await?;

    let mut meta = state.store.load().await;
    meta.record_refresh(username, Utc::now());
    state.store.save(&meta).await
}

/// Usernames become file names; anything that could escape the avatar
/// directory is rejected.
fn is_safe_key(key: &str) -> bool {
    !key.is_empty()
        && key.len() <= 64
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

fn bad_request(message: String) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse { error: message })).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{header, Request};
    use tempfile::tempdir;
    use tower::ServiceExt;

    fn create_test_state(root: &std::path::Path) -> SharedState {
        let avatar_dir = root.join("avatars");
        let store = FileMetadataStore::new(root.join("metadata.json"));
        Arc::new(ServerState::new(avatar_dir, store))
    }

    fn multipart_body(fields: &[(&str, Option<&str>, &[u8])]) -> (String, Vec<u8>) {
        let boundary = "test-boundary-7f3a";
        let mut body = Vec::new();
        for (name, filename, data) in fields {
            body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
            match filename {
                Some(filename) => body.extend_from_slice(
                    format!(
                        "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: image/png\r\n\r\n",
                        name, filename
                    )
                    .as_bytes(),
                ),
                None => body.extend_from_slice(
                    format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes(),
                ),
            }
            body.extend_from_slice(data);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
        (
            format!("multipart/form-data; boundary={}", boundary),
            body,
        )
    }

    fn save_request(fields: &[(&str, Option<&str>, &[u8])]) -> Request<Body> {
        let (content_type, body) = multipart_body(fields);
        Request::builder()
            .method("POST")
            .uri("/api/avatar")
            .header(header::CONTENT_TYPE, content_type)
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path());
        let router = create_router(state);

        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();

        assert_eq!(json["status"], "ok");
        assert_eq!(json["avatars"], 0);
        assert!(json["uptime_secs"].as_u64().is_some());
    }

    #[tokio::test]
    async fn test_save_avatar_writes_file_and_metadata() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path());
        let router = create_router(state.clone());

        let response = router
            .oneshot(save_request(&[
                ("username", None, b"alice"),
                ("avatar", Some("alice.png"), b"png-bytes"),
            ]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);

        let stored = std::fs::read(dir.path().join("avatars/alice.png")).unwrap();
        assert_eq!(stored, b"png-bytes");

        let meta = state.store.load().await;
        let entry = meta.avatars.get("alice").unwrap();
        assert_eq!(entry.path, "alice.png");
        let age = Utc::now() - entry.last_updated;
        assert!(age < chrono::Duration::seconds(30));
    }

    #[tokio::test]
    async fn test_save_avatar_overwrites_existing() {
        let dir = tempdir().unwrap();
        let state = create_test_state(dir.path());

        for payload in [b"first".as_slice(), b"second".as_slice()] {
            let router = create_router(state.clone());
            let response = router
                .oneshot(save_request(&[
                    ("username", None, b"alice"),
                    ("avatar", Some("alice.png"), payload),
                ]))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let stored = std::fs::read(dir.path().join("avatars/alice.png")).unwrap();
        assert_eq!(stored, b"second");
    }

    #[tokio::test]
    async fn test_save_avatar_missing_username() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(dir.path()));

        let response = router
            .oneshot(save_request(&[("avatar", Some("x.png"), b"data")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_save_avatar_missing_blob() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(dir.path()));

        let response = router
            .oneshot(save_request(&[("username", None, b"alice")]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_save_avatar_rejects_path_traversal() {
        let dir = tempdir().unwrap();
        let router = create_router(create_test_state(dir.path()));

        let response = router
            .oneshot(save_request(&[
                ("username", None, b"../../etc/passwd"),
                ("avatar", Some("x.png"), b"data"),
            ]))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_is_safe_key() {
        assert!(is_safe_key("alice"));
        assert!(is_safe_key("alice-b_2"));
        assert!(!is_safe_key(""));
        assert!(!is_safe_key("a/b"));
        assert!(!is_safe_key("..name"));
        assert!(!is_safe_key(&"x".repeat(65)));
    }
}

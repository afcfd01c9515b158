//! Remote avatar fetching
//!
//! Downloads `<base>/<key>.png?size=128` from the image host, following
//! 301/302 redirects by hand and streaming the body to disk. The whole
//! operation is bounded by a timeout that aborts the in-flight request.

use crate::error::{AvatarError, Result};
use crate::types::avatar_file_name;
use reqwest::{redirect, Client, StatusCode};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

pub const DEFAULT_AVATAR_HOST: &str = "https://github.com";
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 10;

/// Requested avatar edge length in pixels
const AVATAR_SIZE: u32 = 128;

/// HTTP client for fetching avatars from the remote image host
pub struct RemoteFetcher {
    client: Client,
    base_url: String,
    timeout: Duration,
}

impl RemoteFetcher {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_AVATAR_HOST)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        // Redirects are followed manually so a missing Location header can
        // be reported as its own failure mode.
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .build()
            .unwrap_or_default();

        Self {
            client,
            base_url: base_url.into(),
            timeout: Duration::from_secs(DEFAULT_FETCH_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The remote URL an avatar is fetched from
    pub fn avatar_url(&self, key: &str) -> String {
        format!(
            "{}/{}?size={}",
            self.base_url,
            avatar_file_name(key),
            AVATAR_SIZE
        )
    }

    /// Fetch the avatar for `key`, streaming the body to `dest`.
    ///
    /// On any failure, including timeout mid-stream, no partial file is
    /// left behind at `dest`.
    pub async fn fetch_to_file(&self, key: &str, dest: &Path) -> Result<()> {
        let result = tokio::time::timeout(self.timeout, self.stream_to_file(key, dest)).await;

        match result {
            Ok(inner) => inner,
            Err(_) => {
                // Dropping the in-flight future aborted the request; clear
                // whatever was written before the deadline.
                remove_partial(dest).await;
                Err(AvatarError::Timeout(format!(
                    "fetch for '{}' exceeded {:?}",
                    key, self.timeout
                )))
            }
        }
    }

    /// Fetch the avatar for `key` into memory, for callers that hand the
    /// bytes to the save boundary instead of writing the file themselves.
    pub async fn fetch_bytes(&self, key: &str) -> Result<Vec<u8>> {
        let fetch = async {
            let response = self.fetch_response(key).await?;
            Ok(response.bytes().await?.to_vec())
        };

        match tokio::time::timeout(self.timeout, fetch).await {
            Ok(inner) => inner,
            Err(_) => Err(AvatarError::Timeout(format!(
                "fetch for '{}' exceeded {:?}",
                key, self.timeout
            ))),
        }
    }

    async fn stream_to_file(&self, key: &str, dest: &Path) -> Result<()> {
        let mut response = self.fetch_response(key).await?;

        let mut file = fs::File::create(dest).await?;
        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    remove_partial(dest).await;
                    return Err(e.into());
                }
            };
            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                remove_partial(dest).await;
                return Err(e.into());
            }
        }

        if let Err(e) = file.flush().await {
            drop(file);
            remove_partial(dest).await;
            return Err(e.into());
        }

        debug!(key, dest = ?dest, "Stored avatar");
        Ok(())
    }

    /// Issue the request and follow the redirect chain to a 200 response.
    async fn fetch_response(&self, key: &str) -> Result<reqwest::Response> {
        let mut url = self.avatar_url(key);

        loop {
            debug!(key, url = %url, "Fetching avatar");
            let response = self.client.get(&url).send().await?;
            let status = response.status();

            if status == StatusCode::MOVED_PERMANENTLY || status == StatusCode::FOUND {
                let location = response
                    .headers()
                    .get(reqwest::header::LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| {
                        AvatarError::Redirect(format!(
                            "{} response for '{}' without Location header",
                            status, key
                        ))
                    })?;

                url = resolve_location(&url, location)?;
                continue;
            }

            if status != StatusCode::OK {
                warn!(key, status = %status, "Avatar fetch failed");
                return Err(AvatarError::Http(status.as_u16()));
            }

            return Ok(response);
        }
    }
}

impl Default for RemoteFetcher {
    fn default() -> Self {
        Self::new()
    }
}

/// Resolve a Location header against the URL that produced it, so both
/// absolute and relative redirect targets work.
fn resolve_location(current: &str, location: &str) -> Result<String> {
    let base = Url::parse(current)
        .map_err(|e| AvatarError::Redirect(format!("invalid request URL: {}", e)))?;
    let target = base
        .join(location)
        .map_err(|e| AvatarError::Redirect(format!("invalid Location '{}': {}", location, e)))?;
    Ok(target.into())
}

async fn remove_partial(dest: &Path) {
    if fs::try_exists(dest).await.unwrap_or(false) {
        let _ = fs::remove_file(dest).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::Path as AxumPath;
    use axum::http::{header, StatusCode};
    use axum::response::{IntoResponse, Response};
    use axum::routing::get;
    use axum::Router;
    use tempfile::tempdir;

    /// Spin up a local stand-in for the image host and return its base URL
    async fn serve(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    async fn ok_avatar(AxumPath(file): AxumPath<String>) -> Response {
        (
            StatusCode::OK,
            format!("avatar-bytes-for-{}", file).into_bytes(),
        )
            .into_response()
    }

    #[test]
    fn test_avatar_url_shape() {
        let fetcher = RemoteFetcher::new();
        assert_eq!(
            fetcher.avatar_url("alice"),
            "https://github.com/alice.png?size=128"
        );
    }

    #[test]
    fn test_resolve_location_absolute() {
        let url = resolve_location("http://a.example/x.png", "http://b.example/y.png").unwrap();
        assert_eq!(url, "http://b.example/y.png");
    }

    #[test]
    fn test_resolve_location_relative() {
        let url = resolve_location("http://a.example/avatars/x.png", "/cdn/y.png").unwrap();
        assert_eq!(url, "http://a.example/cdn/y.png");
    }

    #[tokio::test]
    async fn test_fetch_to_file_success() {
        let base = serve(Router::new().route("/{file}", get(ok_avatar))).await;
        let fetcher = RemoteFetcher::with_base_url(&base);

        let dir = tempdir().unwrap();
        let dest = dir.path().join("alice.png");
        fetcher.fetch_to_file("alice", &dest).await.unwrap();

        let data = std::fs::read(&dest).unwrap();
        assert_eq!(data, b"avatar-bytes-for-alice.png");
    }

    #[tokio::test]
    async fn test_fetch_follows_redirect() {
        let router = Router::new()
            .route(
                "/alice.png",
                get(|| async {
                    (
                        StatusCode::FOUND,
                        [(header::LOCATION, "/real/alice.png")],
                        "",
                    )
                }),
            )
            .route(
                "/real/alice.png",
                get(|| async { (StatusCode::OK, b"redirected-bytes".to_vec()) }),
            );
        let base = serve(router).await;
        let fetcher = RemoteFetcher::with_base_url(&base);

        let dir = tempdir().unwrap();
        let dest = dir.path().join("alice.png");
        fetcher.fetch_to_file("alice", &dest).await.unwrap();

        assert_eq!(std::fs::read(&dest).unwrap(), b"redirected-bytes");
    }

    #[tokio::test]
    async fn test_redirect_without_location_fails() {
        let router = Router::new().route(
            "/alice.png",
            get(|| async { (StatusCode::FOUND, "") }),
        );
        let base = serve(router).await;
        let fetcher = RemoteFetcher::with_base_url(&base);

        let dir = tempdir().unwrap();
        let dest = dir.path().join("alice.png");
        let err = fetcher.fetch_to_file("alice", &dest).await.unwrap_err();

        assert!(matches!(err, AvatarError::Redirect(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_non_200_fails_with_http_error() {
        let router = Router::new().route(
            "/alice.png",
            get(|| async { (StatusCode::NOT_FOUND, "") }),
        );
        let base = serve(router).await;
        let fetcher = RemoteFetcher::with_base_url(&base);

        let dir = tempdir().unwrap();
        let dest = dir.path().join("alice.png");
        let err = fetcher.fetch_to_file("alice", &dest).await.unwrap_err();

        assert!(matches!(err, AvatarError::Http(404)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_timeout_aborts_and_leaves_no_file() {
        let router = Router::new().route(
            "/slow.png",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                (StatusCode::OK, "too late")
            }),
        );
        let base = serve(router).await;
        let fetcher =
            RemoteFetcher::with_base_url(&base).with_timeout(Duration::from_millis(100));

        let dir = tempdir().unwrap();
        let dest = dir.path().join("slow.png");
        let err = fetcher.fetch_to_file("slow", &dest).await.unwrap_err();

        assert!(matches!(err, AvatarError::Timeout(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_network_error_on_unreachable_host() {
        // Nothing listens here
        let fetcher = RemoteFetcher::with_base_url("http://127.0.0.1:1")
            .with_timeout(Duration::from_secs(5));

        let dir = tempdir().unwrap();
        let dest = dir.path().join("alice.png");
        let err = fetcher.fetch_to_file("alice", &dest).await.unwrap_err();

        assert!(matches!(err, AvatarError::Network(_)));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_fetch_bytes_success() {
        let base = serve(Router::new().route("/{file}", get(ok_avatar))).await;
        let fetcher = RemoteFetcher::with_base_url(&base);

        let data = fetcher.fetch_bytes("bob").await.unwrap();
        assert_eq!(data, b"avatar-bytes-for-bob.png");
    }
}

//! Origin fetching

use bytes::BytesMut;
use futures::{StreamExt, TryStreamExt};
use reqwest::{header, Client};
use std::io;
use std::time::Duration;
use tracing::{debug, warn};
use transform_cache::{ByteStream, PipelineError};

/// A successful origin response with its body still streaming
pub struct OriginResponse {
    pub content_type: Option<String>,
    pub content_length: Option<u64>,
    pub body: ByteStream,
}

/// HTTP client for fetching source media from origins
pub struct OriginFetcher {
    client: Client,
}

impl OriginFetcher {
    pub fn new(timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("media-optimizer/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }

    /// GET `url`, optionally restricted to the inclusive byte range `(start, end)`
    pub async fn fetch(
        &self,
        url: &str,
        range: Option<(u64, u64)>,
    ) -> Result<OriginResponse, PipelineError> {
        let mut request = self.client.get(url);
        if let Some((start, end)) = range {
            request = request.header(header::RANGE, format!("bytes={}-{}", start, end));
        }

        debug!(url = %url, ?range, "Fetching from origin");
        let response = request.send().await.map_err(upstream)?;

        if !response.status().is_success() {
            warn!(status = %response.status(), url = %url, "Origin request failed");
            return Err(PipelineError::Upstream(format!(
                "origin returned status {}",
                response.status()
            )));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();

        let body = response
            .bytes_stream()
            .map_err(io::Error::other)
            .boxed();

        Ok(OriginResponse {
            content_type,
            content_length,
            body,
        })
    }

    /// HEAD `url` and return its content type
    pub async fn head(&self, url: &str) -> Result<Option<String>, PipelineError> {
        let response = self.client.head(url).send().await.map_err(upstream)?;

        if !response.status().is_success() {
            return Err(PipelineError::Upstream(format!(
                "origin returned status {}",
                response.status()
            )));
        }

        Ok(response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string))
    }
}

fn upstream(err: reqwest::Error) -> PipelineError {
    PipelineError::Upstream(err.to_string())
}

/// Buffer a whole body, refusing sources larger than `limit`
pub async fn collect_body(mut body: ByteStream, limit: u64) -> Result<Vec<u8>, PipelineError> {
    let mut buf = BytesMut::new();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.map_err(|e| PipelineError::Upstream(e.to_string()))?;
        if (buf.len() + chunk.len()) as u64 > limit {
            return Err(PipelineError::Unsupported(format!(
                "source larger than {} bytes",
                limit
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf.to_vec())
}

/// Buffer at most `limit` bytes of a body. Origins that ignore `Range` are cut off.
pub async fn collect_prefix(mut body: ByteStream, limit: usize) -> Result<Vec<u8>, PipelineError> {
    let mut buf = BytesMut::with_capacity(limit.min(64 * 1024));
    while buf.len() < limit {
        match body.next().await {
            Some(chunk) => {
                let chunk = chunk.map_err(|e| PipelineError::Upstream(e.to_string()))?;
                let take = chunk.len().min(limit - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            None => break,
        }
    }
    Ok(buf.to_vec())
}


#[cfg(test)]
mod tests {
    use super::testing::spawn_origin;
    use super::*;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use bytes::Bytes;
    use futures::stream;

    fn origin_router() -> Router {
        Router::new()
            .route(
                "/photo.png",
                get(|| async { ([(header::CONTENT_TYPE, "image/png")], "png bytes") }),
            )
            .route(
                "/echo-range",
                get(|headers: HeaderMap| async move {
                    headers
                        .get(header::RANGE)
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or("none")
                        .to_string()
                }),
            )
            .route("/missing", get(|| async { StatusCode::NOT_FOUND }))
    }

    fn fetcher() -> OriginFetcher {
        OriginFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_streams_body_and_content_type() {
        let base = spawn_origin(origin_router()).await;

        let response = fetcher()
            .fetch(&format!("{}/photo.png", base), None)
            .await
            .unwrap();
        assert_eq!(response.content_type.as_deref(), Some("image/png"));
        assert_eq!(response.content_length, Some(9));

        let body = collect_body(response.body, 1024).await.unwrap();
        assert_eq!(body, b"png bytes");
    }

    #[tokio::test]
    async fn test_fetch_sends_range_header() {
        let base = spawn_origin(origin_router()).await;

        let response = fetcher()
            .fetch(&format!("{}/echo-range", base), Some((0, 2047)))
            .await
            .unwrap();
        let body = collect_body(response.body, 1024).await.unwrap();
        assert_eq!(body, b"bytes=0-2047");
    }

    #[tokio::test]
    async fn test_non_success_is_upstream_error() {
        let base = spawn_origin(origin_router()).await;

        let result = fetcher().fetch(&format!("{}/missing", base), None).await;
        assert!(matches!(result, Err(PipelineError::Upstream(_))));

        let result = fetcher().head(&format!("{}/missing", base)).await;
        assert!(matches!(result, Err(PipelineError::Upstream(_))));
    }

    #[tokio::test]
    async fn test_head_returns_content_type() {
        let base = spawn_origin(origin_router()).await;

        let content_type = fetcher()
            .head(&format!("{}/photo.png", base))
            .await
            .unwrap();
        assert_eq!(content_type.as_deref(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_unreachable_origin_is_upstream_error() {
        // Nothing listens on the discard port
        let result = fetcher().fetch("http://127.0.0.1:9/photo.png", None).await;
        assert!(matches!(result, Err(PipelineError::Upstream(_))));
    }

    fn chunks(parts: &[&'static [u8]]) -> ByteStream {
        let items: Vec<io::Result<Bytes>> =
            parts.iter().map(|p| Ok(Bytes::from_static(p))).collect();
        stream::iter(items).boxed()
    }

    #[tokio::test]
    async fn test_collect_body_enforces_limit() {
        let body = collect_body(chunks(&[b"1234", b"5678"]), 8).await.unwrap();
        assert_eq!(body, b"12345678");

        let result = collect_body(chunks(&[b"1234", b"56789"]), 8).await;
        assert!(matches!(result, Err(PipelineError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_collect_prefix_truncates() {
        let body = collect_prefix(chunks(&[b"1234", b"5678"]), 6).await.unwrap();
        assert_eq!(body, b"123456");

        let body = collect_prefix(chunks(&[b"12"]), 6).await.unwrap();
        assert_eq!(body, b"12");
    }
}

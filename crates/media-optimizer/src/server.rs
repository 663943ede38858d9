//! HTTP server for optimizer endpoints
//!
//! Provides /health, /image, /animation and /ffprobe. Handlers validate
//! their query, hand a descriptor to the cache coordinator and stream the
//! resulting blob back.

use crate::error::{OptimizerError, Result};
use crate::params::{self, AnimationQuery, ByteRange, ImageQuery, ProbeQuery};
use crate::types::{HealthResponse, ProbeResponse, VideoInfo};
use axum::{
    body::Body,
    extract::{Query, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use std::io::{ErrorKind, SeekFrom};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use tower_http::cors::CorsLayer;
use tracing::{info, info_span, warn};
use transform_cache::{CacheCoordinator, CacheOutcome, RequestDescriptor};

const IMAGE_CACHE_CONTROL: &str = "public, max-age=31536000, s-maxage=31536000, immutable";
const ANIMATION_CACHE_CONTROL: &str = "public, max-age=31536000, must-revalidate";

/// Shared state for the HTTP server
pub struct ServerState {
    pub coordinator: CacheCoordinator,
    pub store: &'static str,
    pub started_at: DateTime<Utc>,
}

impl ServerState {
    pub fn new(coordinator: CacheCoordinator, store: &'static str) -> Self {
        Self {
            coordinator,
            store,
            started_at: Utc::now(),
        }
    }
}

pub type SharedState = Arc<ServerState>;

/// Create the HTTP router
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/image", get(image))
        // `get` also answers HEAD
        .route("/animation", get(animation))
        .route("/ffprobe", get(ffprobe))
        .layer(CorsLayer::permissive())
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

/// Health check endpoint
async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    let uptime_secs = (Utc::now() - state.started_at).num_seconds().max(0) as u64;

    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_secs,
        store: state.store.to_string(),
        cache: state.coordinator.stats(),
    })
}

async fn image(
    State(state): State<SharedState>,
    Query(query): Query<ImageQuery>,
    headers: HeaderMap,
) -> Result<Response> {
    let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
    let request = params::image_request(&query, accept)?;
    let span = info_span!(
        "image",
        url = %request.url,
        width = ?request.width,
        height = ?request.height,
        quality = request.quality,
        format = request.format.mime()
    );
    let descriptor = RequestDescriptor::Image(request);

    let (outcome, file) = open_blob(&state, &descriptor).await?;
    span.in_scope(|| info!(cache = %outcome.status, "Served image"));
    serve_blob(&outcome, file, IMAGE_CACHE_CONTROL, None, false).await
}

async fn animation(
    State(state): State<SharedState>,
    Query(query): Query<AnimationQuery>,
    method: Method,
    headers: HeaderMap,
) -> Result<Response> {
    let request = params::animation_request(&query)?;
    let descriptor = RequestDescriptor::Animation(request);

    let (outcome, file) = open_blob(&state, &descriptor).await?;
    info!(cache = %outcome.status, url = %descriptor.url(), "Served animation");

    let range = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    serve_blob(
        &outcome,
        file,
        ANIMATION_CACHE_CONTROL,
        Some(range),
        method == Method::HEAD,
    )
    .await
}

async fn ffprobe(State(state): State<SharedState>, Query(query): Query<ProbeQuery>) -> Response {
    match probe(&state, &query).await {
        Ok(info) => Json(ProbeResponse {
            success: true,
            data: Some(info),
            error: None,
        })
        .into_response(),
        Err(e) => {
            warn!(error = %e, "Probe failed");
            (
                e.status_code(),
                Json(ProbeResponse {
                    success: false,
                    data: None,
                    error: Some(e.public_message()),
                }),
            )
                .into_response()
        }
    }
}

async fn probe(state: &ServerState, query: &ProbeQuery) -> Result<VideoInfo> {
    let descriptor = RequestDescriptor::Probe(params::probe_request(query)?);
    let (outcome, mut file) = open_blob(state, &descriptor).await?;
    info!(cache = %outcome.status, url = %descriptor.url(), "Served probe");

    let mut raw = Vec::new();
    file.read_to_end(&mut raw).await?;
    serde_json::from_slice(&raw)
        .map_err(|e| OptimizerError::Io(Box::new(std::io::Error::other(e))))
}

/// Resolve a descriptor through the cache and open its blob
async fn open_blob(
    state: &ServerState,
    descriptor: &RequestDescriptor,
) -> Result<(CacheOutcome, File)> {
    let outcome = state.coordinator.get_or_populate(descriptor).await?;
    reopen_if_swept(state, descriptor, outcome).await
}

/// Open the blob behind `outcome`. The sweeper may delete it after the
/// lookup; that entry is dropped and the descriptor populated once more.
async fn reopen_if_swept(
    state: &ServerState,
    descriptor: &RequestDescriptor,
    outcome: CacheOutcome,
) -> Result<(CacheOutcome, File)> {
    match File::open(&outcome.blob.path).await {
        Ok(file) => Ok((outcome, file)),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            warn!(
                fingerprint = %outcome.blob.fingerprint,
                "Blob removed before it could be served, repopulating"
            );
            state
                .coordinator
                .cache()
                .invalidate(&outcome.blob.fingerprint)
                .await?;
            let outcome = state.coordinator.get_or_populate(descriptor).await?;
            let file = File::open(&outcome.blob.path).await?;
            Ok((outcome, file))
        }
        Err(e) => Err(e.into()),
    }
}

/// Stream a cached blob with cache headers. `range` is `Some` for endpoints
/// that honour byte ranges, holding the request's `Range` header if any.
async fn serve_blob(
    outcome: &CacheOutcome,
    mut file: File,
    cache_control: &'static str,
    range: Option<Option<&str>>,
    head_only: bool,
) -> Result<Response> {
    let blob = &outcome.blob;
    let size = file.metadata().await?.len();

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&blob.content_type)
            .unwrap_or(HeaderValue::from_static("application/octet-stream")),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static(cache_control));
    headers.insert("x-image-cache", HeaderValue::from_static(outcome.status.as_str()));
    headers.insert("x-image-age", HeaderValue::from(blob.age_secs));

    let byte_range = match range {
        Some(range_header) => {
            headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
            params::parse_range(range_header, size)
        }
        None => ByteRange::Full,
    };

    let (status, body) = match byte_range {
        ByteRange::Full => {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
            (StatusCode::OK, Body::from_stream(ReaderStream::new(file)))
        }
        ByteRange::Partial(start, end) => {
            let len = end - start + 1;
            file.seek(SeekFrom::Start(start)).await?;
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
            if let Ok(value) = HeaderValue::from_str(&format!("bytes {}-{}/{}", start, end, size)) {
                headers.insert(header::CONTENT_RANGE, value);
            }
            (
                StatusCode::PARTIAL_CONTENT,
                Body::from_stream(ReaderStream::new(file.take(len))),
            )
        }
        ByteRange::Unsatisfiable => {
            if let Ok(value) = HeaderValue::from_str(&format!("bytes */{}", size)) {
                headers.insert(header::CONTENT_RANGE, value);
            }
            return Ok((StatusCode::RANGE_NOT_SATISFIABLE, headers).into_response());
        }
    };

    if head_only {
        return Ok((status, headers).into_response());
    }
    Ok((status, headers, body).into_response())
}

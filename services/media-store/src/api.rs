use crate::config::{ApiConfig, StorageConfig};
use crate::store::{BlobStore, PutOptions, StoreError};
use crate::thumbnail::VideoStored;
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, FromRequest, Multipart, Path, Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// `None` when no storage is configured
    pub store: Option<Arc<dyn BlobStore>>,
    pub videos_container: String,
    pub thumbnails_container: String,
    /// Thumbnail worker inbox, `None` when generation is disabled
    pub thumbnails: Option<mpsc::Sender<VideoStored>>,
}

impl AppState {
    pub fn new(
        store: Option<Arc<dyn BlobStore>>,
        config: &StorageConfig,
        thumbnails: Option<mpsc::Sender<VideoStored>>,
    ) -> Self {
        Self {
            store,
            videos_container: config.videos_container.clone(),
            thumbnails_container: config.thumbnails_container.clone(),
            thumbnails,
        }
    }
}

/// One entry of the video listing
#[derive(Debug, Serialize)]
pub struct VideoEntry {
    pub name: String,
    pub url: String,
}

/// Successful upload response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub message: String,
    pub file_name: String,
    pub url: String,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

/// Upload failures, each mapped to a plain-text response
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No video data provided")]
    EmptyPayload,

    #[error("No video file provided")]
    MissingVideoField,

    #[error("{message}")]
    Unreadable { status: StatusCode, message: String },

    #[error("Storage connection not configured")]
    NotConfigured,

    #[error("Error uploading video")]
    Storage(#[source] StoreError),
}

impl UploadError {
    fn status(&self) -> StatusCode {
        match self {
            UploadError::EmptyPayload | UploadError::MissingVideoField => StatusCode::BAD_REQUEST,
            UploadError::Unreadable { status, .. } => *status,
            UploadError::NotConfigured | UploadError::Storage(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        (self.status(), self.to_string()).into_response()
    }
}

/// Create the API router
pub fn create_router(state: AppState, config: &ApiConfig) -> Router {
    let cors = if config.cors_enabled {
        let origin = if config.cors_origins.is_empty() {
            AllowOrigin::from(Any)
        } else {
            let origins: Vec<HeaderValue> = config
                .cors_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            AllowOrigin::list(origins)
        };
        CorsLayer::new()
            .allow_origin(origin)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers([header::CONTENT_TYPE])
    } else {
        CorsLayer::new()
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/api/listVideos", get(list_videos))
        .route("/api/uploadVideo", post(upload_video))
        .route("/blobs/:container/*name", get(serve_blob))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "media-store"
    }))
}

/// List every video in store order
#[instrument(skip(state))]
async fn list_videos(
    State(state): State<AppState>,
) -> Result<Json<Vec<VideoEntry>>, (StatusCode, Json<ErrorResponse>)> {
    let internal = |e: StoreError| {
        error!(error = %e, "Failed to list videos");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: e.to_string(),
            }),
        )
    };

    let store = state.store.as_ref().ok_or(StoreError::NotConfigured).map_err(internal)?;

    let names = store
        .list(&state.videos_container)
        .await
        .map_err(internal)?;

    let entries = names
        .into_iter()
        .map(|name| VideoEntry {
            url: store.url(&state.videos_container, &name),
            name,
        })
        .collect::<Vec<_>>();

    debug!(count = entries.len(), "Listed videos");
    Ok(Json(entries))
}

/// Accept one video, as multipart field `video` or as the raw body
#[instrument(skip(state, request))]
async fn upload_video(
    State(state): State<AppState>,
    request: Request,
) -> Result<Json<UploadResponse>, UploadError> {
    info!("Upload request received");

    let result = store_upload(&state, request).await;
    match &result {
        Ok(_) => metrics::counter!("media_uploads_total").increment(1),
        Err(e) => {
            warn!(error = %e, "Upload rejected");
            metrics::counter!("media_upload_failures_total").increment(1);
        }
    }

    result.map(Json)
}

async fn store_upload(state: &AppState, request: Request) -> Result<UploadResponse, UploadError> {
    let data = read_payload(request).await?;
    if data.is_empty() {
        return Err(UploadError::EmptyPayload);
    }

    let file_name = generate_video_name(Utc::now(), Uuid::new_v4());
    debug!(file_name = %file_name, size_bytes = data.len(), "Generated filename");

    let store = state.store.as_ref().ok_or(UploadError::NotConfigured)?;

    let options = PutOptions::new("video/mp4")
        .disposition("inline")
        .metadata("uploaded-at", Utc::now().to_rfc3339());

    let url = store
        .put(&state.videos_container, &file_name, data, &options)
        .await
        .map_err(|e| {
            error!(error = %e, file_name = %file_name, "Failed to store video");
            UploadError::Storage(e)
        })?;

    info!(file_name = %file_name, "Upload successful");

    if let Some(ref thumbnails) = state.thumbnails {
        if let Err(e) = thumbnails.try_send(VideoStored {
            name: file_name.clone(),
        }) {
            warn!(error = %e, file_name = %file_name, "Thumbnail queue unavailable");
        }
    }

    Ok(UploadResponse {
        message: "Video uploaded successfully!".to_string(),
        file_name,
        url,
    })
}

/// Pull the upload bytes out of the request.
///
/// A multipart body that cannot be parsed is treated as empty.
async fn read_payload(request: Request) -> Result<Bytes, UploadError> {
    if !is_multipart(request.headers()) {
        return Bytes::from_request(request, &())
            .await
            .map_err(|rejection| UploadError::Unreadable {
                status: rejection.status(),
                message: rejection.body_text(),
            });
    }

    let mut multipart = match Multipart::from_request(request, &()).await {
        Ok(multipart) => multipart,
        Err(rejection) => {
            warn!(error = %rejection.body_text(), "Multipart parsing failed");
            return Ok(Bytes::new());
        }
    };

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) if field.name() == Some("video") => {
                debug!(
                    file_name = field.file_name().unwrap_or("unnamed"),
                    "File received"
                );
                return Ok(field.bytes().await.unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to read video field");
                    Bytes::new()
                }));
            }
            Ok(Some(_)) => continue,
            Ok(None) => return Err(UploadError::MissingVideoField),
            Err(e) => {
                warn!(error = %e, "Multipart parsing failed");
                return Ok(Bytes::new());
            }
        }
    }
}

fn is_multipart(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_ascii_lowercase().starts_with("multipart/form-data"))
        .unwrap_or(false)
}

/// Name for a newly uploaded video
pub fn generate_video_name(now: DateTime<Utc>, id: Uuid) -> String {
    let suffix = id.simple().to_string();
    format!("video-{}-{}.mp4", now.timestamp_millis(), &suffix[..8])
}

/// Serve a stored object from one of the two collections
#[instrument(skip(state))]
async fn serve_blob(
    State(state): State<AppState>,
    Path((container, name)): Path<(String, String)>,
) -> Response {
    if container != state.videos_container && container != state.thumbnails_container {
        return StatusCode::NOT_FOUND.into_response();
    }

    let Some(ref store) = state.store else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            StoreError::NotConfigured.to_string(),
        )
            .into_response();
    };

    match store.get(&container, &name).await {
        Ok(object) => {
            let content_type = object
                .content_type
                .unwrap_or_else(|| "application/octet-stream".to_string());
            let mut response = ([(header::CONTENT_TYPE, content_type)], object.data).into_response();
            if let Some(value) = object
                .content_disposition
                .as_deref()
                .and_then(|d| HeaderValue::from_str(d).ok())
            {
                response
                    .headers_mut()
                    .insert(header::CONTENT_DISPOSITION, value);
            }
            response
        }
        Err(StoreError::NotFound { .. }) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => {
            error!(error = %e, "Failed to serve object");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Start the HTTP API server
pub async fn start_api_server(
    state: AppState,
    config: &ApiConfig,
    shutdown: CancellationToken,
) -> Result<()> {
    let router = create_router(state, config);
    let addr = format!("{}:{}", config.host, config.port);

    info!(address = %addr, "Starting media API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("API server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryBlobStore, MockBlobStore};
    use axum::body::Body;
    use chrono::TimeZone;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn state_with(store: Option<Arc<dyn BlobStore>>) -> AppState {
        AppState::new(store, &StorageConfig::default(), None)
    }

    fn memory_state() -> (AppState, Arc<MemoryBlobStore>) {
        let store = Arc::new(MemoryBlobStore::new("http://localhost:7072/blobs"));
        (state_with(Some(store.clone())), store)
    }

    async fn send(state: AppState, request: axum::http::Request<Body>) -> (StatusCode, Bytes) {
        let response = create_router(state, &ApiConfig::default())
            .oneshot(request)
            .await
            .unwrap();
        let status = response.status();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        (status, body)
    }

    fn multipart_request(field: &str, payload: &[u8]) -> axum::http::Request<Body> {
        let boundary = "feedboundary";
        let mut body = Vec::new();
        body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{field}\"; filename=\"clip.mp4\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(b"Content-Type: video/mp4\r\n\r\n");
        body.extend_from_slice(payload);
        body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

        axum::http::Request::builder()
            .method("POST")
            .uri("/api/uploadVideo")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={boundary}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn raw_request(payload: &'static [u8]) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri("/api/uploadVideo")
            .header(header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from(payload))
            .unwrap()
    }

    #[test]
    fn test_generate_video_name() {
        let now = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap();
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            generate_video_name(now, id),
            format!("video-{}-550e8400.mp4", now.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_list_videos_returns_store_order() {
        let (state, store) = memory_state();
        for name in ["video-2.mp4", "video-1.mp4"] {
            store
                .put("videos", name, Bytes::from_static(b"x"), &PutOptions::new("video/mp4"))
                .await
                .unwrap();
        }

        let request = axum::http::Request::builder()
            .uri("/api/listVideos")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(state, request).await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"name": "video-1.mp4", "url": "http://localhost:7072/blobs/videos/video-1.mp4"},
                {"name": "video-2.mp4", "url": "http://localhost:7072/blobs/videos/video-2.mp4"}
            ])
        );
    }

    #[tokio::test]
    async fn test_list_videos_store_failure_is_500_with_error() {
        let mut store = MockBlobStore::new();
        store
            .expect_list()
            .returning(|_| Err(StoreError::Backend("connection refused".to_string())));

        let request = axum::http::Request::builder()
            .uri("/api/listVideos")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(state_with(Some(Arc::new(store))), request).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert!(json["error"].as_str().unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_list_videos_without_storage_is_500() {
        let request = axum::http::Request::builder()
            .uri("/api/listVideos")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(state_with(None), request).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"], "Storage connection not configured");
    }

    #[tokio::test]
    async fn test_cors_preflight_allows_any_origin() {
        let (state, _) = memory_state();
        let request = axum::http::Request::builder()
            .method("OPTIONS")
            .uri("/api/uploadVideo")
            .header(header::ORIGIN, "http://localhost:5500")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "content-type")
            .body(Body::empty())
            .unwrap();

        let response = create_router(state, &ApiConfig::default())
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
        let methods = response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_METHODS)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert!(methods.contains("POST"));
        assert!(methods.contains("OPTIONS"));
    }

    #[tokio::test]
    async fn test_upload_multipart_stores_video() {
        let (state, store) = memory_state();
        let (status, body) = send(state, multipart_request("video", b"fake mp4 bytes")).await;

        assert_eq!(status, StatusCode::OK);
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["message"], "Video uploaded successfully!");

        let file_name = json["fileName"].as_str().unwrap();
        assert!(file_name.starts_with("video-") && file_name.ends_with(".mp4"));
        assert_eq!(
            json["url"],
            format!("http://localhost:7072/blobs/videos/{}", file_name)
        );

        let object = store.get("videos", file_name).await.unwrap();
        assert_eq!(object.data, Bytes::from_static(b"fake mp4 bytes"));
        assert_eq!(object.content_type.as_deref(), Some("video/mp4"));
        assert_eq!(object.content_disposition.as_deref(), Some("inline"));
        assert_eq!(object.metadata.len(), 1);
        assert_eq!(object.metadata[0].0, "uploaded-at");

        let request = axum::http::Request::builder()
            .uri(format!("/blobs/videos/{}", file_name))
            .body(Body::empty())
            .unwrap();
        let response = create_router(state_with(Some(store)), &ApiConfig::default())
            .oneshot(request)
            .await
            .unwrap();
        assert_eq!(
            response.headers().get(header::CONTENT_DISPOSITION).unwrap(),
            "inline"
        );
    }

    #[tokio::test]
    async fn test_upload_passes_storage_options() {
        let mut store = MockBlobStore::new();
        store
            .expect_put()
            .times(1)
            .withf(|container, name, data, options| {
                container.to_string() == "videos"
                    && name.to_string().starts_with("video-")
                    && *data == Bytes::from_static(b"data")
                    && options.content_type == "video/mp4"
                    && options.content_disposition.as_deref() == Some("inline")
                    && options.metadata.len() == 1
                    && options.metadata[0].0 == "uploaded-at"
                    && DateTime::parse_from_rfc3339(&options.metadata[0].1).is_ok()
            })
            .returning(|_, name, _, _| Ok(format!("http://store.example.com/videos/{}", name)));

        let (status, _) = send(state_with(Some(Arc::new(store))), raw_request(b"data")).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_upload_raw_body_fallback() {
        let (state, store) = memory_state();
        let (status, _) = send(state, raw_request(b"raw bytes")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(store.list("videos").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upload_empty_payload_is_client_error() {
        let (state, store) = memory_state();
        let (status, body) = send(state, raw_request(b"")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, Bytes::from_static(b"No video data provided"));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_upload_empty_payload_without_storage_is_still_client_error() {
        let (status, _) = send(state_with(None), raw_request(b"")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_upload_multipart_without_video_field() {
        let (state, _) = memory_state();
        let (status, body) = send(state, multipart_request("other", b"data")).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, Bytes::from_static(b"No video file provided"));
    }

    #[tokio::test]
    async fn test_upload_without_storage_is_server_error() {
        let (status, body) = send(state_with(None), raw_request(b"data")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, Bytes::from_static(b"Storage connection not configured"));
    }

    #[tokio::test]
    async fn test_upload_store_failure_is_server_error() {
        let mut store = MockBlobStore::new();
        store
            .expect_put()
            .returning(|_, _, _, _| Err(StoreError::Backend("bucket missing".to_string())));

        let (status, body) = send(state_with(Some(Arc::new(store))), raw_request(b"data")).await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body, Bytes::from_static(b"Error uploading video"));
    }

    #[tokio::test]
    async fn test_upload_notifies_thumbnail_worker() {
        let store = Arc::new(MemoryBlobStore::new("http://localhost:7072/blobs"));
        let (tx, mut rx) = mpsc::channel(4);
        let state = AppState::new(Some(store), &StorageConfig::default(), Some(tx));

        let (status, body) = send(state, raw_request(b"data")).await;
        assert_eq!(status, StatusCode::OK);

        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.name, json["fileName"].as_str().unwrap());
    }

    #[tokio::test]
    async fn test_serve_blob() {
        let (state, store) = memory_state();
        store
            .put("thumbnails", "a.mp4-thumb.png", Bytes::from_static(b"png"), &PutOptions::new("image/png"))
            .await
            .unwrap();

        let request = axum::http::Request::builder()
            .uri("/blobs/thumbnails/a.mp4-thumb.png")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(state.clone(), request).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, Bytes::from_static(b"png"));

        let request = axum::http::Request::builder()
            .uri("/blobs/private/a.mp4-thumb.png")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(state, request).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}

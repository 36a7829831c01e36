use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::Arc,
    time::SystemTime,
};

use axum::{
    Json, Router,
    body::Body,
    extract::{Path as RoutePath, State},
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, post},
};
use mediadrop::{
    DeliveryReport, FetchError, Orchestrator, Platform, Quality, Settings, UrlRegistry, YtDlp,
    delivery::OutboxSink,
    filename::{FALLBACK_FILENAME, split_extension},
};
use serde::{Deserialize, Serialize};
use tokio::{
    net::TcpListener,
    sync::{OwnedSemaphorePermit, Semaphore},
    time::Duration,
};
use tokio_util::io::ReaderStream;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};
use url::Url;
use uuid::Uuid;

#[derive(Clone)]
struct AppState {
    orchestrator: Orchestrator,
    download_semaphore: Arc<Semaphore>,
    outbox_dir: PathBuf,
    outbox_retention: Duration,
}

#[derive(Debug, Deserialize)]
struct SubmitRequest {
    url: String,
}

#[derive(Debug, Serialize)]
struct SubmitResponse {
    id: String,
    platform: Platform,
    platform_label: String,
    icon: &'static str,
    metadata_available: bool,
    title: Option<String>,
    uploader: Option<String>,
    duration: Option<String>,
    qualities: [Quality; 3],
}

#[derive(Debug, Deserialize)]
struct DownloadRequest {
    id: String,
    quality: Quality,
}

#[derive(Debug, Serialize)]
struct DownloadResponse {
    job: Uuid,
    report: DeliveryReport,
    files: Vec<OutboxFile>,
}

#[derive(Debug, Serialize)]
struct OutboxFile {
    name: String,
    href: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
    code: Option<&'static str>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            code: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
            code: None,
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
            code: None,
        }
    }
}

impl From<FetchError> for ApiError {
    fn from(error: FetchError) -> Self {
        let status = match &error {
            FetchError::InvalidUrl { .. } => StatusCode::BAD_REQUEST,
            FetchError::UnknownHandle { .. } => StatusCode::NOT_FOUND,
            FetchError::AllFormatsExhausted { .. } | FetchError::NoOutputProduced { .. } => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            FetchError::ProbeFailure { .. } | FetchError::DeliveryFailure { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };

        Self {
            status,
            message: error.user_message().to_string(),
            code: Some(error.code()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
            code: self.code,
        });

        (self.status, body).into_response()
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "mediadrop=info,tower_http=info".to_string()),
        )
        .init();

    if let Err(error) = run().await {
        eprintln!("Server error: {}", error.message);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), ApiError> {
    let settings = Settings::from_env();

    tokio::fs::create_dir_all(&settings.outbox_dir)
        .await
        .map_err(|error| ApiError::internal(format!("Could not create outbox directory: {error}")))?;
    if let Some(scratch_dir) = &settings.scratch_dir {
        tokio::fs::create_dir_all(scratch_dir).await.map_err(|error| {
            ApiError::internal(format!("Could not create scratch directory: {error}"))
        })?;
    }

    let registry = UrlRegistry::new(settings.url_cache_ttl_seconds, settings.url_cache_capacity);
    let extractor = Arc::new(YtDlp::from_settings(&settings));
    let orchestrator = Orchestrator::new(extractor, registry, &settings);

    let state = AppState {
        orchestrator,
        download_semaphore: Arc::new(Semaphore::new(settings.max_concurrent_downloads)),
        outbox_dir: settings.outbox_dir.clone(),
        outbox_retention: settings.outbox_retention,
    };

    sweep_expired_outbox_jobs(&state.outbox_dir, state.outbox_retention).await;

    let cors = build_cors_layer(&settings)?;

    let app = Router::new()
        .route("/api/health", get(health))
        .route("/api/submit", post(submit_url))
        .route("/api/download", post(start_download))
        .route("/api/files/{job}/{name}", get(fetch_outbox_file))
        .with_state(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(&settings.bind_addr)
        .await
        .map_err(|error| {
            ApiError::internal(format!("Could not bind {}: {error}", settings.bind_addr))
        })?;

    info!(
        addr = %settings.bind_addr,
        extractor = %settings.yt_dlp_bin,
        max_concurrent = settings.max_concurrent_downloads,
        "Service ready"
    );

    axum::serve(listener, app)
        .await
        .map_err(|error| ApiError::internal(format!("HTTP server error: {error}")))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

async fn submit_url(
    State(state): State<AppState>,
    Json(payload): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    if payload.url.trim().is_empty() {
        return Err(ApiError::bad_request("Send a media URL."));
    }

    let submission = state.orchestrator.submit_url(&payload.url).await?;
    let metadata = submission.metadata.as_ref();

    Ok(Json(SubmitResponse {
        platform_label: submission.platform.label(),
        icon: submission.platform.icon(),
        metadata_available: metadata.is_some(),
        title: metadata.map(|metadata| metadata.display_title()),
        uploader: metadata.map(|metadata| metadata.display_uploader()),
        duration: metadata.map(|metadata| metadata.display_duration()),
        qualities: [Quality::High, Quality::Standard, Quality::Audio],
        id: submission.id,
        platform: submission.platform,
    }))
}

async fn start_download(
    State(state): State<AppState>,
    Json(payload): Json<DownloadRequest>,
) -> Result<Json<DownloadResponse>, ApiError> {
    let id = payload.id.trim().to_string();
    if id.is_empty() {
        return Err(ApiError::bad_request("Missing URL handle."));
    }

    let permit = state
        .download_semaphore
        .clone()
        .acquire_owned()
        .await
        .map_err(|_| ApiError::internal("Could not reserve download capacity."))?;
    sweep_expired_outbox_jobs(&state.outbox_dir, state.outbox_retention).await;

    let job = Uuid::new_v4();
    let job_dir = state.outbox_dir.join(job.to_string());
    tokio::fs::create_dir_all(&job_dir).await.map_err(|error| {
        ApiError::internal(format!("Could not prepare outbox directory: {error}"))
    })?;

    let task = tokio::spawn(run_download_job(
        state.orchestrator.clone(),
        id,
        payload.quality,
        job_dir,
        state.outbox_retention,
        permit,
    ));
    let report = task
        .await
        .map_err(|error| ApiError::internal(format!("Download task failed: {error}")))??;

    let files = report
        .delivered
        .iter()
        .map(|name| OutboxFile {
            name: name.clone(),
            href: format!("/api/files/{job}/{}", urlencoding::encode(name)),
        })
        .collect();
    Ok(Json(DownloadResponse { job, report, files }))
}

/// Runs one download into `job_dir`. The permit and the outbox expiry belong
/// to the job, so both outlive a client that disconnects early.
async fn run_download_job(
    orchestrator: Orchestrator,
    id: String,
    quality: Quality,
    job_dir: PathBuf,
    retention: Duration,
    _permit: OwnedSemaphorePermit,
) -> Result<DeliveryReport, FetchError> {
    let sink = OutboxSink::new(&job_dir);
    let outcome = orchestrator.select_quality(&id, quality, &sink).await;

    // Parts written before a failure stay retrievable until the job expires.
    if outcome.is_ok() || dir_has_entries(&job_dir).await {
        schedule_cleanup_outbox_job(job_dir, retention);
    } else {
        cleanup_outbox_job(&job_dir).await;
    }
    outcome
}

async fn fetch_outbox_file(
    State(state): State<AppState>,
    RoutePath((job, name)): RoutePath<(Uuid, String)>,
) -> Result<Response, ApiError> {
    if name.is_empty() || name.contains(['/', '\\']) || name.starts_with('.') {
        return Err(ApiError::bad_request("Invalid file name."));
    }

    let job_dir = state.outbox_dir.join(job.to_string());
    let path = resolve_outbox_file(&job_dir, &name)
        .await?
        .ok_or_else(|| ApiError::not_found("File not found or expired."))?;

    let metadata = tokio::fs::metadata(&path)
        .await
        .map_err(|error| ApiError::internal(format!("Could not read file metadata: {error}")))?;
    let file = tokio::fs::File::open(&path)
        .await
        .map_err(|error| ApiError::internal(format!("Could not open file: {error}")))?;
    let body = Body::from_stream(ReaderStream::new(file));

    let mut headers = HeaderMap::new();
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_filename(&name)),
    );
    headers.insert(
        CONTENT_LENGTH,
        HeaderValue::from_str(&metadata.len().to_string())
            .map_err(|_| ApiError::internal("Could not build content length."))?,
    );
    headers.insert(
        CONTENT_DISPOSITION,
        HeaderValue::from_str(&build_content_disposition(&name))
            .map_err(|_| ApiError::internal("Could not build content disposition."))?,
    );

    Ok((headers, body).into_response())
}

fn build_cors_layer(settings: &Settings) -> Result<CorsLayer, ApiError> {
    let configured = if settings.allowed_origins.is_empty() {
        warn!(addr = %settings.bind_addr, "ALLOWED_ORIGINS is not set, allowing only the service origin");
        vec![format!("http://{}", settings.bind_addr)]
    } else {
        settings.allowed_origins.clone()
    };

    let origins = configured
        .iter()
        .map(|origin| {
            normalize_origin(origin)
                .and_then(|normalized| HeaderValue::from_str(&normalized).ok())
                .ok_or_else(|| {
                    ApiError::internal(format!(
                        "Invalid origin in ALLOWED_ORIGINS: {origin}. Use values like https://example.com"
                    ))
                })
        })
        .collect::<Result<Vec<_>, _>>()?;
    info!(count = origins.len(), "CORS allow-list loaded");

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE])
        .expose_headers([CONTENT_DISPOSITION, CONTENT_LENGTH]))
}

/// Serialized origin (`scheme://host[:port]`) of a bare http(s) URL, in the
/// form browsers send in the `Origin` header.
fn normalize_origin(value: &str) -> Option<String> {
    let parsed = Url::parse(value.trim()).ok()?;
    let bare = parsed.path() == "/"
        && parsed.query().is_none()
        && parsed.fragment().is_none()
        && parsed.username().is_empty();
    if !bare || !matches!(parsed.scheme(), "http" | "https") {
        return None;
    }
    Some(parsed.origin().ascii_serialization())
}

async fn dir_has_entries(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}

async fn resolve_outbox_file(job_dir: &Path, name: &str) -> Result<Option<PathBuf>, ApiError> {
    let canonical_job_dir = match tokio::fs::canonicalize(job_dir).await {
        Ok(path) => path,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(ApiError::internal(format!(
                "Could not resolve outbox directory: {error}"
            )));
        }
    };

    let candidate = job_dir.join(name);
    let canonical_candidate = match tokio::fs::canonicalize(&candidate).await {
        Ok(path) => path,
        Err(error) if error.kind() == ErrorKind::NotFound => return Ok(None),
        Err(error) => {
            return Err(ApiError::internal(format!(
                "Could not resolve outbox file: {error}"
            )));
        }
    };

    if !canonical_candidate.starts_with(&canonical_job_dir) {
        warn!(path = ?canonical_candidate, "Blocked file outside its outbox job");
        return Ok(None);
    }

    match tokio::fs::metadata(&canonical_candidate).await {
        Ok(metadata) if metadata.is_file() => Ok(Some(canonical_candidate)),
        Ok(_) => Ok(None),
        Err(error) if error.kind() == ErrorKind::NotFound => Ok(None),
        Err(error) => Err(ApiError::internal(format!(
            "Could not read outbox file: {error}"
        ))),
    }
}

async fn cleanup_outbox_job(job_dir: &Path) {
    if let Err(error) = tokio::fs::remove_dir_all(job_dir).await
        && error.kind() != ErrorKind::NotFound
    {
        info!(path = ?job_dir, %error, "Could not remove outbox job");
    }
}

fn schedule_cleanup_outbox_job(job_dir: PathBuf, retention: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(retention).await;
        cleanup_outbox_job(&job_dir).await;
    });
}

/// Removes job directories older than `max_age`. Anything in the outbox that
/// is not a job directory is left alone.
async fn sweep_expired_outbox_jobs(outbox_dir: &Path, max_age: Duration) {
    if max_age.is_zero() {
        return;
    }

    let mut entries = match tokio::fs::read_dir(outbox_dir).await {
        Ok(entries) => entries,
        Err(error) => {
            if error.kind() != ErrorKind::NotFound {
                warn!(%error, "Could not open outbox for cleanup");
            }
            return;
        }
    };

    let now = SystemTime::now();
    let mut removed = 0usize;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let is_job = entry
            .file_name()
            .to_str()
            .is_some_and(|name| Uuid::parse_str(name).is_ok());
        let Ok(metadata) = entry.metadata().await else {
            continue;
        };
        if !is_job || !metadata.is_dir() {
            continue;
        }

        let expired = metadata
            .modified()
            .ok()
            .and_then(|modified| now.duration_since(modified).ok())
            .is_some_and(|age| age >= max_age);
        if expired {
            cleanup_outbox_job(&entry.path()).await;
            removed += 1;
        }
    }

    if removed > 0 {
        info!(removed, "Swept expired outbox jobs");
    }
}

/// Whole artifacts get their media type; `.partNNN` chunks are opaque bytes.
fn content_type_for_filename(filename: &str) -> &'static str {
    let (_, extension) = split_extension(filename);
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "mp4" | "m4v" => "video/mp4",
        "webm" => "video/webm",
        "mkv" => "video/x-matroska",
        "mp3" => "audio/mpeg",
        "m4a" => "audio/mp4",
        "opus" | "ogg" => "audio/ogg",
        _ => "application/octet-stream",
    }
}

fn build_content_disposition(filename: &str) -> String {
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii_fallback_name(filename),
        urlencoding::encode(filename)
    )
}

/// ASCII stand-in for the quoted `filename=` parameter. Names arrive already
/// sanitized, so only non-ASCII characters and quoting hazards are replaced.
fn ascii_fallback_name(name: &str) -> String {
    let ascii: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if ascii.trim().is_empty() {
        FALLBACK_FILENAME.to_string()
    } else {
        ascii
    }
}

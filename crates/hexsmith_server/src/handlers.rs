//! Request handlers.

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::stream::{self, Stream, StreamExt};
use hexsmith_core::{BuildOutcome, BuildPipeline, BuildRequest, PipelineEvent};
use hexsmith_project::SourceBundle;
use hexsmith_runner::ArtifactNormalizer;
use serde_json::json;
use tokio::fs::File;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};

/// Interval between keep-alive comments on the event stream.
pub const KEEP_ALIVE: Duration = Duration::from_secs(15);

/// Shared handler state.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<BuildPipeline>,
}

impl AppState {
    pub fn new(pipeline: Arc<BuildPipeline>) -> Self {
        Self { pipeline }
    }
}

fn respond(outcome: BuildOutcome) -> Response {
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(outcome)).into_response()
}

/// POST /build: plain build, or an AI build when the body asks for one.
pub async fn build(State(state): State<AppState>, body: Bytes) -> Response {
    let request = BuildRequest::from_body(&body);
    info!(ai = request.is_ai_request(), "[HTTP] POST /build");
    respond(state.pipeline.handle(request).await)
}

/// POST /ai-build: always generates.
pub async fn ai_build(State(state): State<AppState>, body: Bytes) -> Response {
    let request = BuildRequest::from_body(&body);
    info!("[HTTP] POST /ai-build");
    respond(state.pipeline.run_ai_build(&request).await)
}

fn artifact_missing(normalizer: &ArtifactNormalizer, listing: Vec<String>) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "success": false,
            "message": "HEX not found. Build first via POST /build",
            "expected": normalizer.canonical_path(),
            "builtDir": normalizer.build_dir(),
            "builtListing": listing,
        })),
    )
        .into_response()
}

/// Open a file and size it through the same handle.
pub(crate) async fn open_artifact(path: &Path) -> std::io::Result<(File, u64)> {
    let file = File::open(path).await?;
    let size = file.metadata().await?.len();
    Ok((file, size))
}

/// GET /download: the canonical artifact, or the newest one.
///
/// The length header comes from the opened handle, so a build replacing the
/// artifact mid-request cannot pair one file's size with another's bytes.
pub async fn download(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let normalizer = state.pipeline.normalizer();
    let path = match normalizer.current().await {
        Ok(Some(artifact)) => artifact.path,
        Ok(None) => return artifact_missing(normalizer, normalizer.listing().await),
        Err(e) => {
            error!(error = %e, "[DOWNLOAD] Could not inspect build directory");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let (file, size) = match open_artifact(&path).await {
        Ok(opened) => opened,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "[DOWNLOAD] HEX disappeared before it was opened");
            return artifact_missing(normalizer, normalizer.listing().await);
        }
        Err(e) => {
            error!(path = %path.display(), error = %e, "[DOWNLOAD] Could not open HEX");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    info!(
        path = %path.display(),
        size,
        user_agent = agent,
        "[DOWNLOAD] HEX requested"
    );

    (
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"binary.hex\"".to_string(),
            ),
            (header::CONTENT_LENGTH, size.to_string()),
        ],
        Body::from_stream(ReaderStream::new(file)),
    )
        .into_response()
}

/// GET /code: declared sources, concatenated.
pub async fn code(State(state): State<AppState>) -> Response {
    let layout = state.pipeline.layout();
    match SourceBundle::read(layout).await {
        Ok(Some(bundle)) => Json(json!({
            "success": true,
            "code": bundle.code,
            "files": bundle.files,
        }))
        .into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "message": "No TypeScript sources found via pxt.json",
                "projectDir": layout.root(),
            })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "[CODE] Could not read sources");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "success": false, "message": e.to_string() })),
            )
                .into_response()
        }
    }
}

/// GET /events: named pipeline events for as long as the client stays.
pub async fn events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.pipeline.events().subscribe();
    info!(listener = subscription.id(), "[EVENTS] Client connected");

    let connected = stream::once(async { Ok(Event::default().comment("connected")) });
    let updates = subscription.map(|event| Ok(to_sse(&event)));

    Sse::new(connected.chain(updates)).keep_alive(KeepAlive::new().interval(KEEP_ALIVE).text("ping"))
}

fn to_sse(event: &PipelineEvent) -> Event {
    Event::default()
        .event(event.name.as_str())
        .data(event.data.to_string())
}

/// GET /: endpoint index and build directory state.
pub async fn index(State(state): State<AppState>) -> Json<serde_json::Value> {
    let normalizer = state.pipeline.normalizer();
    Json(json!({
        "endpoints": {
            "build": { "method": "POST", "path": "/build" },
            "aiBuild": { "method": "POST", "path": "/ai-build" },
            "download": { "method": "GET", "path": "/download" },
            "code": { "method": "GET", "path": "/code" },
            "events": { "method": "GET", "path": "/events" },
        },
        "projectDir": state.pipeline.layout().root(),
        "builtDir": normalizer.build_dir(),
        "defaultHexPath": normalizer.canonical_path(),
        "builtListing": normalizer.listing().await,
    }))
}

pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not found")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    #[tokio::test]
    async fn test_open_artifact_sizes_the_opened_file() {
        let dir = tempfile::tempdir().unwrap();
        let canonical = dir.path().join("binary.hex");
        let newer = dir.path().join("newer.hex");
        std::fs::write(&canonical, b":0001").unwrap();
        std::fs::write(&newer, b":00020003").unwrap();

        let (mut file, size) = open_artifact(&canonical).await.unwrap();
        std::fs::rename(&newer, &canonical).unwrap();

        let mut body = Vec::new();
        file.read_to_end(&mut body).await.unwrap();
        assert_eq!(size, 5);
        assert_eq!(body.len() as u64, size);
    }

    #[tokio::test]
    async fn test_open_artifact_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_artifact(&dir.path().join("binary.hex")).await.unwrap_err();
        assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
    }
}

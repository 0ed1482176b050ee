use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::from_fn;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use clap::Parser;
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnFailure, DefaultOnResponse, TraceLayer};
use tracing::{Level, error, info};

mod metrics;

use wavebridge::backends::process::ProcessBackend;
use wavebridge::backends::sandbox::SandboxBackend;
use wavebridge::relay::HttpRelay;
use wavebridge::status::{HttpStatusProbe, ReceiverStatusSource, StatusReader};
use wavebridge::{
    BackendKind, CaptureBlob, CaptureOutcome, Controller, ControllerError, ConvertError,
    ReceiverStatus, StatusCoordinator, TranscodeEngine, TransferError,
};

#[derive(Parser, Debug)]
#[command(name = "wavebridge-server")]
#[command(about = "HTTP server for capture transcoding and receiver handoff")]
struct Params {
    /// Base URL of the receiver (its `/status` and `/upload` endpoints).
    #[arg(short = 'r', long = "receiver-url", required = true)]
    receiver_url: String,

    /// Which execution backend runs the filter chain.
    #[arg(short = 'b', long = "backend", value_enum, default_value_t = BackendKind::Sandbox)]
    backend: BackendKind,

    /// Transcoding executable used by the process backend.
    #[arg(long = "ffmpeg", default_value = "ffmpeg")]
    ffmpeg: PathBuf,

    /// Host interface to bind to.
    #[arg(long = "host", default_value = "127.0.0.1")]
    host: String,

    /// TCP port to listen on.
    #[arg(long = "port", default_value_t = 8080)]
    port: u16,

    /// Receiver status poll interval (milliseconds).
    #[arg(long = "poll-interval-ms", default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Timeout for a single status poll (milliseconds).
    #[arg(long = "poll-timeout-ms", default_value_t = 1000)]
    poll_timeout_ms: u64,

    /// Timeout for transferring an artifact to the receiver (seconds).
    #[arg(long = "transfer-timeout-secs", default_value_t = 10)]
    transfer_timeout_secs: u64,

    /// Maximum request body size (bytes).
    #[arg(long = "max-bytes", default_value_t = 100 * 1024 * 1024)]
    max_bytes: usize,
}

#[derive(Clone)]
struct AppState {
    controller: Arc<Controller<StatusReader>>,
    status: StatusReader,
}

#[derive(Debug, Serialize)]
struct ReceiverResponse {
    status: ReceiverStatus,
    seconds_since_last_success: Option<u64>,
}

#[derive(Debug, Serialize)]
struct DispatchResponse {
    outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    receiver: Option<ReceiverStatus>,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn from_convert(err: &ConvertError) -> Self {
        let status = match err {
            ConvertError::Input(_) => StatusCode::BAD_REQUEST,
            ConvertError::Decode(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ConvertError::EngineUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ConvertError::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }

    fn from_controller(err: &ControllerError) -> Self {
        let status = match err {
            ControllerError::Busy => StatusCode::CONFLICT,
            ControllerError::NothingToResend => StatusCode::NOT_FOUND,
            ControllerError::Convert(inner) => return Self::from_convert(inner),
            ControllerError::Transfer(TransferError::Timeout) => StatusCode::GATEWAY_TIMEOUT,
            ControllerError::Transfer(_) => StatusCode::BAD_GATEWAY,
        };
        Self {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            error: self.message,
        });
        (self.status, body).into_response()
    }
}

#[tokio::main]
async fn main() {
    wavebridge::logging::init();

    if let Err(err) = run().await {
        error!(error = ?err, "wavebridge-server failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let params = Params::parse();

    metrics::init();

    let addr: SocketAddr = format!("{}:{}", params.host, params.port)
        .parse()
        .context("invalid host/port bind address")?;

    let receiver_base = params.receiver_url.trim_end_matches('/');
    let status_url = format!("{receiver_base}/status");
    let ingest_url = format!("{receiver_base}/upload");

    let engine = match params.backend {
        BackendKind::Process => {
            TranscodeEngine::new(Box::new(ProcessBackend::with_executable(&params.ffmpeg)))
        }
        BackendKind::Sandbox => TranscodeEngine::new(Box::new(SandboxBackend::new())),
    };

    let probe = HttpStatusProbe::new(&status_url, Duration::from_millis(params.poll_timeout_ms))
        .context("failed to initialize status probe")?;
    // Held for the server's lifetime; dropping it stops the poll thread.
    let coordinator = StatusCoordinator::start(
        probe,
        Duration::from_millis(params.poll_interval_ms),
    );

    let relay = HttpRelay::new(&ingest_url, Duration::from_secs(params.transfer_timeout_secs))
        .context("failed to initialize transfer relay")?;

    let state = AppState {
        controller: Arc::new(Controller::new(engine, coordinator.reader(), Box::new(relay))),
        status: coordinator.reader(),
    };

    let app = Router::new()
        .route("/", get(root))
        .route("/healthz", get(healthz))
        .route("/metrics", get(metrics::prometheus_metrics))
        .route("/v1/receiver", get(receiver))
        .route("/v1/convert", post(convert))
        .route("/v1/dispatch", post(dispatch))
        .route("/v1/resend", post(resend))
        .route_layer(from_fn(metrics::track_http_metrics))
        .with_state(state)
        .layer(DefaultBodyLimit::max(params.max_bytes))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(
                    DefaultMakeSpan::new()
                        .level(Level::INFO)
                        .include_headers(false),
                )
                .on_response(DefaultOnResponse::new().level(Level::INFO))
                .on_failure(DefaultOnFailure::new().level(Level::ERROR)),
        );

    let listener = TcpListener::bind(addr).await.context("bind failed")?;
    info!(%addr, backend = %params.backend, receiver = receiver_base, "listening");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}

async fn root() -> &'static str {
    "wavebridge-server: POST /v1/convert or /v1/dispatch (multipart field: audio)"
}

async fn healthz() -> &'static str {
    "ok"
}

async fn receiver(State(state): State<AppState>) -> Json<ReceiverResponse> {
    let snapshot = state.status.latest();
    let seconds_since_last_success = snapshot.last_success.and_then(|at| {
        SystemTime::now()
            .duration_since(at)
            .ok()
            .map(|d| d.as_secs())
    });

    Json(ReceiverResponse {
        status: snapshot.status,
        seconds_since_last_success,
    })
}

/// Convert only: return the canonical artifact as an octet stream.
async fn convert(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> std::result::Result<Response, AppError> {
    let blob = read_audio_field(&mut multipart).await?;

    let controller = state.controller.clone();
    let backend = controller.engine().backend_kind().as_str();
    let result = tokio::task::spawn_blocking(move || controller.engine().convert(&blob))
        .await
        .map_err(|e| AppError::internal(format!("conversion task failed: {e}")))?;

    let artifact = match result {
        Ok(artifact) => {
            metrics::record_conversion(backend, "succeeded");
            artifact
        }
        Err(err) => {
            metrics::record_conversion(backend, "failed");
            return Err(AppError::from_convert(&err));
        }
    };

    Ok((
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/octet-stream"),
        )],
        artifact.into_bytes(),
    )
        .into_response())
}

/// Full flow: convert, gate on receiver readiness, transfer.
async fn dispatch(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> std::result::Result<Response, AppError> {
    let blob = read_audio_field(&mut multipart).await?;

    let controller = state.controller.clone();
    let backend = controller.engine().backend_kind().as_str();
    let result = tokio::task::spawn_blocking(move || controller.run_capture(blob))
        .await
        .map_err(|e| AppError::internal(format!("dispatch task failed: {e}")))?;

    match &result {
        Ok(_) | Err(ControllerError::Transfer(_)) => {
            metrics::record_conversion(backend, "succeeded")
        }
        Err(ControllerError::Convert(_)) => metrics::record_conversion(backend, "failed"),
        Err(_) => {}
    }

    outcome_response(result)
}

/// Operator re-trigger for a parked artifact.
async fn resend(State(state): State<AppState>) -> std::result::Result<Response, AppError> {
    let controller = state.controller.clone();
    let result = tokio::task::spawn_blocking(move || controller.resend())
        .await
        .map_err(|e| AppError::internal(format!("resend task failed: {e}")))?;

    outcome_response(result)
}

fn outcome_response(
    result: std::result::Result<CaptureOutcome, ControllerError>,
) -> std::result::Result<Response, AppError> {
    match result {
        Ok(CaptureOutcome::Transferred) => {
            metrics::record_transfer("succeeded");
            Ok(Json(DispatchResponse {
                outcome: "transferred",
                receiver: None,
            })
            .into_response())
        }
        // Not an error, but the transfer was withheld; 409 tells the
        // operator to wait and re-trigger.
        Ok(CaptureOutcome::Held { receiver }) => {
            metrics::record_transfer("held");
            Ok((
                StatusCode::CONFLICT,
                Json(DispatchResponse {
                    outcome: "held",
                    receiver: Some(receiver),
                }),
            )
                .into_response())
        }
        Err(err) => {
            if matches!(err, ControllerError::Transfer(_)) {
                metrics::record_transfer("failed");
            }
            Err(AppError::from_controller(&err))
        }
    }
}

/// Pull the single `audio` field out of a multipart body.
///
/// The container tag comes from the part's content type when present,
/// otherwise from the uploaded filename's extension.
async fn read_audio_field(multipart: &mut Multipart) -> std::result::Result<CaptureBlob, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some("audio") {
            continue;
        }

        let content_type = field.content_type().map(ToOwned::to_owned);
        let extension = field
            .file_name()
            .and_then(|name| name.rsplit_once('.').map(|(_, ext)| ext.to_owned()));
        let container = content_type.or(extension).unwrap_or_default();

        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(format!("failed to read audio field: {e}")))?;

        return Ok(CaptureBlob::new(bytes.to_vec(), container));
    }

    Err(AppError::bad_request("multipart field 'audio' is required"))
}

use anyhow::{Context, Result};
use axum::Json;
use axum::Router;
use axum::body::Body;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode};
use axum::middleware::Next;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use std::sync::Arc;
use tracing::{info, warn};

use super::models::{ErrorResponse, HealthResponse, OcrExtractResponse, ProofreadRequest};
use super::relay;
use super::state::ServerState;
use crate::error::PipelineError;
use crate::ocr::OcrClient;
use crate::proofread::ProofreadClient;
use crate::settings::Settings;
use crate::upload;

// Headroom for multipart boundaries and form fields on top of the file
// ceiling; the per-chunk check in upload intake enforces the real limit.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

pub async fn run_server(settings: Settings, addr: String) -> Result<()> {
    if settings.llm_api_key.is_none() {
        warn!("LLM API key not configured; /api/proofread will fail until OPENROUTER_API_KEY is set");
    }
    let app = router(settings);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| "failed to bind server address")?;
    info!("listening on {}", addr);
    info!("endpoints: POST /api/ocr, POST /api/proofread, GET /api/health");
    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(settings: Settings) -> Router {
    let body_limit = settings.max_upload_bytes + MULTIPART_OVERHEAD_BYTES;
    // One client, one connection pool, shared by both upstream callers.
    let http = reqwest::Client::new();
    let state = Arc::new(ServerState {
        ocr: OcrClient::new(http.clone(), &settings),
        proofread: ProofreadClient::new(http, &settings),
        settings,
    });
    Router::new()
        .route("/api/health", get(health))
        .route("/api/ocr", post(ocr))
        .route("/api/proofread", post(proofread))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
        .layer(axum::middleware::from_fn(cors_middleware))
}

async fn cors_middleware(req: Request<Body>, next: Next) -> Result<Response<Body>, StatusCode> {
    if req.method() == Method::OPTIONS {
        let mut response = Response::new(Body::empty());
        *response.status_mut() = StatusCode::NO_CONTENT;
        apply_cors_headers(response.headers_mut());
        return Ok(response);
    }
    let mut response = next.run(req).await;
    apply_cors_headers(response.headers_mut());
    Ok(response)
}

fn apply_cors_headers(headers: &mut HeaderMap) {
    headers.insert("access-control-allow-origin", HeaderValue::from_static("*"));
    headers.insert(
        "access-control-allow-methods",
        HeaderValue::from_static("GET,POST,OPTIONS"),
    );
    headers.insert(
        "access-control-allow-headers",
        HeaderValue::from_static("content-type,authorization"),
    );
}

async fn health(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        ocr_configured: state.settings.ocr_api_key.is_some(),
        llm_configured: state.settings.llm_api_key.is_some(),
        model: state.settings.llm_model.clone(),
    })
}

async fn ocr(
    State(state): State<Arc<ServerState>>,
    mut multipart: Multipart,
) -> Result<Json<OcrExtractResponse>, (StatusCode, Json<ErrorResponse>)> {
    let asset = upload::read_image_field(&mut multipart, state.settings.max_upload_bytes)
        .await
        .map_err(reject)?;
    let result = state.ocr.recognize(&asset).await.map_err(reject)?;
    Ok(Json(OcrExtractResponse {
        ocr_text: result.text,
    }))
}

async fn proofread(
    State(state): State<Arc<ServerState>>,
    Json(payload): Json<ProofreadRequest>,
) -> axum::response::Response {
    let Some(text) = payload
        .ocr_text
        .as_deref()
        .map(str::trim)
        .filter(|text| !text.is_empty())
    else {
        return reject(PipelineError::MissingField { field: "ocrText" }).into_response();
    };

    match state
        .proofread
        .stream(text, payload.image_base64.as_deref())
        .await
    {
        Ok(events) => relay::sse_response(events),
        // Headers are not committed yet, so a plain JSON error still works.
        Err(err) => reject(err).into_response(),
    }
}

fn reject(err: PipelineError) -> (StatusCode, Json<ErrorResponse>) {
    (
        err.status(),
        Json(ErrorResponse {
            error: err.to_string(),
        }),
    )
}

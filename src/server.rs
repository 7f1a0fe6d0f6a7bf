//! HTTP API over [`RagService`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/tenants` | List tenants with a live index |
//! | `GET`  | `/tenants/{tenant}` | Whether the tenant has an index |
//! | `DELETE` | `/tenants/{tenant}` | Remove the tenant and all its data |
//! | `POST` | `/tenants/{tenant}/documents` | Upload a document (multipart field `file`), creating or replacing the index |
//! | `PUT`  | `/tenants/{tenant}/documents` | Replace an existing tenant's document |
//! | `GET`  | `/tenants/{tenant}/files` | Source files behind the live index |
//! | `POST` | `/tenants/{tenant}/query` | Answer `{"query": "..."}` from the tenant's index |
//! | `POST` | `/tenants/{tenant}/reference-link` | Find a single reference URL for the query |
//! | `POST` | `/query` | Answer against the configured default tenant |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "tenant_not_found", "message": "No index found for tenant 'bob'", "stage": "storage" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `bad_request`, `unsupported_format`, `empty_document` | 400 |
//! | `tenant_not_found` | 404 |
//! | `concurrent_modification` | 409 |
//! | `payload_too_large` | 413 |
//! | `configuration_error`, `persistence_error`, `corrupt_index`, `retrieval_error`, `internal` | 500 |
//! | `embedding_error`, `generation_error` | 502 |
//! | `timeout` | 504 |
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use axum::{
    extract::{multipart::MultipartError, DefaultBodyLimit, Multipart, Path, State},
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::error::{RagError, Stage};
use crate::models::{Answer, QueryMode, ScoredRecord};
use crate::service::RagService;
use crate::store::IndexSummary;

/// Multipart framing allowance on top of the configured upload limit.
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

#[derive(Clone)]
struct AppState {
    service: Arc<RagService>,
    /// Tenant answered by the single-tenant `POST /query` route.
    default_tenant: Arc<str>,
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let service = Arc::new(RagService::from_config(config)?);
    let app = router(service, config);

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    Ok(())
}

/// Build the application router around an existing service.
pub fn router(service: Arc<RagService>, config: &Config) -> Router {
    let state = AppState {
        service,
        default_tenant: Arc::from(config.server.default_tenant.as_str()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/tenants", get(handle_list_tenants))
        .route(
            "/tenants/{tenant}",
            get(handle_tenant_exists).delete(handle_remove_tenant),
        )
        .route(
            "/tenants/{tenant}/documents",
            post(handle_upload).put(handle_modify),
        )
        .route("/tenants/{tenant}/files", get(handle_list_files))
        .route("/tenants/{tenant}/query", post(handle_tenant_query))
        .route("/tenants/{tenant}/reference-link", post(handle_reference_link))
        .route("/query", post(handle_default_query))
        .layer(DefaultBodyLimit::max(
            config.storage.max_upload_bytes + MULTIPART_OVERHEAD_BYTES,
        ))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"tenant_not_found"`).
    code: String,
    message: String,
    /// Pipeline stage the error came from, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    stage: Option<Stage>,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
    stage: Option<Stage>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
                stage: self.stage,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

impl From<RagError> for AppError {
    fn from(err: RagError) -> Self {
        let status = match &err {
            RagError::BadRequest { .. }
            | RagError::UnsupportedFormat { .. }
            | RagError::EmptyDocument { .. } => StatusCode::BAD_REQUEST,
            RagError::TenantNotFound { .. } => StatusCode::NOT_FOUND,
            RagError::ConcurrentModification { .. } => StatusCode::CONFLICT,
            RagError::Configuration { .. }
            | RagError::Persistence { .. }
            | RagError::CorruptIndex { .. }
            | RagError::Retrieval { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            RagError::Embedding { .. } | RagError::Generation { .. } => StatusCode::BAD_GATEWAY,
            RagError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        };
        if status.is_server_error() {
            error!(code = err.kind(), stage = %err.stage(), "{}", err);
        }
        AppError {
            status,
            code: err.kind().to_string(),
            message: err.to_string(),
            stage: Some(err.stage()),
        }
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
        stage: Some(Stage::Request),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
        stage: None,
    }
}

fn multipart_error(err: MultipartError) -> AppError {
    let status = err.status();
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        AppError {
            status,
            code: "payload_too_large".to_string(),
            message: err.body_text(),
            stage: Some(Stage::Request),
        }
    } else {
        bad_request(err.body_text())
    }
}

/// Run a blocking service call off the async runtime.
async fn blocking<T, F>(f: F) -> Result<T, AppError>
where
    F: FnOnce() -> crate::error::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| internal(format!("worker task failed: {}", e)))?
        .map_err(AppError::from)
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Tenants ============

#[derive(Serialize)]
struct TenantListResponse {
    tenants: BTreeSet<String>,
}

async fn handle_list_tenants(
    State(state): State<AppState>,
) -> Result<Json<TenantListResponse>, AppError> {
    let service = state.service.clone();
    let tenants = blocking(move || service.list_tenants()).await?;
    Ok(Json(TenantListResponse { tenants }))
}

#[derive(Serialize)]
struct TenantStatus {
    tenant: String,
    exists: bool,
}

async fn handle_tenant_exists(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<TenantStatus>, AppError> {
    let service = state.service.clone();
    let t = tenant.clone();
    let exists = blocking(move || Ok(service.tenant_exists(&t))).await?;
    Ok(Json(TenantStatus { tenant, exists }))
}

#[derive(Serialize)]
struct RemovedResponse {
    tenant: String,
    removed: bool,
}

/// Handler for `DELETE /tenants/{tenant}`. Returns `404` when the tenant
/// has nothing to remove.
async fn handle_remove_tenant(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<RemovedResponse>, AppError> {
    let service = state.service.clone();
    let t = tenant.clone();
    blocking(move || service.remove_tenant(&t)).await?;
    Ok(Json(RemovedResponse {
        tenant,
        removed: true,
    }))
}

#[derive(Serialize)]
struct FileListResponse {
    tenant: String,
    files: Vec<String>,
}

async fn handle_list_files(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> Result<Json<FileListResponse>, AppError> {
    let service = state.service.clone();
    let t = tenant.clone();
    let files = blocking(move || service.list_tenant_source_files(&t)).await?;
    Ok(Json(FileListResponse { tenant, files }))
}

// ============ Documents ============

/// Pull the `file` field out of a multipart upload.
async fn read_upload(mut multipart: Multipart) -> Result<(String, Vec<u8>), AppError> {
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|n| !n.trim().is_empty())
            .ok_or_else(|| bad_request("No file selected"))?;
        let bytes = field.bytes().await.map_err(multipart_error)?;
        return Ok((filename, bytes.to_vec()));
    }
    Err(bad_request("Missing \"file\" field in multipart body"))
}

/// Handler for `POST /tenants/{tenant}/documents`.
///
/// Builds the tenant's index from the uploaded file, replacing any
/// existing index. Responds `201 Created` with the index summary.
async fn handle_upload(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<IndexSummary>), AppError> {
    let (filename, bytes) = read_upload(multipart).await?;
    let service = state.service.clone();
    let summary = blocking(move || service.ingest(&tenant, &filename, &bytes)).await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// Handler for `PUT /tenants/{tenant}/documents`.
///
/// Like the upload route, but the tenant must already exist (`404`
/// otherwise).
async fn handle_modify(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    multipart: Multipart,
) -> Result<Json<IndexSummary>, AppError> {
    let (filename, bytes) = read_upload(multipart).await?;
    let service = state.service.clone();
    let summary = blocking(move || service.modify(&tenant, &filename, &bytes)).await?;
    Ok(Json(summary))
}

// ============ Queries ============

#[derive(Deserialize)]
struct QueryRequest {
    query: String,
}

#[derive(Serialize)]
struct QueryResponse {
    response: String,
    mode: QueryMode,
    context: Vec<ScoredRecord>,
}

impl From<Answer> for QueryResponse {
    fn from(answer: Answer) -> Self {
        Self {
            response: answer.text,
            mode: answer.mode,
            context: answer.context,
        }
    }
}

async fn run_query(
    state: AppState,
    tenant: String,
    body: Result<Json<QueryRequest>, JsonRejection>,
    mode: QueryMode,
) -> Result<Json<QueryResponse>, AppError> {
    let Json(request) = body.map_err(|_| bad_request("Missing \"query\" in request body"))?;
    let service = state.service.clone();
    let answer = blocking(move || match mode {
        QueryMode::Answer => service.query(&tenant, &request.query),
        QueryMode::ReferenceLink => service.query_reference_link(&tenant, &request.query),
    })
    .await?;
    Ok(Json(answer.into()))
}

async fn handle_tenant_query(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    run_query(state, tenant, body, QueryMode::Answer).await
}

async fn handle_reference_link(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    run_query(state, tenant, body, QueryMode::ReferenceLink).await
}

/// Handler for `POST /query`: the single-tenant route, answered from the
/// configured default tenant.
async fn handle_default_query(
    State(state): State<AppState>,
    body: Result<Json<QueryRequest>, JsonRejection>,
) -> Result<Json<QueryResponse>, AppError> {
    let tenant = state.default_tenant.to_string();
    run_query(state, tenant, body, QueryMode::Answer).await
}

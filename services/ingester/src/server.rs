//! HTTP server for the ingester service.
//!
//! Provides endpoints for:
//! - `POST /upload/save` - Stage one uploaded file
//! - `GET /upload/parse` - Ingest a staged batch, streaming progress as SSE
//! - `GET /upload/logs` - Upload history of the current user
//! - `GET /objects/...` - Catalog search and object reads
//! - `GET /health` - Health check
//! - `GET /metrics` - Prometheus metrics

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, Extension, Multipart, Path, Query},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use flux_common::{
    FluxError, FluxMeasurement, ObjectFluxCount, ObjectId, SearchFilters, SpaceObject,
    UploadLogEntry,
};
use ingestion::{BatchEvent, BatchRequest};

use crate::auth::CurrentUser;
use crate::error::ApiError;
use crate::state::AppState;

type ApiResult<T> = Result<T, ApiError>;

/// Multipart field carrying the file.
const FILE_FIELD: &str = "file";
/// Multipart field carrying the destination token.
const DIR_FIELD: &str = "dir-name";

/// Query of `GET /upload/parse`.
#[derive(Debug, Deserialize)]
pub struct ParseParams {
    #[serde(rename = "path-to-dir")]
    pub path_to_dir: String,
    #[serde(rename = "file-count")]
    pub file_count: u32,
}

/// Query of `GET /objects/search`. Empty or absent fields leave a filter unset.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SearchParams {
    pub ra: String,
    pub dec: String,
    pub radius: String,
    pub name: String,
    pub min_mag: String,
    pub max_mag: String,
    pub catalog: String,
    pub object_id: String,
}

impl SearchParams {
    fn to_filters(&self) -> ApiResult<SearchFilters> {
        SearchFilters::from_form(
            &self.ra,
            &self.dec,
            &self.radius,
            &self.name,
            &self.min_mag,
            &self.max_mag,
            &self.catalog,
            &self.object_id,
        )
        .map_err(ApiError::from)
    }
}

/// Response of `GET /objects/count`.
#[derive(Debug, Serialize, Deserialize)]
pub struct CountResponse {
    /// Approximate number of catalogued objects.
    pub estimate: u64,
}

/// The batch ended early; ends the event stream with an error.
#[derive(Debug, thiserror::Error)]
#[error("Batch aborted: {0}")]
pub struct BatchAborted(String);

/// POST /upload/save - Stage one uploaded file
async fn upload_save_handler(
    Extension(state): Extension<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    mut multipart: Multipart,
) -> ApiResult<String> {
    let mut token: Option<String> = None;
    let mut staged = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            DIR_FIELD => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?;
                token = Some(text);
            }
            FILE_FIELD => {
                // The destination has to be known before the body can be written.
                let destination = token.as_deref().ok_or_else(|| {
                    ApiError::new(
                        StatusCode::BAD_REQUEST,
                        format!("'{}' must come before '{}'", DIR_FIELD, FILE_FIELD),
                    )
                })?;
                let file_name = field.file_name().unwrap_or_default().to_string();
                let body = field.map(|chunk| chunk.map_err(|e| io::Error::new(io::ErrorKind::Other, e)));

                let dir = state.staging.store(&file_name, destination.trim(), body).await?;
                info!(user = %user, file = %file_name, dir = %dir.display(), "Upload staged");
                staged = Some(dir);
            }
            _ => {}
        }
    }

    let dir = staged.ok_or_else(|| FluxError::MissingParameter(FILE_FIELD.into()))?;
    Ok(dir.display().to_string())
}

/// GET /upload/parse - Ingest a staged batch
///
/// The user is read here and moved into the request; the worker never looks
/// at the HTTP request.
async fn upload_parse_handler(
    Extension(state): Extension<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
    Query(params): Query<ParseParams>,
) -> Sse<impl Stream<Item = Result<Event, BatchAborted>>> {
    info!(
        user = %user,
        path = %params.path_to_dir,
        declared = params.file_count,
        "Starting batch ingest"
    );

    let handle = state.runner.start(BatchRequest {
        staging_path: params.path_to_dir,
        declared_file_count: params.file_count,
        user,
    });

    Sse::new(handle.map(event_to_sse)).keep_alive(KeepAlive::default())
}

fn event_to_sse(event: BatchEvent) -> Result<Event, BatchAborted> {
    let name = event.name();
    match event {
        BatchEvent::FileStored(file) => Ok(Event::default().event(name).data(file)),
        BatchEvent::Completed { failures } => {
            Ok(Event::default().event(name).data(failures.to_string()))
        }
        BatchEvent::Aborted(cause) => Err(BatchAborted(cause)),
    }
}

/// GET /upload/logs - Upload history of the current user
async fn upload_logs_handler(
    Extension(state): Extension<Arc<AppState>>,
    CurrentUser(user): CurrentUser,
) -> ApiResult<Json<Vec<UploadLogEntry>>> {
    Ok(Json(state.store.upload_logs_for_user(&user).await?))
}

/// GET /objects/search - Catalog search
async fn search_handler(
    Extension(state): Extension<Arc<AppState>>,
    Query(params): Query<SearchParams>,
) -> ApiResult<Json<Vec<ObjectFluxCount>>> {
    let filters = params.to_filters()?;
    Ok(Json(state.store.search(&filters).await?))
}

/// GET /objects/catalogs - Distinct catalog names
async fn catalogs_handler(
    Extension(state): Extension<Arc<AppState>>,
) -> ApiResult<Json<Vec<String>>> {
    let names = state.store.catalog_names().await?;
    Ok(Json(names.into_iter().collect()))
}

/// GET /objects/count - Approximate object count
async fn count_handler(Extension(state): Extension<Arc<AppState>>) -> ApiResult<Json<CountResponse>> {
    let estimate = state.store.estimate_object_count().await?;
    Ok(Json(CountResponse { estimate }))
}

/// GET /objects/:id - One object
async fn object_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<SpaceObject>> {
    let object = state
        .store
        .get_object(ObjectId(id))
        .await?
        .ok_or(FluxError::ObjectNotFound(id))?;
    Ok(Json(object))
}

/// GET /objects/:id/fluxes - Measurements of one object
async fn fluxes_handler(
    Extension(state): Extension<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResult<Json<Vec<FluxMeasurement>>> {
    if state.store.get_object(ObjectId(id)).await?.is_none() {
        return Err(FluxError::ObjectNotFound(id).into());
    }
    Ok(Json(state.store.measurements_for_object(ObjectId(id)).await?))
}

/// GET /health - Health check
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// GET /metrics - Prometheus metrics
async fn metrics_handler(Extension(state): Extension<Arc<AppState>>) -> String {
    state
        .prometheus
        .as_ref()
        .map(|handle| handle.render())
        .unwrap_or_default()
}

/// Build the HTTP router.
pub fn build_router(state: Arc<AppState>) -> Router {
    let body_limit = DefaultBodyLimit::max(state.max_upload_bytes);

    Router::new()
        .route("/upload/save", post(upload_save_handler))
        .route("/upload/parse", get(upload_parse_handler))
        .route("/upload/logs", get(upload_logs_handler))
        .route("/objects/search", get(search_handler))
        .route("/objects/catalogs", get(catalogs_handler))
        .route("/objects/count", get(count_handler))
        .route("/objects/:id", get(object_handler))
        .route("/objects/:id/fluxes", get(fluxes_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(Extension(state))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Start the HTTP server.
pub async fn start_server(state: Arc<AppState>, addr: SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(address = %addr, "Starting ingester HTTP server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

use crate::adapters::file_loader::FileLoader;
use crate::domain::model::{PipelineOutput, PipelineState};
use crate::server::jobs::{run_job, Job, JobView};
use crate::server::AppState;
use crate::utils::error::PipelineError;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

const INDEX_HTML: &str = include_str!("index.html");

/// Errors rendered as `{"detail": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
        }
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        tracing::error!("❌ Request failed: {} (Category: {:?})", err, err.category());
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn login() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

pub async fn index() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Snapshot the input directory and start a job over it in the background.
pub async fn create_job(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let notes = FileLoader::new(&state.settings.input_dir)?
        .load_files_blocking()
        .await?;
    if notes.is_empty() {
        return Err(ApiError::new(StatusCode::BAD_REQUEST, "No input files found"));
    }

    let job = Job::new(notes.into_keys().collect());
    let job_id = state.jobs.insert(job);
    tracing::info!("📥 Job {} submitted", job_id);

    tokio::spawn(run_job(state.jobs.clone(), job_id, state.settings.clone()));

    Ok(Json(json!({ "job_id": job_id.to_string() })))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobView>, ApiError> {
    Uuid::parse_str(&job_id)
        .ok()
        .and_then(|id| state.jobs.get(&id))
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Job not found"))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphInfo {
    pub name: String,
    pub entry_point: String,
    pub nodes: Vec<String>,
    pub edges: Vec<(String, String)>,
}

pub async fn list_graphs(State(state): State<AppState>) -> Json<Vec<GraphInfo>> {
    Json(
        state
            .graphs
            .iter()
            .map(|(name, graph)| {
                let description = graph.describe();
                GraphInfo {
                    name: name.clone(),
                    entry_point: description.entry_point,
                    nodes: description.nodes,
                    edges: description.edges,
                }
            })
            .collect(),
    )
}

#[derive(Debug, Clone, Deserialize)]
pub struct InvokeRequest {
    #[serde(default = "default_filename")]
    pub filename: String,
    pub raw_text: String,
}

fn default_filename() -> String {
    "input.txt".to_string()
}

/// Run one note through a registered graph without writing anything.
pub async fn invoke_graph(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(request): Json<InvokeRequest>,
) -> Result<Json<PipelineOutput>, ApiError> {
    let graph = state
        .graphs
        .get(&name)
        .ok_or_else(|| ApiError::not_found(format!("Graph '{}' not found", name)))?;

    let result = graph
        .invoke(PipelineState::new(request.filename, request.raw_text))
        .await?;
    Ok(Json(result.to_output()))
}

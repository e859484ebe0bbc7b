//! Job API and studio endpoints served by `hcc-server`.

pub mod auth;
pub mod jobs;
pub mod routes;

use crate::config::studio::StudioConfig;
use crate::config::Settings;
use crate::core::nodes::{build_default_graph, ExtractorMode, PipelineGraph};
use crate::utils::error::Result;
use auth::{BasicAuthLayer, BasicCredentials};
use axum::routing::{get, post};
use axum::Router;
use jobs::JobStore;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

/// Compiled graphs exposed under `/graphs`, keyed by their configured name.
#[derive(Default)]
pub struct GraphRegistry {
    graphs: BTreeMap<String, Arc<PipelineGraph>>,
}

impl GraphRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every configured name gets the `hcc` graph. Missing model credentials
    /// degrade to the mock extractor; a missing HCC table is an error.
    pub fn from_config(config: &StudioConfig, settings: &Settings) -> Result<Self> {
        let graph = Arc::new(build_default_graph(settings, ExtractorMode::Lenient)?);
        let mut registry = Self::new();
        for name in config.graphs.keys() {
            tracing::info!("🧩 Registered graph '{}'", name);
            registry.insert(name.clone(), graph.clone());
        }
        Ok(registry)
    }

    pub fn insert(&mut self, name: impl Into<String>, graph: Arc<PipelineGraph>) {
        self.graphs.insert(name.into(), graph);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<PipelineGraph>> {
        self.graphs.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arc<PipelineGraph>)> {
        self.graphs.iter()
    }

    pub fn len(&self) -> usize {
        self.graphs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graphs.is_empty()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jobs: JobStore,
    pub graphs: Arc<GraphRegistry>,
}

impl AppState {
    pub fn new(settings: Settings, graphs: GraphRegistry) -> Self {
        Self {
            settings: Arc::new(settings),
            jobs: JobStore::new(),
            graphs: Arc::new(graphs),
        }
    }
}

/// `/health` is open; everything else needs Basic auth.
pub fn router(state: AppState, credentials: BasicCredentials) -> Router {
    let protected = Router::new()
        .route("/", get(routes::index))
        .route("/login", post(routes::login))
        .route("/jobs", post(routes::create_job))
        .route("/jobs/{job_id}", get(routes::get_job))
        .route("/graphs", get(routes::list_graphs))
        .route("/graphs/{name}/invoke", post(routes::invoke_graph))
        .layer(BasicAuthLayer::new(credentials));

    Router::new()
        .route("/health", get(routes::health))
        .merge(protected)
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState, credentials: BasicCredentials) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("🌐 Listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state, credentials)).await?;
    Ok(())
}

//! The two pipeline steps and the graph that wires them together.

use crate::adapters::hcc_lookup::HccLookupService;
use crate::adapters::vertex::{RetryPolicy, VertexClient};
use crate::config::Settings;
use crate::core::graph::{CompiledGraph, Node, StateGraph, END};
use crate::core::text_cleaner::extract_assessment_section;
use crate::domain::model::{Condition, PipelineState};
use crate::domain::ports::ConditionExtractor;
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub const EXTRACT_NODE: &str = "extract";
pub const HCC_EVAL_NODE: &str = "hcc_eval";

/// Used when no model is configured.
pub const MOCK_CONDITIONS: [&str; 2] = ["Diabetes", "Hypertension"];

pub type PipelineGraph = CompiledGraph<PipelineState>;

pub struct ConditionExtractionNode {
    extractor: Option<Arc<dyn ConditionExtractor>>,
}

impl ConditionExtractionNode {
    pub fn new(extractor: Option<Arc<dyn ConditionExtractor>>) -> Self {
        Self { extractor }
    }

    pub fn mock() -> Self {
        Self { extractor: None }
    }
}

#[async_trait]
impl Node<PipelineState> for ConditionExtractionNode {
    async fn run(&self, mut state: PipelineState) -> Result<PipelineState> {
        tracing::info!("🔎 Extracting conditions from {}", state.filename);
        let section = extract_assessment_section(&state.raw_text);

        let names = match &self.extractor {
            Some(extractor) => extractor.extract_conditions(section).await?,
            None => MOCK_CONDITIONS.iter().map(|c| c.to_string()).collect(),
        };

        tracing::debug!("{}: {} condition(s) extracted", state.filename, names.len());
        state.extracted_conditions = names.into_iter().map(Condition::named).collect();
        Ok(state)
    }
}

pub struct HccEvaluationNode {
    lookup: Arc<HccLookupService>,
}

impl HccEvaluationNode {
    pub fn new(lookup: Arc<HccLookupService>) -> Self {
        Self { lookup }
    }
}

#[async_trait]
impl Node<PipelineState> for HccEvaluationNode {
    async fn run(&self, mut state: PipelineState) -> Result<PipelineState> {
        state.enriched_conditions = state
            .extracted_conditions
            .iter()
            .map(|condition| match self.lookup.lookup(&condition.name) {
                Some(found) => Condition {
                    name: found.condition,
                    code: found.code,
                    hcc_relevant: found.hcc_relevant,
                },
                None => Condition::named(condition.name.clone()),
            })
            .collect();
        Ok(state)
    }
}

/// `extract -> hcc_eval -> END`
pub fn build_graph(
    extract: ConditionExtractionNode,
    hcc: HccEvaluationNode,
) -> Result<PipelineGraph> {
    let mut graph: StateGraph<PipelineState> = StateGraph::new();
    graph
        .add_node(EXTRACT_NODE, extract)
        .add_node(HCC_EVAL_NODE, hcc)
        .set_entry_point(EXTRACT_NODE)
        .add_edge(EXTRACT_NODE, HCC_EVAL_NODE)
        .add_edge(HCC_EVAL_NODE, END);
    graph.compile()
}

/// How Vertex AI initialisation failures are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorMode {
    /// Batch runs: a configured project must yield a working client.
    Strict,
    /// Studio graphs: missing or broken credentials fall back to the mock.
    Lenient,
}

pub fn build_extractor(
    settings: &Settings,
    mode: ExtractorMode,
) -> Result<Option<Arc<dyn ConditionExtractor>>> {
    if !settings.llm_enabled() {
        tracing::info!("GCP project not set, using mock condition extractor");
        return Ok(None);
    }

    if mode == ExtractorMode::Lenient && settings.gcp_credentials_path.trim().is_empty() {
        tracing::warn!("⚠️ No credentials configured, using mock condition extractor");
        return Ok(None);
    }

    let client = VertexClient::new(
        &settings.gcp_project,
        &settings.gcp_location,
        &settings.gcp_credentials_path,
        settings.vertex_endpoint.as_deref(),
    );

    match (client, mode) {
        (Ok(client), _) => {
            let retry = RetryPolicy::default().with_max_retries(settings.llm_max_retries);
            Ok(Some(Arc::new(client.with_retry_policy(retry))))
        }
        (Err(e), ExtractorMode::Lenient) => {
            tracing::warn!("⚠️ Vertex AI unavailable ({}), using mock condition extractor", e);
            Ok(None)
        }
        (Err(e), ExtractorMode::Strict) => Err(e),
    }
}

/// Loads the HCC table and the extractor from `settings` and compiles the graph.
pub fn build_default_graph(settings: &Settings, mode: ExtractorMode) -> Result<PipelineGraph> {
    let lookup = Arc::new(HccLookupService::from_path(&settings.hcc_csv_path)?);
    let extractor = build_extractor(settings, mode)?;
    build_graph(
        ConditionExtractionNode::new(extractor),
        HccEvaluationNode::new(lookup),
    )
}

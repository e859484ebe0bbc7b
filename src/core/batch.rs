//! Concurrent per-note processing. One failing note never stops the others.

use crate::core::nodes::PipelineGraph;
use crate::domain::model::PipelineState;
use crate::domain::ports::Storage;
use crate::utils::error::{Result, EXIT_PARTIAL_FAILURE, EXIT_SUCCESS};
use futures::stream::{self, StreamExt};

/// Runs one note through the graph and writes `{filename}.json`.
/// Returns the location of the written document.
pub async fn process_note<S: Storage>(
    graph: &PipelineGraph,
    storage: &S,
    filename: &str,
    text: String,
) -> Result<String> {
    let state = graph.invoke(PipelineState::new(filename, text)).await?;

    let path = format!("{}.json", filename);
    let json = serde_json::to_vec_pretty(&state.to_output())?;
    storage.write_file(&path, &json).await?;

    let location = storage.location(&path);
    tracing::debug!("📝 {} -> {}", filename, location);
    Ok(location)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NoteFailure {
    pub filename: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Locations of written documents, in completion order.
    pub outputs: Vec<String>,
    pub errors: Vec<NoteFailure>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.outputs.len() + self.errors.len()
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            EXIT_SUCCESS
        } else {
            EXIT_PARTIAL_FAILURE
        }
    }
}

/// Processes `notes` with at most `workers` in flight.
/// `on_outcome` sees every result as soon as it completes.
pub async fn run_batch<S, F>(
    graph: &PipelineGraph,
    storage: &S,
    notes: impl IntoIterator<Item = (String, String)>,
    workers: usize,
    mut on_outcome: F,
) -> BatchReport
where
    S: Storage,
    F: FnMut(&str, &Result<String>),
{
    let mut report = BatchReport::default();
    let mut results = stream::iter(notes)
        .map(|(filename, text)| async move {
            let result = process_note(graph, storage, &filename, text).await;
            (filename, result)
        })
        .buffer_unordered(workers.max(1));

    while let Some((filename, result)) = results.next().await {
        on_outcome(&filename, &result);
        match result {
            Ok(location) => report.outputs.push(location),
            Err(e) => {
                tracing::warn!("❌ {} failed: {}", filename, e);
                report.errors.push(NoteFailure {
                    filename,
                    message: e.to_string(),
                });
            }
        }
    }

    report
}

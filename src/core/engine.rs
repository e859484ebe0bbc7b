use crate::adapters::file_loader::FileLoader;
use crate::adapters::storage::LocalStorage;
use crate::config::Settings;
use crate::core::batch::{run_batch, BatchReport};
use crate::core::nodes::{build_default_graph, ExtractorMode};
use crate::utils::error::Result;
use crate::utils::monitor::BatchMonitor;
use std::time::Instant;

/// One batch run over `input_dir`: load notes, build the graph, process
/// every note and write the results to `output_dir`.
pub struct BatchEngine {
    settings: Settings,
    monitor: BatchMonitor,
}

impl BatchEngine {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            monitor: BatchMonitor::new(false),
        }
    }

    /// 啟用或禁用系統監控
    pub fn with_monitoring(mut self, enabled: bool) -> Self {
        self.monitor = BatchMonitor::new(enabled);
        self
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Per-note failures end up in the report; only setup failures are errors.
    pub async fn run(&self) -> Result<BatchReport> {
        let start = Instant::now();
        self.monitor.log_stats("Batch started");

        let notes = FileLoader::new(&self.settings.input_dir)?
            .load_files_blocking()
            .await?;

        let graph = build_default_graph(&self.settings, ExtractorMode::Strict)?;
        self.monitor.log_stats("Graph ready");

        let storage = LocalStorage::new(&self.settings.output_dir);
        let report = run_batch(
            &graph,
            &storage,
            notes,
            self.settings.workers,
            |filename, result| match result {
                Ok(location) => tracing::info!("✅ {} -> {}", filename, location),
                Err(e) => eprintln!("Error: {}: {}", filename, e),
            },
        )
        .await;

        tracing::info!(
            "🏁 Batch finished: {}/{} note(s) written, {} failed ({:?})",
            report.outputs.len(),
            report.total(),
            report.errors.len(),
            start.elapsed()
        );
        self.monitor.log_final_stats();

        Ok(report)
    }
}

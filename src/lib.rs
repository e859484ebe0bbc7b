pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod server;
pub mod utils;

pub use adapters::{file_loader::FileLoader, hcc_lookup::HccLookupService, storage::LocalStorage};
pub use config::Settings;
pub use core::batch::{process_note, run_batch, BatchReport, NoteFailure};
pub use core::engine::BatchEngine;
pub use core::nodes::{build_default_graph, build_graph, ExtractorMode, PipelineGraph};
pub use domain::model::{Condition, PipelineOutput, PipelineState};
pub use utils::error::{PipelineError, Result};

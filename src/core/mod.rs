pub mod batch;
pub mod engine;
pub mod graph;
pub mod nodes;
pub mod text_cleaner;

pub use crate::domain::model::{Condition, PipelineOutput, PipelineState};
pub use crate::domain::ports::{ConditionExtractor, Storage};
pub use crate::utils::error::Result;

use serde::{Deserialize, Serialize};

/// A medical condition, optionally enriched with its ICD-10-CM code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    /// Canonical or display name.
    pub name: String,
    /// ICD-10-CM code when the lookup found one.
    #[serde(default)]
    pub code: Option<String>,
    /// True when the reference CSV tags the condition as HCC-relevant.
    #[serde(default)]
    pub hcc_relevant: bool,
}

impl Condition {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            code: None,
            hcc_relevant: false,
        }
    }
}

/// State carried through the pipeline graph for one note.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    pub filename: String,
    pub raw_text: String,
    #[serde(default)]
    pub extracted_conditions: Vec<Condition>,
    #[serde(default)]
    pub enriched_conditions: Vec<Condition>,
}

impl PipelineState {
    pub fn new(filename: impl Into<String>, raw_text: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            raw_text: raw_text.into(),
            ..Default::default()
        }
    }

    /// 輸出格式：extracted_conditions 只保留名稱
    pub fn to_output(&self) -> PipelineOutput {
        PipelineOutput {
            filename: self.filename.clone(),
            raw_text: self.raw_text.clone(),
            extracted_conditions: self
                .extracted_conditions
                .iter()
                .map(|c| c.name.clone())
                .collect(),
            enriched_conditions: self.enriched_conditions.clone(),
        }
    }
}

/// Per-note result document written to `{output_dir}/{filename}.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineOutput {
    pub filename: String,
    pub raw_text: String,
    pub extracted_conditions: Vec<String>,
    pub enriched_conditions: Vec<Condition>,
}

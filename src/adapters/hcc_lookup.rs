use crate::utils::error::{PipelineError, Result};
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

pub const DESCRIPTION_COLUMN: &str = "Description";
pub const CODE_COLUMN: &str = "ICD-10-CM Codes";
pub const TAGS_COLUMN: &str = "Tags";

/// Cell values treated as missing (same set the reference spreadsheets were cleaned with).
const MISSING_MARKERS: &[&str] = &[
    "", "#N/A", "#N/A N/A", "#NA", "-1.#IND", "-1.#QNAN", "-NaN", "-nan", "1.#IND", "1.#QNAN",
    "<NA>", "N/A", "NA", "NULL", "NaN", "None", "n/a", "nan", "null",
];

fn cell(value: Option<&str>) -> Option<String> {
    let value = value?;
    if MISSING_MARKERS.contains(&value) || MISSING_MARKERS.contains(&value.trim()) {
        return None;
    }
    Some(value.to_string())
}

/// Result of a successful lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HccMatch {
    pub condition: String,
    pub code: Option<String>,
    pub hcc_relevant: bool,
}

#[derive(Debug, Clone)]
struct HccRow {
    description: Option<String>,
    /// 小寫、去空白後的描述；缺值時為 None
    normalized: Option<String>,
    code: Option<String>,
    tags: Option<String>,
}

/// In-memory HCC reference table with tiered fuzzy matching on `Description`.
#[derive(Debug, Clone)]
pub struct HccLookupService {
    rows: Vec<HccRow>,
    has_code_column: bool,
    has_tags_column: bool,
}

impl HccLookupService {
    pub fn from_path(csv_path: impl AsRef<Path>) -> Result<Self> {
        let csv_path = csv_path.as_ref();
        tracing::info!("📑 Loading HCC CSV: {}", csv_path.display());
        let file = std::fs::File::open(csv_path).map_err(|e| {
            PipelineError::IoError(std::io::Error::new(
                e.kind(),
                format!("Cannot open HCC CSV {}: {}", csv_path.display(), e),
            ))
        })?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
        let headers = reader.headers()?.clone();
        let column = |name: &str| headers.iter().position(|h| h.trim() == name);

        let description_idx = column(DESCRIPTION_COLUMN).ok_or_else(|| {
            PipelineError::config(format!(
                "HCC CSV is missing the '{}' column (found: {})",
                DESCRIPTION_COLUMN,
                headers.iter().collect::<Vec<_>>().join(", ")
            ))
        })?;
        let code_idx = column(CODE_COLUMN);
        let tags_idx = column(TAGS_COLUMN);

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record?;
            let description = cell(record.get(description_idx));
            let normalized = description.as_ref().map(|d| d.trim().to_lowercase());
            rows.push(HccRow {
                description,
                normalized,
                code: code_idx.and_then(|i| cell(record.get(i))),
                tags: tags_idx.and_then(|i| cell(record.get(i))),
            });
        }

        tracing::debug!("Loaded {} HCC reference rows", rows.len());
        Ok(Self {
            rows,
            has_code_column: code_idx.is_some(),
            has_tags_column: tags_idx.is_some(),
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Tiers, first hit wins: exact, description contains key,
    /// key contains description, then word overlap scoring.
    pub fn lookup(&self, condition: &str) -> Option<HccMatch> {
        let key = condition.trim().to_lowercase();
        if key.is_empty() {
            return None;
        }

        let row = self
            .find(|n| n == key)
            .or_else(|| self.find(|n| n.contains(&key)))
            .or_else(|| self.find(|n| !n.is_empty() && key.contains(n)))
            .or_else(|| self.best_word_overlap(&key));

        let Some(row) = row else {
            tracing::debug!("No match found for condition: {}", condition);
            return None;
        };

        if !self.has_code_column {
            tracing::warn!(
                "Column '{}' not found in HCC CSV; cannot resolve codes",
                CODE_COLUMN
            );
            return None;
        }

        let code = row
            .code
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty() && *c != "nan")
            .map(str::to_string);
        let description = row
            .description
            .as_deref()
            .map(str::trim)
            .filter(|d| !d.is_empty())
            .unwrap_or(condition)
            .to_string();
        let hcc_relevant = self.has_tags_column
            && row.tags.as_deref().is_some_and(|t| !t.trim().is_empty());

        tracing::debug!(
            "Matched '{}' to '{}' with code {:?}",
            condition,
            description,
            code
        );
        Some(HccMatch {
            condition: description,
            code,
            hcc_relevant,
        })
    }

    fn find(&self, predicate: impl Fn(&str) -> bool) -> Option<&HccRow> {
        self.rows
            .iter()
            .find(|row| row.normalized.as_deref().is_some_and(&predicate))
    }

    fn best_word_overlap(&self, key: &str) -> Option<&HccRow> {
        let key_words: HashSet<&str> = key.split_whitespace().collect();
        if key_words.is_empty() {
            return None;
        }
        let threshold = key_words.len().min(2);

        let mut best: Option<(usize, &HccRow)> = None;
        for row in &self.rows {
            let Some(normalized) = row.normalized.as_deref() else {
                continue;
            };
            let desc_words: HashSet<&str> = normalized.split_whitespace().collect();
            let score = key_words.intersection(&desc_words).count();
            // 同分時保留先出現的列
            if score >= threshold && best.map_or(true, |(s, _)| score > s) {
                best = Some((score, row));
            }
        }
        best.map(|(_, row)| row)
    }
}

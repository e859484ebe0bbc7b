use async_trait::async_trait;
use hcc_pipeline::core::graph::{Node, StateGraph, END};
use hcc_pipeline::{
    run_batch, Condition, LocalStorage, PipelineError, PipelineGraph, PipelineState, Result,
};
use std::collections::HashMap;
use tempfile::TempDir;

/// Replaces the state with a prepared result per file name; unknown names fail.
struct CannedNode {
    results: HashMap<String, PipelineState>,
}

#[async_trait]
impl Node<PipelineState> for CannedNode {
    async fn run(&self, state: PipelineState) -> Result<PipelineState> {
        self.results
            .get(&state.filename)
            .cloned()
            .ok_or_else(|| PipelineError::processing(format!("boom: {}", state.filename)))
    }
}

fn canned_graph(results: Vec<PipelineState>) -> PipelineGraph {
    let node = CannedNode {
        results: results
            .into_iter()
            .map(|state| (state.filename.clone(), state))
            .collect(),
    };
    let mut graph: StateGraph<PipelineState> = StateGraph::new();
    graph
        .add_node("canned", node)
        .set_entry_point("canned")
        .add_edge("canned", END);
    graph.compile().unwrap()
}

fn coded(name: &str, code: &str, hcc_relevant: bool) -> Condition {
    Condition {
        name: name.to_string(),
        code: Some(code.to_string()),
        hcc_relevant,
    }
}

fn notes() -> Vec<(String, String)> {
    vec![
        ("note1.txt".to_string(), "dummy text 1".to_string()),
        ("note2.txt".to_string(), "dummy text 2".to_string()),
    ]
}

fn read_json(path: std::path::PathBuf) -> serde_json::Value {
    serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
}

#[tokio::test]
async fn test_concurrent_writes_and_downconversion() {
    let graph = canned_graph(vec![
        PipelineState {
            filename: "note1.txt".to_string(),
            raw_text: "dummy text 1".to_string(),
            extracted_conditions: vec![
                Condition::named("Hypertension"),
                Condition::named("Diabetes"),
            ],
            enriched_conditions: vec![coded("Hypertension", "I10", true)],
        },
        PipelineState {
            filename: "note2.txt".to_string(),
            raw_text: "dummy text 2".to_string(),
            extracted_conditions: vec![Condition::named("COPD")],
            enriched_conditions: vec![coded("COPD", "J44.9", false)],
        },
    ]);

    let temp_dir = TempDir::new().unwrap();
    let out_dir = temp_dir.path().join("out");
    let storage = LocalStorage::new(&out_dir);

    let report = run_batch(&graph, &storage, notes(), 4, |_, _| {}).await;
    assert!(report.is_success());
    assert_eq!(report.outputs.len(), 2);

    let data1 = read_json(out_dir.join("note1.txt.json"));
    let data2 = read_json(out_dir.join("note2.txt.json"));

    // extracted_conditions 只輸出名稱
    assert_eq!(
        data1["extracted_conditions"],
        serde_json::json!(["Hypertension", "Diabetes"])
    );
    assert_eq!(data2["extracted_conditions"], serde_json::json!(["COPD"]));
    assert!(data1["enriched_conditions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|item| item["code"] == "I10"));
    assert_eq!(data2["enriched_conditions"][0]["code"], "J44.9");
    assert_eq!(data2["enriched_conditions"][0]["hcc_relevant"], false);
}

#[tokio::test]
async fn test_output_is_pretty_printed() {
    let graph = canned_graph(vec![PipelineState::new("note1.txt", "dummy")]);
    let temp_dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(temp_dir.path());

    let notes = vec![("note1.txt".to_string(), "dummy".to_string())];
    run_batch(&graph, &storage, notes, 1, |_, _| {}).await;

    let written = std::fs::read_to_string(temp_dir.path().join("note1.txt.json")).unwrap();
    assert!(written.contains("\n  \"filename\": \"note1.txt\""));
}

#[tokio::test]
async fn test_error_in_one_file_does_not_abort_others() {
    let graph = canned_graph(vec![PipelineState {
        filename: "note2.txt".to_string(),
        raw_text: String::new(),
        extracted_conditions: vec![Condition::named("OK")],
        enriched_conditions: Vec::new(),
    }]);

    let temp_dir = TempDir::new().unwrap();
    let storage = LocalStorage::new(temp_dir.path());

    let mut printed = Vec::new();
    let report = run_batch(&graph, &storage, notes(), 2, |filename, result| {
        if let Err(e) = result {
            printed.push(format!("Error: {}: {}", filename, e));
        }
    })
    .await;

    assert_eq!(printed.len(), 1);
    assert!(printed[0].starts_with("Error: note1.txt"));
    assert!(printed[0].contains("boom"));
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.errors[0].filename, "note1.txt");

    let files: Vec<String> = std::fs::read_dir(temp_dir.path())
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(files, vec!["note2.txt.json"]);
}

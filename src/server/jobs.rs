//! Background batch jobs and the in-memory store the API polls.

use crate::adapters::file_loader::FileLoader;
use crate::adapters::storage::LocalStorage;
use crate::config::Settings;
use crate::core::batch::run_batch;
use crate::core::nodes::{build_default_graph, ExtractorMode, PipelineGraph};
use crate::utils::error::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_finished(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: Uuid,
    pub status: JobStatus,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Input files captured when the job was submitted.
    pub files: Vec<String>,
    pub completed: usize,
    pub errors: Vec<String>,
    pub outputs: Vec<String>,
}

/// `2024-05-01T12:00:00.123456Z`
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Job {
    pub fn new(files: Vec<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            status: JobStatus::Pending,
            submitted_at: Utc::now(),
            started_at: None,
            finished_at: None,
            files,
            completed: 0,
            errors: Vec::new(),
            outputs: Vec::new(),
        }
    }

    pub fn total(&self) -> usize {
        self.files.len()
    }

    fn start(&mut self, now: DateTime<Utc>) {
        self.status = JobStatus::Running;
        self.started_at = Some(now);
    }

    /// Final status is `completed` only when no note failed.
    fn finish(&mut self, now: DateTime<Utc>) {
        self.status = if self.errors.is_empty() {
            JobStatus::Completed
        } else {
            JobStatus::Failed
        };
        self.finished_at = Some(now);
    }

    fn fail(&mut self, message: String, now: DateTime<Utc>) {
        self.errors.push(message);
        self.status = JobStatus::Failed;
        self.finished_at = Some(now);
    }

    /// Wall time of a finished job, rounded to hundredths of a second.
    pub fn duration_seconds(&self) -> Option<f64> {
        let (start, end) = (self.started_at?, self.finished_at?);
        let seconds = (end - start).num_microseconds()? as f64 / 1_000_000.0;
        Some((seconds * 100.0).round() / 100.0)
    }

    /// Whole seconds since start, while the job is still running.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> Option<i64> {
        match (self.started_at, self.finished_at) {
            (Some(start), None) => Some((now - start).num_seconds()),
            _ => None,
        }
    }

    pub fn view(&self, now: DateTime<Utc>) -> JobView {
        JobView {
            job_id: self.id.to_string(),
            status: self.status,
            submitted_at: timestamp(self.submitted_at),
            started_at: self.started_at.map(timestamp),
            finished_at: self.finished_at.map(timestamp),
            duration_seconds: self.duration_seconds(),
            elapsed_seconds: self.elapsed_seconds(now),
            total: self.total(),
            completed: self.completed,
            errors: self.errors.clone(),
            outputs: self.outputs.clone(),
        }
    }
}

/// JSON shape returned by `GET /jobs/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobView {
    pub job_id: String,
    pub status: JobStatus,
    pub submitted_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
    pub duration_seconds: Option<f64>,
    pub elapsed_seconds: Option<i64>,
    pub total: usize,
    pub completed: usize,
    pub errors: Vec<String>,
    pub outputs: Vec<String>,
}

/// Shared job table. Locks are never held across an await.
#[derive(Debug, Clone, Default)]
pub struct JobStore {
    jobs: Arc<RwLock<HashMap<Uuid, Job>>>,
}

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    // 單一工作失敗不應讓整個 store 無法使用，中毒時直接取回資料
    fn read(&self) -> RwLockReadGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<Uuid, Job>> {
        self.jobs.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert(&self, job: Job) -> Uuid {
        let id = job.id;
        self.write().insert(id, job);
        id
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.read().contains_key(id)
    }

    pub fn get(&self, id: &Uuid) -> Option<JobView> {
        self.read().get(id).map(|job| job.view(Utc::now()))
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn update<T>(&self, id: &Uuid, f: impl FnOnce(&mut Job) -> T) -> Option<T> {
        self.write().get_mut(id).map(f)
    }
}

async fn prepare(
    settings: &Settings,
    files: &[String],
) -> Result<(BTreeMap<String, String>, PipelineGraph)> {
    let mut notes = FileLoader::new(&settings.input_dir)?
        .load_files_blocking()
        .await?;
    notes.retain(|name, _| files.contains(name));
    let graph = build_default_graph(settings, ExtractorMode::Strict)?;
    Ok((notes, graph))
}

/// Runs a submitted job to completion, recording progress in `store` as
/// each note finishes.
pub async fn run_job(store: JobStore, job_id: Uuid, settings: Arc<Settings>) {
    let Some(files) = store.update(&job_id, |job| {
        job.start(Utc::now());
        job.files.clone()
    }) else {
        tracing::warn!("Job {} vanished before it started", job_id);
        return;
    };
    tracing::info!("🚀 Job {} started with {} file(s)", job_id, files.len());

    let (notes, graph) = match prepare(&settings, &files).await {
        Ok(prepared) => prepared,
        Err(e) => {
            tracing::error!("❌ Job {} failed during setup: {}", job_id, e);
            store.update(&job_id, |job| job.fail(e.to_string(), Utc::now()));
            return;
        }
    };

    let storage = LocalStorage::new(&settings.output_dir);
    let progress = store.clone();
    run_batch(&graph, &storage, notes, settings.workers, move |_, result| {
        progress.update(&job_id, |job| match result {
            Ok(location) => {
                job.outputs.push(location.clone());
                job.completed += 1;
            }
            Err(e) => job.errors.push(e.to_string()),
        });
    })
    .await;

    if let Some(view) = store.update(&job_id, |job| {
        job.finish(Utc::now());
        job.view(Utc::now())
    }) {
        tracing::info!(
            "🏁 Job {} {:?}: {}/{} completed, {} error(s)",
            job_id,
            view.status,
            view.completed,
            view.total,
            view.errors.len()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    fn at(seconds: i64, micros: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
            + Duration::seconds(seconds)
            + Duration::microseconds(micros)
    }

    #[test]
    fn test_new_job_view() {
        let job = Job::new(vec!["a.txt".to_string(), "b.txt".to_string()]);
        let view = job.view(Utc::now());
        assert_eq!(view.status, JobStatus::Pending);
        assert_eq!(view.total, 2);
        assert_eq!(view.started_at, None);
        assert_eq!(view.duration_seconds, None);
        assert_eq!(view.elapsed_seconds, None);
        assert!(view.submitted_at.ends_with('Z'));

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["finished_at"], serde_json::Value::Null);
    }

    #[test]
    fn test_running_and_finished_timings() {
        let mut job = Job::new(vec!["a.txt".to_string()]);
        job.start(at(0, 0));
        assert_eq!(job.elapsed_seconds(at(7, 900_000)), Some(7));
        assert_eq!(job.duration_seconds(), None);

        job.finish(at(3, 456_789));
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.duration_seconds(), Some(3.46));
        assert_eq!(job.elapsed_seconds(at(10, 0)), None);
        assert_eq!(
            job.view(at(10, 0)).started_at.as_deref(),
            Some("2023-11-14T22:13:20.000000Z")
        );
    }

    #[test]
    fn test_errors_make_job_fail() {
        let mut job = Job::new(vec!["a.txt".to_string()]);
        job.start(Utc::now());
        job.errors.push("boom".to_string());
        job.finish(Utc::now());
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.status.is_finished());
    }

    fn settings(temp_dir: &TempDir) -> Settings {
        let input = temp_dir.path().join("input");
        std::fs::create_dir_all(&input).unwrap();
        std::fs::write(input.join("note1.txt"), "Assessment/Plan: Diabetes").unwrap();
        std::fs::write(input.join("note2.txt"), "Assessment/Plan: Hypertension").unwrap();
        let csv = temp_dir.path().join("hcc.csv");
        std::fs::write(&csv, "Description,ICD-10-CM Codes,Tags\nDiabetes Mellitus,E11,True\n")
            .unwrap();

        Settings {
            gcp_project: String::new(),
            input_dir: input.to_string_lossy().to_string(),
            output_dir: temp_dir.path().join("output").to_string_lossy().to_string(),
            hcc_csv_path: csv.to_string_lossy().to_string(),
            workers: 2,
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_run_job_only_processes_submitted_files() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Arc::new(settings(&temp_dir));
        let store = JobStore::new();
        let id = store.insert(Job::new(vec!["note1.txt".to_string()]));

        run_job(store.clone(), id, settings).await;

        let view = store.get(&id).unwrap();
        assert_eq!(view.status, JobStatus::Completed);
        assert_eq!(view.completed, 1);
        assert_eq!(view.total, 1);
        assert!(view.outputs[0].ends_with("note1.txt.json"));
        assert!(view.duration_seconds.is_some());
        assert!(!temp_dir.path().join("output/note2.txt.json").exists());
    }

    #[tokio::test]
    async fn test_setup_failure_marks_job_failed() {
        let temp_dir = TempDir::new().unwrap();
        let settings = Arc::new(Settings {
            hcc_csv_path: temp_dir.path().join("missing.csv").to_string_lossy().to_string(),
            ..settings(&temp_dir)
        });
        let store = JobStore::new();
        let id = store.insert(Job::new(vec!["note1.txt".to_string()]));

        run_job(store.clone(), id, settings).await;

        let view = store.get(&id).unwrap();
        assert_eq!(view.status, JobStatus::Failed);
        assert_eq!(view.completed, 0);
        assert_eq!(view.errors.len(), 1);
        assert!(view.errors[0].contains("missing.csv"));
        assert!(view.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_job_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let store = JobStore::new();
        run_job(store.clone(), Uuid::new_v4(), Arc::new(settings(&temp_dir))).await;
        assert!(store.is_empty());
    }
}

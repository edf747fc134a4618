//! Embedded persistence for information-need batches, evaluation summaries
//! and run records.
//!
//! Every record is a JSON document in one of three sled trees. Batches and
//! summaries are keyed by UUID, run records by run name.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    error::{Result, SimlabError},
    information_need::InformationNeedBatch,
    statistics::MetricStatistics,
};

const INFORMATION_NEEDS: &str = "information_needs";
const EVALUATION_RESULTS: &str = "evaluation_results";
const RUNS: &str = "runs";

/// Aggregated scores of one agent / user-simulator pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub run_name: String,
    pub public: bool,
    pub agent_id: String,
    pub user_simulator_id: String,
    pub task_id: String,
    pub information_need_batch_id: String,
    pub metrics: BTreeMap<String, MetricStatistics>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub name: String,
    pub status: RunStatus,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// `"{agent_id}_{user_id}: {error}"` for every pair that failed.
    #[serde(default)]
    pub failed_pairs: Vec<String>,
}

impl RunRecord {
    pub fn started(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: RunStatus::Running,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
            failed_pairs: Vec::new(),
        }
    }

    pub fn finish(&mut self, error: Option<String>) {
        self.status = if error.is_some() {
            RunStatus::Failed
        } else {
            RunStatus::Completed
        };
        self.error = error;
        self.finished_at = Some(Utc::now());
    }
}

#[derive(Clone)]
pub struct Storage {
    db: sled::Db,
    information_needs: sled::Tree,
    evaluation_results: sled::Tree,
    runs: sled::Tree,
    #[cfg(test)]
    run_writes_rejected: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

impl Storage {
    /// Opens or creates the database at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let db = sled::open(path).map_err(|e| {
            SimlabError::Persistence(format!("Failed to open database at '{}': {}", path.display(), e))
        })?;
        info!("Database opened at '{}'", path.display());
        Self::from_db(db)
    }

    /// In-memory database discarded on drop.
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self> {
        Ok(Self {
            information_needs: db.open_tree(INFORMATION_NEEDS)?,
            evaluation_results: db.open_tree(EVALUATION_RESULTS)?,
            runs: db.open_tree(RUNS)?,
            db,
            #[cfg(test)]
            run_writes_rejected: Default::default(),
        })
    }

    fn put<T: Serialize>(tree: &sled::Tree, key: &str, record: &T) -> Result<()> {
        let bytes = serde_json::to_vec(record)?;
        tree.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    fn get<T: DeserializeOwned>(tree: &sled::Tree, key: &str) -> Result<Option<T>> {
        match tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn save_information_need_batch(&self, batch: &InformationNeedBatch) -> Result<()> {
        if self.information_needs.contains_key(batch.id.as_bytes())? {
            return Err(SimlabError::Persistence(format!(
                "Information need batch '{}' already exists",
                batch.id
            )));
        }
        Self::put(&self.information_needs, &batch.id, batch)?;
        self.db.flush()?;
        debug!(batch_id = %batch.id, needs = batch.information_needs.len(), "Batch stored");
        Ok(())
    }

    /// Raw batch document, `{id, information_needs: [...], created_at}`.
    pub fn information_need_batch(&self, batch_id: &str) -> Result<Option<Value>> {
        Self::get(&self.information_needs, batch_id)
    }

    pub fn insert_evaluation_summary(&self, summary: &EvaluationSummary) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        Self::put(&self.evaluation_results, &id, summary)?;
        self.db.flush()?;
        Ok(id)
    }

    pub fn evaluation_summaries(&self) -> Result<Vec<EvaluationSummary>> {
        self.evaluation_results
            .iter()
            .values()
            .map(|bytes| Ok(serde_json::from_slice(&bytes?)?))
            .collect()
    }

    pub fn upsert_run_record(&self, record: &RunRecord) -> Result<()> {
        #[cfg(test)]
        if self.run_writes_rejected.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SimlabError::Persistence("Run records are read-only".to_string()));
        }
        Self::put(&self.runs, &record.name, record)?;
        self.db.flush()?;
        Ok(())
    }

    pub fn get_run_record(&self, name: &str) -> Result<Option<RunRecord>> {
        Self::get(&self.runs, name)
    }

    /// Makes every later run-record write fail, shared across clones.
    #[cfg(test)]
    pub(crate) fn reject_run_writes(&self) {
        self.run_writes_rejected
            .store(true, std::sync::atomic::Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::information_need::InformationNeed;
    use serde_json::Map;

    #[test]
    fn test_batch_round_trip_keeps_order() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Storage::open(dir.path().join("db")).unwrap();

        let needs = vec![
            InformationNeed::new(Map::new(), ["a"]),
            InformationNeed::new(Map::new(), ["b"]),
        ];
        let batch = InformationNeedBatch::new(needs);
        storage.save_information_need_batch(&batch).unwrap();

        let stored = storage.information_need_batch(&batch.id).unwrap().unwrap();
        assert_eq!(stored["information_needs"][0]["requested_slots"][0], "a");
        assert_eq!(stored["information_needs"][1]["requested_slots"][0], "b");
        assert!(storage.information_need_batch("missing").unwrap().is_none());

        let err = storage.save_information_need_batch(&batch).unwrap_err();
        assert!(matches!(err, SimlabError::Persistence(_)));
    }

    #[test]
    fn test_run_record_upsert() {
        let storage = Storage::temporary().unwrap();
        let mut record = RunRecord::started("run-1");
        storage.upsert_run_record(&record).unwrap();
        assert_eq!(
            storage.get_run_record("run-1").unwrap().unwrap().status,
            RunStatus::Running
        );

        record.finish(Some("boom".to_string()));
        storage.upsert_run_record(&record).unwrap();
        let stored = storage.get_run_record("run-1").unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("boom"));
        assert!(stored.finished_at.is_some());
    }

    #[test]
    fn test_summaries_are_listed() {
        let storage = Storage::temporary().unwrap();
        let mut metrics = BTreeMap::new();
        metrics.insert(
            "success_rate".to_string(),
            MetricStatistics::from_values(vec![1.0, 0.5, 0.0]).unwrap(),
        );
        let summary = EvaluationSummary {
            run_name: "run".to_string(),
            public: false,
            agent_id: "a".to_string(),
            user_simulator_id: "u".to_string(),
            task_id: "t".to_string(),
            information_need_batch_id: "b".to_string(),
            metrics,
            created_at: Utc::now(),
        };
        storage.insert_evaluation_summary(&summary).unwrap();
        assert_eq!(storage.evaluation_summaries().unwrap(), vec![summary]);
    }
}

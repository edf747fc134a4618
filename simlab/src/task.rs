//! Evaluation task: a domain, a batch of information needs, and the metrics
//! dialogues are scored with.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::{
    dialogue::Dialogue,
    domain::SimulationDomain,
    error::{Result, SimlabError},
    information_need::{InformationNeed, InformationNeedBatch},
    metrics::Metric,
    storage::Storage,
};

pub struct Task {
    pub name: String,
    pub domain: Option<SimulationDomain>,
    pub metrics: Vec<Box<dyn Metric>>,
    pub batch_id: String,
    information_needs: Vec<InformationNeed>,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("metrics", &self.metrics)
            .field("batch_id", &self.batch_id)
            .field("information_needs", &self.information_needs.len())
            .finish()
    }
}

impl Task {
    /// Builds the task and resolves its information needs from `storage`.
    pub fn new(
        name: impl Into<String>,
        domain: Option<SimulationDomain>,
        metrics: Vec<Box<dyn Metric>>,
        storage: &Storage,
        batch_id: impl Into<String>,
    ) -> Result<Self> {
        let batch_id = batch_id.into();
        let information_needs = Self::get_information_needs(storage, &batch_id)?;
        Ok(Self {
            name: name.into(),
            domain,
            metrics,
            batch_id,
            information_needs,
        })
    }

    pub fn information_needs(&self) -> &[InformationNeed] {
        &self.information_needs
    }

    /// One simulation per information need and repetition.
    pub fn num_simulations(&self) -> usize {
        self.information_needs.len()
    }

    pub fn get_information_needs(storage: &Storage, batch_id: &str) -> Result<Vec<InformationNeed>> {
        let needs = Self::retrieve_information_needs(storage, batch_id)?;
        info!(batch_id, count = needs.len(), "Information needs loaded");
        Ok(needs)
    }

    pub fn retrieve_information_needs(storage: &Storage, batch_id: &str) -> Result<Vec<InformationNeed>> {
        let batch = storage
            .information_need_batch(batch_id)?
            .ok_or_else(|| SimlabError::BatchNotFound(batch_id.to_string()))?;

        batch
            .get("information_needs")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default()
            .iter()
            .map(InformationNeed::from_dict)
            .collect()
    }

    /// Stores a new batch and returns its id.
    pub fn save_information_need_batch(storage: &Storage, needs: Vec<InformationNeed>) -> Result<String> {
        let batch = InformationNeedBatch::new(needs);
        storage.save_information_need_batch(&batch)?;
        Ok(batch.id)
    }

    /// Scores the dialogues with every metric. The first failing metric
    /// aborts the evaluation.
    #[instrument(skip_all, fields(task = %self.name, dialogues = dialogues.len()))]
    pub fn evaluation(&self, dialogues: &[Dialogue]) -> Result<BTreeMap<String, Vec<f64>>> {
        let mut results = BTreeMap::new();
        for metric in &self.metrics {
            let scores = metric.evaluate_dialogues(dialogues)?;
            debug!(metric = metric.name(), "Metric evaluated");
            results.insert(metric.name().to_string(), scores);
        }
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SuccessRate;
    use serde_json::{json, Map};

    struct Constant(f64);

    impl Metric for Constant {
        fn name(&self) -> &str {
            "constant"
        }

        fn evaluate_dialogue(&self, _dialogue: &Dialogue) -> Result<f64> {
            Ok(self.0)
        }
    }

    struct Broken;

    impl Metric for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn evaluate_dialogue(&self, _dialogue: &Dialogue) -> Result<f64> {
            Err(SimlabError::Metric {
                metric: "broken".to_string(),
                reason: "no model".to_string(),
            })
        }
    }

    fn dialogues(n: usize) -> Vec<Dialogue> {
        (0..n)
            .map(|i| Dialogue {
                conversation_id: i.to_string(),
                conversation: Vec::new(),
                metadata: Map::new(),
                agent: json!({}),
                user: json!({}),
            })
            .collect()
    }

    fn needs() -> Vec<InformationNeed> {
        ["title", "year", "rating"]
            .into_iter()
            .map(|slot| InformationNeed::new(Map::new(), [slot]))
            .collect()
    }

    #[test]
    fn test_batch_is_retrieved_in_order() {
        let storage = Storage::temporary().unwrap();
        let batch_id = Task::save_information_need_batch(&storage, needs()).unwrap();

        let first = Task::retrieve_information_needs(&storage, &batch_id).unwrap();
        let second = Task::retrieve_information_needs(&storage, &batch_id).unwrap();
        assert_eq!(first, needs());
        assert_eq!(first, second);
    }

    #[test]
    fn test_unknown_batch() {
        let storage = Storage::temporary().unwrap();
        let err = Task::new("t", None, Vec::new(), &storage, "nope").unwrap_err();
        assert!(matches!(err, SimlabError::BatchNotFound(id) if id == "nope"));
    }

    #[test]
    fn test_evaluation_per_metric() {
        let storage = Storage::temporary().unwrap();
        let batch_id = Task::save_information_need_batch(&storage, needs()).unwrap();
        let task = Task::new(
            "movies",
            None,
            vec![Box::new(Constant(1.0)), Box::new(SuccessRate::new())],
            &storage,
            batch_id,
        )
        .unwrap();
        assert_eq!(task.num_simulations(), 3);

        let results = task.evaluation(&dialogues(4)).unwrap();
        assert_eq!(results["constant"], vec![1.0; 4]);
        assert_eq!(results["success_rate"], vec![0.0; 4]);
    }

    #[test]
    fn test_failing_metric_aborts_evaluation() {
        let storage = Storage::temporary().unwrap();
        let batch_id = Task::save_information_need_batch(&storage, needs()).unwrap();
        let task = Task::new(
            "movies",
            None,
            vec![Box::new(Constant(1.0)), Box::new(Broken)],
            &storage,
            batch_id,
        )
        .unwrap();

        assert!(task.evaluation(&dialogues(2)).is_err());
    }
}

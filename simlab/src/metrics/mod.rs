//! Dialogue metrics.

use crate::{dialogue::Dialogue, error::Result};

pub mod recommendation_success_ratio;
pub mod success_rate;

pub use recommendation_success_ratio::RecommendationSuccessRatio;
pub use success_rate::SuccessRate;

pub trait Metric: Send + Sync {
    fn name(&self) -> &str;

    fn evaluate_dialogue(&self, dialogue: &Dialogue) -> Result<f64>;

    /// Scores every dialogue in order, stopping at the first failure.
    fn evaluate_dialogues(&self, dialogues: &[Dialogue]) -> Result<Vec<f64>> {
        dialogues
            .iter()
            .map(|dialogue| self.evaluate_dialogue(dialogue))
            .collect()
    }
}

impl std::fmt::Debug for dyn Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metric").field("name", &self.name()).finish()
    }
}

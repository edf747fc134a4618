//! Ratio of recommendation rounds the user accepted.
//!
//! A round opens with an utterance carrying a recommendation intent and runs
//! until the next one. It counts as successful when a user utterance accepts
//! before any user utterance rejects. Intents are read from the dialogue acts
//! stored in the transcript.

use serde::Deserialize;

use crate::{
    dialogue::{Dialogue, DialogueRole, Utterance},
    error::Result,
};

use super::Metric;

pub const RECOMMENDATION_SUCCESS_RATIO: &str = "recommendation_success_ratio";

#[derive(Debug, Clone, Deserialize)]
pub struct RecommendationSuccessRatio {
    #[serde(default = "default_name")]
    name: String,
    #[serde(default = "default_reject")]
    reject_intent_labels: Vec<String>,
    #[serde(default = "default_accept")]
    accept_intent_labels: Vec<String>,
    #[serde(default = "default_recommend")]
    recommendation_intent_labels: Vec<String>,
}

fn default_name() -> String {
    RECOMMENDATION_SUCCESS_RATIO.to_string()
}

fn default_reject() -> Vec<String> {
    vec!["REJECT".to_string()]
}

fn default_accept() -> Vec<String> {
    vec!["ACCEPT".to_string()]
}

fn default_recommend() -> Vec<String> {
    vec!["RECOMMEND".to_string()]
}

impl Default for RecommendationSuccessRatio {
    fn default() -> Self {
        Self {
            name: default_name(),
            reject_intent_labels: default_reject(),
            accept_intent_labels: default_accept(),
            recommendation_intent_labels: default_recommend(),
        }
    }
}

impl RecommendationSuccessRatio {
    pub fn new(
        reject_intent_labels: Vec<String>,
        accept_intent_labels: Vec<String>,
        recommendation_intent_labels: Vec<String>,
    ) -> Self {
        Self {
            name: default_name(),
            reject_intent_labels,
            accept_intent_labels,
            recommendation_intent_labels,
        }
    }

    fn carries_any(utterance: &Utterance, labels: &[String]) -> bool {
        utterance.intents().any(|intent| labels.iter().any(|l| l == intent))
    }

    /// Utterances grouped per recommendation round. Turns before the first
    /// recommendation belong to no round.
    pub fn recommendation_rounds<'a>(&self, dialogue: &'a Dialogue) -> Vec<Vec<&'a Utterance>> {
        let mut rounds: Vec<Vec<&Utterance>> = Vec::new();
        for utterance in dialogue.utterances() {
            if Self::carries_any(utterance, &self.recommendation_intent_labels) {
                rounds.push(vec![utterance]);
            } else if let Some(current) = rounds.last_mut() {
                current.push(utterance);
            }
        }
        rounds
    }

    /// Any user rejection in the round fails it, even after an acceptance.
    pub fn is_recommendation_accepted(&self, round: &[&Utterance]) -> bool {
        let mut accepted = false;
        for utterance in round.iter().filter(|u| u.participant == DialogueRole::User) {
            if Self::carries_any(utterance, &self.accept_intent_labels) {
                accepted = true;
            } else if Self::carries_any(utterance, &self.reject_intent_labels) {
                return false;
            }
        }
        accepted
    }
}

impl Metric for RecommendationSuccessRatio {
    fn name(&self) -> &str {
        &self.name
    }

    fn evaluate_dialogue(&self, dialogue: &Dialogue) -> Result<f64> {
        let rounds = self.recommendation_rounds(dialogue);
        if rounds.is_empty() {
            return Ok(0.0);
        }
        let successful = rounds
            .iter()
            .filter(|round| self.is_recommendation_accepted(round))
            .count();
        Ok(successful as f64 / rounds.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialogue::DialogueAct;
    use serde_json::{json, Map};

    fn turn(role: DialogueRole, intent: &str) -> Utterance {
        Utterance::new(role, intent.to_lowercase()).with_dialogue_act(DialogueAct::new(intent))
    }

    fn dialogue(conversation: Vec<Utterance>) -> Dialogue {
        Dialogue {
            conversation_id: "c".to_string(),
            conversation,
            metadata: Map::new(),
            agent: json!({}),
            user: json!({}),
        }
    }

    #[test]
    fn test_half_of_rounds_accepted() {
        let d = dialogue(vec![
            turn(DialogueRole::Agent, "GREETING"),
            turn(DialogueRole::Agent, "RECOMMEND"),
            turn(DialogueRole::User, "REJECT"),
            turn(DialogueRole::Agent, "RECOMMEND"),
            turn(DialogueRole::User, "ACCEPT"),
        ]);
        let metric = RecommendationSuccessRatio::default();
        assert_eq!(metric.recommendation_rounds(&d).len(), 2);
        assert_eq!(metric.evaluate_dialogue(&d).unwrap(), 0.5);
    }

    #[test]
    fn test_any_user_rejection_fails_the_round() {
        let d = dialogue(vec![
            turn(DialogueRole::Agent, "RECOMMEND"),
            turn(DialogueRole::User, "ACCEPT"),
            turn(DialogueRole::User, "REJECT"),
        ]);
        let metric = RecommendationSuccessRatio::default();
        assert_eq!(metric.evaluate_dialogue(&d).unwrap(), 0.0);

        let d = dialogue(vec![
            turn(DialogueRole::Agent, "RECOMMEND"),
            turn(DialogueRole::Agent, "ACCEPT"),
        ]);
        assert_eq!(metric.evaluate_dialogue(&d).unwrap(), 0.0);
    }

    #[test]
    fn test_no_recommendation_scores_zero() {
        let d = dialogue(vec![turn(DialogueRole::User, "ACCEPT")]);
        assert_eq!(RecommendationSuccessRatio::default().evaluate_dialogue(&d).unwrap(), 0.0);
    }

    #[test]
    fn test_labels_from_arguments() {
        let metric: RecommendationSuccessRatio = serde_json::from_value(json!({
            "recommendation_intent_labels": ["REVEAL"],
            "accept_intent_labels": ["LIKE"]
        }))
        .unwrap();
        let d = dialogue(vec![
            turn(DialogueRole::Agent, "REVEAL"),
            turn(DialogueRole::User, "LIKE"),
        ]);
        assert_eq!(metric.name(), RECOMMENDATION_SUCCESS_RATIO);
        assert_eq!(metric.evaluate_dialogue(&d).unwrap(), 1.0);
    }
}

//! Task success: did the agent disclose everything the user asked for?

use std::collections::HashSet;

use crate::{
    dialogue::{Dialogue, DialogueRole},
    error::{Result, SimlabError},
    information_need::InformationNeed,
};

use super::Metric;

pub const SUCCESS_RATE: &str = "success_rate";

#[derive(Debug, Clone)]
pub struct SuccessRate {
    name: String,
}

impl SuccessRate {
    pub fn new() -> Self {
        Self::with_name(SUCCESS_RATE)
    }

    pub fn with_name(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for SuccessRate {
    fn default() -> Self {
        Self::new()
    }
}

impl Metric for SuccessRate {
    fn name(&self) -> &str {
        &self.name
    }

    /// 1.0 when every requested slot of the dialogue's information need was
    /// disclosed in an agent dialogue act, 0.0 otherwise. Dialogues recorded
    /// without an information need score 0.0.
    fn evaluate_dialogue(&self, dialogue: &Dialogue) -> Result<f64> {
        let Some(raw_need) = dialogue.information_need() else {
            return Ok(0.0);
        };
        let need = InformationNeed::from_dict(raw_need).map_err(|e| SimlabError::Metric {
            metric: self.name.clone(),
            reason: format!("conversation {}: {}", dialogue.conversation_id, e),
        })?;

        let disclosed: HashSet<&str> = dialogue
            .utterances()
            .iter()
            .filter(|u| u.participant == DialogueRole::Agent)
            .flat_map(|u| u.dialogue_acts.iter())
            .flat_map(|act| act.annotations.iter())
            .filter(|annotation| !annotation.value.is_null())
            .map(|annotation| annotation.slot.as_str())
            .collect();

        let success = need
            .requested_slots()
            .all(|slot| disclosed.contains(slot) || need.fulfilled_value(slot).is_some());

        Ok(if success { 1.0 } else { 0.0 })
    }
}

//! Dialogue model and the per-pair transcript file format.
//!
//! A transcript file holds a JSON array of dialogues exchanged between one
//! agent and one user simulator. New dialogues are appended; existing ones are
//! never rewritten.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SimlabError};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum DialogueRole {
    Agent,
    User,
}

impl std::fmt::Display for DialogueRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DialogueRole::Agent => write!(f, "AGENT"),
            DialogueRole::User => write!(f, "USER"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SlotValueAnnotation {
    pub slot: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DialogueAct {
    pub intent: String,
    #[serde(default)]
    pub annotations: Vec<SlotValueAnnotation>,
}

impl DialogueAct {
    pub fn new(intent: impl Into<String>) -> Self {
        Self {
            intent: intent.into(),
            annotations: Vec::new(),
        }
    }

    pub fn with_annotation(mut self, slot: impl Into<String>, value: impl Into<Value>) -> Self {
        self.annotations.push(SlotValueAnnotation {
            slot: slot.into(),
            value: value.into(),
        });
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Annotation {
    pub key: String,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Utterance {
    pub participant: DialogueRole,
    #[serde(rename = "utterance")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dialogue_acts: Vec<DialogueAct>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
}

impl Utterance {
    pub fn new(participant: DialogueRole, text: impl Into<String>) -> Self {
        Self {
            participant,
            text: text.into(),
            dialogue_acts: Vec::new(),
            annotations: Vec::new(),
            metadata: Map::new(),
        }
    }

    pub fn with_dialogue_act(mut self, act: DialogueAct) -> Self {
        self.dialogue_acts.push(act);
        self
    }

    pub fn intents(&self) -> impl Iterator<Item = &str> {
        self.dialogue_acts.iter().map(|act| act.intent.as_str())
    }

    pub fn has_intent(&self, intent: &str) -> bool {
        self.intents().any(|i| i == intent)
    }
}

/// One finished conversation as stored in a transcript file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Dialogue {
    pub conversation_id: String,
    pub conversation: Vec<Utterance>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub agent: Value,
    #[serde(default)]
    pub user: Value,
}

impl Dialogue {
    pub fn utterances(&self) -> &[Utterance] {
        &self.conversation
    }

    pub fn information_need(&self) -> Option<&Value> {
        self.metadata.get("information_need")
    }
}

/// `{output_dir}/{agent_id}_{user_id}.json`
pub fn transcript_path(output_dir: &Path, agent_id: &str, user_id: &str) -> PathBuf {
    output_dir.join(format!("{agent_id}_{user_id}.json"))
}

/// Reads every dialogue stored in a transcript file.
pub async fn read_transcript(path: &Path) -> Result<Vec<Dialogue>> {
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        SimlabError::Persistence(format!("Failed to read transcript {}: {}", path.display(), e))
    })?;
    Ok(serde_json::from_str(&contents)?)
}

/// Appends a dialogue to a transcript file, creating the file and its
/// directory on first use. The whole file is rewritten, so callers must not
/// append to the same file concurrently.
pub async fn append_to_transcript(path: &Path, dialogue: &Dialogue) -> Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }

    let mut dialogues: Vec<Value> = match tokio::fs::read_to_string(path).await {
        Ok(contents) => serde_json::from_str(&contents).map_err(|e| {
            SimlabError::Persistence(format!(
                "Transcript {} is not a JSON array: {}",
                path.display(),
                e
            ))
        })?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
        Err(e) => return Err(e.into()),
    };

    dialogues.push(serde_json::to_value(dialogue)?);
    tokio::fs::write(path, serde_json::to_vec_pretty(&dialogues)?).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_utterance_wire_format() {
        let utterance = Utterance::new(DialogueRole::Agent, "Heat is rated 8.3")
            .with_dialogue_act(DialogueAct::new("INFORM").with_annotation("rating", 8.3));

        let value = serde_json::to_value(&utterance).unwrap();
        assert_eq!(value["participant"], json!("AGENT"));
        assert_eq!(value["utterance"], json!("Heat is rated 8.3"));
        assert_eq!(value["dialogue_acts"][0]["annotations"][0]["slot"], json!("rating"));
        assert!(value.get("metadata").is_none());
        assert!(utterance.has_intent("INFORM"));
    }

    #[tokio::test]
    async fn test_append_creates_directory_and_grows() {
        let dir = tempfile::tempdir().unwrap();
        let path = transcript_path(&dir.path().join("nested"), "agent", "user");

        let dialogue = Dialogue {
            conversation_id: "c1".to_string(),
            conversation: vec![Utterance::new(DialogueRole::Agent, "Hello")],
            metadata: Map::new(),
            agent: json!({"id": "agent"}),
            user: json!({"id": "user"}),
        };

        append_to_transcript(&path, &dialogue).await.unwrap();
        append_to_transcript(&path, &dialogue).await.unwrap();

        let stored = read_transcript(&path).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0], dialogue);
    }
}

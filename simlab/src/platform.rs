//! Registry of active agent / user-simulator pairs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, instrument};

use crate::{
    connector::DialogueConnector,
    error::{Result, SimlabError},
    participant::{Agent, UserSimulator},
};

type PairKey = (String, String);

#[derive(Default)]
pub struct SimulationPlatform {
    active_pairs: HashMap<PairKey, (Arc<dyn Agent>, Arc<dyn UserSimulator>)>,
    max_utterances: Option<usize>,
}

impl SimulationPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_utterances(mut self, limit: Option<usize>) -> Self {
        self.max_utterances = limit;
        self
    }

    /// Registers the pair and runs one conversation between them to
    /// completion. The transcript lands in `output_dir`.
    #[instrument(skip(self, user_simulator, agent, output_dir), fields(agent_id = %agent.id()))]
    pub async fn connect(
        &mut self,
        user_id: &str,
        user_simulator: Arc<dyn UserSimulator>,
        agent: Arc<dyn Agent>,
        output_dir: &Path,
    ) -> Result<()> {
        let key = (agent.id().to_string(), user_id.to_string());
        if self.active_pairs.contains_key(&key) {
            return Err(SimlabError::DuplicateConnection {
                agent_id: key.0,
                user_id: key.1,
            });
        }

        self.active_pairs
            .insert(key, (Arc::clone(&agent), Arc::clone(&user_simulator)));
        debug!("Pair connected");

        let mut connector = DialogueConnector::new(agent, user_simulator, output_dir)
            .with_max_utterances(self.max_utterances);
        connector.start().await
    }

    pub fn disconnect(&mut self, user_id: &str, agent_id: &str) -> Result<()> {
        self.active_pairs
            .remove(&(agent_id.to_string(), user_id.to_string()))
            .map(|_| ())
            .ok_or_else(|| SimlabError::NotConnected {
                agent_id: agent_id.to_string(),
                user_id: user_id.to_string(),
            })
    }

    pub fn is_connected(&self, user_id: &str, agent_id: &str) -> bool {
        self.active_pairs
            .contains_key(&(agent_id.to_string(), user_id.to_string()))
    }

    /// `(agent_id, user_id)` of every pair currently registered.
    pub fn active_pairs(&self) -> Vec<(String, String)> {
        let mut pairs: Vec<_> = self.active_pairs.keys().cloned().collect();
        pairs.sort();
        pairs
    }
}

//! Conversational agent served behind the participant HTTP API.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Value};

use super::{api, Agent, Participant, DEFAULT_STOP_INTENT};
use crate::{
    dialogue::{DialogueAct, DialogueRole, Utterance},
    error::Result,
};

pub const DEFAULT_AGENT_URI: &str = "http://localhost:7000";

pub struct WrapperAgent {
    id: String,
    uri: RwLock<String>,
    stop_intent: String,
    client: reqwest::Client,
}

impl WrapperAgent {
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: RwLock::new(uri.into()),
            stop_intent: DEFAULT_STOP_INTENT.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_stop_intent(mut self, stop_intent: impl Into<String>) -> Self {
        self.stop_intent = stop_intent.into();
        self
    }

    pub fn uri(&self) -> String {
        self.uri.read().clone()
    }
}

#[async_trait]
impl Participant for WrapperAgent {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> DialogueRole {
        DialogueRole::Agent
    }

    fn to_metadata(&self) -> Value {
        json!({ "id": self.id, "type": "BOT", "uri": self.uri() })
    }

    fn endpoint(&self) -> Option<String> {
        Some(self.uri())
    }

    fn rebind(&self, base_uri: &str) {
        *self.uri.write() = base_uri.to_string();
    }

    async fn receive_utterance(
        &self,
        context: &[Utterance],
        utterance: &Utterance,
        counterpart_id: &str,
    ) -> Result<Utterance> {
        let mut request = api::UtteranceRequest::new(context, utterance);
        request.user_id = Some(counterpart_id.to_string());
        request.agent_id = Some(self.id.clone());

        let uri = self.uri();
        api::get_utterance_response(&self.client, &uri, &self.id, &request, DialogueRole::Agent).await
    }
}

#[async_trait]
impl Agent for WrapperAgent {
    fn stop_intent(&self) -> &str {
        &self.stop_intent
    }

    async fn welcome(&self) -> Result<Utterance> {
        Ok(Utterance::new(DialogueRole::Agent, "Hello! How can I help you?"))
    }

    async fn goodbye(&self) -> Result<Utterance> {
        Ok(Utterance::new(DialogueRole::Agent, "Goodbye!")
            .with_dialogue_act(DialogueAct::new(self.stop_intent.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_goodbye_carries_stop_intent() {
        let agent = WrapperAgent::new("a1", DEFAULT_AGENT_URI).with_stop_intent("BYE");
        let goodbye = agent.goodbye().await.unwrap();
        assert!(goodbye.has_intent("BYE"));
        assert!(!agent.welcome().await.unwrap().has_intent("BYE"));
    }

    #[test]
    fn test_rebind_updates_endpoint() {
        let agent = WrapperAgent::new("a1", DEFAULT_AGENT_URI);
        agent.rebind("http://localhost:7123");
        assert_eq!(agent.endpoint().as_deref(), Some("http://localhost:7123"));
        assert_eq!(agent.to_metadata()["uri"], "http://localhost:7123");
    }
}

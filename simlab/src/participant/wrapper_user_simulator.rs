//! User simulator served behind the participant HTTP API.

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::{json, Value};
use tracing::{info, instrument};

use super::{api, Participant, UserSimulator};
use crate::{
    dialogue::{DialogueRole, Utterance},
    error::{Result, SimlabError},
    information_need::InformationNeed,
};

pub struct WrapperUserSimulator {
    id: String,
    uri: RwLock<String>,
    information_need: Mutex<Option<InformationNeed>>,
    client: reqwest::Client,
}

impl WrapperUserSimulator {
    pub fn new(id: impl Into<String>, uri: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            uri: RwLock::new(uri.into()),
            information_need: Mutex::new(None),
            client: reqwest::Client::new(),
        }
    }

    pub fn uri(&self) -> String {
        self.uri.read().clone()
    }
}

#[async_trait]
impl Participant for WrapperUserSimulator {
    fn id(&self) -> &str {
        &self.id
    }

    fn role(&self) -> DialogueRole {
        DialogueRole::User
    }

    fn to_metadata(&self) -> Value {
        json!({ "id": self.id, "type": "SIMULATOR", "uri": self.uri() })
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
        request.agent_id = Some(counterpart_id.to_string());

        let uri = self.uri();
        api::get_utterance_response(&self.client, &uri, &self.id, &request, DialogueRole::User).await
    }
}

#[async_trait]
impl UserSimulator for WrapperUserSimulator {
    #[instrument(skip(self, need), fields(user_id = %self.id))]
    async fn set_information_need(&self, need: &InformationNeed) -> Result<()> {
        let request = api::InformationNeedRequest {
            information_need: need.to_dict(),
            user_id: self.id.clone(),
        };
        let response = self
            .client
            .post(format!("{}/set_information_need", self.uri().trim_end_matches('/')))
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status != api::SET_INFORMATION_NEED_SUCCESS_STATUS {
            let body = response.text().await.unwrap_or_default();
            return Err(SimlabError::configuration(format!(
                "Failed to set information need. Status code: {status}. Response: {body}"
            )));
        }

        info!("Information need set");
        *self.information_need.lock() = Some(need.clone());
        Ok(())
    }

    fn information_need(&self) -> Option<InformationNeed> {
        self.information_need.lock().clone()
    }
}

//! HTTP contract spoken by containerized participants.
//!
//! - `POST {uri}/receive_utterance` returns the participant's next turn
//! - `POST {uri}/configure` pushes custom parameters
//! - `POST {uri}/set_information_need` (user simulators only)
//! - `GET {uri}/` liveness probe

use std::time::Duration;

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use crate::{
    dialogue::{Annotation, DialogueAct, DialogueRole, SlotValueAnnotation, Utterance},
    error::{Result, SimlabError},
};

/// Status a participant must answer `/configure` with.
pub const CONFIGURE_SUCCESS_STATUS: StatusCode = StatusCode::CREATED;

/// Status a user simulator must answer `/set_information_need` with.
pub const SET_INFORMATION_NEED_SUCCESS_STATUS: StatusCode = StatusCode::OK;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UtteranceRequest {
    pub context: Vec<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
}

impl UtteranceRequest {
    pub fn new(context: &[Utterance], utterance: &Utterance) -> Self {
        Self {
            context: context.iter().map(|u| u.text.clone()).collect(),
            message: utterance.text.clone(),
            user_id: None,
            agent_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigureRequest {
    pub id: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InformationNeedRequest {
    pub information_need: Value,
    pub user_id: String,
}

/// Turn a participant response into an utterance. Missing or null fields
/// fall back to empty values; an empty message is kept but logged.
pub fn parse_api_response(response: &Value, role: DialogueRole) -> Utterance {
    let text = response
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    if text.is_empty() {
        warn!(%role, "Empty response from participant. See response: {}", response);
    }

    let dialogue_acts = array(response, "dialogue_acts")
        .iter()
        .map(|act| DialogueAct {
            intent: string_field(act, "intent"),
            annotations: array(act, "annotations")
                .iter()
                .map(|annotation| SlotValueAnnotation {
                    slot: string_field(annotation, "slot"),
                    value: annotation.get("value").cloned().unwrap_or_else(|| Value::from("")),
                })
                .collect(),
        })
        .collect();

    let annotations = array(response, "annotations")
        .iter()
        .map(|annotation| Annotation {
            key: string_field(annotation, "key"),
            value: annotation.get("value").cloned().unwrap_or_else(|| Value::from("")),
        })
        .collect();

    let metadata = response
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    Utterance {
        participant: role,
        text,
        dialogue_acts,
        annotations,
        metadata,
    }
}

fn array<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn string_field(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

/// Ask a remote participant for its next turn.
///
/// Transport failures are errors. A response that is not valid JSON, or that
/// comes back with a non-success status, degrades to an empty utterance so
/// the conversation keeps moving.
#[instrument(skip(client, request))]
pub async fn get_utterance_response(
    client: &reqwest::Client,
    uri: &str,
    participant_id: &str,
    request: &UtteranceRequest,
    role: DialogueRole,
) -> Result<Utterance> {
    let response = client
        .post(format!("{}/receive_utterance", uri.trim_end_matches('/')))
        .json(request)
        .send()
        .await
        .map_err(|e| SimlabError::RemoteTurn {
            participant_id: participant_id.to_string(),
            reason: e.to_string(),
        })?;

    let status = response.status();
    if !status.is_success() {
        warn!(participant_id, %status, "Participant answered with an error status");
        return Ok(Utterance::new(role, ""));
    }

    match response.json::<Value>().await {
        Ok(body) => Ok(parse_api_response(&body, role)),
        Err(e) => {
            warn!(participant_id, "Malformed participant response: {}", e);
            Ok(Utterance::new(role, ""))
        }
    }
}

/// Poll the participant's root endpoint until it answers.
///
/// Any HTTP response counts as ready; only connection failures are retried.
#[instrument(skip(client))]
pub async fn wait_for_participant(
    client: &reqwest::Client,
    uri: &str,
    retries: u32,
    delay: Duration,
) -> Result<()> {
    for attempt in 1..=retries {
        match client.get(format!("{}/", uri.trim_end_matches('/'))).send().await {
            Ok(response) => {
                debug!(attempt, status = %response.status(), "Participant is reachable");
                return Ok(());
            }
            Err(e) => {
                debug!(attempt, "Participant not reachable yet: {}", e);
                if attempt < retries {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(SimlabError::ParticipantUnreachable {
        uri: uri.to_string(),
        attempts: retries,
    })
}

/// Push custom parameters to a participant.
#[instrument(skip(client, parameters))]
pub async fn configure_participant(
    client: &reqwest::Client,
    uri: &str,
    participant_id: &str,
    parameters: &Map<String, Value>,
) -> Result<()> {
    let request = ConfigureRequest {
        id: participant_id.to_string(),
        parameters: parameters.clone(),
    };
    let response = client
        .post(format!("{}/configure", uri.trim_end_matches('/')))
        .json(&request)
        .send()
        .await?;

    let status = response.status();
    if status != CONFIGURE_SUCCESS_STATUS {
        let body = response.text().await.unwrap_or_default();
        return Err(SimlabError::configuration(format!(
            "Failed to configure participant '{participant_id}'. Status code: {status}. Response: {body}"
        )));
    }
    Ok(())
}

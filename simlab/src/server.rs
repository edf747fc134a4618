//! Reference participant served over the participant HTTP API.
//!
//! The echo agent repeats what it is told and answers "What is the {slot}?"
//! with an `INFORM` act. The scripted user simulator asks for every
//! requestable slot of its information need in turn and then says goodbye.
//! Both are meant for smoke runs and tests.

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
    routing::{get, post},
    Router,
};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::{
    cli::ServeRole,
    dialogue::{Annotation, DialogueAct},
    information_need::InformationNeed,
    participant::{
        api::{ConfigureRequest, InformationNeedRequest, UtteranceRequest},
        DEFAULT_STOP_INTENT,
    },
};

const REQUEST_PREFIX: &str = "What is the ";

#[derive(Default)]
struct Session {
    id: Option<String>,
    parameters: Map<String, Value>,
    information_need: Option<InformationNeed>,
    pending_slots: VecDeque<String>,
}

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct ParticipantState {
    role: ServeRole,
    session: Arc<Mutex<Session>>,
}

impl ParticipantState {
    pub fn new(role: ServeRole) -> Self {
        Self {
            role,
            session: Arc::new(Mutex::new(Session::default())),
        }
    }
}

#[derive(Debug, Serialize)]
struct UtteranceResponse {
    message: String,
    dialogue_acts: Vec<DialogueAct>,
    annotations: Vec<Annotation>,
    metadata: Map<String, Value>,
}

impl UtteranceResponse {
    fn text(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            dialogue_acts: Vec::new(),
            annotations: Vec::new(),
            metadata: Map::new(),
        }
    }

    fn with_act(mut self, act: DialogueAct) -> Self {
        self.dialogue_acts.push(act);
        self
    }
}

pub fn create_router(role: ServeRole) -> Router {
    let router = Router::new()
        .route("/", get(liveness))
        .route("/configure", post(configure))
        .route("/receive_utterance", post(receive_utterance));

    let router = match role {
        ServeRole::UserSimulator => router.route("/set_information_need", post(set_information_need)),
        ServeRole::Agent => router,
    };

    router.with_state(ParticipantState::new(role))
}

async fn liveness(State(state): State<ParticipantState>) -> Json<Value> {
    let role = match state.role {
        ServeRole::Agent => "agent",
        ServeRole::UserSimulator => "user_simulator",
    };
    Json(json!({ "status": "ok", "role": role }))
}

#[instrument(skip_all, fields(id = %request.id))]
async fn configure(
    State(state): State<ParticipantState>,
    Json(request): Json<ConfigureRequest>,
) -> impl IntoResponse {
    let mut session = state.session.lock();
    session.id = Some(request.id.clone());
    session.parameters = request.parameters;
    info!("Participant configured");
    (StatusCode::CREATED, Json(json!({ "id": request.id })))
}

async fn set_information_need(
    State(state): State<ParticipantState>,
    Json(request): Json<InformationNeedRequest>,
) -> Result<Json<Value>, (StatusCode, String)> {
    let need = InformationNeed::from_dict(&request.information_need).map_err(|e| {
        warn!("Rejected information need: {}", e);
        (StatusCode::BAD_REQUEST, e.to_string())
    })?;

    let mut session = state.session.lock();
    session.pending_slots = need
        .get_requestable_slots()
        .into_iter()
        .map(str::to_string)
        .collect();
    session.information_need = Some(need);
    debug!(user_id = %request.user_id, slots = session.pending_slots.len(), "Information need set");
    Ok(Json(json!({ "user_id": request.user_id })))
}

async fn receive_utterance(
    State(state): State<ParticipantState>,
    Json(request): Json<UtteranceRequest>,
) -> Json<UtteranceResponse> {
    let response = match state.role {
        ServeRole::Agent => agent_turn(&state.session.lock(), &request.message),
        ServeRole::UserSimulator => user_turn(&mut state.session.lock()),
    };
    Json(response)
}

/// Requested slots are answered from the `knowledge` parameter when
/// configured, with a placeholder value otherwise.
fn agent_turn(session: &Session, message: &str) -> UtteranceResponse {
    let requested = message
        .trim()
        .strip_prefix(REQUEST_PREFIX)
        .and_then(|rest| rest.strip_suffix('?'));

    match requested {
        Some(slot) => {
            let value = session
                .parameters
                .get("knowledge")
                .and_then(|knowledge| knowledge.get(slot))
                .cloned()
                .unwrap_or_else(|| Value::from(format!("some {slot}")));
            let shown = value.as_str().map(str::to_string).unwrap_or_else(|| value.to_string());
            UtteranceResponse::text(format!("The {slot} is {shown}."))
                .with_act(DialogueAct::new("INFORM").with_annotation(slot, value))
        }
        None => UtteranceResponse::text(format!("You said: {message}")),
    }
}

fn user_turn(session: &mut Session) -> UtteranceResponse {
    match session.pending_slots.pop_front() {
        Some(slot) => UtteranceResponse::text(format!("{REQUEST_PREFIX}{slot}?"))
            .with_act(DialogueAct::new("REQUEST").with_annotation(slot, Value::Null)),
        None => {
            UtteranceResponse::text("Thank you, bye!").with_act(DialogueAct::new(DEFAULT_STOP_INTENT))
        }
    }
}

/// Serves the participant until Ctrl+C.
pub async fn serve(addr: SocketAddr, role: ServeRole) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("{:?} participant listening on {}", role, listener.local_addr()?);

    axum::serve(listener, create_router(role))
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;

    info!("Participant server shutdown complete");
    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received Ctrl+C, shutting down gracefully");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_agent_informs_requested_slot() {
        let mut session = Session::default();
        session
            .parameters
            .insert("knowledge".to_string(), json!({"year": 1995}));

        let response = agent_turn(&session, "What is the year?");
        assert_eq!(response.message, "The year is 1995.");
        assert_eq!(response.dialogue_acts[0].intent, "INFORM");
        assert_eq!(response.dialogue_acts[0].annotations[0].value, json!(1995));

        let response = agent_turn(&session, "hi");
        assert_eq!(response.message, "You said: hi");
        assert!(response.dialogue_acts.is_empty());
    }

    #[test]
    fn test_user_requests_each_slot_then_leaves() {
        let mut session = Session::default();
        session.pending_slots = ["title", "year"].into_iter().map(String::from).collect();

        assert_eq!(user_turn(&mut session).message, "What is the title?");
        assert_eq!(user_turn(&mut session).message, "What is the year?");
        let last = user_turn(&mut session);
        assert_eq!(last.dialogue_acts[0].intent, DEFAULT_STOP_INTENT);
    }
}

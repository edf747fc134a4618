//! Dialogue participants.
//!
//! The connector owns the transcript. Participants only ever see a read-only
//! snapshot of it and hand back the turn they contribute.

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{
    dialogue::{DialogueRole, Utterance},
    error::Result,
    information_need::InformationNeed,
};

pub mod api;
pub mod wrapper_agent;
pub mod wrapper_user_simulator;

pub use wrapper_agent::WrapperAgent;
pub use wrapper_user_simulator::WrapperUserSimulator;

pub const DEFAULT_STOP_INTENT: &str = "EXIT";

#[async_trait]
pub trait Participant: Send + Sync {
    fn id(&self) -> &str;

    fn role(&self) -> DialogueRole;

    /// Snapshot stored next to every dialogue in the transcript file.
    fn to_metadata(&self) -> Value {
        json!({ "id": self.id(), "type": self.role() })
    }

    /// Base URI of the remote service backing this participant, if any.
    fn endpoint(&self) -> Option<String> {
        None
    }

    /// Points the participant at a new base URI, e.g. once its container is
    /// up on a freshly bound port.
    fn rebind(&self, _base_uri: &str) {}

    /// Produces this participant's answer to `utterance`. `context` holds the
    /// transcript so far, `utterance` included.
    async fn receive_utterance(
        &self,
        context: &[Utterance],
        utterance: &Utterance,
        counterpart_id: &str,
    ) -> Result<Utterance>;
}

#[async_trait]
pub trait Agent: Participant {
    /// Intent that ends the conversation when carried by either side.
    fn stop_intent(&self) -> &str;

    async fn welcome(&self) -> Result<Utterance>;

    async fn goodbye(&self) -> Result<Utterance>;
}

#[async_trait]
pub trait UserSimulator: Participant {
    async fn set_information_need(&self, need: &InformationNeed) -> Result<()>;

    /// Need recorded by the last successful `set_information_need`.
    fn information_need(&self) -> Option<InformationNeed>;
}

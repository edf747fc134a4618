//! Error taxonomy for the simulation core.

use thiserror::Error;

pub type Result<T, E = SimlabError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SimlabError {
    /// Malformed run configuration, invalid settings, rejected participant
    /// configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Missing required key '{0}'")]
    MissingKey(String),

    #[error("Information need batch '{0}' not found")]
    BatchNotFound(String),

    #[error("Unknown {category} component '{class_name}'")]
    UnknownComponent {
        category: &'static str,
        class_name: String,
    },

    #[error("Failed to start participant '{participant_id}': {reason}")]
    ParticipantStartup {
        participant_id: String,
        reason: String,
    },

    #[error("Participant at {uri} did not become reachable after {attempts} attempts")]
    ParticipantUnreachable { uri: String, attempts: u32 },

    #[error("Participant '{participant_id}' failed to produce a turn: {reason}")]
    RemoteTurn {
        participant_id: String,
        reason: String,
    },

    #[error("Agent {agent_id} is already connected to user {user_id}")]
    DuplicateConnection { agent_id: String, user_id: String },

    #[error("Agent {agent_id} is not connected to user {user_id}")]
    NotConnected { agent_id: String, user_id: String },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Metric '{metric}' failed: {reason}")]
    Metric { metric: String, reason: String },

    #[error("Container error: {0}")]
    Container(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Storage(#[from] sled::Error),
}

impl SimlabError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn startup(participant_id: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::ParticipantStartup {
            participant_id: participant_id.into(),
            reason: reason.to_string(),
        }
    }
}

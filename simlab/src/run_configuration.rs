//! Run configuration files.
//!
//! A run names a task, the agents and user simulators to pair, and optional
//! free-form `kwargs`. Files are JSON (`.json`) or TOML (`.toml`):
//!
//! ```json
//! {
//!   "name": "movies-baseline",
//!   "public": false,
//!   "task": {
//!     "class_name": "Task",
//!     "arguments": {
//!       "name": "movies",
//!       "batch_id": "…",
//!       "metrics": [{"class_name": "SuccessRate"}]
//!     }
//!   },
//!   "agents": [{"id": "bot", "image": "registry/bot:latest", "parameters": {}}],
//!   "user_simulators": [{"id": "sim", "uri": "http://localhost:7001"}],
//!   "kwargs": {"repetitions": 3, "resume": true}
//! }
//! ```

use std::path::Path;
use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::info;

use crate::{
    error::{Result, SimlabError},
    participant::{Agent, UserSimulator},
    registry::ComponentRegistry,
    storage::Storage,
    task::Task,
};

/// A participant plus how to host it.
pub struct ParticipantConfiguration<P: ?Sized> {
    /// Container image; `None` when the participant is already reachable at
    /// its configured URI.
    pub image: Option<String>,
    pub participant: Arc<P>,
    /// Pushed to the participant's `/configure` endpoint once it is up.
    pub parameters: Map<String, Value>,
}

pub type AgentConfiguration = ParticipantConfiguration<dyn Agent>;
pub type UserSimulatorConfiguration = ParticipantConfiguration<dyn UserSimulator>;

pub struct RunConfiguration {
    pub name: String,
    pub public: bool,
    pub task: Task,
    pub agents: Vec<AgentConfiguration>,
    pub user_simulators: Vec<UserSimulatorConfiguration>,
    pub kwargs: Map<String, Value>,
}

impl RunConfiguration {
    pub fn load(path: impl AsRef<Path>, registry: &ComponentRegistry, storage: &Storage) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SimlabError::configuration(format!(
                "Configuration file {} does not exist",
                path.display()
            )));
        }

        let contents = std::fs::read_to_string(path)?;
        let value: Value = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&contents)?,
            Some("toml") => toml::from_str(&contents)
                .map_err(|e| SimlabError::configuration(format!("Invalid TOML in {}: {}", path.display(), e)))?,
            _ => {
                return Err(SimlabError::configuration(
                    "Configuration file must be a JSON or TOML file",
                ))
            }
        };

        let configuration = Self::from_value(&value, registry, storage)?;
        info!(
            run = %configuration.name,
            agents = configuration.agents.len(),
            user_simulators = configuration.user_simulators.len(),
            "Run configuration loaded from {}",
            path.display()
        );
        Ok(configuration)
    }

    pub fn from_value(value: &Value, registry: &ComponentRegistry, storage: &Storage) -> Result<Self> {
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| SimlabError::configuration("Configuration must have a name"))?
            .to_string();
        let public = value.get("public").and_then(Value::as_bool).unwrap_or(false);

        let task_config = value
            .get("task")
            .ok_or_else(|| SimlabError::MissingKey("task".to_string()))?;
        let task_class = class_name(task_config, "Task");
        let task_arguments = task_config.get("arguments").unwrap_or(task_config);
        let task = registry.create_task(task_class, task_arguments, storage)?;

        let agents = entries(value, "agents")
            .iter()
            .map(|entry| {
                let arguments = entry.get("arguments").unwrap_or(entry);
                Ok(ParticipantConfiguration {
                    image: string(entry, "image"),
                    participant: registry.create_agent(class_name(entry, "WrapperAgent"), arguments)?,
                    parameters: parameters(entry),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let user_simulators = entries(value, "user_simulators")
            .iter()
            .map(|entry| {
                let arguments = entry.get("arguments").unwrap_or(entry);
                Ok(ParticipantConfiguration {
                    image: string(entry, "image"),
                    participant: registry
                        .create_user_simulator(class_name(entry, "WrapperUserSimulator"), arguments)?,
                    parameters: parameters(entry),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let kwargs = value
            .get("kwargs")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        Ok(Self {
            name,
            public,
            task,
            agents,
            user_simulators,
            kwargs,
        })
    }

    /// `kwargs.repetitions`, falling back to `default`. Zero or a value that
    /// is not a positive integer is rejected.
    pub fn repetitions(&self, default: u32) -> Result<u32> {
        let repetitions = match self.kwargs.get("repetitions") {
            None | Some(Value::Null) => default,
            Some(value) => value
                .as_u64()
                .and_then(|n| u32::try_from(n).ok())
                .ok_or_else(|| {
                    SimlabError::configuration(format!(
                        "kwargs.repetitions must be a positive integer, got {value}"
                    ))
                })?,
        };
        if repetitions == 0 {
            return Err(SimlabError::configuration("Repetitions must be at least 1"));
        }
        Ok(repetitions)
    }

    pub fn resume(&self, default: bool) -> bool {
        self.flag("resume", default)
    }

    pub fn fail_fast(&self, default: bool) -> bool {
        self.flag("fail_fast", default)
    }

    fn flag(&self, key: &str, default: bool) -> bool {
        self.kwargs.get(key).and_then(Value::as_bool).unwrap_or(default)
    }
}

fn class_name<'a>(entry: &'a Value, default: &'a str) -> &'a str {
    entry.get("class_name").and_then(Value::as_str).unwrap_or(default)
}

fn entries<'a>(value: &'a Value, key: &str) -> &'a [Value] {
    value
        .get(key)
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn string(entry: &Value, key: &str) -> Option<String> {
    entry.get(key).and_then(Value::as_str).map(str::to_string)
}

fn parameters(entry: &Value) -> Map<String, Value> {
    entry
        .get("parameters")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

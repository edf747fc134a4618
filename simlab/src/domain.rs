//! Simulation domain knowledge.
//!
//! A domain names its slots and, optionally, which of them a user may request
//! or inform about. When either list is omitted every slot qualifies.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{Result, SimlabError};

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum SlotNames {
    List(Vec<String>),
    Described(serde_yaml::Mapping),
}

impl Default for SlotNames {
    fn default() -> Self {
        SlotNames::List(Vec::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct DomainConfig {
    name: String,
    #[serde(default)]
    slot_names: SlotNames,
    requestable_slots: Option<Vec<String>>,
    informable_slots: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct SimulationDomain {
    config_file: Option<PathBuf>,
    config: DomainConfig,
}

impl SimulationDomain {
    pub fn load(config_file: impl AsRef<Path>) -> Result<Self> {
        let path = config_file.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            SimlabError::configuration(format!(
                "Failed to read domain file {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut domain = Self::from_yaml(&contents)?;
        domain.config_file = Some(path.to_path_buf());
        Ok(domain)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let config: DomainConfig = serde_yaml::from_str(contents)
            .map_err(|e| SimlabError::configuration(format!("Invalid domain definition: {e}")))?;
        Ok(Self {
            config_file: None,
            config,
        })
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config_file(&self) -> Option<&Path> {
        self.config_file.as_deref()
    }

    pub fn get_slot_names(&self) -> Vec<String> {
        match &self.config.slot_names {
            SlotNames::List(names) => names.clone(),
            SlotNames::Described(mapping) => mapping
                .keys()
                .filter_map(|key| key.as_str().map(str::to_string))
                .collect(),
        }
    }

    pub fn get_requestable_slots(&self) -> Vec<String> {
        self.config
            .requestable_slots
            .clone()
            .unwrap_or_else(|| self.get_slot_names())
    }

    pub fn get_informable_slots(&self) -> Vec<String> {
        self.config
            .informable_slots
            .clone()
            .unwrap_or_else(|| self.get_slot_names())
    }
}

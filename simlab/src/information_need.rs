//! Information needs: the goal a simulated user pursues during a dialogue.
//!
//! An information need has two parts. Constraints are slot-value pairs the
//! item of interest must satisfy. Requested slots are the attributes the user
//! wants disclosed; each starts unset and is filled in as the conversation
//! progresses.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SimlabError};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct InformationNeed {
    constraints: Map<String, Value>,
    /// Slot to fulfilled value; `Value::Null` while the slot is unset.
    requested_slots: Map<String, Value>,
}

impl InformationNeed {
    pub fn new<I, S>(constraints: Map<String, Value>, requests: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let requested_slots = requests
            .into_iter()
            .map(|slot| (slot.into(), Value::Null))
            .collect();

        Self {
            constraints,
            requested_slots,
        }
    }

    pub fn constraints(&self) -> &Map<String, Value> {
        &self.constraints
    }

    pub fn get_constraint_value(&self, slot: &str) -> Option<&Value> {
        self.constraints.get(slot)
    }

    /// Requested slots whose value is still unset, in insertion order.
    pub fn get_requestable_slots(&self) -> Vec<&str> {
        self.requested_slots
            .iter()
            .filter(|(_, value)| value.is_null())
            .map(|(slot, _)| slot.as_str())
            .collect()
    }

    /// All requested slots, fulfilled or not, in insertion order.
    pub fn requested_slots(&self) -> impl Iterator<Item = &str> {
        self.requested_slots.keys().map(String::as_str)
    }

    pub fn fulfilled_value(&self, slot: &str) -> Option<&Value> {
        self.requested_slots.get(slot).filter(|v| !v.is_null())
    }

    /// Records the value disclosed for a requested slot. Returns `false` when
    /// the slot was never requested.
    pub fn fulfill_slot(&mut self, slot: &str, value: Value) -> bool {
        match self.requested_slots.get_mut(slot) {
            Some(current) => {
                *current = value;
                true
            }
            None => false,
        }
    }

    pub fn to_dict(&self) -> Value {
        let fulfilled: Map<String, Value> = self
            .requested_slots
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(slot, value)| (slot.clone(), value.clone()))
            .collect();

        serde_json::json!({
            "constraints": self.constraints,
            "requested_slots": self.get_requestable_slots(),
            "fulfilled_slots": fulfilled,
        })
    }

    pub fn from_dict(data: &Value) -> Result<Self> {
        let object = data
            .as_object()
            .ok_or_else(|| SimlabError::configuration("Information need must be a JSON object"))?;

        let constraints = object
            .get("constraints")
            .ok_or_else(|| SimlabError::MissingKey("constraints".to_string()))?;
        let requested = object
            .get("requested_slots")
            .ok_or_else(|| SimlabError::MissingKey("requested_slots".to_string()))?;

        let constraints = constraints
            .as_object()
            .cloned()
            .ok_or_else(|| SimlabError::configuration("'constraints' must be an object"))?;
        let requests: Vec<String> = serde_json::from_value(requested.clone())?;

        let mut need = Self::new(constraints, requests);

        if let Some(Value::Object(fulfilled)) = object.get("fulfilled_slots") {
            for (slot, value) in fulfilled {
                need.requested_slots.insert(slot.clone(), value.clone());
            }
        }

        Ok(need)
    }
}

impl Serialize for InformationNeed {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_dict().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for InformationNeed {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_dict(&value).map_err(serde::de::Error::custom)
    }
}

/// A persisted, immutable set of information needs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InformationNeedBatch {
    pub id: String,
    pub information_needs: Vec<InformationNeed>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl InformationNeedBatch {
    pub fn new(information_needs: Vec<InformationNeed>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            information_needs,
            created_at: chrono::Utc::now(),
        }
    }
}

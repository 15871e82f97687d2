//! Versioned interchange envelope for externally persisted sessions.
//!
//! The core mandates no storage; callers that want persistence serialize
//! this envelope and seed a new session from it later.

use crate::Message;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SavedSession {
    pub version: u32,
    #[serde(default)]
    pub always_included: Vec<Message>,
    #[serde(default)]
    pub history: Vec<Message>,
}

impl SavedSession {
    pub const CURRENT_VERSION: u32 = 1;

    pub fn new(always_included: Vec<Message>, history: Vec<Message>) -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            always_included,
            history,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}

// src/service/command.rs

use serde::{Deserialize, Serialize};

use crate::errors::Result;

/// Control command sent from a client to the host.
///
/// Wire form (JSON):
/// `{"action":"start","arguments":"-server example.com:19132"}` or
/// `{"action":"stop"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "lowercase")]
pub enum ServiceCommand {
    Start {
        /// Whitespace-delimited worker arguments. A start without them is
        /// rejected by the host.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
    },
    Stop,
}

impl ServiceCommand {
    pub fn start(arguments: impl Into<String>) -> Self {
        ServiceCommand::Start {
            arguments: Some(arguments.into()),
        }
    }

    pub fn from_json(line: &str) -> Result<Self> {
        Ok(serde_json::from_str(line.trim())?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

//! Messages exchanged between the block editor and its host, as JSON objects
//! discriminated by `cmd`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
    #[error("workspace blocks must be a JSON object or null, got {0}")]
    InvalidWorkspace(&'static str),
    #[error("variable mapping has an empty key")]
    EmptyMappingKey,
}

/// Editor → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum EditorMessage {
    Ready,
    /// The workspace changed and was regenerated.
    Code {
        code: String,
        blocks: serde_json::Value,
        /// Generated identifier → display name.
        variable_mappings: BTreeMap<String, String>,
    },
    Error { message: String },
}

impl EditorMessage {
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let message: EditorMessage = serde_json::from_str(text)?;
        message.validate()?;
        Ok(message)
    }

    fn validate(&self) -> Result<(), ProtocolError> {
        if let EditorMessage::Code { blocks, variable_mappings, .. } = self {
            match blocks {
                serde_json::Value::Object(_) | serde_json::Value::Null => {}
                serde_json::Value::Array(_) => return Err(ProtocolError::InvalidWorkspace("an array")),
                serde_json::Value::String(_) => return Err(ProtocolError::InvalidWorkspace("a string")),
                serde_json::Value::Number(_) => return Err(ProtocolError::InvalidWorkspace("a number")),
                serde_json::Value::Bool(_) => return Err(ProtocolError::InvalidWorkspace("a boolean")),
            }
            if variable_mappings.keys().any(String::is_empty) {
                return Err(ProtocolError::EmptyMappingKey);
            }
        }
        Ok(())
    }
}

/// Host → editor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostMessage {
    Init {
        toolbox: serde_json::Value,
        initial_blocks: serde_json::Value,
        custom_blocks: Vec<serde_json::Value>,
        readonly: bool,
    },
    Highlight { highlighted_block: Option<String> },
}

impl HostMessage {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

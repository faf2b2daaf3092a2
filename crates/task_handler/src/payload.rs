use getset::Getters;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::handler::JobHandler;

/// The tagged envelope stored in the `handler` column.
#[derive(Getters, Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[getset(get = "pub")]
pub struct HandlerPayload {
    kind: String,
    data: Value,
}

/// Reasons a stored handler cannot be turned back into something runnable.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("Handler column is not a valid handler envelope: {0}")]
    InvalidEnvelope(#[source] serde_json::Error),
    #[error("No handler registered for kind '{0}'")]
    UnknownKind(String),
    #[error("Payload cannot be deserialized into handler '{kind}': {source}")]
    InvalidPayload {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
}

impl HandlerPayload {
    pub fn new(kind: impl Into<String>, data: Value) -> Self {
        HandlerPayload {
            kind: kind.into(),
            data,
        }
    }

    /// Serializes `handler` under its `KIND` tag.
    pub fn encode<H: JobHandler>(handler: &H) -> Result<Self, serde_json::Error> {
        Ok(HandlerPayload {
            kind: H::KIND.to_string(),
            data: serde_json::to_value(handler)?,
        })
    }

    /// Reads an envelope back from the value stored in the `handler` column.
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        HandlerPayload::deserialize(value).map_err(DecodeError::InvalidEnvelope)
    }

    pub fn to_value(&self) -> Value {
        serde_json::json!({ "kind": self.kind, "data": self.data })
    }

    pub fn into_data(self) -> Value {
        self.data
    }
}

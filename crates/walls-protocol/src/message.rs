//! Request and response messages for the command protocol
//!
//! # Message Flow
//!
//! 1. Client connects to the application's port on 127.0.0.1
//! 2. Client writes one `CommandRequest` as a JSON line
//! 3. Server writes one `CommandResponse` as a JSON line
//! 4. Server closes the connection
//!
//! Older clients send `cmd` instead of `command` and `data` instead of
//! `args`; both spellings are accepted on input.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Arguments carried by a command request
pub type CommandArgs = Map<String, Value>;

/// Message returned for any request that cannot be parsed
pub const MALFORMED_REQUEST: &str = "malformed request";

/// A single command addressed to a registered application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRequest {
    /// Command name, looked up in the application's handler table
    #[serde(alias = "cmd")]
    pub command: String,

    /// Command arguments (an empty object when omitted)
    #[serde(default, alias = "data", deserialize_with = "null_as_empty")]
    pub args: CommandArgs,
}

impl CommandRequest {
    /// Create a request with no arguments
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: CommandArgs::new(),
        }
    }

    /// Create a request with arguments
    pub fn with_args(command: impl Into<String>, args: CommandArgs) -> Self {
        Self {
            command: command.into(),
            args,
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<CommandArgs, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<CommandArgs>::deserialize(deserializer)?.unwrap_or_default())
}

/// Outcome of a command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    /// Command was handled
    Success,
    /// Command failed or could not be dispatched
    Error,
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseStatus::Success => write!(f, "success"),
            ResponseStatus::Error => write!(f, "error"),
        }
    }
}

/// The single response written back on a command connection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResponse {
    /// Success or error
    pub status: ResponseStatus,

    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Structured payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl CommandResponse {
    /// Bare success with neither message nor data
    pub fn success() -> Self {
        Self {
            status: ResponseStatus::Success,
            message: None,
            data: None,
        }
    }

    /// Success carrying a message
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Success carrying structured data
    pub fn with_data(data: Value) -> Self {
        Self {
            status: ResponseStatus::Success,
            message: None,
            data: Some(data),
        }
    }

    /// Error response
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ResponseStatus::Error,
            message: Some(message.into()),
            data: None,
        }
    }

    /// Error response for a request that could not be parsed
    pub fn malformed() -> Self {
        Self::error(MALFORMED_REQUEST)
    }

    /// Attach a message to this response
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether the command succeeded
    pub fn is_success(&self) -> bool {
        self.status == ResponseStatus::Success
    }
}

/// Entry of the command list returned by the built-in `help` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandInfo {
    /// Command name
    pub name: String,

    /// One-line description
    #[serde(default)]
    pub description: String,
}

impl CommandInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

//! Inbound actions
//!
//! Clients send one JSON object per channel message:
//! `{"type": "vote"|"new_option"|"new_subject", "subject", "option"?, "username"?}`.
//! Decoding turns that into a typed [`Action`]; unrecognised types decode to
//! `None` and are ignored by callers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A client action, one variant per supported message type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Vote {
        subject: String,
        option: String,
        username: String,
    },
    NewOption {
        subject: String,
        option: String,
    },
    NewSubject {
        subject: String,
    },
}

/// Why an inbound message could not be turned into an action.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("invalid message: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("message must be a JSON object")]
    NotAnObject,

    #[error("message has no 'type' field")]
    MissingType,

    #[error("'{kind}' message is missing required field '{field}'")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
}

impl DecodeError {
    /// Stable code used in error frames.
    pub fn code(&self) -> &'static str {
        match self {
            DecodeError::InvalidJson(_) | DecodeError::NotAnObject => "invalid_json",
            DecodeError::MissingType | DecodeError::MissingField { .. } => "missing_field",
        }
    }
}

/// Raw wire shape before per-type field checks.
#[derive(Debug, Deserialize)]
struct InboundMessage {
    #[serde(rename = "type")]
    kind: Option<String>,
    subject: Option<String>,
    option: Option<String>,
    username: Option<String>,
}

fn required(
    value: Option<String>,
    kind: &'static str,
    field: &'static str,
) -> Result<String, DecodeError> {
    value.ok_or(DecodeError::MissingField { kind, field })
}

impl Action {
    /// Decode one inbound channel message.
    ///
    /// Returns `Ok(None)` for a well-formed message whose `type` is not
    /// recognised.
    pub fn decode(text: &str) -> Result<Option<Action>, DecodeError> {
        // Derived struct deserialization also accepts a positional array.
        let value: Value = serde_json::from_str(text)?;
        if !value.is_object() {
            return Err(DecodeError::NotAnObject);
        }
        let message: InboundMessage = serde_json::from_value(value)?;
        let kind = message.kind.ok_or(DecodeError::MissingType)?;

        let action = match kind.as_str() {
            "vote" => Action::Vote {
                subject: required(message.subject, "vote", "subject")?,
                option: required(message.option, "vote", "option")?,
                username: required(message.username, "vote", "username")?,
            },
            "new_option" => Action::NewOption {
                subject: required(message.subject, "new_option", "subject")?,
                option: required(message.option, "new_option", "option")?,
            },
            "new_subject" => Action::NewSubject {
                subject: required(message.subject, "new_subject", "subject")?,
            },
            other => {
                tracing::debug!(kind = %other, "ignoring message with unrecognised type");
                return Ok(None);
            }
        };
        Ok(Some(action))
    }

    /// The wire `type` of this action.
    pub fn kind(&self) -> &'static str {
        match self {
            Action::Vote { .. } => "vote",
            Action::NewOption { .. } => "new_option",
            Action::NewSubject { .. } => "new_subject",
        }
    }

    pub fn subject(&self) -> &str {
        match self {
            Action::Vote { subject, .. }
            | Action::NewOption { subject, .. }
            | Action::NewSubject { subject } => subject,
        }
    }

    /// Build a vote action.
    pub fn vote(
        subject: impl Into<String>,
        option: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Action::Vote {
            subject: subject.into(),
            option: option.into(),
            username: username.into(),
        }
    }

    /// Build an option-creation action.
    pub fn new_option(subject: impl Into<String>, option: impl Into<String>) -> Self {
        Action::NewOption {
            subject: subject.into(),
            option: option.into(),
        }
    }

    /// Build a subject-creation action.
    pub fn new_subject(subject: impl Into<String>) -> Self {
        Action::NewSubject {
            subject: subject.into(),
        }
    }
}

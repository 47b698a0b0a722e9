//! Per-record failures. None of these stop the stream; each is logged and
//! counted by the stage that hit it.

use thiserror::Error;

/// The payload could not be read as the expected record shape. The record
/// degrades to absent fields instead of failing.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    #[error("payload is not valid JSON: {0}")]
    Malformed(String),

    #[error("payload is not a JSON object")]
    NotAnObject,

    #[error("field `{field}` is not a valid {expected}")]
    TypeMismatch {
        field: &'static str,
        expected: &'static str,
    },
}

/// The customer profile could not be recovered from a profile-change
/// envelope; the record is dropped.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("ordered set has no entries")]
    EmptyOrderedSet,

    #[error("first ordered set entry has no element")]
    MissingElement,

    #[error("element is not valid base64: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("element does not decode to UTF-8 text: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("element is not a customer JSON object: {0}")]
    InvalidProfileJson(DecodeError),
}

/// An output record could not be encoded; the record is dropped.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("field `{0}` is not a finite number")]
    NonFinite(&'static str),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

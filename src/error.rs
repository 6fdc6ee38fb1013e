//! Error taxonomy for a voice call.
//!
//! None of these are process-fatal. The controller turns each one into a
//! status string for the UI and decides whether the call survives it.

use thiserror::Error;

/// Failures while converting between samples and transport bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("PCM16 payload has odd length {0}")]
    OddLength(usize),

    #[error("invalid base64 audio: {0}")]
    Base64(String),

    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),
}

impl From<base64::DecodeError> for CodecError {
    fn from(err: base64::DecodeError) -> Self {
        CodecError::Base64(err.to_string())
    }
}

/// Call-level errors surfaced to the UI.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// Microphone could not be opened. Fatal to the call, never retried.
    #[error("microphone unavailable: {0}")]
    Permission(String),

    /// The remote session reported an error. The call stays up until the
    /// remote side closes it.
    #[error("session error: {0}")]
    Session(String),

    /// An inbound packet could not be decoded and was dropped. Logged only;
    /// the status line does not change.
    #[error("transport error: {0}")]
    Transport(#[from] CodecError),

    /// The playback device could not be opened.
    #[error("audio device error: {0}")]
    Device(String),
}

impl CallError {
    /// Text shown in place of the regular call status, if any.
    pub fn status_text(&self) -> Option<&'static str> {
        match self {
            CallError::Permission(_) => Some("Microphone access needed"),
            CallError::Session(_) => Some("Network error occurred"),
            CallError::Transport(_) => None,
            CallError::Device(_) => Some("Speaker unavailable"),
        }
    }
}

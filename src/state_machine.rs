use std::fmt;

use crate::persona::Persona;

/// Lifecycle of one voice call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Connecting,
    Listening,
    Speaking,
    Interrupted,
    Ended,
}

impl CallState {
    /// Status line shown to the user. `name` is the assistant's display name;
    /// the persona picks the verb form.
    pub fn status_text(&self, name: &str, persona: Persona) -> String {
        let verb = persona.progressive();
        match self {
            CallState::Idle => "Ready to call".to_string(),
            CallState::Connecting => format!("Connecting {}...", name),
            CallState::Listening | CallState::Interrupted => format!("Main sun {} hoon...", verb),
            CallState::Speaking => format!("{} bol {} hai...", name, verb),
            CallState::Ended => "Call ended".to_string(),
        }
    }

    pub fn is_speaking(&self) -> bool {
        matches!(self, CallState::Speaking)
    }

    /// States in which microphone frames are forwarded to the session.
    pub fn is_streaming(&self) -> bool {
        matches!(
            self,
            CallState::Listening | CallState::Speaking | CallState::Interrupted
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Connecting => "connecting",
            CallState::Listening => "listening",
            CallState::Speaking => "speaking",
            CallState::Interrupted => "interrupted",
            CallState::Ended => "ended",
        }
    }
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

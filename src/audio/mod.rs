//! audio - ALSA capture and playback for a call
//!
//! Capture yields fixed-size 16 kHz mono frames. Playback mixes scheduled
//! 24 kHz mono buffers against the device's own frame clock.

mod alsa_device;
mod capture_stream;
mod output;

pub use capture_stream::{CaptureStream, Microphone};
pub use output::{AlsaOutput, PlaybackOutput, SourceId};

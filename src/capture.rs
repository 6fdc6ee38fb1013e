//! Microphone side of the call: fixed-size frames in, outbound packets out.

use bytes::Bytes;

use crate::codec::{self, CAPTURE_MIME_TYPE};

/// One block of normalized mono samples at the capture rate.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioFrame {
    pub samples: Vec<f32>,
}

/// Encoded microphone audio ready for the remote session.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboundPacket {
    /// Raw PCM16 LE bytes; base64 framing happens at the wire layer.
    pub pcm: Bytes,
    pub mime_type: &'static str,
}

/// Cuts an arbitrary stream of device reads into fixed-size frames.
///
/// ALSA hands back whatever period it negotiated, so reads rarely line up
/// with the frame size the session expects.
pub struct FrameAccumulator {
    frame_size: usize,
    buf: Vec<f32>,
}

impl FrameAccumulator {
    pub fn new(frame_size: usize) -> Self {
        let frame_size = frame_size.max(1);
        Self {
            frame_size,
            buf: Vec::with_capacity(frame_size * 2),
        }
    }

    /// Append PCM16 samples and return every frame that is now complete.
    pub fn push_i16(&mut self, pcm: &[i16]) -> Vec<AudioFrame> {
        self.buf.extend(pcm.iter().map(|&s| codec::sample_from_i16(s)));

        let mut frames = Vec::new();
        while self.buf.len() >= self.frame_size {
            let samples: Vec<f32> = self.buf.drain(..self.frame_size).collect();
            frames.push(AudioFrame { samples });
        }
        frames
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

/// Encodes captured frames. Mute is passed in on every call rather than
/// stored here; the controller owns it.
#[derive(Debug, Default)]
pub struct CaptureEncoder {
    sent: u64,
    dropped: u64,
}

impl CaptureEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Encode one frame, or drop it when muted. Dropped frames are gone for
    /// good; nothing is buffered for later.
    pub fn on_frame(&mut self, frame: &AudioFrame, muted: bool) -> Option<OutboundPacket> {
        if muted {
            self.dropped += 1;
            return None;
        }
        self.sent += 1;
        Some(OutboundPacket {
            pcm: codec::encode(&frame.samples),
            mime_type: CAPTURE_MIME_TYPE,
        })
    }

    pub fn sent(&self) -> u64 {
        self.sent
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

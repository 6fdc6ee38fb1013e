//! Gapless playback scheduling for inbound audio.
//!
//! Every decoded buffer is appended at a single cursor on the output clock.
//! The cursor is pulled up to "now" before each append, so buffers that
//! arrive in a burst play back to back and a buffer that arrives after a
//! silence starts right away. Nothing overlaps and nothing drifts.

use std::collections::BTreeMap;

use crate::audio::{PlaybackOutput, SourceId};
use crate::codec::{self, PLAYBACK_SAMPLE_RATE};
use crate::error::CodecError;

/// Where and for how long a buffer was placed on the output clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    pub id: SourceId,
    pub start: f64,
    pub duration: f64,
}

impl ScheduledBuffer {
    #[cfg(test)]
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

pub struct PlaybackScheduler<O: PlaybackOutput> {
    output: O,
    next_start_time: f64,
    active: BTreeMap<SourceId, ScheduledBuffer>,
    next_id: SourceId,
}

impl<O: PlaybackOutput> PlaybackScheduler<O> {
    pub fn new(output: O) -> Self {
        Self {
            output,
            next_start_time: 0.0,
            active: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Decode one inbound PCM16 packet and queue it after everything already
    /// scheduled. Empty packets are ignored. A malformed packet leaves the
    /// cursor and the active set untouched.
    pub fn on_inbound_packet(&mut self, pcm: &[u8]) -> Result<Option<ScheduledBuffer>, CodecError> {
        let samples = codec::decode(pcm)?;
        if samples.is_empty() {
            return Ok(None);
        }

        let duration = codec::duration_secs(samples.len(), PLAYBACK_SAMPLE_RATE);
        self.next_start_time = self.next_start_time.max(self.output.current_time());

        let id = self.next_id;
        self.next_id += 1;
        let buffer = ScheduledBuffer {
            id,
            start: self.next_start_time,
            duration,
        };

        self.output.start_source(id, samples, buffer.start);
        self.next_start_time += duration;
        self.active.insert(id, buffer);

        log::debug!(
            "Scheduled source {} at {:.3}s for {:.3}s ({} active)",
            id,
            buffer.start,
            duration,
            self.active.len()
        );
        Ok(Some(buffer))
    }

    /// Record that a source finished playing. Returns true when this drained
    /// the active set. Ids that are no longer active (already stopped by an
    /// interruption) are ignored.
    pub fn on_source_ended(&mut self, id: SourceId) -> bool {
        self.active.remove(&id).is_some() && self.active.is_empty()
    }

    /// Barge-in: stop everything still scheduled and forget the cursor.
    /// The next packet is re-based on the output clock. Returns how many
    /// sources were stopped.
    pub fn interrupt(&mut self) -> usize {
        let stopped = self.active.len();
        for &id in self.active.keys() {
            self.output.stop_source(id);
        }
        self.active.clear();
        self.next_start_time = 0.0;
        stopped
    }

    /// Stop all playback and release the output device.
    pub fn close(&mut self) {
        self.interrupt();
        self.output.close();
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        !self.active.is_empty()
    }

    #[cfg(test)]
    pub fn active_len(&self) -> usize {
        self.active.len()
    }

    #[cfg(test)]
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    #[cfg(test)]
    pub fn output(&self) -> &O {
        &self.output
    }
}

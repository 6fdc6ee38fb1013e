//! Playback output with its own clock.
//!
//! The output clock is the first frame the device thread has not rendered
//! yet, expressed in seconds. It starts at zero when the device opens and
//! only moves forward, independent of wall-clock time. Anything scheduled at
//! or after the clock is heard in full.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::alsa_device;
use crate::codec::{self, PLAYBACK_SAMPLE_RATE};

/// Identifies one scheduled buffer on an output.
pub type SourceId = u64;

/// An output device that plays buffers at absolute times on its own clock.
///
/// Implementations report finished sources out of band (the ALSA output
/// sends ids on a channel). A stopped source is never reported.
pub trait PlaybackOutput {
    /// Current output clock in seconds.
    fn current_time(&self) -> f64;

    /// Play `samples` (mono, 24 kHz) starting at output time `at`.
    fn start_source(&mut self, id: SourceId, samples: Vec<f32>, at: f64);

    /// Silence a source immediately.
    fn stop_source(&mut self, id: SourceId);

    /// Release the device. Further calls are no-ops.
    fn close(&mut self);
}

#[derive(Debug)]
struct ScheduledSource {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl ScheduledSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sources waiting for or in playback, mixed one period at a time.
#[derive(Debug, Default)]
pub struct Timeline {
    sources: Vec<ScheduledSource>,
}

impl Timeline {
    pub fn schedule(&mut self, id: SourceId, start_frame: u64, samples: Vec<f32>) {
        self.sources.push(ScheduledSource {
            id,
            start_frame,
            samples,
        });
    }

    pub fn remove(&mut self, id: SourceId) -> bool {
        let before = self.sources.len();
        self.sources.retain(|s| s.id != id);
        self.sources.len() != before
    }

    pub fn clear(&mut self) {
        self.sources.clear();
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.sources.len()
    }

    /// Mix every source overlapping `[position, position + out.len())` into
    /// `out` and return the ids that finished within this period.
    ///
    /// Sources stay where they were scheduled. If a source's start has
    /// already passed, its past samples are skipped, so the buffers queued
    /// behind it keep their spacing.
    pub fn render(&mut self, position: u64, out: &mut [f32]) -> Vec<SourceId> {
        let period_end = position + out.len() as u64;

        for source in &self.sources {
            let from = source.start_frame.max(position);
            let to = source.end_frame().min(period_end);
            for frame in from..to {
                let out_idx = (frame - position) as usize;
                let src_idx = (frame - source.start_frame) as usize;
                out[out_idx] += source.samples[src_idx];
            }
        }

        let mut finished = Vec::new();
        self.sources.retain(|s| {
            if s.end_frame() <= period_end {
                finished.push(s.id);
                false
            } else {
                true
            }
        });
        finished
    }
}

/// ALSA playback device driven by a render thread.
pub struct AlsaOutput {
    position: Arc<AtomicU64>,
    timeline: Arc<Mutex<Timeline>>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl AlsaOutput {
    /// Open the playback device at 24 kHz mono and start rendering silence.
    /// Finished source ids are sent on `ended_tx`.
    pub fn open(
        device: &str,
        period_size: usize,
        ended_tx: mpsc::UnboundedSender<SourceId>,
    ) -> Result<Self> {
        let position = Arc::new(AtomicU64::new(0));
        let timeline = Arc::new(Mutex::new(Timeline::default()));
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<()>>(1);

        let handle = {
            let position = position.clone();
            let timeline = timeline.clone();
            let running = running.clone();
            let device = device.to_string();
            thread::Builder::new()
                .name("audio-play".into())
                .spawn(move || {
                    let ctx = RenderContext {
                        position,
                        timeline,
                        ended_tx,
                    };
                    if let Err(e) = play_thread(&device, period_size, ctx, &running, ready_tx) {
                        log::error!("Playback thread error: {}", e);
                    }
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                position,
                timeline,
                running,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                anyhow::bail!("playback thread exited before opening the device")
            }
        }
    }
}

impl PlaybackOutput for AlsaOutput {
    fn current_time(&self) -> f64 {
        self.position.load(Ordering::Acquire) as f64 / PLAYBACK_SAMPLE_RATE as f64
    }

    fn start_source(&mut self, id: SourceId, samples: Vec<f32>, at: f64) {
        let start_frame = (at * PLAYBACK_SAMPLE_RATE as f64).round().max(0.0) as u64;
        self.timeline.lock().schedule(id, start_frame, samples);
    }

    fn stop_source(&mut self, id: SourceId) {
        self.timeline.lock().remove(id);
    }

    fn close(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        self.timeline.lock().clear();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
            log::info!("Playback device released");
        }
    }
}

impl Drop for AlsaOutput {
    fn drop(&mut self) {
        self.close();
    }
}

struct RenderContext {
    position: Arc<AtomicU64>,
    timeline: Arc<Mutex<Timeline>>,
    ended_tx: mpsc::UnboundedSender<SourceId>,
}

fn play_thread(
    device: &str,
    period_size: usize,
    ctx: RenderContext,
    running: &AtomicBool,
    ready_tx: std::sync::mpsc::SyncSender<Result<()>>,
) -> Result<()> {
    let period_size_opt = if period_size > 0 { Some(period_size) } else { None };
    let (pcm, params) =
        match alsa_device::open_playback(device, PLAYBACK_SAMPLE_RATE, period_size_opt) {
            Ok(opened) => opened,
            Err(e) => {
                let _ = ready_tx.send(Err(e));
                return Ok(());
            }
        };
    let io = match pcm.io_i16() {
        Ok(io) => io,
        Err(e) => {
            let _ = ready_tx.send(Err(e.into()));
            return Ok(());
        }
    };
    let _ = ready_tx.send(Ok(()));

    let period = params.period_size.max(1);
    let mut mix = vec![0f32; period];
    let mut pcm_data = vec![0i16; period];

    log::info!("Playback started: rate={}, period={}", params.sample_rate, period);

    while running.load(Ordering::Relaxed) {
        mix.fill(0.0);
        // Mix and advance the clock under one lock; the clock never lags
        // what has already been mixed.
        let finished = {
            let mut timeline = ctx.timeline.lock();
            let position = ctx.position.load(Ordering::Acquire);
            let finished = timeline.render(position, &mut mix);
            ctx.position.store(position + period as u64, Ordering::Release);
            finished
        };

        for (dst, &src) in pcm_data.iter_mut().zip(&mix) {
            *dst = codec::sample_to_i16(src);
        }

        // Write with a retry loop to ride out short writes and XRUNs.
        let mut frames_written = 0;
        let mut retry_count = 0u32;
        while frames_written < period {
            match io.writei(&pcm_data[frames_written..]) {
                Ok(n) => {
                    frames_written += n;
                    retry_count = 0;
                }
                Err(e) => {
                    log::warn!("ALSA XRUN or error: {}, recovering...", e);
                    retry_count += 1;
                    if let Err(e2) = pcm.prepare() {
                        log::error!("Failed to recover PCM playback: {}", e2);
                        break;
                    }
                    if retry_count >= 3 {
                        log::error!(
                            "Max recovery retries ({}) reached. Dropping {} unwritten frames.",
                            retry_count,
                            period - frames_written
                        );
                        break;
                    }
                }
            }
        }

        for id in finished {
            if ctx.ended_tx.send(id).is_err() {
                log::warn!("Playback event receiver dropped");
                return Ok(());
            }
        }
    }

    log::info!("Playback stopped");
    Ok(())
}

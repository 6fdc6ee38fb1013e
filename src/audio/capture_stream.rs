//! Microphone thread.
//!
//! Uses std::thread (NOT tokio tasks) for real-time audio I/O to avoid
//! contention with async network tasks.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use anyhow::Result;
use tokio::sync::mpsc;

use super::alsa_device;
use crate::capture::{AudioFrame, FrameAccumulator};
use crate::codec::CAPTURE_SAMPLE_RATE;

/// A live microphone owned by one call. `stop` releases the device.
pub trait Microphone: Send {
    fn stop(&mut self);
}

/// ALSA capture running on its own thread, emitting fixed-size frames.
pub struct CaptureStream {
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureStream {
    /// Open the capture device and start reading.
    ///
    /// Returns an error if the device cannot be opened; no thread is left
    /// behind in that case.
    pub fn start(
        device: &str,
        frame_size: usize,
        frame_tx: mpsc::UnboundedSender<AudioFrame>,
    ) -> Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<()>>(1);

        let handle = {
            let running = running.clone();
            let device = device.to_string();
            thread::Builder::new()
                .name("audio-capture".into())
                .spawn(move || {
                    if let Err(e) = capture_thread(&device, frame_size, frame_tx, &running, ready_tx)
                    {
                        log::error!("Capture thread error: {}", e);
                    }
                })?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                running,
                handle: Some(handle),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => {
                let _ = handle.join();
                anyhow::bail!("capture thread exited before opening the device")
            }
        }
    }
}

impl Microphone for CaptureStream {
    fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn capture_thread(
    device: &str,
    frame_size: usize,
    frame_tx: mpsc::UnboundedSender<AudioFrame>,
    running: &AtomicBool,
    ready_tx: std::sync::mpsc::SyncSender<Result<()>>,
) -> Result<()> {
    let (pcm, params) = match alsa_device::open_capture(device, CAPTURE_SAMPLE_RATE) {
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

    let mut accumulator = FrameAccumulator::new(frame_size);
    let mut read_buf = vec![0i16; params.period_size];

    log::info!(
        "Capture started: rate={}, period={}, frame_size={}",
        params.sample_rate,
        params.period_size,
        frame_size,
    );

    while running.load(Ordering::Relaxed) {
        match io.readi(&mut read_buf) {
            Ok(frames) => {
                for frame in accumulator.push_i16(&read_buf[..frames]) {
                    if frame_tx.send(frame).is_err() {
                        log::warn!("Frame receiver dropped, stopping capture");
                        return Ok(());
                    }
                }
            }
            Err(e) => {
                log::warn!("ALSA capture error: {}, recovering...", e);
                if let Err(e2) = pcm.prepare() {
                    log::error!("Failed to recover PCM capture: {}", e2);
                    break;
                }
            }
        }
    }

    log::info!("Capture stopped");
    Ok(())
}

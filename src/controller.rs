//! Call session controller.
//!
//! Sole owner of the call state, the mute flag, the microphone, the
//! playback scheduler and the remote session. Every input (mic frames,
//! session events, finished sources, UI controls) arrives through one of
//! the `handle_*` methods from a single event loop, so nothing here needs
//! a lock and an interruption is fully applied before the next packet is
//! looked at.

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::audio::{Microphone, PlaybackOutput, SourceId};
use crate::capture::{AudioFrame, CaptureEncoder};
use crate::error::CallError;
use crate::live_link::{LiveEvent, LiveSession};
use crate::persona::Persona;
use crate::protocol::{Blob, ServerContent};
use crate::scheduler::PlaybackScheduler;
use crate::state_machine::CallState;

/// What the UI shows. Derived from the call state, the mute flag and the
/// most recent error.
#[derive(Debug, Clone, PartialEq)]
pub struct CallStatus {
    pub state: CallState,
    pub text: String,
    pub speaking: bool,
    pub muted: bool,
}

/// Devices acquired for one call.
pub struct CallDevices<O> {
    pub microphone: Box<dyn Microphone>,
    pub output: O,
}

pub struct CallController<O: PlaybackOutput> {
    call_id: Uuid,
    assistant_name: String,
    persona: Persona,
    state: CallState,
    fault: Option<CallError>,
    muted: bool,
    encoder: CaptureEncoder,
    scheduler: Option<PlaybackScheduler<O>>,
    microphone: Option<Box<dyn Microphone>>,
    session: Box<dyn LiveSession>,
    session_open: bool,
    status_tx: mpsc::UnboundedSender<CallStatus>,
}

impl<O: PlaybackOutput> CallController<O> {
    pub fn new(
        assistant_name: impl Into<String>,
        persona: Persona,
        session: Box<dyn LiveSession>,
        status_tx: mpsc::UnboundedSender<CallStatus>,
    ) -> Self {
        Self {
            call_id: Uuid::new_v4(),
            assistant_name: assistant_name.into(),
            persona,
            state: CallState::Idle,
            fault: None,
            muted: false,
            encoder: CaptureEncoder::new(),
            scheduler: None,
            microphone: None,
            session,
            session_open: false,
            status_tx,
        }
    }

    pub fn state(&self) -> CallState {
        self.state
    }

    pub fn status(&self) -> CallStatus {
        let text = match self.fault.as_ref().and_then(CallError::status_text) {
            Some(text) => text.to_string(),
            None => self.state.status_text(&self.assistant_name, self.persona),
        };
        CallStatus {
            state: self.state,
            text,
            speaking: self.state.is_speaking(),
            muted: self.muted,
        }
    }

    /// Begin the call. Without a microphone the call parks in `Connecting`
    /// with a permission status and the session is never opened.
    pub fn start(&mut self, devices: Result<CallDevices<O>, CallError>) {
        if self.state != CallState::Idle {
            log::warn!("[{}] start ignored in state {}", self.call_id, self.state);
            return;
        }
        self.transition(CallState::Connecting);

        match devices {
            Ok(devices) => {
                self.microphone = Some(devices.microphone);
                self.scheduler = Some(PlaybackScheduler::new(devices.output));
                self.session.open();
                self.session_open = true;
            }
            Err(e) => {
                log::error!("[{}] cannot start call: {}", self.call_id, e);
                self.fault = Some(e);
                self.publish();
            }
        }
    }

    pub fn handle_live_event(&mut self, event: LiveEvent) {
        if self.state == CallState::Ended {
            return;
        }
        match event {
            LiveEvent::Open => {
                if self.state == CallState::Connecting && self.microphone.is_some() {
                    log::info!("[{}] session open, streaming microphone", self.call_id);
                    self.transition(CallState::Listening);
                }
            }
            LiveEvent::Message(content) => self.handle_server_content(content),
            LiveEvent::Error(info) => {
                log::error!("[{}] session error: {}", self.call_id, info);
                self.fault = Some(CallError::Session(info));
                self.publish();
            }
            LiveEvent::Closed => {
                log::info!("[{}] remote closed the session", self.call_id);
                self.end();
            }
        }
    }

    fn handle_server_content(&mut self, content: ServerContent) {
        for blob in content.audio_blobs() {
            self.handle_inbound_audio(blob);
        }
        if content.interrupted {
            self.interrupt();
        }
        if content.turn_complete {
            log::debug!("[{}] model turn complete", self.call_id);
        }
    }

    fn handle_inbound_audio(&mut self, blob: &Blob) {
        if !self.state.is_streaming() {
            return;
        }
        let Some(scheduler) = self.scheduler.as_mut() else {
            return;
        };
        let scheduled = blob
            .playback_pcm()
            .and_then(|pcm| scheduler.on_inbound_packet(&pcm));
        match scheduled {
            Ok(Some(_)) => self.transition(CallState::Speaking),
            Ok(None) => {}
            Err(e) => {
                let err = CallError::from(e);
                log::warn!("[{}] dropping inbound packet: {}", self.call_id, err);
            }
        }
    }

    fn interrupt(&mut self) {
        if !self.state.is_streaming() {
            return;
        }
        let stopped = self
            .scheduler
            .as_mut()
            .map(|s| s.interrupt())
            .unwrap_or(0);
        log::info!("[{}] barge-in, flushed {} sources", self.call_id, stopped);
        self.transition(CallState::Interrupted);
        self.transition(CallState::Listening);
    }

    /// A scheduled buffer finished playing on the output device.
    pub fn handle_source_ended(&mut self, id: SourceId) {
        let drained = self
            .scheduler
            .as_mut()
            .map(|s| s.on_source_ended(id))
            .unwrap_or(false);
        if drained && self.state == CallState::Speaking {
            self.transition(CallState::Listening);
        }
    }

    /// A captured microphone frame. Sent only while the session is live
    /// and the call is not muted; the send is fire-and-forget.
    pub fn handle_frame(&mut self, frame: AudioFrame) {
        if !self.state.is_streaming() {
            return;
        }
        if let Some(packet) = self.encoder.on_frame(&frame, self.muted) {
            self.session.send(packet);
        }
    }

    pub fn set_muted(&mut self, muted: bool) {
        if self.muted == muted {
            return;
        }
        self.muted = muted;
        log::info!("[{}] microphone {}", self.call_id, if muted { "muted" } else { "unmuted" });
        self.publish();
    }

    /// Tear the call down. Safe to call repeatedly; resources are released
    /// on the first call only.
    pub fn end(&mut self) {
        if self.state == CallState::Ended {
            return;
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.close();
        }
        if let Some(mut microphone) = self.microphone.take() {
            microphone.stop();
        }
        if self.session_open {
            self.session.close();
            self.session_open = false;
        }
        log::info!(
            "[{}] call ended: {} frames sent, {} dropped while muted",
            self.call_id,
            self.encoder.sent(),
            self.encoder.dropped()
        );
        self.fault = None;
        self.transition(CallState::Ended);
    }

    fn transition(&mut self, next: CallState) {
        if self.state == next {
            return;
        }
        log::debug!("[{}] {} -> {}", self.call_id, self.state, next);
        self.state = next;
        if next != CallState::Connecting {
            self.fault = None;
        }
        self.publish();
    }

    fn publish(&self) {
        if self.status_tx.send(self.status()).is_err() {
            log::debug!("[{}] status receiver gone, dropping update", self.call_id);
        }
    }
}

impl<O: PlaybackOutput> Drop for CallController<O> {
    fn drop(&mut self) {
        self.end();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use parking_lot::Mutex;

    use super::*;
    use crate::capture::OutboundPacket;
    use crate::codec::{self, PLAYBACK_SAMPLE_RATE};
    use crate::protocol::{ModelTurn, Part};
    use crate::scheduler::testing::ManualOutput;

    const EPS: f64 = 1e-9;

    #[derive(Clone, Default)]
    struct FakeMic {
        stops: Arc<AtomicU32>,
    }

    impl Microphone for FakeMic {
        fn stop(&mut self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct SessionLog {
        opened: u32,
        closed: u32,
        sent: Vec<OutboundPacket>,
    }

    #[derive(Clone, Default)]
    struct FakeSession {
        log: Arc<Mutex<SessionLog>>,
    }

    impl LiveSession for FakeSession {
        fn open(&mut self) {
            self.log.lock().opened += 1;
        }

        fn send(&mut self, packet: OutboundPacket) {
            self.log.lock().sent.push(packet);
        }

        fn close(&mut self) {
            self.log.lock().closed += 1;
        }
    }

    struct Harness {
        controller: CallController<ManualOutput>,
        output: ManualOutput,
        mic: FakeMic,
        session: FakeSession,
        status_rx: mpsc::UnboundedReceiver<CallStatus>,
    }

    impl Harness {
        fn new() -> Self {
            let session = FakeSession::default();
            let (status_tx, status_rx) = mpsc::unbounded_channel();
            let controller = CallController::new(
                "Sahara",
                Persona::Sister,
                Box::new(session.clone()),
                status_tx,
            );
            Self {
                controller,
                output: ManualOutput::default(),
                mic: FakeMic::default(),
                session,
                status_rx,
            }
        }

        fn devices(&self) -> Result<CallDevices<ManualOutput>, CallError> {
            Ok(CallDevices {
                microphone: Box::new(self.mic.clone()),
                output: self.output.clone(),
            })
        }

        /// Idle → Connecting → Listening.
        fn connected() -> Self {
            let mut h = Self::new();
            let devices = h.devices();
            h.controller.start(devices);
            h.controller.handle_live_event(LiveEvent::Open);
            h.drain_states();
            h
        }

        fn drain_states(&mut self) -> Vec<CallState> {
            let mut states = Vec::new();
            while let Ok(status) = self.status_rx.try_recv() {
                states.push(status.state);
            }
            states
        }

        fn last_status(&mut self) -> Option<CallStatus> {
            let mut last = None;
            while let Ok(status) = self.status_rx.try_recv() {
                last = Some(status);
            }
            last
        }
    }

    fn audio_blob(ms: usize) -> Blob {
        let samples = vec![0.2f32; PLAYBACK_SAMPLE_RATE as usize * ms / 1000];
        Blob {
            mime_type: "audio/pcm;rate=24000".to_string(),
            data: codec::to_transport(&codec::encode(&samples)),
        }
    }

    fn audio_message(blobs: Vec<Blob>) -> LiveEvent {
        LiveEvent::Message(ServerContent {
            model_turn: Some(ModelTurn {
                parts: blobs
                    .into_iter()
                    .map(|b| Part {
                        inline_data: Some(b),
                        text: None,
                    })
                    .collect(),
            }),
            interrupted: false,
            turn_complete: false,
        })
    }

    fn interrupted() -> LiveEvent {
        LiveEvent::Message(ServerContent {
            interrupted: true,
            ..Default::default()
        })
    }

    fn frame() -> AudioFrame {
        AudioFrame {
            samples: vec![0.05; 4096],
        }
    }

    #[test]
    fn start_and_open_reaches_listening() {
        let mut h = Harness::new();
        let devices = h.devices();
        h.controller.start(devices);
        assert_eq!(h.controller.state(), CallState::Connecting);
        assert_eq!(h.session.log.lock().opened, 1);

        h.controller.handle_live_event(LiveEvent::Open);
        assert_eq!(h.controller.state(), CallState::Listening);
        assert_eq!(
            h.drain_states(),
            vec![CallState::Connecting, CallState::Listening]
        );
        assert_eq!(h.controller.status().text, "Main sun rahi hoon...");
    }

    #[test]
    fn microphone_denied_never_reaches_listening() {
        let mut h = Harness::new();
        h.controller
            .start(Err(CallError::Permission("device busy".into())));

        let status = h.last_status().unwrap();
        assert_eq!(status.state, CallState::Connecting);
        assert_eq!(status.text, "Microphone access needed");
        assert_eq!(h.session.log.lock().opened, 0);

        h.controller.handle_live_event(LiveEvent::Open);
        assert_eq!(h.controller.state(), CallState::Connecting);

        h.controller.end();
        assert_eq!(h.controller.state(), CallState::Ended);
        assert_eq!(h.session.log.lock().closed, 0);
    }

    #[test]
    fn speaking_until_every_source_finishes() {
        let mut h = Harness::connected();
        h.controller.handle_live_event(audio_message(vec![audio_blob(50)]));
        h.controller.handle_live_event(audio_message(vec![audio_blob(50)]));
        assert_eq!(h.controller.state(), CallState::Speaking);
        assert!(h.controller.status().speaking);

        h.controller.handle_source_ended(1);
        assert_eq!(h.controller.state(), CallState::Speaking);
        h.controller.handle_source_ended(2);
        assert_eq!(h.controller.state(), CallState::Listening);
        assert_eq!(
            h.drain_states(),
            vec![CallState::Speaking, CallState::Listening]
        );
    }

    #[test]
    fn three_hundred_ms_of_speech_in_three_packets() {
        let mut h = Harness::connected();
        let t0 = 1.5;
        h.output.set_now(t0);

        h.controller.handle_live_event(audio_message(vec![
            audio_blob(100),
            audio_blob(100),
            audio_blob(100),
        ]));

        let starts = h.output.starts();
        assert_eq!(starts.len(), 3);
        for (i, start) in starts.iter().enumerate() {
            assert!((start - (t0 + 0.1 * i as f64)).abs() < EPS, "start {i} = {start}");
        }

        let speaking_until = h.controller.scheduler.as_ref().unwrap().next_start_time();
        assert!((speaking_until - t0 - 0.3).abs() < EPS);

        h.output.set_now(t0 + 0.1);
        h.controller.handle_source_ended(1);
        h.output.set_now(t0 + 0.2);
        h.controller.handle_source_ended(2);
        assert_eq!(h.controller.state(), CallState::Speaking);
        h.output.set_now(t0 + 0.3);
        h.controller.handle_source_ended(3);
        assert_eq!(h.controller.state(), CallState::Listening);
    }

    #[test]
    fn barge_in_flushes_and_rebases() {
        let mut h = Harness::connected();
        h.output.set_now(4.0);
        h.controller
            .handle_live_event(audio_message(vec![audio_blob(500), audio_blob(500)]));
        h.drain_states();

        h.output.set_now(4.2);
        h.controller.handle_live_event(interrupted());
        assert_eq!(h.output.state.lock().stopped, vec![1, 2]);
        assert_eq!(
            h.drain_states(),
            vec![CallState::Interrupted, CallState::Listening]
        );
        assert!(!h.controller.status().speaking);

        // Late completions of the flushed sources change nothing.
        h.controller.handle_source_ended(1);
        assert_eq!(h.controller.state(), CallState::Listening);

        h.controller.handle_live_event(audio_message(vec![audio_blob(100)]));
        let starts = h.output.starts();
        assert!((starts[2] - 4.2).abs() < EPS);
        assert_eq!(h.controller.state(), CallState::Speaking);
    }

    #[test]
    fn mute_drops_frames_without_changing_state() {
        let mut h = Harness::connected();
        h.controller.handle_frame(frame());
        assert_eq!(h.session.log.lock().sent.len(), 1);

        h.controller.set_muted(true);
        for _ in 0..5 {
            h.controller.handle_frame(frame());
        }
        assert_eq!(h.session.log.lock().sent.len(), 1);
        assert_eq!(h.controller.state(), CallState::Listening);
        assert!(h.last_status().unwrap().muted);

        h.controller.set_muted(false);
        h.controller.handle_frame(frame());
        assert_eq!(h.session.log.lock().sent.len(), 2);
    }

    #[test]
    fn frames_before_open_are_not_sent() {
        let mut h = Harness::new();
        let devices = h.devices();
        h.controller.start(devices);
        h.controller.handle_frame(frame());
        assert!(h.session.log.lock().sent.is_empty());
    }

    #[test]
    fn packets_go_out_in_capture_order() {
        let mut h = Harness::connected();
        for i in 0..4 {
            h.controller.handle_frame(AudioFrame {
                samples: vec![i as f32 / 10.0; 8],
            });
        }
        let sent = h.session.log.lock();
        for (i, packet) in sent.sent.iter().enumerate() {
            assert_eq!(packet.pcm, codec::encode(&[i as f32 / 10.0; 8]));
        }
    }

    #[test]
    fn end_releases_everything_exactly_once() {
        let mut h = Harness::connected();
        h.controller.handle_live_event(audio_message(vec![audio_blob(100)]));
        h.controller.end();
        h.controller.end();
        h.controller.handle_live_event(LiveEvent::Closed);

        assert_eq!(h.controller.state(), CallState::Ended);
        assert_eq!(h.mic.stops.load(Ordering::SeqCst), 1);
        assert_eq!(h.output.state.lock().closed, 1);
        assert_eq!(h.output.state.lock().stopped, vec![1]);
        assert_eq!(h.session.log.lock().closed, 1);
        assert_eq!(h.last_status().unwrap().text, "Call ended");
    }

    #[test]
    fn remote_close_from_any_state_ends_the_call() {
        let mut h = Harness::new();
        let devices = h.devices();
        h.controller.start(devices);
        h.controller.handle_live_event(LiveEvent::Closed);
        assert_eq!(h.controller.state(), CallState::Ended);
        assert_eq!(h.mic.stops.load(Ordering::SeqCst), 1);
        assert_eq!(h.session.log.lock().closed, 1);
    }

    #[test]
    fn session_error_is_reported_but_call_continues() {
        let mut h = Harness::connected();
        h.controller
            .handle_live_event(LiveEvent::Error("connection reset".into()));
        let status = h.last_status().unwrap();
        assert_eq!(status.state, CallState::Listening);
        assert_eq!(status.text, "Network error occurred");
        assert_eq!(h.mic.stops.load(Ordering::SeqCst), 0);

        h.controller.handle_live_event(LiveEvent::Closed);
        assert_eq!(h.controller.state(), CallState::Ended);
    }

    #[test]
    fn malformed_audio_is_dropped() {
        let mut h = Harness::connected();
        let bad = Blob {
            mime_type: "audio/pcm;rate=24000".to_string(),
            data: codec::to_transport(&[1, 2, 3]),
        };
        let wrong_rate = Blob {
            mime_type: "audio/pcm;rate=8000".to_string(),
            data: audio_blob(10).data,
        };
        h.controller.handle_live_event(audio_message(vec![bad, wrong_rate]));
        assert_eq!(h.controller.state(), CallState::Listening);
        assert!(h.output.starts().is_empty());
        assert!(h.last_status().is_none());
        assert_eq!(h.controller.status().text, "Main sun rahi hoon...");
    }

    #[test]
    fn call_survives_ui_going_away() {
        let mut h = Harness::connected();
        drop(std::mem::replace(&mut h.status_rx, mpsc::unbounded_channel().1));

        h.controller.set_muted(true);
        h.controller.handle_live_event(audio_message(vec![audio_blob(20)]));
        assert_eq!(h.controller.state(), CallState::Speaking);
        h.controller.end();
        assert_eq!(h.controller.state(), CallState::Ended);
        assert_eq!(h.session.log.lock().closed, 1);
    }

    #[test]
    fn drop_tears_down() {
        let h = Harness::connected();
        let mic = h.mic.clone();
        let session = h.session.clone();
        drop(h);
        assert_eq!(mic.stops.load(Ordering::SeqCst), 1);
        assert_eq!(session.log.lock().closed, 1);
    }
}

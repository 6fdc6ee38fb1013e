use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};
use url::Url;

use crate::capture::OutboundPacket;
use crate::config::Config;
use crate::protocol::{self, RealtimeInputMessage, ServerContent, SetupMessage};

/// Events from the remote live session, delivered to the controller.
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    /// Setup acknowledged; the channel is ready for audio.
    Open,
    Message(ServerContent),
    Error(String),
    Closed,
}

/// The remote conversational session as the call controller sees it.
///
/// `send` never waits on the network. `close` abandons anything still
/// queued.
pub trait LiveSession: Send {
    fn open(&mut self);
    fn send(&mut self, packet: OutboundPacket);
    fn close(&mut self);
}

/// WebSocket connection to the live session. One per call, no reconnects:
/// any disconnect is reported as `Closed` and the call ends.
pub struct LiveLink {
    config: Config,
    tx: mpsc::UnboundedSender<LiveEvent>,
    rx_audio: mpsc::UnboundedReceiver<OutboundPacket>,
    shutdown: oneshot::Receiver<()>,
}

impl LiveLink {
    pub fn new(
        config: Config,
        tx: mpsc::UnboundedSender<LiveEvent>,
        rx_audio: mpsc::UnboundedReceiver<OutboundPacket>,
        shutdown: oneshot::Receiver<()>,
    ) -> Self {
        Self {
            config,
            tx,
            rx_audio,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        if let Err(e) = self.connect_and_loop().await {
            log::error!("Live session error: {}", e);
            let _ = self.tx.send(LiveEvent::Error(e.to_string()));
        }
        let _ = self.tx.send(LiveEvent::Closed);
    }

    fn endpoint(&self) -> anyhow::Result<Url> {
        let url = Url::parse_with_params(self.config.ws_url, &[("key", &self.config.api_key)])?;
        Ok(url)
    }

    async fn connect_and_loop(&mut self) -> anyhow::Result<()> {
        let url = self.endpoint()?;
        log::info!("Connecting to {}...", self.config.ws_url);
        let (ws_stream, _) = connect_async(url.as_str()).await?;
        log::info!("Connected, sending setup for model {}", self.config.model);

        let (mut write, mut read) = ws_stream.split();

        // 发送 setup 消息，服务端回复 setupComplete 后才算会话建立
        let setup = SetupMessage::new(self.config.model, self.config.persona);
        write
            .send(Message::Text(serde_json::to_string(&setup)?.into()))
            .await?;

        let mut opened = false;
        loop {
            tokio::select! {
                biased;

                _ = &mut self.shutdown => {
                    log::info!("Closing live session");
                    let _ = tokio::time::timeout(
                        Duration::from_secs(1),
                        write.send(Message::Close(None)),
                    )
                    .await;
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_server_text(text.as_str(), &mut opened);
                        }
                        // Server content often arrives as binary frames holding JSON.
                        Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                            Ok(text) => self.handle_server_text(text, &mut opened),
                            Err(_) => log::warn!("Dropping non-UTF-8 binary frame ({} bytes)", data.len()),
                        },
                        Some(Ok(Message::Close(frame))) => {
                            log::info!("Server closed connection: {:?}", frame);
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                    }
                }

                Some(packet) = self.rx_audio.recv() => {
                    let frame = serde_json::to_string(&RealtimeInputMessage::from(&packet))?;
                    write.send(Message::Text(frame.into())).await?;
                }
            }
        }
    }

    fn handle_server_text(&self, text: &str, opened: &mut bool) {
        let msg = match protocol::parse_server_message(text) {
            Ok(msg) => msg,
            Err(e) => {
                log::warn!("Unparseable server message ({}): {:.120}", e, text);
                return;
            }
        };

        if msg.setup_complete.is_some() && !*opened {
            *opened = true;
            let _ = self.tx.send(LiveEvent::Open);
        }
        if let Some(content) = msg.server_content {
            let _ = self.tx.send(LiveEvent::Message(content));
        }
        if let Some(go_away) = msg.go_away {
            log::warn!("Server is going away: {}", go_away);
        }
    }
}

/// Controller-side handle that spawns and owns the WebSocket task.
pub struct LiveLinkHandle {
    config: Config,
    events: mpsc::UnboundedSender<LiveEvent>,
    audio_tx: Option<mpsc::UnboundedSender<OutboundPacket>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl LiveLinkHandle {
    pub fn new(config: Config, events: mpsc::UnboundedSender<LiveEvent>) -> Self {
        Self {
            config,
            events,
            audio_tx: None,
            shutdown_tx: None,
            task: None,
        }
    }
}

impl LiveSession for LiveLinkHandle {
    fn open(&mut self) {
        if self.task.is_some() {
            return;
        }
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let link = LiveLink::new(self.config.clone(), self.events.clone(), audio_rx, shutdown_rx);
        self.task = Some(tokio::spawn(link.run()));
        self.audio_tx = Some(audio_tx);
        self.shutdown_tx = Some(shutdown_tx);
    }

    fn send(&mut self, packet: OutboundPacket) {
        if let Some(tx) = &self.audio_tx {
            if tx.send(packet).is_err() {
                log::debug!("Live session gone, dropping outbound packet");
            }
        }
    }

    fn close(&mut self) {
        self.audio_tx = None;
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        // Detached: the task finishes its close handshake on its own.
        self.task.take();
    }
}

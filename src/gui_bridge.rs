use crate::config::Config;
use crate::controller::CallStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// Controls coming from the UI process.
#[derive(Debug, Clone, PartialEq)]
pub enum GuiEvent {
    Mute(bool),
    End,
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum GuiMessage {
    Mute { muted: bool },
    End,
}

#[derive(Serialize)]
struct StatusMessage<'a> {
    #[serde(rename = "type")]
    msg_type: &'static str,
    state: &'a str,
    text: &'a str,
    speaking: bool,
    muted: bool,
}

pub fn parse_gui_message(msg: &str) -> Option<GuiEvent> {
    match serde_json::from_str::<GuiMessage>(msg) {
        Ok(GuiMessage::Mute { muted }) => Some(GuiEvent::Mute(muted)),
        Ok(GuiMessage::End) => Some(GuiEvent::End),
        Err(_) => None,
    }
}

pub fn status_json(status: &CallStatus) -> String {
    let msg = StatusMessage {
        msg_type: "status",
        state: status.state.as_str(),
        text: &status.text,
        speaking: status.speaking,
        muted: status.muted,
    };
    serde_json::to_string(&msg).unwrap_or_default()
}

pub struct GuiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    tx: mpsc::Sender<GuiEvent>,
}

// GUI进程和Core进程通过本地UDP通信，端口在配置中指定
impl GuiBridge {
    pub async fn new(config: &Config, tx: mpsc::Sender<GuiEvent>) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(format!("127.0.0.1:{}", config.gui_local_port)).await?;
        let target_addr = format!("127.0.0.1:{}", config.gui_remote_port);

        Ok(Self {
            socket: Arc::new(socket),
            target_addr,
            tx,
        })
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = [0u8; 4096];
        loop {
            let (len, _) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let Ok(msg) = std::str::from_utf8(&buf[..len]) else {
                continue;
            };
            match parse_gui_message(msg) {
                Some(event) => {
                    if let Err(e) = self.tx.send(event).await {
                        log::error!("Failed to send GUI event: {}", e);
                        break;
                    }
                }
                None => log::warn!("Ignoring GUI message: {}", msg),
            }
        }
        Ok(())
    }

    pub async fn send_status(&self, status: &CallStatus) -> anyhow::Result<()> {
        self.socket
            .send_to(status_json(status).as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::CallState;

    #[test]
    fn parses_mute_and_end() {
        assert_eq!(
            parse_gui_message(r#"{"type":"mute","muted":true}"#),
            Some(GuiEvent::Mute(true))
        );
        assert_eq!(parse_gui_message(r#"{"type":"end"}"#), Some(GuiEvent::End));
        assert_eq!(parse_gui_message(r#"{"type":"dance"}"#), None);
        assert_eq!(parse_gui_message("garbage"), None);
    }

    #[test]
    fn status_is_flat_json() {
        let status = CallStatus {
            state: CallState::Speaking,
            text: "Sahara bol rahi hai...".to_string(),
            speaking: true,
            muted: false,
        };
        let value: serde_json::Value = serde_json::from_str(&status_json(&status)).unwrap();
        assert_eq!(value["type"], "status");
        assert_eq!(value["state"], "speaking");
        assert_eq!(value["speaking"], true);
        assert_eq!(value["muted"], false);
    }

    #[tokio::test]
    async fn forwards_datagrams_as_events() {
        let mut config = Config::default();
        config.gui_local_port = 0;
        let (tx, mut rx) = mpsc::channel(4);
        let bridge = Arc::new(GuiBridge::new(&config, tx).await.unwrap());
        let addr = bridge.socket.local_addr().unwrap();

        let runner = bridge.clone();
        tokio::spawn(async move { runner.run().await });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        client.send_to(br#"{"type":"end"}"#, addr).await.unwrap();

        assert_eq!(rx.recv().await, Some(GuiEvent::End));
    }
}

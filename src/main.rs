mod audio;
mod capture;
mod codec;
mod config;
mod controller;
mod error;
mod gui_bridge;
mod live_link;
mod persona;
mod protocol;
mod scheduler;
mod state_machine;

use audio::{AlsaOutput, CaptureStream, SourceId};
use capture::AudioFrame;
use config::Config;
use controller::{CallController, CallDevices, CallStatus};
use error::CallError;
use gui_bridge::{GuiBridge, GuiEvent};
use live_link::{LiveEvent, LiveLinkHandle};
use persona::Persona;
use state_machine::CallState;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::mpsc;

/// 打开麦克风和扬声器。麦克风失败视为权限问题，通话不会进入聆听状态
fn acquire_devices(
    config: &Config,
    frame_tx: mpsc::UnboundedSender<AudioFrame>,
    ended_tx: mpsc::UnboundedSender<SourceId>,
) -> Result<CallDevices<AlsaOutput>, CallError> {
    let microphone = CaptureStream::start(config.capture_device, config.capture_frame_size, frame_tx)
        .map_err(|e| CallError::Permission(e.to_string()))?;
    // 扬声器打开失败时 microphone 在这里被 drop，设备随之释放
    let output = AlsaOutput::open(config.playback_device, config.playback_period_size, ended_tx)
        .map_err(|e| CallError::Device(e.to_string()))?;
    Ok(CallDevices {
        microphone: Box::new(microphone),
        output,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置，API key 可以用环境变量覆盖
    let mut config = Config::new().unwrap_or_default();
    config.apply_api_key_override(std::env::var(config::API_KEY_ENV).ok());
    if let Some(arg) = std::env::args().nth(1) {
        match arg.parse::<Persona>() {
            Ok(persona) => config.persona = persona,
            Err(e) => log::warn!("{}, keeping {}", e, config.persona.title()),
        }
    }
    if config.api_key.is_empty() {
        log::warn!("No API key configured, set {} to connect", config::API_KEY_ENV);
    }

    log::info!(
        "{} v{} calling {} as {}",
        config.app_name,
        config.app_version,
        config.assistant_name,
        config.persona.title()
    );

    // 事件通道
    let (tx_live_event, mut rx_live_event) = mpsc::unbounded_channel::<LiveEvent>();
    let (tx_frame, mut rx_frame) = mpsc::unbounded_channel::<AudioFrame>();
    let (tx_ended, mut rx_ended) = mpsc::unbounded_channel::<SourceId>();
    let (tx_status, mut rx_status) = mpsc::unbounded_channel::<CallStatus>();
    let (tx_gui_event, mut rx_gui_event) = mpsc::channel::<GuiEvent>(100);

    // 启动GUI桥，与GUI进程通信
    let gui_bridge = Arc::new(GuiBridge::new(&config, tx_gui_event).await?);
    let gui_bridge_clone = gui_bridge.clone();
    tokio::spawn(async move {
        if let Err(e) = gui_bridge_clone.run().await {
            log::error!("GuiBridge error: {}", e);
        }
    });

    let session = LiveLinkHandle::new(config.clone(), tx_live_event);
    let mut controller = CallController::new(
        config.assistant_name,
        config.persona,
        Box::new(session),
        tx_status,
    );
    controller.start(acquire_devices(&config, tx_frame, tx_ended));

    // 主事件循环，所有输入都在这里串行交给 controller
    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                log::info!("Received Ctrl+C, ending call...");
                controller.end();
            }

            Some(event) = rx_live_event.recv() => {
                controller.handle_live_event(event);
            }

            Some(frame) = rx_frame.recv() => {
                controller.handle_frame(frame);
            }

            Some(id) = rx_ended.recv() => {
                controller.handle_source_ended(id);
            }

            Some(event) = rx_gui_event.recv() => {
                match event {
                    GuiEvent::Mute(muted) => controller.set_muted(muted),
                    GuiEvent::End => {
                        log::info!("End requested from GUI");
                        controller.end();
                    }
                }
            }

            Some(status) = rx_status.recv() => {
                log::info!("Status: {} ({})", status.text, status.state);
                if let Err(e) = gui_bridge.send_status(&status).await {
                    log::error!("Failed to send status to GUI: {}", e);
                }
            }
        }

        if controller.state() == CallState::Ended {
            break;
        }
    }

    // 把最后的状态（通话结束）推给GUI
    while let Ok(status) = rx_status.try_recv() {
        if let Err(e) = gui_bridge.send_status(&status).await {
            log::error!("Failed to send status to GUI: {}", e);
        }
    }
    Ok(())
}

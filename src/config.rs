use crate::persona::Persona;

/// Environment variable that overrides the compiled-in API key.
pub const API_KEY_ENV: &str = "SAHARA_API_KEY";

#[derive(Debug, Clone)]
pub struct Config {
    // 应用信息
    pub app_name: &'static str,
    pub app_version: &'static str,

    // 助手配置
    pub assistant_name: &'static str,
    pub persona: Persona,

    // 音频设备配置
    pub capture_device: &'static str,
    pub playback_device: &'static str,
    pub capture_frame_size: usize,
    pub playback_period_size: usize,

    // 实时会话配置
    pub ws_url: &'static str,
    pub model: &'static str,
    pub api_key: String,

    // GUI进程配置
    pub gui_local_port: u16,
    pub gui_remote_port: u16,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME"),
            app_version: env!("APP_VERSION"),

            assistant_name: env!("ASSISTANT_NAME"),
            persona: env!("ASSISTANT_PERSONA")
                .parse()
                .map_err(|_| "Failed to parse ASSISTANT_PERSONA")?,

            capture_device: env!("AUDIO_CAPTURE_DEVICE"),
            playback_device: env!("AUDIO_PLAYBACK_DEVICE"),
            capture_frame_size: env!("AUDIO_CAPTURE_FRAME_SIZE")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_CAPTURE_FRAME_SIZE")?,
            playback_period_size: env!("AUDIO_PLAYBACK_PERIOD_SIZE")
                .parse()
                .map_err(|_| "Failed to parse AUDIO_PLAYBACK_PERIOD_SIZE")?,

            ws_url: env!("LIVE_WS_URL"),
            model: env!("LIVE_MODEL"),
            api_key: env!("LIVE_API_KEY").to_string(),

            gui_local_port: env!("GUI_LOCAL_PORT")
                .parse()
                .map_err(|_| "Failed to parse GUI_LOCAL_PORT")?,
            gui_remote_port: env!("GUI_REMOTE_PORT")
                .parse()
                .map_err(|_| "Failed to parse GUI_REMOTE_PORT")?,
        })
    }

    /// Replace the compiled-in API key with `value` when it is non-empty.
    pub fn apply_api_key_override(&mut self, value: Option<String>) {
        if let Some(key) = value.map(|v| v.trim().to_string()) {
            if !key.is_empty() {
                self.api_key = key;
            }
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}

//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `ENOLA__*` 覆盖（双下划线表示嵌套，
//! 如 `ENOLA__LLM__MODEL=gpt-4o-mini`）。API Key 等机密只走环境变量
//! （OPENAI_API_KEY、SPOTIFY_*、WHATSAPP_*）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub http: HttpSection,
    pub chat: ChatSection,
    pub spotify: SpotifySection,
    pub hue: HueSection,
    pub wiz: WizSection,
    pub calendar: CalendarSection,
}

/// [app] 段：默认城市、会话轮数上限、模型递归上限、数据目录
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// météo 未给城市时的回退城市
    pub ville: String,
    /// 会话日志长度上限（含系统轮）
    pub max_turns: usize,
    /// 单回合内模型调用次数上限（工具循环活性保障）
    pub recursion_limit: usize,
    /// watchlist / alarmes / historique JSON 存放目录
    pub data_dir: PathBuf,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "Enola".to_string(),
            ville: "Bayonne".to_string(),
            max_turns: 40,
            recursion_limit: 10,
            data_dir: PathBuf::from("assets"),
        }
    }
}

/// [llm] 段：模型名、温度、可选兼容端点
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    pub model: String,
    pub temperature: f32,
    pub base_url: Option<String>,
    /// 单次请求超时（秒）
    pub request_timeout: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            base_url: None,
            request_timeout: 30,
        }
    }
}

/// [http] 段：API 与 Webhook 监听地址
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub host: String,
    pub port: u16,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

/// [chat] 段：聊天渠道行为（授权用户、分段长度、后台任务节奏）
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChatSection {
    /// 允许对话的发送者 id；为空时接受所有人（不推荐）
    pub authorized_sender: Option<String>,
    /// 单条消息的最大字符数，超过则分段发送
    pub chunk_chars: usize,
    /// Webhook 校验令牌的默认值（可被 WHATSAPP_VERIFY_TOKEN 覆盖）
    pub verify_token: String,
    /// 新番检查间隔（分钟）
    pub episode_check_minutes: u64,
    /// 闹钟触发时的目标音箱（Spotify 设备名）
    pub alarm_speaker: String,
}

impl Default for ChatSection {
    fn default() -> Self {
        Self {
            authorized_sender: None,
            chunk_chars: 2000,
            verify_token: "enola".to_string(),
            episode_check_minutes: 5,
            alarm_speaker: "Enola_Pi".to_string(),
        }
    }
}

/// [spotify] 段：默认播放设备（凭证走 SPOTIFY_CLIENT_ID/SECRET/REFRESH_TOKEN）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SpotifySection {
    pub default_device: Option<String>,
}

/// [hue] 段：桥接器地址与应用密钥
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HueSection {
    pub bridge_ip: Option<String>,
    /// 桥接器上注册的 application key；未设置时读 HUE_USERNAME
    pub username: Option<String>,
}

/// [wiz] 段：智能插座的 UDP 端点与重试策略
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WizSection {
    pub plug_ip: Option<String>,
    pub port: u16,
    pub attempts: u32,
    pub timeout_secs: u64,
}

impl Default for WizSection {
    fn default() -> Self {
        Self {
            plug_ip: None,
            port: 38899,
            attempts: 3,
            timeout_secs: 2,
        }
    }
}

/// [calendar] 段：Google OAuth token 文件与事件时区
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CalendarSection {
    pub token_path: PathBuf,
    pub timezone: String,
}

impl Default for CalendarSection {
    fn default() -> Self {
        Self {
            token_path: PathBuf::from("config/google_token.json"),
            timezone: "Europe/Paris".to_string(),
        }
    }
}

/// 从 config 目录加载配置，环境变量 ENOLA__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 ENOLA__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{name}.toml");
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("ENOLA")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

//! Enola 服务入口
//!
//! 启动：加载配置 -> 构建模型客户端与工具注册表 -> 启动后台任务 ->
//! 在同一端口上同时服务 HTTP 前端（/ask、/health）与聊天 Webhook（/webhook）。
//!
//! 环境变量：
//! - OPENAI_API_KEY: 模型 Key（缺省走 Mock）
//! - SPOTIFY_CLIENT_ID / SPOTIFY_CLIENT_SECRET / SPOTIFY_REFRESH_TOKEN
//! - WHATSAPP_ACCESS_TOKEN / WHATSAPP_PHONE_NUMBER_ID / WHATSAPP_VERIFY_TOKEN
//! - HUE_USERNAME（或配置 [hue].username）
//! - ENOLA__*: 覆盖 config/default.toml 的任意键

use std::sync::Arc;
use std::time::Duration;

use enola::api::{self, ApiState};
use enola::brain::{default_modes, Brain};
use enola::config::{load_config, AppConfig};
use enola::integrations::whatsapp::{self, ChatNotifier, WhatsappState};
use enola::llm::create_model_from_config;
use enola::memory::ConversationStore;
use enola::tasks::{spawn_background_tasks, TaskContext};
use enola::tools::{
    AgendaAjoutTool, AgendaConsultTool, AjouterAnimeTool, AlarmStore, AnilistClient,
    CreerAlarmeTool, GererWatchlistTool, GoogleCalendarClient, HueClient, LumiereTool, MeteoTool,
    PriseTool, RechercheAnimeTool, SpotifyClient, SpotifyTool, ToolRegistry, VolumeTool,
    WizClient,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    enola::observability::init();

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({e}), using defaults");
        AppConfig::default()
    });

    std::fs::create_dir_all(&cfg.app.data_dir).ok();

    let model = create_model_from_config(&cfg);

    // clients partagés entre tools et tâches de fond
    let spotify = Arc::new(SpotifyClient::from_env());
    let hue = Arc::new(HueClient::new(
        cfg.hue.bridge_ip.clone(),
        cfg.hue.username.clone(),
    ));
    let wiz = Arc::new(WizClient::new(
        cfg.wiz.plug_ip.clone(),
        cfg.wiz.port,
        cfg.wiz.attempts,
        cfg.wiz.timeout_secs,
    ));
    let calendar = Arc::new(GoogleCalendarClient::new(
        cfg.calendar.token_path.clone(),
        cfg.calendar.timezone.clone(),
    ));
    let anilist = Arc::new(AnilistClient::new(
        cfg.app.data_dir.join("anime_watchlist.json"),
        cfg.app.data_dir.join("anime_history.json"),
    ));
    let alarms = Arc::new(AlarmStore::new(cfg.app.data_dir.join("alarmes.json")));

    let mut registry = ToolRegistry::new();
    (|| -> Result<(), enola::tools::ToolError> {
        registry.register(SpotifyTool::new(spotify.clone()))?;
        registry.register(LumiereTool::new(hue.clone()))?;
        registry.register(PriseTool::new(wiz.clone()))?;
        registry.register(AgendaAjoutTool::new(calendar.clone()))?;
        registry.register(AgendaConsultTool::new(calendar.clone()))?;
        registry.register(MeteoTool::new(cfg.app.ville.clone()))?;
        registry.register(VolumeTool)?;
        registry.register(CreerAlarmeTool::new(alarms.clone()))?;
        registry.register(RechercheAnimeTool::new(anilist.clone()))?;
        registry.register(AjouterAnimeTool::new(anilist.clone()))?;
        registry.register(GererWatchlistTool::new(anilist.clone()))?;
        Ok(())
    })()
    .map_err(|e| anyhow::anyhow!("tool registration failed: {e}"))?;

    let brain = Arc::new(Brain::new(
        model,
        Arc::new(registry),
        default_modes(),
        cfg.app.max_turns,
        cfg.app.recursion_limit,
    ));
    let store = Arc::new(ConversationStore::new());

    let notifier = Arc::new(ChatNotifier::from_env(
        cfg.chat.authorized_sender.clone(),
        cfg.chat.chunk_chars,
    ));
    if !notifier.is_configured() {
        tracing::warn!("WhatsApp credentials not set, replies and notifications go to logs only");
    }

    spawn_background_tasks(TaskContext {
        anilist,
        alarms,
        spotify,
        notifier: notifier.clone(),
        alarm_speaker: cfg.chat.alarm_speaker.clone(),
        episode_interval: Duration::from_secs(cfg.chat.episode_check_minutes.max(1) * 60),
    });

    let verify_token = std::env::var("WHATSAPP_VERIFY_TOKEN")
        .unwrap_or_else(|_| cfg.chat.verify_token.clone());

    let api_router = api::create_router(Arc::new(ApiState {
        brain: brain.clone(),
        store: store.clone(),
    }));
    let chat_router = whatsapp::create_router(Arc::new(WhatsappState {
        brain,
        store,
        notifier,
        verify_token,
        authorized_sender: cfg.chat.authorized_sender.clone(),
    }));
    let app = api_router.merge(chat_router);

    let addr = format!("{}:{}", cfg.http.host, cfg.http.port);
    tracing::info!("Enola en ligne sur http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

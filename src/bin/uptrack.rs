use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uptrack::{
    api::StreamApi,
    chat::{ChatClient, ChatSink},
    config::{AppConfig, ConfigManager},
    control::ControlServer,
    database::{self, UptrackDatabase},
    outbound::{EventSink, WebSocketSink},
    tracker, EventReactor, HelixClient, NotificationEngine, SessionAggregator,
};

/// Twitch配信の視聴セッション集計と配信開始通知ボット
#[derive(Debug, Parser)]
#[command(name = "uptrack", version)]
struct Cli {
    /// 設定ファイルのパス（省略時はXDGデフォルト）
    #[arg(long)]
    config: Option<PathBuf>,

    /// セッション集計の対象チャンネル（設定ファイルより優先）
    #[arg(long)]
    channel: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manager = match cli.config {
        Some(path) => ConfigManager::with_path(path),
        None => ConfigManager::new()?,
    };
    let mut config = manager.load_config().unwrap_or_else(|e| {
        eprintln!("Failed to load config, using defaults: {}", e);
        AppConfig::default()
    });
    if let Some(channel) = cli.channel {
        config.channel = channel;
    }

    let _log_guard = uptrack::logging::init_logging(&config.log)?;
    tracing::info!("🎬 Starting uptrack - Twitch stream session tracker");

    let token = config.resolve_token()?;
    let client_id = config.resolve_client_id()?;

    let db_path = match &config.database_path {
        Some(path) => path.clone(),
        None => database::get_database_path()?,
    };
    let db = Arc::new(UptrackDatabase::new(&db_path)?);
    tracing::info!("💾 Database opened at {}", db_path.display());

    let api: Arc<dyn StreamApi> = Arc::new(HelixClient::new(token.clone(), client_id));
    let sink: Arc<dyn EventSink> = Arc::new(WebSocketSink::new(config.event_sink_url.clone()));
    let aggregator = Arc::new(SessionAggregator::new(db.clone(), &config.channel));
    let engine = Arc::new(NotificationEngine::new(db.clone(), api.clone(), sink.clone()));

    // presence tick（ライブ判定と参加者集計）
    tokio::spawn(tracker::run_presence_loop(
        api.clone(),
        aggregator.clone(),
        sink.clone(),
        Duration::from_secs(config.presence_interval_secs),
    ));

    // notify tick（配信開始通知）
    tokio::spawn(tracker::run_notify_loop(
        engine,
        Duration::from_secs(config.notify_interval_secs),
    ));

    // チャットトランスポートとイベントリアクター
    let channels = vec![config.channel.clone()];
    let (chat, mut chat_events) =
        ChatClient::connect(&config.bot_login, &token, &channels).await?;
    let chat: Arc<dyn ChatSink> = Arc::new(chat);
    let reactor = Arc::new(EventReactor::new(
        db.clone(),
        aggregator,
        chat,
        &config.bot_login,
        &config.channel,
    ));
    tokio::spawn(async move {
        while let Some(event) = chat_events.recv().await {
            if let Err(e) = reactor.handle(event, chrono::Utc::now()).await {
                tracing::warn!("Chat event handling failed: {}", e);
            }
        }
        tracing::warn!("Chat event stream ended");
    });

    // 監視チャンネルのコントロールサーバー
    let control = ControlServer::new(config.control_port, db);
    tokio::spawn(async move {
        if let Err(e) = control.run().await {
            tracing::error!("Control server stopped: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("🛑 Shutdown signal received");
    Ok(())
}

//! アプリケーション設定管理モジュール
//!
//! XDGディレクトリのTOMLファイルから設定を読み込む。トークンなどの
//! 秘匿値は環境変数でも上書きできる。

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// ログ設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// カスタムログディレクトリ（Noneの場合はXDGデフォルト使用）
    pub log_dir: Option<PathBuf>,
    /// ログレベル (trace/debug/info/warn/error)
    pub log_level: String,
    /// ファイル出力有効化
    pub enable_file_logging: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_level: "info".to_string(),
            enable_file_logging: false,
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// セッション集計の対象チャンネル（プライマリチャンネル）
    pub channel: String,

    /// ボットのログイン名
    pub bot_login: String,

    /// Twitch OAuthトークン（環境変数TWITCH_KEYでも指定可）
    #[serde(default)]
    pub token: Option<String>,

    /// Twitch Client-Id（環境変数TWITCH_CLIENT_IDでも指定可）
    #[serde(default)]
    pub client_id: Option<String>,

    /// 通知イベント送信先のWebSocket URL
    pub event_sink_url: String,

    /// 監視チャンネル追加・削除を受け付けるポート
    pub control_port: u16,

    /// presence tickの周期（秒）
    pub presence_interval_secs: u64,

    /// notify tickの周期（秒）
    pub notify_interval_secs: u64,

    /// データベースファイルのパス（Noneの場合はXDGデフォルト使用）
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// ログ設定
    #[serde(default)]
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            channel: "jourloy".to_string(),
            bot_login: "jourlay".to_string(),
            token: None,
            client_id: None,
            event_sink_url: "ws://localhost:8765".to_string(),
            control_port: 8790,
            presence_interval_secs: 1,
            notify_interval_secs: 10,
            database_path: None,
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// トークンを設定または環境変数から解決する
    pub fn resolve_token(&self) -> Result<String> {
        self.token
            .clone()
            .or_else(|| std::env::var("TWITCH_KEY").ok())
            .context("Twitch token not set (config `token` or env TWITCH_KEY)")
    }

    /// Client-Idを設定または環境変数から解決する
    pub fn resolve_client_id(&self) -> Result<String> {
        self.client_id
            .clone()
            .or_else(|| std::env::var("TWITCH_CLIENT_ID").ok())
            .context("Twitch client id not set (config `client_id` or env TWITCH_CLIENT_ID)")
    }
}

/// 設定管理マネージャー
pub struct ConfigManager {
    config_path: PathBuf,
}

impl ConfigManager {
    /// XDGデフォルトの設定パスで作成
    pub fn new() -> Result<Self> {
        Ok(Self {
            config_path: Self::get_config_path()?,
        })
    }

    /// 明示パスで作成
    pub fn with_path(config_path: PathBuf) -> Self {
        Self { config_path }
    }

    /// XDGディレクトリに基づく設定ファイルパスを取得
    fn get_config_path() -> Result<PathBuf> {
        let project_dirs = ProjectDirs::from("dev", "sifyfy", "uptrack")
            .ok_or_else(|| anyhow::anyhow!("Failed to get project directories"))?;
        Ok(project_dirs.config_dir().join("config.toml"))
    }

    /// 設定を読み込む（ファイルがなければデフォルト）
    pub fn load_config(&self) -> Result<AppConfig> {
        if !self.config_path.exists() {
            tracing::info!(
                "Config file not found at {}, using defaults",
                self.config_path.display()
            );
            return Ok(AppConfig::default());
        }

        let content = fs::read_to_string(&self.config_path)
            .with_context(|| format!("Failed to read config: {}", self.config_path.display()))?;
        let config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config: {}", self.config_path.display()))?;
        Ok(config)
    }

    /// 設定を保存する
    pub fn save_config(&self, config: &AppConfig) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }
        let content = toml::to_string_pretty(config)?;
        fs::write(&self.config_path, content)
            .with_context(|| format!("Failed to write config: {}", self.config_path.display()))?;
        Ok(())
    }
}

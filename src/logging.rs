//! ログ初期化
//!
//! tracing-subscriberのEnvFilter + compactフォーマットを基本とし、
//! 設定に応じてtracing-appenderの日次ローテーションファイル出力を重ねる。

use anyhow::Result;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LogConfig;

/// ロギングを初期化する
///
/// ファイル出力が有効な場合は書き込みワーカーのguardを返す。
/// guardはプロセス終了まで保持すること。
pub fn init_logging(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();

    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    if !config.enable_file_logging {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stdout_layer)
            .try_init()?;
        return Ok(None);
    }

    let log_dir = match &config.log_dir {
        Some(dir) => dir.clone(),
        None => {
            let project_dirs = directories::ProjectDirs::from("dev", "sifyfy", "uptrack")
                .ok_or_else(|| anyhow::anyhow!("Failed to get project directories"))?;
            project_dirs.data_dir().join("logs")
        }
    };
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = tracing_appender::rolling::daily(&log_dir, "uptrack.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()?;

    Ok(Some(guard))
}

pub mod crud;
pub mod models;

pub use models::{Chatter, CountMap, RewardMap, StreamSession, TrackedChannel};

use anyhow::Result;
use directories::ProjectDirs;
use parking_lot::Mutex;
use std::path::Path;
use std::path::PathBuf;

/// uptrack用データベース接続管理
///
/// 単一のSQLite接続をMutexで直列化する。各操作はロックを取得したまま
/// read-modify-writeを完結させるため、ライブtickとチャットイベントが
/// 同時に「最初のセッション」を作ろうとしても二重作成は起きない。
pub struct UptrackDatabase {
    connection: Mutex<rusqlite::Connection>,
    pub schema_version: u32,
}

impl UptrackDatabase {
    /// 新しいデータベース接続を作成
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let connection = rusqlite::Connection::open(db_path)?;
        let db = Self {
            connection: Mutex::new(connection),
            schema_version: 1,
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// インメモリデータベースを作成（テスト用）
    pub fn new_in_memory() -> Result<Self> {
        let connection = rusqlite::Connection::open_in_memory()?;
        let db = Self {
            connection: Mutex::new(connection),
            schema_version: 1,
        };

        db.initialize_schema()?;
        Ok(db)
    }

    /// データベーススキーマを初期化
    fn initialize_schema(&self) -> Result<()> {
        self.connection
            .lock()
            .execute_batch(include_str!("schema.sql"))?;
        tracing::info!("Database schema initialized successfully");
        Ok(())
    }
}

/// XDGデータディレクトリからデータベースパスを取得
pub fn get_database_path() -> Result<PathBuf> {
    let project_dirs = ProjectDirs::from("dev", "sifyfy", "uptrack")
        .ok_or_else(|| anyhow::anyhow!("Failed to get project directories"))?;

    let data_dir = project_dirs.data_dir();
    std::fs::create_dir_all(data_dir)?;

    Ok(data_dir.join("uptrack.db"))
}

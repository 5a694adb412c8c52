use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, Row};
use uuid::Uuid;

use super::{Chatter, CountMap, RewardMap, StreamSession, TrackedChannel, UptrackDatabase};

impl UptrackDatabase {
    // ----- chatters（生涯カウンター） -----

    /// 参加者の生涯カウンターを取得
    pub fn get_chatter(&self, username: &str) -> Result<Option<Chatter>> {
        let username = username.to_lowercase();
        let conn = self.connection.lock();
        let mut stmt =
            conn.prepare("SELECT username, seconds, messages FROM chatters WHERE username = ?1")?;
        let chatter = stmt
            .query_map(params![username], |row| {
                Ok(Chatter {
                    username: row.get("username")?,
                    seconds: row.get("seconds")?,
                    messages: row.get("messages")?,
                })
            })?
            .next()
            .transpose()?;
        Ok(chatter)
    }

    /// 視聴秒数を+1する（レコードがなければseconds=1で新規作成）
    pub fn record_chatter_presence(&self, username: &str) -> Result<()> {
        let username = username.to_lowercase();
        let conn = self.connection.lock();
        let updated = conn.execute(
            "UPDATE chatters SET seconds = seconds + 1 WHERE username = ?1",
            params![username],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO chatters (username, seconds, messages) VALUES (?1, 1, 0)",
                params![username],
            )?;
        }
        Ok(())
    }

    /// メッセージ数を+1する（レコードがなければmessages=1で新規作成）
    pub fn record_chatter_message(&self, username: &str) -> Result<()> {
        let username = username.to_lowercase();
        let conn = self.connection.lock();
        let updated = conn.execute(
            "UPDATE chatters SET messages = messages + 1 WHERE username = ?1",
            params![username],
        )?;
        if updated == 0 {
            conn.execute(
                "INSERT INTO chatters (username, seconds, messages) VALUES (?1, 0, 1)",
                params![username],
            )?;
        }
        Ok(())
    }

    /// 参加者カウンターを完全に削除（BAN時のみ。復元不可）
    pub fn delete_chatter(&self, username: &str) -> Result<bool> {
        let username = username.to_lowercase();
        let conn = self.connection.lock();
        let deleted = conn.execute("DELETE FROM chatters WHERE username = ?1", params![username])?;
        Ok(deleted > 0)
    }

    // ----- tracked_channels（配信開始通知の監視対象） -----

    /// 監視対象チャンネルを追加
    ///
    /// 永続化エラーはログに落としてfalseを返す（呼び出し側には伝播しない）。
    /// usernameはPRIMARY KEYなので二重追加もfalseになる。
    pub fn add_tracked_channel(&self, username: &str) -> bool {
        let username = username.to_lowercase();
        let conn = self.connection.lock();
        match conn.execute(
            "INSERT INTO tracked_channels (username, notified, notified_at) VALUES (?1, 0, NULL)",
            params![username],
        ) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to add tracked channel {}: {}", username, e);
                false
            }
        }
    }

    /// 監視対象チャンネルを削除
    ///
    /// 存在しないチャンネルの削除もtrue（元サービスのfindOneAndDelete互換）。
    pub fn remove_tracked_channel(&self, username: &str) -> bool {
        let username = username.to_lowercase();
        let conn = self.connection.lock();
        match conn.execute(
            "DELETE FROM tracked_channels WHERE username = ?1",
            params![username],
        ) {
            Ok(_) => true,
            Err(e) => {
                tracing::error!("Failed to remove tracked channel {}: {}", username, e);
                false
            }
        }
    }

    /// 監視対象チャンネルを全件取得
    pub fn list_tracked_channels(&self) -> Result<Vec<TrackedChannel>> {
        let conn = self.connection.lock();
        let mut stmt =
            conn.prepare("SELECT username, notified, notified_at FROM tracked_channels")?;
        let iter = stmt.query_map([], |row| {
            Ok(TrackedChannel {
                username: row.get("username")?,
                notified: row.get("notified")?,
                notified_at: row.get("notified_at")?,
            })
        })?;

        let mut channels = Vec::new();
        for channel in iter {
            channels.push(channel?);
        }
        Ok(channels)
    }

    /// 通知済みとして記録（notified=true, notified_at=at）
    pub fn mark_notified(&self, username: &str, at: DateTime<Utc>) -> Result<()> {
        let username = username.to_lowercase();
        let conn = self.connection.lock();
        conn.execute(
            "UPDATE tracked_channels SET notified = 1, notified_at = ?1 WHERE username = ?2",
            params![at, username],
        )?;
        Ok(())
    }

    /// クールダウン経過後のリセット（notified=false）
    pub fn reset_notified(&self, username: &str) -> Result<()> {
        let username = username.to_lowercase();
        let conn = self.connection.lock();
        conn.execute(
            "UPDATE tracked_channels SET notified = 0 WHERE username = ?1",
            params![username],
        )?;
        Ok(())
    }

    // ----- sessions（配信セッション集計） -----

    /// 現在のセッションを解決し、なければ新規作成する
    ///
    /// オープンなセッションをstarted_at昇順に並べ、経過時間がlookback以内の
    /// 最後の1件を現在のセッションとする。該当なしなら空のカウンターマップで
    /// 新規作成する。検索と作成は同一ロック内で行うため、ライブtickと
    /// チャットメッセージが同時に走っても二重作成にならない。
    pub fn resolve_current_session(
        &self,
        channel: &str,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<StreamSession> {
        let channel = channel.to_lowercase();
        let conn = self.connection.lock();

        if let Some(session) = Self::find_current_session(&conn, &channel, now, lookback)? {
            return Ok(session);
        }

        let session = StreamSession {
            id: Uuid::new_v4().to_string(),
            channel: channel.clone(),
            started_at: now,
            ended_at: None,
            last_live_at: now,
            messages: CountMap::new(),
            rewards: RewardMap::new(),
            presence: CountMap::new(),
        };
        conn.execute(
            "INSERT INTO sessions (id, channel, started_at, ended_at, last_live_at, messages, rewards, presence)
             VALUES (?1, ?2, ?3, NULL, ?4, '{}', '{}', '{}')",
            params![session.id, channel, session.started_at, session.last_live_at],
        )?;

        tracing::info!("Created new session {} for channel {}", session.id, channel);
        Ok(session)
    }

    /// 現在のセッションを検索する（新規作成はしない）
    pub fn current_open_session(
        &self,
        channel: &str,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<Option<StreamSession>> {
        let channel = channel.to_lowercase();
        let conn = self.connection.lock();
        Self::find_current_session(&conn, &channel, now, lookback)
    }

    fn find_current_session(
        conn: &Connection,
        channel: &str,
        now: DateTime<Utc>,
        lookback: Duration,
    ) -> Result<Option<StreamSession>> {
        let mut stmt = conn.prepare(
            "SELECT * FROM sessions
             WHERE channel = ?1 AND ended_at IS NULL AND started_at < ?2
             ORDER BY started_at ASC",
        )?;
        let iter = stmt.query_map(params![channel, now], Self::row_to_session)?;

        // 昇順走査なので、条件を満たす最後の1件が残る
        let mut current = None;
        for session in iter {
            let session = session?;
            if session.age(now) <= lookback {
                current = Some(session);
            }
        }
        Ok(current)
    }

    /// ライブtickの観測をセッションに畳み込む
    ///
    /// 各参加者のpresenceカウントを+1し、last_live_atを更新する。
    /// クローズ済みセッションは一切変更しない。
    pub fn record_presence_tick(
        &self,
        session_id: &str,
        participants: &[String],
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.connection.lock();
        let Some(mut session) = Self::load_open_session(&conn, session_id)? else {
            return Ok(());
        };

        for participant in participants {
            *session.presence.entry(participant.to_lowercase()).or_insert(0) += 1;
        }

        conn.execute(
            "UPDATE sessions SET presence = ?1, last_live_at = ?2 WHERE id = ?3 AND ended_at IS NULL",
            params![serde_json::to_string(&session.presence)?, now, session_id],
        )?;
        Ok(())
    }

    /// セッションのメッセージカウントを+1する（オープンなセッションのみ）
    pub fn fold_session_message(&self, session_id: &str, username: &str) -> Result<()> {
        let username = username.to_lowercase();
        let conn = self.connection.lock();
        let Some(mut session) = Self::load_open_session(&conn, session_id)? else {
            return Ok(());
        };

        *session.messages.entry(username).or_insert(0) += 1;

        conn.execute(
            "UPDATE sessions SET messages = ?1 WHERE id = ?2 AND ended_at IS NULL",
            params![serde_json::to_string(&session.messages)?, session_id],
        )?;
        Ok(())
    }

    /// セッションの報酬カウントを+1する（オープンなセッションのみ）
    pub fn fold_session_reward(
        &self,
        session_id: &str,
        username: &str,
        reward_kind: &str,
    ) -> Result<()> {
        let username = username.to_lowercase();
        let conn = self.connection.lock();
        let Some(mut session) = Self::load_open_session(&conn, session_id)? else {
            return Ok(());
        };

        *session
            .rewards
            .entry(username)
            .or_default()
            .entry(reward_kind.to_string())
            .or_insert(0) += 1;

        conn.execute(
            "UPDATE sessions SET rewards = ?1 WHERE id = ?2 AND ended_at IS NULL",
            params![serde_json::to_string(&session.rewards)?, session_id],
        )?;
        Ok(())
    }

    /// セッションをクローズする
    ///
    /// ended_atを設定し、クローズ後のレコードを返す。すでにクローズ済みなら
    /// 何も変更せずNoneを返す。
    pub fn close_session(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<StreamSession>> {
        let conn = self.connection.lock();
        let updated = conn.execute(
            "UPDATE sessions SET ended_at = ?1 WHERE id = ?2 AND ended_at IS NULL",
            params![now, session_id],
        )?;
        if updated == 0 {
            return Ok(None);
        }
        Self::load_session(&conn, session_id)
    }

    /// IDでセッションを取得
    pub fn get_session(&self, session_id: &str) -> Result<Option<StreamSession>> {
        let conn = self.connection.lock();
        Self::load_session(&conn, session_id)
    }

    fn load_session(conn: &Connection, session_id: &str) -> Result<Option<StreamSession>> {
        let mut stmt = conn.prepare("SELECT * FROM sessions WHERE id = ?1")?;
        let session = stmt
            .query_map(params![session_id], Self::row_to_session)?
            .next()
            .transpose()?;
        Ok(session)
    }

    fn load_open_session(conn: &Connection, session_id: &str) -> Result<Option<StreamSession>> {
        let mut stmt = conn.prepare("SELECT * FROM sessions WHERE id = ?1 AND ended_at IS NULL")?;
        let session = stmt
            .query_map(params![session_id], Self::row_to_session)?
            .next()
            .transpose()?;
        Ok(session)
    }

    /// データベースの行をセッションに変換
    fn row_to_session(row: &Row) -> rusqlite::Result<StreamSession> {
        let messages: String = row.get("messages")?;
        let rewards: String = row.get("rewards")?;
        let presence: String = row.get("presence")?;

        Ok(StreamSession {
            id: row.get("id")?,
            channel: row.get("channel")?,
            started_at: row.get("started_at")?,
            ended_at: row.get("ended_at")?,
            last_live_at: row.get("last_live_at")?,
            messages: serde_json::from_str(&messages).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            rewards: serde_json::from_str(&rewards).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
            presence: serde_json::from_str(&presence).map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    Box::new(e),
                )
            })?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_creation() -> Result<()> {
        let db = UptrackDatabase::new_in_memory()?;
        assert_eq!(db.schema_version, 1);
        Ok(())
    }

    #[test]
    fn test_chatter_presence_seeds_to_one() -> Result<()> {
        let db = UptrackDatabase::new_in_memory()?;

        db.record_chatter_presence("Viewer1")?;
        let chatter = db.get_chatter("viewer1")?.unwrap();
        assert_eq!(chatter.seconds, 1);
        assert_eq!(chatter.messages, 0);

        db.record_chatter_presence("VIEWER1")?;
        let chatter = db.get_chatter("viewer1")?.unwrap();
        assert_eq!(chatter.seconds, 2);
        Ok(())
    }

    #[test]
    fn test_chatter_message_seeds_to_one() -> Result<()> {
        let db = UptrackDatabase::new_in_memory()?;

        db.record_chatter_message("viewer1")?;
        let chatter = db.get_chatter("viewer1")?.unwrap();
        assert_eq!(chatter.messages, 1);
        assert_eq!(chatter.seconds, 0);
        Ok(())
    }

    #[test]
    fn test_delete_chatter() -> Result<()> {
        let db = UptrackDatabase::new_in_memory()?;

        db.record_chatter_presence("viewer1")?;
        assert!(db.delete_chatter("viewer1")?);
        assert!(db.get_chatter("viewer1")?.is_none());
        assert!(!db.delete_chatter("viewer1")?);
        Ok(())
    }

    #[test]
    fn test_tracked_channel_add_remove() -> Result<()> {
        let db = UptrackDatabase::new_in_memory()?;

        assert!(db.add_tracked_channel("Streamer1"));
        // PRIMARY KEYなので二重追加はfalse
        assert!(!db.add_tracked_channel("streamer1"));

        let channels = db.list_tracked_channels()?;
        assert_eq!(channels.len(), 1);
        assert_eq!(channels[0].username, "streamer1");
        assert!(!channels[0].notified);
        assert!(channels[0].notified_at.is_none());

        assert!(db.remove_tracked_channel("streamer1"));
        // 存在しないチャンネルの削除もtrue
        assert!(db.remove_tracked_channel("streamer1"));
        assert!(db.list_tracked_channels()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_mark_and_reset_notified() -> Result<()> {
        let db = UptrackDatabase::new_in_memory()?;
        let now = Utc::now();

        db.add_tracked_channel("streamer1");
        db.mark_notified("streamer1", now)?;

        let channel = &db.list_tracked_channels()?[0];
        assert!(channel.notified);
        assert_eq!(channel.notified_at, Some(now));

        db.reset_notified("streamer1")?;
        let channel = &db.list_tracked_channels()?[0];
        assert!(!channel.notified);
        Ok(())
    }

    #[test]
    fn test_resolve_creates_then_reuses_session() -> Result<()> {
        let db = UptrackDatabase::new_in_memory()?;
        let now = Utc::now();
        let lookback = Duration::hours(24);

        let first = db.resolve_current_session("jourloy", now, lookback)?;
        let second = db.resolve_current_session("jourloy", now + Duration::minutes(5), lookback)?;
        assert_eq!(first.id, second.id);
        Ok(())
    }

    #[test]
    fn test_resolve_ignores_stale_open_session() -> Result<()> {
        let db = UptrackDatabase::new_in_memory()?;
        let now = Utc::now();
        let lookback = Duration::hours(24);

        let stale = db.resolve_current_session("jourloy", now - Duration::hours(30), lookback)?;
        let fresh = db.resolve_current_session("jourloy", now, lookback)?;
        assert_ne!(stale.id, fresh.id);

        // 古いオープンセッションはクローズされずに残る
        let stale_reloaded = db.get_session(&stale.id)?.unwrap();
        assert!(stale_reloaded.is_open());
        Ok(())
    }

    #[test]
    fn test_presence_tick_folding() -> Result<()> {
        let db = UptrackDatabase::new_in_memory()?;
        let now = Utc::now();
        let session = db.resolve_current_session("jourloy", now, Duration::hours(24))?;

        let participants = vec!["Viewer1".to_string(), "viewer2".to_string()];
        db.record_presence_tick(&session.id, &participants, now + Duration::seconds(1))?;
        db.record_presence_tick(&session.id, &participants[..1], now + Duration::seconds(2))?;

        let session = db.get_session(&session.id)?.unwrap();
        assert_eq!(session.presence.get("viewer1"), Some(&2));
        assert_eq!(session.presence.get("viewer2"), Some(&1));
        assert_eq!(session.last_live_at, now + Duration::seconds(2));
        Ok(())
    }

    #[test]
    fn test_closed_session_rejects_folding() -> Result<()> {
        let db = UptrackDatabase::new_in_memory()?;
        let now = Utc::now();
        let session = db.resolve_current_session("jourloy", now, Duration::hours(24))?;

        let closed = db.close_session(&session.id, now + Duration::hours(1))?;
        assert!(closed.is_some());
        // 二重クローズは何もしない
        assert!(db.close_session(&session.id, now + Duration::hours(2))?.is_none());

        db.record_presence_tick(&session.id, &["viewer1".to_string()], now)?;
        db.fold_session_message(&session.id, "viewer1")?;
        db.fold_session_reward(&session.id, "viewer1", "highlight")?;

        let reloaded = db.get_session(&session.id)?.unwrap();
        assert!(reloaded.presence.is_empty());
        assert!(reloaded.messages.is_empty());
        assert!(reloaded.rewards.is_empty());
        assert_eq!(reloaded.ended_at, Some(now + Duration::hours(1)));
        Ok(())
    }

    #[test]
    fn test_message_and_reward_folding() -> Result<()> {
        let db = UptrackDatabase::new_in_memory()?;
        let now = Utc::now();
        let session = db.resolve_current_session("jourloy", now, Duration::hours(24))?;

        db.fold_session_message(&session.id, "Viewer1")?;
        db.fold_session_message(&session.id, "viewer1")?;
        db.fold_session_reward(&session.id, "viewer1", "highlight")?;

        let session = db.get_session(&session.id)?.unwrap();
        assert_eq!(session.messages.get("viewer1"), Some(&2));
        assert_eq!(session.rewards["viewer1"]["highlight"], 1);
        Ok(())
    }
}

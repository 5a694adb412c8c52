//! セッション集計のステートマシン
//!
//! 監視チャンネルごとに `NoActiveSession → Live → GracePeriod → (Live | Closed)`
//! を遷移する。状態は全てデータベース上のセッションレコード
//! （`ended_at` と `last_live_at`）から導出されるため、プロセスを
//! 再起動してもグレース期間の進行は失われない。

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::database::{StreamSession, UptrackDatabase};

/// 現在のセッションとして再利用できる開始時刻の上限（時間）
///
/// これより古いオープンセッションには再接続しない。新しいセッションを
/// 隣に作り、古い方はオープンのまま残る（クローズはグレース経路のみ）。
pub const SESSION_LOOKBACK_HOURS: i64 = 24;

/// ライブ観測が途絶えてからセッションをクローズするまでの猶予（分）
pub const GRACE_PERIOD_MINUTES: i64 = 10;

/// 配信セッションのアグリゲーター
///
/// セッションレコードの変更は全てここを経由する。イベントリアクターも
/// `fold_message`越しにのみセッションへ書き込む。
pub struct SessionAggregator {
    db: Arc<UptrackDatabase>,
    channel: String,
}

impl SessionAggregator {
    pub fn new(db: Arc<UptrackDatabase>, channel: &str) -> Self {
        Self {
            db,
            channel: channel.to_lowercase(),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    fn lookback() -> Duration {
        Duration::hours(SESSION_LOOKBACK_HOURS)
    }

    /// ライブtickの観測を取り込む
    ///
    /// 現在のセッションを解決（なければ作成）し、参加者ごとに
    /// presenceカウントと生涯視聴秒数を+1する。参加者ゼロでも
    /// `last_live_at`は更新され、グレース状態は解除される。
    pub fn observe_live(
        &self,
        participants: &[String],
        now: DateTime<Utc>,
    ) -> Result<StreamSession> {
        let session = self
            .db
            .resolve_current_session(&self.channel, now, Self::lookback())?;

        self.db.record_presence_tick(&session.id, participants, now)?;
        for participant in participants {
            self.db.record_chatter_presence(participant)?;
        }

        Ok(session)
    }

    /// ライブ観測が得られなかったtickを取り込む
    ///
    /// オープンなセッションがあり、最後のライブ観測から猶予時間を
    /// 超えていればクローズし、クローズ済みレコードを返す。
    /// 猶予時間内なら何も変更しない（短い観測フラップは同一セッション扱い）。
    pub fn observe_offline(&self, now: DateTime<Utc>) -> Result<Option<StreamSession>> {
        let Some(session) = self
            .db
            .current_open_session(&self.channel, now, Self::lookback())?
        else {
            return Ok(None);
        };

        let gap = now - session.last_live_at;
        if gap <= Duration::minutes(GRACE_PERIOD_MINUTES) {
            tracing::debug!(
                "Channel {} in grace period ({}s since last live tick)",
                self.channel,
                gap.num_seconds()
            );
            return Ok(None);
        }

        let closed = self.db.close_session(&session.id, now)?;
        if closed.is_some() {
            tracing::info!(
                "Closed session {} for channel {} after {}s without liveness",
                session.id,
                self.channel,
                gap.num_seconds()
            );
        }
        Ok(closed)
    }

    /// チャットメッセージをセッションのメッセージ集計に畳み込む
    ///
    /// ライブtickと同じ規則でセッションを解決するため、ライブtickより先に
    /// 届いたメッセージがセッションレコードを開くこともある。
    pub fn fold_message(&self, username: &str, now: DateTime<Utc>) -> Result<()> {
        let session = self
            .db
            .resolve_current_session(&self.channel, now, Self::lookback())?;
        self.db.fold_session_message(&session.id, username)
    }
}

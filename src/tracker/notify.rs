//! 配信開始通知の重複抑止エンジン
//!
//! セッション集計とは独立したクールダウン状態（`notified` / `notified_at`）
//! だけを見て、監視チャンネルごとに「クールダウン窓あたり最大1通知」を守る。
//! クールダウンは保存済みタイムスタンプとの比較で毎tick再計算する。
//! 専用のタイマーは持たない。

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;

use crate::api::StreamApi;
use crate::database::UptrackDatabase;
use crate::outbound::{EventSink, OutboundEvent};

/// 同一チャンネルへの再通知を抑止する時間（時間）
pub const NOTIFY_COOLDOWN_HOURS: i64 = 5;

/// 「配信開始直後」とみなすstarted_atの新しさ（分）
///
/// これより古い開始時刻は、前回のtick群で通知済みか、
/// 監視追加前から続いている配信なので通知しない。
pub const RECENCY_WINDOW_MINUTES: i64 = 5;

/// 配信開始通知エンジン
pub struct NotificationEngine {
    db: Arc<UptrackDatabase>,
    api: Arc<dyn StreamApi>,
    sink: Arc<dyn EventSink>,
}

impl NotificationEngine {
    pub fn new(
        db: Arc<UptrackDatabase>,
        api: Arc<dyn StreamApi>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self { db, api, sink }
    }

    /// 通知tickを1回実行する
    ///
    /// 1. 監視チャンネルを全件ロード
    /// 2. クールダウンが明けたチャンネルはnotifiedをリセットした上で
    ///    通知候補に入れる。クールダウン中のチャンネルは今回のtickでは
    ///    完全にスキップ
    /// 3. 候補のライブ情報を1回のバッチ呼び出しで取得
    /// 4. started_atが直近のものだけ"went live"を送信し、truthyなACKが
    ///    返った場合のみ notified=true を記録する。falsyなACKは次のtickで
    ///    そのまま再候補になる（バックオフなし）
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<()> {
        let channels = self.db.list_tracked_channels()?;

        let mut eligible = Vec::new();
        for channel in channels {
            match (channel.notified, channel.notified_at) {
                (true, Some(at)) => {
                    if now - at > Duration::hours(NOTIFY_COOLDOWN_HOURS) {
                        self.db.reset_notified(&channel.username)?;
                        eligible.push(channel.username);
                    }
                }
                // notified_atのないnotifiedは不整合なので候補に戻す
                _ => eligible.push(channel.username),
            }
        }

        if eligible.is_empty() {
            return Ok(());
        }

        let streams = self.api.stream_info(&eligible).await;
        for stream in streams {
            let Some(started_at) = stream.started_at else {
                continue;
            };
            if now - started_at >= Duration::minutes(RECENCY_WINDOW_MINUTES) {
                continue;
            }

            let login = stream.user_login.clone();
            let acknowledged = self.sink.send(OutboundEvent::WentLive(stream)).await;
            if acknowledged {
                self.db.mark_notified(&login, now)?;
                tracing::info!("Went-live notification delivered for {}", login);
            } else {
                tracing::warn!(
                    "Went-live notification for {} not acknowledged, will retry next tick",
                    login
                );
            }
        }

        Ok(())
    }
}

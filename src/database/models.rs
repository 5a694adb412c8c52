use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// 参加者ごとのカウンターマップ（identity -> count）
pub type CountMap = HashMap<String, i64>;

/// 参加者ごとの報酬カウンターマップ（identity -> reward kind -> count）
pub type RewardMap = HashMap<String, HashMap<String, i64>>;

/// チャット参加者の生涯カウンター
///
/// `username`は常に小文字正規化済み。視聴秒数とメッセージ数は
/// セッションをまたいで累積し、BANでのみ削除される。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chatter {
    pub username: String,
    pub seconds: i64,
    pub messages: i64,
}

/// 配信開始通知の監視対象チャンネル
///
/// 不変条件: `notified`がtrueなら`notified_at`は必ずSome。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedChannel {
    pub username: String,
    pub notified: bool,
    pub notified_at: Option<DateTime<Utc>>,
}

/// 1回の連続した配信を表すセッション集計レコード
///
/// `ended_at`がNoneの間はオープン状態。チャンネルごとに論理的には
/// 高々1つのオープンセッションが「現在のセッション」になる。
/// `last_live_at`は最後にライブ観測したtickの時刻で、グレース期間の
/// 進行はこの保存済みタイムスタンプだけから導出する（プロセス再起動に耐える）。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSession {
    pub id: String,
    pub channel: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub last_live_at: DateTime<Utc>,
    pub messages: CountMap,
    pub rewards: RewardMap,
    pub presence: CountMap,
}

impl StreamSession {
    pub fn is_open(&self) -> bool {
        self.ended_at.is_none()
    }

    /// セッション開始からの経過時間
    pub fn age(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.started_at
    }
}

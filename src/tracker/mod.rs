//! 配信の観測tickを駆動するモジュール
//!
//! 2本の独立した周期タイマーが走る:
//! - presence tick（既定1秒）: ライブ判定と参加者集計（セッション集計）
//! - notify tick（既定10秒）: 配信開始通知の判定
//!
//! どちらのtickも失敗は「今回は観測なし」として次の周期に委ねる。
//! ループが互いをキャンセルすることはない。

pub mod notify;
pub mod session;

pub use notify::NotificationEngine;
pub use session::SessionAggregator;

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

use crate::api::StreamApi;
use crate::outbound::{EventSink, OutboundEvent};

/// presence tickを1回実行する
///
/// ライブならchattersを取得してセッションに畳み込み、オフラインなら
/// グレース判定を行う。グレース超過でクローズされたセッションは
/// "session finished"イベントとして送信する。ACKは待つが結果は
/// 要求しない（リトライなし）。
pub async fn presence_tick(
    api: &dyn StreamApi,
    aggregator: &SessionAggregator,
    sink: &dyn EventSink,
    now: DateTime<Utc>,
) -> Result<()> {
    let channel = aggregator.channel().to_string();
    let streams = api.stream_info(&[channel.clone()]).await;
    let live = streams
        .first()
        .map(|s| s.started_at.is_some())
        .unwrap_or(false);

    if live {
        let participants = api.chatters(&channel).await.unwrap_or_default();
        aggregator.observe_live(&participants, now)?;
    } else if let Some(closed) = aggregator.observe_offline(now)? {
        let acknowledged = sink.send(OutboundEvent::SessionFinished(closed)).await;
        if !acknowledged {
            tracing::warn!("Session-finished event for {} not acknowledged", channel);
        }
    }

    Ok(())
}

/// presence tickの周期ループ
pub async fn run_presence_loop(
    api: Arc<dyn StreamApi>,
    aggregator: Arc<SessionAggregator>,
    sink: Arc<dyn EventSink>,
    period: Duration,
) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if let Err(e) = presence_tick(api.as_ref(), &aggregator, sink.as_ref(), Utc::now()).await {
            tracing::warn!("Presence tick failed: {}", e);
        }
    }
}

/// notify tickの周期ループ
pub async fn run_notify_loop(engine: Arc<NotificationEngine>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        if let Err(e) = engine.tick(Utc::now()).await {
            tracing::warn!("Notification tick failed: {}", e);
        }
    }
}

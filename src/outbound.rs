//! 下流コンシューマーへのイベント送信
//!
//! "went live"と"session finished"の2種類のイベントをWebSocketで送り、
//! 1フレームのブール応答をACKとして受け取る。送信ごとに独立で、
//! リトライも順序保証もない。失敗はfalse ACKと同じ扱い。

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use crate::api::StreamInfo;
use crate::database::StreamSession;

/// 下流に送る通知イベント
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum OutboundEvent {
    /// チャンネルが配信を開始した（Helixレコードをそのまま運ぶ）
    WentLive(StreamInfo),
    /// セッションがクローズされた（集計済みレコードをそのまま運ぶ）
    SessionFinished(StreamSession),
}

impl OutboundEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::WentLive(_) => "went-live",
            OutboundEvent::SessionFinished(_) => "session-finished",
        }
    }
}

/// 通知イベントの送信先
///
/// `send`は呼び出し側から見て同期的で、ACK（またはfalse扱いの失敗）が
/// 返るまでサスペンドする。
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: OutboundEvent) -> bool;
}

/// ACK応答の待ち時間上限
const ACK_TIMEOUT: Duration = Duration::from_secs(10);

/// WebSocket経由のイベント送信
///
/// 送信ごとに接続し、JSONフレームを1つ書いて応答フレームを1つ待つ。
pub struct WebSocketSink {
    url: String,
    ack_timeout: Duration,
}

impl WebSocketSink {
    pub fn new(url: String) -> Self {
        Self {
            url,
            ack_timeout: ACK_TIMEOUT,
        }
    }

    async fn send_inner(&self, event: &OutboundEvent) -> anyhow::Result<bool> {
        let payload = serde_json::to_string(event)?;
        let (mut socket, _) = connect_async(&self.url).await?;

        socket.send(Message::Text(payload)).await?;

        let reply = tokio::time::timeout(self.ack_timeout, socket.next())
            .await
            .map_err(|_| anyhow::anyhow!("ACK timeout"))?
            .ok_or_else(|| anyhow::anyhow!("Connection closed before ACK"))??;

        let _ = socket.close(None).await;
        Ok(parse_ack(&reply))
    }
}

/// 応答フレームをブールACKとして解釈する
///
/// `true` / `{"ok": true}` のどちらの形式も受け付ける。
/// 解釈できないフレームはfalse。
fn parse_ack(message: &Message) -> bool {
    let Message::Text(text) = message else {
        return false;
    };
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(serde_json::Value::Bool(ack)) => ack,
        Ok(value) => value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        Err(_) => false,
    }
}

#[async_trait]
impl EventSink for WebSocketSink {
    async fn send(&self, event: OutboundEvent) -> bool {
        let kind = event.kind();
        match self.send_inner(&event).await {
            Ok(ack) => {
                tracing::debug!("Event {} acknowledged: {}", kind, ack);
                ack
            }
            Err(e) => {
                tracing::warn!("Failed to deliver {} event: {}", kind, e);
                false
            }
        }
    }
}

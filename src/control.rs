//! 監視チャンネルの外部操作インターフェース
//!
//! `add-uptime` / `remove-uptime` の2操作をWebSocketで受け付ける
//! 小さなコントロールサーバー。リクエストはJSONの`{op, channel}`、
//! 応答は`{"ok": bool}`。永続化エラーはokの=falseに変換され、
//! 呼び出し側に障害としては伝播しない。

use anyhow::Result;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;

use crate::database::UptrackDatabase;

/// コントロールリクエスト
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "kebab-case")]
pub enum ControlRequest {
    /// 監視対象チャンネルを追加する
    AddUptime { channel: String },
    /// 監視対象チャンネルを削除する
    RemoveUptime { channel: String },
}

/// コントロール応答
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ControlResponse {
    pub ok: bool,
}

/// リクエストを実行する
pub fn dispatch(db: &UptrackDatabase, request: ControlRequest) -> ControlResponse {
    let ok = match request {
        ControlRequest::AddUptime { channel } => {
            tracing::info!("Control: add uptime channel {}", channel);
            db.add_tracked_channel(&channel)
        }
        ControlRequest::RemoveUptime { channel } => {
            tracing::info!("Control: remove uptime channel {}", channel);
            db.remove_tracked_channel(&channel)
        }
    };
    ControlResponse { ok }
}

/// コントロールサーバー
pub struct ControlServer {
    port: u16,
    db: Arc<UptrackDatabase>,
}

impl ControlServer {
    pub fn new(port: u16, db: Arc<UptrackDatabase>) -> Self {
        Self { port, db }
    }

    /// 接続を受け付け続ける
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(("127.0.0.1", self.port)).await?;
        tracing::info!("Control server listening on port {}", self.port);

        loop {
            let (stream, addr) = listener.accept().await?;
            tracing::debug!("Control connection from {}", addr);
            let db = self.db.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, db).await {
                    tracing::warn!("Control connection error: {}", e);
                }
            });
        }
    }
}

async fn handle_connection(stream: TcpStream, db: Arc<UptrackDatabase>) -> Result<()> {
    let mut socket = tokio_tungstenite::accept_async(stream).await?;

    while let Some(frame) = socket.next().await {
        let frame = frame?;
        let Message::Text(text) = frame else {
            if matches!(frame, Message::Close(_)) {
                break;
            }
            continue;
        };

        let response = match serde_json::from_str::<ControlRequest>(&text) {
            Ok(request) => dispatch(&db, request),
            Err(e) => {
                tracing::warn!("Malformed control request: {}", e);
                ControlResponse { ok: false }
            }
        };
        socket
            .send(Message::Text(serde_json::to_string(&response)?))
            .await?;
    }

    Ok(())
}

pub mod irc;
pub mod reactor;

pub use irc::{ChatClient, ChatError, ChatEvent, ChatMessage};
pub use reactor::EventReactor;

use anyhow::Result;
use async_trait::async_trait;

/// チャットトランスポートへの送信アクション
///
/// リアクターはこのトレイト越しにのみ発言・削除を行う。
/// テストでは送信内容を記録するフェイクに差し替えられる。
#[async_trait]
pub trait ChatSink: Send + Sync {
    /// チャンネルにメッセージを送信する
    async fn say(&self, channel: &str, text: &str) -> Result<()>;

    /// メッセージをモデレーション削除する
    async fn delete_message(&self, channel: &str, message_id: &str) -> Result<()>;
}

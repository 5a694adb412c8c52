//! チャットイベントへの反応
//!
//! メッセージ到着と同期して生涯カウンターとセッション集計を更新し、
//! リンクポリシーとコマンド応答を処理する。BANはプライマリチャンネルに
//! 限って参加者カウンターを完全削除する。

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::sync::Arc;

use super::{ChatEvent, ChatMessage, ChatSink};
use crate::database::UptrackDatabase;
use crate::tracker::SessionAggregator;

/// 生涯視聴秒数を`1h 2m 3s`形式に整形する
pub fn format_duration(seconds: i64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds - hours * 3600) / 60;
    let secs = seconds - hours * 3600 - minutes * 60;
    format!("{}h {}m {}s", hours, minutes, secs)
}

/// 先頭トークンからコマンド名を取り出す
///
/// 最初の空白区切りトークンを`!`で分割し、2番目の要素をコマンドとする。
/// `!followerage hello` -> `followerage`
pub fn parse_command(text: &str) -> Option<&str> {
    let first_token = text.split_whitespace().next()?;
    let mut parts = first_token.split('!');
    parts.next();
    parts.next().filter(|command| !command.is_empty())
}

/// チャットイベントのリアクター
pub struct EventReactor {
    db: Arc<UptrackDatabase>,
    aggregator: Arc<SessionAggregator>,
    chat: Arc<dyn ChatSink>,
    bot_login: String,
    primary_channel: String,
    link_pattern: Regex,
}

impl EventReactor {
    pub fn new(
        db: Arc<UptrackDatabase>,
        aggregator: Arc<SessionAggregator>,
        chat: Arc<dyn ChatSink>,
        bot_login: &str,
        primary_channel: &str,
    ) -> Self {
        Self {
            db,
            aggregator,
            chat,
            bot_login: bot_login.to_lowercase(),
            primary_channel: primary_channel.to_lowercase(),
            link_pattern: Regex::new(r"(?i)\b(https?://|www\.)\S+").unwrap(),
        }
    }

    /// イベントを1件処理する
    pub async fn handle(&self, event: ChatEvent, now: DateTime<Utc>) -> Result<()> {
        match event {
            ChatEvent::Message(message) => self.handle_message(message, now).await,
            ChatEvent::Ban { channel, username } => self.handle_ban(&channel, &username).await,
        }
    }

    async fn handle_message(&self, message: ChatMessage, now: DateTime<Utc>) -> Result<()> {
        // 自分の発言は無視する
        if message.author.eq_ignore_ascii_case(&self.bot_login) {
            return Ok(());
        }

        let username = message.author.to_lowercase();
        self.db.record_chatter_message(&username)?;

        if message.channel.to_lowercase() == self.primary_channel {
            self.aggregator.fold_message(&username, now)?;
        }

        self.apply_link_policy(&message).await;

        if let Some(command) = parse_command(&message.text) {
            if command == "followerage" {
                self.reply_followerage(&message.channel, &username).await?;
            }
        }

        Ok(())
    }

    /// リンクを含むメッセージを権限のない投稿者から削除する
    ///
    /// モデレーター・サブスクライバー・報酬引き換え・配信者のいずれかの
    /// 権限を持っていれば削除しない。削除の失敗はログのみ。
    async fn apply_link_policy(&self, message: &ChatMessage) {
        if !self.link_pattern.is_match(&message.text) {
            return;
        }
        let privileged = message.is_moderator
            || message.is_subscriber
            || message.is_broadcaster
            || message.redeemed_reward;
        if privileged {
            return;
        }

        let Some(message_id) = &message.id else {
            return;
        };
        match self.chat.delete_message(&message.channel, message_id).await {
            Ok(()) => tracing::info!(
                "Deleted link message from {} in #{}",
                message.author,
                message.channel
            ),
            Err(e) => tracing::warn!("Failed to delete message {}: {}", message_id, e),
        }
    }

    /// `!followerage`への応答
    ///
    /// 記録があれば生涯視聴秒数を整形して返し、なければnot-found応答。
    async fn reply_followerage(&self, channel: &str, username: &str) -> Result<()> {
        let reply = match self.db.get_chatter(username)? {
            Some(chatter) => format!("@{}, {}", username, format_duration(chatter.seconds)),
            None => format!("@{}, I have no records for you", username),
        };
        self.chat.say(channel, &reply).await
    }

    /// BANされた参加者のカウンターを削除する（プライマリチャンネルのみ）
    async fn handle_ban(&self, channel: &str, username: &str) -> Result<()> {
        if channel.to_lowercase() != self.primary_channel {
            return Ok(());
        }
        if self.db.delete_chatter(username)? {
            tracing::info!("Removed counters for banned chatter {}", username);
        }
        Ok(())
    }
}

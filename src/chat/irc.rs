//! Twitch IRC（TMI）クライアント
//!
//! WebSocket上のIRCv3接続を張り、PRIVMSG/CLEARCHATを`ChatEvent`に
//! 変換してチャネルに流す。発言とモデレーション削除は`ChatSink`として
//! 同じ接続に書き戻す。PING/PONGは内部で処理する。

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

use super::ChatSink;

const TWITCH_IRC_URL: &str = "wss://irc-ws.chat.twitch.tv:443";

#[derive(thiserror::Error, Debug)]
pub enum ChatError {
    #[error("WebSocket error")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("Chat connection closed")]
    Disconnected,
}

/// チャットトランスポートから届くイベント
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// 通常のチャットメッセージ
    Message(ChatMessage),
    /// ユーザーのBAN（タイムアウトは含まない）
    Ban { channel: String, username: String },
}

/// 受信したチャットメッセージ
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub channel: String,
    pub author: String,
    pub text: String,
    /// モデレーション削除に使うメッセージID
    pub id: Option<String>,
    pub is_moderator: bool,
    pub is_subscriber: bool,
    pub is_broadcaster: bool,
    /// チャンネルポイント報酬の引き換えとして送られたメッセージ
    pub redeemed_reward: bool,
}

/// 生のIRCメッセージ
#[derive(Debug, Clone, PartialEq)]
pub struct IrcMessage {
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl IrcMessage {
    /// prefixの`nick!user@host`からnickを取り出す
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        Some(prefix.split('!').next().unwrap_or(prefix))
    }
}

/// IRCv3タグのエスケープを戻す
fn unescape_tag(value: &str) -> String {
    let mut result = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            result.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => result.push(';'),
            Some('s') => result.push(' '),
            Some('\\') => result.push('\\'),
            Some('r') => result.push('\r'),
            Some('n') => result.push('\n'),
            Some(other) => result.push(other),
            None => {}
        }
    }
    result
}

/// IRCの1行をパースする
pub fn parse_line(line: &str) -> Option<IrcMessage> {
    let mut rest = line.trim_end_matches(['\r', '\n']);
    if rest.is_empty() {
        return None;
    }

    let mut tags = HashMap::new();
    if let Some(stripped) = rest.strip_prefix('@') {
        let (raw_tags, remainder) = stripped.split_once(' ')?;
        for pair in raw_tags.split(';') {
            let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
            tags.insert(key.to_string(), unescape_tag(value));
        }
        rest = remainder;
    }

    let mut prefix = None;
    if let Some(stripped) = rest.strip_prefix(':') {
        let (p, remainder) = stripped.split_once(' ')?;
        prefix = Some(p.to_string());
        rest = remainder;
    }

    let (middle, trailing) = match rest.split_once(" :") {
        Some((middle, trailing)) => (middle, Some(trailing)),
        None => (rest, None),
    };

    let mut parts = middle.split_whitespace();
    let command = parts.next()?.to_string();
    let mut params: Vec<String> = parts.map(str::to_string).collect();
    if let Some(trailing) = trailing {
        params.push(trailing.to_string());
    }

    Some(IrcMessage {
        tags,
        prefix,
        command,
        params,
    })
}

fn has_badge(tags: &HashMap<String, String>, badge: &str) -> bool {
    tags.get("badges")
        .map(|badges| badges.split(',').any(|b| b.starts_with(badge)))
        .unwrap_or(false)
}

/// パース済みIRCメッセージをチャットイベントに変換する
pub fn event_from_irc(message: &IrcMessage) -> Option<ChatEvent> {
    match message.command.as_str() {
        "PRIVMSG" => {
            let channel = message.params.first()?.trim_start_matches('#').to_string();
            let text = message.params.get(1)?.clone();
            let author = message.nick()?.to_string();

            Some(ChatEvent::Message(ChatMessage {
                channel,
                author,
                text,
                id: message.tags.get("id").cloned(),
                is_moderator: message.tags.get("mod").map(|v| v == "1").unwrap_or(false)
                    || has_badge(&message.tags, "moderator/"),
                is_subscriber: message
                    .tags
                    .get("subscriber")
                    .map(|v| v == "1")
                    .unwrap_or(false)
                    || has_badge(&message.tags, "founder/"),
                is_broadcaster: has_badge(&message.tags, "broadcaster/"),
                redeemed_reward: message
                    .tags
                    .get("custom-reward-id")
                    .map(|v| !v.is_empty())
                    .unwrap_or(false),
            }))
        }
        "CLEARCHAT" => {
            let channel = message.params.first()?.trim_start_matches('#').to_string();
            let username = message.params.get(1)?.to_lowercase();
            // ban-duration付きはタイムアウトなのでBANとしては扱わない
            if message.tags.contains_key("ban-duration") {
                return None;
            }
            Some(ChatEvent::Ban { channel, username })
        }
        _ => None,
    }
}

/// Twitch IRCクライアント
///
/// 読み取りループは`connect`が起動したタスクが持ち、受信イベントは
/// 返されたレシーバーに流れる。このハンドルは送信専用。
pub struct ChatClient {
    outgoing: mpsc::UnboundedSender<String>,
    login: String,
}

impl ChatClient {
    /// Twitch IRCに接続してチャンネルにJOINする
    pub async fn connect(
        login: &str,
        token: &str,
        channels: &[String],
    ) -> Result<(Self, mpsc::UnboundedReceiver<ChatEvent>), ChatError> {
        let (socket, _) = connect_async(TWITCH_IRC_URL).await?;
        let (mut write, mut read) = socket.split();

        write
            .send(Message::Text(
                "CAP REQ :twitch.tv/tags twitch.tv/commands".to_string(),
            ))
            .await?;
        write
            .send(Message::Text(format!("PASS oauth:{}", token)))
            .await?;
        write.send(Message::Text(format!("NICK {}", login))).await?;
        for channel in channels {
            write
                .send(Message::Text(format!("JOIN #{}", channel.to_lowercase())))
                .await?;
        }

        let (outgoing, mut outgoing_rx) = mpsc::unbounded_channel::<String>();
        let (events, events_rx) = mpsc::unbounded_channel::<ChatEvent>();

        tokio::spawn(async move {
            'conn: loop {
                tokio::select! {
                    line = outgoing_rx.recv() => {
                        let Some(line) = line else { break };
                        if let Err(e) = write.send(Message::Text(line)).await {
                            tracing::error!("Failed to write to chat connection: {}", e);
                            break;
                        }
                    }
                    frame = read.next() => {
                        match frame {
                            Some(Ok(Message::Text(text))) => {
                                for line in text.lines() {
                                    let Some(message) = parse_line(line) else { continue };
                                    if message.command == "PING" {
                                        let reply = message
                                            .params
                                            .first()
                                            .map(|p| format!("PONG :{}", p))
                                            .unwrap_or_else(|| "PONG".to_string());
                                        if write.send(Message::Text(reply)).await.is_err() {
                                            break 'conn;
                                        }
                                        continue;
                                    }
                                    if let Some(event) = event_from_irc(&message) {
                                        if events.send(event).is_err() {
                                            return;
                                        }
                                    }
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                tracing::warn!("Chat connection closed");
                                break;
                            }
                            Some(Ok(_)) => {}
                            Some(Err(e)) => {
                                tracing::error!("Chat read error: {}", e);
                                break;
                            }
                        }
                    }
                }
            }
        });

        tracing::info!("✅ Connected to Twitch chat as {}", login);
        Ok((
            Self {
                outgoing,
                login: login.to_lowercase(),
            },
            events_rx,
        ))
    }

    pub fn login(&self) -> &str {
        &self.login
    }

    fn send_raw(&self, line: String) -> Result<()> {
        self.outgoing
            .send(line)
            .map_err(|_| ChatError::Disconnected)?;
        Ok(())
    }
}

#[async_trait]
impl ChatSink for ChatClient {
    async fn say(&self, channel: &str, text: &str) -> Result<()> {
        self.send_raw(format!("PRIVMSG #{} :{}", channel, text))
    }

    async fn delete_message(&self, channel: &str, message_id: &str) -> Result<()> {
        self.send_raw(format!("PRIVMSG #{} :/delete {}", channel, message_id))
    }
}

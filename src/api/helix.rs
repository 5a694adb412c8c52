//! Twitch Helix APIクライアント
//!
//! `/helix/streams`のライブ情報バッチ取得と、chattersエンドポイントの
//! 参加者一覧取得をラップする。通知エンジンは複数チャンネルを
//! 1回の`/streams`呼び出しにまとめる。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::StreamApi;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("Request failed")]
    Request(#[from] reqwest::Error),
    #[error("Failed to parse JSON")]
    Parse(#[from] serde_json::Error),
}

/// Helixの配信レコード
///
/// "went live"通知のペイロードとしてそのまま下流に渡すため、
/// APIが返すフィールドを省略せずに持つ。オフライン時はレコード自体が
/// 返らないが、欠けたフィールドにも耐えるよう全てdefault付き。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StreamInfo {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub user_login: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub game_id: String,
    #[serde(default)]
    pub game_name: String,
    #[serde(rename = "type", default)]
    pub stream_type: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub viewer_count: u64,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub thumbnail_url: String,
    #[serde(default)]
    pub tag_ids: Vec<String>,
    #[serde(default)]
    pub is_mature: bool,
}

#[derive(Debug, Deserialize)]
struct StreamsResponse {
    #[serde(default)]
    data: Vec<StreamInfo>,
}

/// chattersエンドポイントのレスポンス
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChattersResponse {
    #[serde(default)]
    pub chatter_count: u64,
    #[serde(default)]
    pub chatters: ChatterGroups,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatterGroups {
    #[serde(default)]
    pub broadcaster: Vec<String>,
    #[serde(default)]
    pub vips: Vec<String>,
    #[serde(default)]
    pub moderators: Vec<String>,
    #[serde(default)]
    pub staff: Vec<String>,
    #[serde(default)]
    pub admins: Vec<String>,
    #[serde(default)]
    pub global_mods: Vec<String>,
    #[serde(default)]
    pub viewers: Vec<String>,
}

/// Helix APIクライアント
#[derive(Debug, Clone)]
pub struct HelixClient {
    http: reqwest::Client,
    token: String,
    client_id: String,
    streams_base: String,
    chatters_base: String,
}

const STREAMS_BASE: &str = "https://api.twitch.tv/helix/streams";
const CHATTERS_BASE: &str = "https://tmi.twitch.tv/group/user";

impl HelixClient {
    pub fn new(token: String, client_id: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            token,
            client_id,
            streams_base: STREAMS_BASE.to_string(),
            chatters_base: CHATTERS_BASE.to_string(),
        }
    }

    /// ベースURLを差し替える（モックサーバー向け）
    pub fn with_endpoints(mut self, streams_base: String, chatters_base: String) -> Self {
        self.streams_base = streams_base;
        self.chatters_base = chatters_base;
        self
    }

    /// 複数チャンネルのuser_loginクエリを1本のURLに組み立てる
    fn streams_url(&self, logins: &[String]) -> String {
        let query = logins
            .iter()
            .map(|login| format!("user_login={}", urlencoding::encode(login)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", self.streams_base, query)
    }

    pub async fn fetch_streams(&self, logins: &[String]) -> Result<Vec<StreamInfo>, FetchError> {
        let response = self
            .http
            .get(self.streams_url(logins))
            .bearer_auth(&self.token)
            .header("Client-Id", &self.client_id)
            .send()
            .await?;

        let text = response.text().await?;
        let parsed: StreamsResponse = serde_json::from_str(&text)?;
        Ok(parsed.data)
    }

    pub async fn fetch_chatters(&self, channel: &str) -> Result<ChattersResponse, FetchError> {
        let url = format!(
            "{}/{}/chatters",
            self.chatters_base,
            urlencoding::encode(channel)
        );
        let response = self.http.get(&url).send().await?;
        let text = response.text().await?;
        let parsed: ChattersResponse = serde_json::from_str(&text)?;
        Ok(parsed)
    }
}

#[async_trait]
impl StreamApi for HelixClient {
    async fn stream_info(&self, logins: &[String]) -> Vec<StreamInfo> {
        if logins.is_empty() {
            return Vec::new();
        }
        match self.fetch_streams(logins).await {
            Ok(streams) => streams,
            Err(e) => {
                // 上流の失敗は「今回のtickは観測なし」に格下げする
                tracing::warn!("Stream info fetch failed: {}", e);
                Vec::new()
            }
        }
    }

    async fn chatters(&self, channel: &str) -> Option<Vec<String>> {
        match self.fetch_chatters(channel).await {
            // 元サービスと同じく、集計対象はviewersリストのみ
            Ok(response) => Some(response.chatters.viewers),
            Err(e) => {
                tracing::warn!("Chatters fetch failed for {}: {}", channel, e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_streams_url_batches_logins() {
        let client = HelixClient::new("token".to_string(), "client".to_string());
        let logins = vec!["jourloy".to_string(), "other channel".to_string()];
        assert_eq!(
            client.streams_url(&logins),
            "https://api.twitch.tv/helix/streams?user_login=jourloy&user_login=other%20channel"
        );
    }

    #[test]
    fn test_stream_info_deserialization() {
        let json = r#"{
            "data": [{
                "id": "123",
                "user_id": "42",
                "user_login": "jourloy",
                "user_name": "Jourloy",
                "game_id": "509658",
                "game_name": "Just Chatting",
                "type": "live",
                "title": "stream title",
                "viewer_count": 57,
                "started_at": "2024-03-01T18:00:00Z",
                "language": "ru",
                "thumbnail_url": "https://example.com/thumb.jpg",
                "tag_ids": [],
                "is_mature": false
            }],
            "pagination": {"cursor": "abc"}
        }"#;

        let parsed: StreamsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.data.len(), 1);
        let stream = &parsed.data[0];
        assert_eq!(stream.user_login, "jourloy");
        assert_eq!(stream.viewer_count, 57);
        assert!(stream.started_at.is_some());
        assert_eq!(stream.stream_type, "live");
    }

    #[test]
    fn test_stream_info_tolerates_missing_fields() {
        let parsed: StreamsResponse =
            serde_json::from_str(r#"{"data": [{"user_login": "jourloy"}]}"#).unwrap();
        assert_eq!(parsed.data[0].user_login, "jourloy");
        assert!(parsed.data[0].started_at.is_none());
    }

    #[test]
    fn test_empty_streams_response() {
        let parsed: StreamsResponse = serde_json::from_str(r#"{"data": []}"#).unwrap();
        assert!(parsed.data.is_empty());

        let parsed: StreamsResponse = serde_json::from_str("{}").unwrap();
        assert!(parsed.data.is_empty());
    }

    #[test]
    fn test_chatters_deserialization() {
        let json = r#"{
            "chatter_count": 4,
            "chatters": {
                "broadcaster": ["jourloy"],
                "vips": [],
                "moderators": ["mod1"],
                "staff": [],
                "admins": [],
                "global_mods": [],
                "viewers": ["viewer1", "viewer2"]
            }
        }"#;

        let parsed: ChattersResponse = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.chatter_count, 4);
        assert_eq!(parsed.chatters.viewers, vec!["viewer1", "viewer2"]);
        assert_eq!(parsed.chatters.moderators, vec!["mod1"]);
    }

    #[test]
    fn test_fetch_error_display() {
        let json_error = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
        let error: FetchError = json_error.into();
        assert_eq!(format!("{}", error), "Failed to parse JSON");
    }
}

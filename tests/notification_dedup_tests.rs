//! 配信開始通知の重複抑止の統合テスト
//!
//! コントロール操作で監視チャンネルを登録し、notify tickを時間を
//! ずらしながら回して「クールダウン窓あたり最大1通知」を検証する。

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use uptrack::{
    api::{StreamApi, StreamInfo},
    control::{dispatch, ControlRequest},
    outbound::{EventSink, OutboundEvent},
    NotificationEngine, UptrackDatabase,
};

struct FakeApi {
    streams: Mutex<Vec<StreamInfo>>,
}

#[async_trait]
impl StreamApi for FakeApi {
    async fn stream_info(&self, logins: &[String]) -> Vec<StreamInfo> {
        self.streams
            .lock()
            .iter()
            .filter(|s| logins.contains(&s.user_login))
            .cloned()
            .collect()
    }

    async fn chatters(&self, _channel: &str) -> Option<Vec<String>> {
        None
    }
}

struct CountingSink {
    ack: Mutex<bool>,
    went_live: Mutex<Vec<String>>,
}

#[async_trait]
impl EventSink for CountingSink {
    async fn send(&self, event: OutboundEvent) -> bool {
        if let OutboundEvent::WentLive(stream) = &event {
            self.went_live.lock().push(stream.user_login.clone());
        }
        *self.ack.lock()
    }
}

fn live_stream(login: &str, started_at: DateTime<Utc>) -> StreamInfo {
    StreamInfo {
        user_login: login.to_string(),
        started_at: Some(started_at),
        title: "test stream".to_string(),
        viewer_count: 3,
        ..Default::default()
    }
}

#[tokio::test]
async fn channel_is_notified_at_most_once_per_cooldown_window() -> Result<()> {
    let db = Arc::new(UptrackDatabase::new_in_memory()?);
    let api = Arc::new(FakeApi {
        streams: Mutex::new(Vec::new()),
    });
    let sink = Arc::new(CountingSink {
        ack: Mutex::new(true),
        went_live: Mutex::new(Vec::new()),
    });
    let engine = NotificationEngine::new(db.clone(), api.clone(), sink.clone());

    assert!(
        dispatch(
            &db,
            ControlRequest::AddUptime {
                channel: "streamer1".to_string()
            }
        )
        .ok
    );

    let t0 = Utc::now();
    *api.streams.lock() = vec![live_stream("streamer1", t0 - Duration::minutes(1))];

    // 最初のtickで通知される
    engine.tick(t0).await?;
    assert_eq!(sink.went_live.lock().len(), 1);

    // 5時間の間、何度tickしても再通知されない
    for minutes in [1i64, 10, 60, 180, 299] {
        // 配信は新しく始まり直したように見えても、クールダウンが勝つ
        *api.streams.lock() =
            vec![live_stream("streamer1", t0 + Duration::minutes(minutes) - Duration::minutes(1))];
        engine.tick(t0 + Duration::minutes(minutes)).await?;
    }
    assert_eq!(sink.went_live.lock().len(), 1);

    // 5時間経過後、新しい配信開始で再び通知される
    let t1 = t0 + Duration::hours(5) + Duration::minutes(1);
    *api.streams.lock() = vec![live_stream("streamer1", t1 - Duration::minutes(1))];
    engine.tick(t1).await?;
    assert_eq!(sink.went_live.lock().len(), 2);
    Ok(())
}

#[tokio::test]
async fn removed_channel_is_never_queried_again() -> Result<()> {
    let db = Arc::new(UptrackDatabase::new_in_memory()?);
    let api = Arc::new(FakeApi {
        streams: Mutex::new(Vec::new()),
    });
    let sink = Arc::new(CountingSink {
        ack: Mutex::new(true),
        went_live: Mutex::new(Vec::new()),
    });
    let engine = NotificationEngine::new(db.clone(), api.clone(), sink.clone());

    dispatch(
        &db,
        ControlRequest::AddUptime {
            channel: "streamer1".to_string(),
        },
    );
    dispatch(
        &db,
        ControlRequest::RemoveUptime {
            channel: "streamer1".to_string(),
        },
    );

    let now = Utc::now();
    *api.streams.lock() = vec![live_stream("streamer1", now - Duration::minutes(1))];
    engine.tick(now).await?;

    assert!(sink.went_live.lock().is_empty());
    Ok(())
}

#[tokio::test]
async fn went_live_payload_carries_the_full_stream_record() -> Result<()> {
    let db = Arc::new(UptrackDatabase::new_in_memory()?);
    let now = Utc::now();
    let stream = StreamInfo {
        user_login: "streamer1".to_string(),
        user_name: "Streamer1".to_string(),
        title: "speedrun".to_string(),
        game_name: "Portal".to_string(),
        viewer_count: 1234,
        started_at: Some(now - Duration::minutes(2)),
        ..Default::default()
    };
    let api = Arc::new(FakeApi {
        streams: Mutex::new(vec![stream.clone()]),
    });

    struct CapturingSink {
        captured: Mutex<Option<OutboundEvent>>,
    }

    #[async_trait]
    impl EventSink for CapturingSink {
        async fn send(&self, event: OutboundEvent) -> bool {
            *self.captured.lock() = Some(event);
            true
        }
    }

    let sink = Arc::new(CapturingSink {
        captured: Mutex::new(None),
    });
    db.add_tracked_channel("streamer1");

    NotificationEngine::new(db, api, sink.clone()).tick(now).await?;

    let captured = sink.captured.lock().clone().expect("event sent");
    assert_eq!(captured, OutboundEvent::WentLive(stream));
    Ok(())
}

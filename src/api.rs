pub mod helix;

pub use helix::{ChatterGroups, ChattersResponse, FetchError, HelixClient, StreamInfo};

use async_trait::async_trait;

/// 配信プラットフォームへの問い合わせ窓口
///
/// アグリゲーターと通知エンジンはこのトレイト越しにポーリングするため、
/// テストではインメモリのフェイクに差し替えられる。
#[async_trait]
pub trait StreamApi: Send + Sync {
    /// 指定チャンネル群のライブ情報を1回のバッチ呼び出しで取得する
    ///
    /// 上流のエラーや不正なレスポンスは空のリストに正規化される。
    /// 呼び出し側のtickを中断させるエラーにはならない。
    async fn stream_info(&self, logins: &[String]) -> Vec<StreamInfo>;

    /// チャンネルの現在の参加者一覧を取得する
    ///
    /// チャンネルが配信中でない、またはデータが取れない場合はNone。
    async fn chatters(&self, channel: &str) -> Option<Vec<String>>;
}

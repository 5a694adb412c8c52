pub mod api;
pub mod chat;
pub mod config;
pub mod control;
pub mod database;
pub mod logging;
pub mod outbound;
pub mod tracker;

// Re-export the main error types for convenience
pub use api::FetchError;
pub use chat::ChatError;

// Re-export the polling client and its record types
pub use api::{HelixClient, StreamApi, StreamInfo};

// Re-export chat transport types
pub use chat::{ChatClient, ChatEvent, ChatMessage, ChatSink, EventReactor};

// Re-export database modules
pub use database::{Chatter, StreamSession, TrackedChannel, UptrackDatabase};

// Re-export notification plumbing
pub use outbound::{EventSink, OutboundEvent, WebSocketSink};
pub use tracker::{NotificationEngine, SessionAggregator};

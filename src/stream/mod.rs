/// Streaming side: push-feed client and membership router

pub mod feed;
pub mod reconnect;
pub mod router;

pub use feed::{decode_frame, FeedConfig, FeedError, FeedEvent, PolygonFeedClient};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};
pub use router::{RouteOutcome, RouterState, RouterStatsSnapshot, StreamRouter};

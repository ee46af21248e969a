pub mod market_cap;
pub mod stream_message;
pub mod ticker;

pub use market_cap::{MarketCapRecord, RankedSnapshot};
pub use stream_message::StreamMessage;
pub use ticker::{Exchange, InvalidTicker, Ticker, UnknownExchange};

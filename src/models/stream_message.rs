use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One unit from the push-feed
///
/// `raw` keeps the complete event object as received so downstream
/// consumers see every field, including the ones not lifted out here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamMessage {
    pub symbol: String,
    pub price: Option<f64>,
    pub volume: Option<f64>,
    pub event_timestamp: Option<Value>,
    pub raw: Map<String, Value>,
}

impl StreamMessage {
    /// Message with only a symbol and an empty payload
    pub fn new(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            price: None,
            volume: None,
            event_timestamp: None,
            raw: Map::new(),
        }
    }

    pub fn with_price(mut self, price: f64) -> Self {
        self.price = Some(price);
        self
    }

    pub fn with_volume(mut self, volume: f64) -> Self {
        self.volume = Some(volume);
        self
    }
}

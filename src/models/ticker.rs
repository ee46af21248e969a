use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

/// Exchange-listed equity symbol (e.g. "AAPL", "BRK.A")
///
/// Opaque and never empty. Comparison is exact; the upstream source is
/// already upper-case so no normalization is applied.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(try_from = "String", into = "String")]
pub struct Ticker(String);

/// Error returned when a symbol string cannot be a ticker
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid ticker: {0:?}")]
pub struct InvalidTicker(pub String);

impl Ticker {
    /// Create a ticker, rejecting empty or whitespace-only symbols
    pub fn new(symbol: impl Into<String>) -> Result<Self, InvalidTicker> {
        let symbol = symbol.into();
        if symbol.trim().is_empty() {
            return Err(InvalidTicker(symbol));
        }
        Ok(Self(symbol))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Ticker {
    type Error = InvalidTicker;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Ticker> for String {
    fn from(ticker: Ticker) -> Self {
        ticker.0
    }
}

impl fmt::Display for Ticker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::borrow::Borrow<str> for Ticker {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Tracked exchange, identified by its MIC code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "UPPERCASE")]
pub enum Exchange {
    /// Nasdaq
    Xnas,
    /// New York Stock Exchange
    Xnys,
    /// NYSE American
    Xase,
}

impl Exchange {
    /// Every tracked exchange, in default routing priority
    pub const ALL: [Exchange; 3] = [Exchange::Xnas, Exchange::Xnys, Exchange::Xase];

    /// MIC code as used by the upstream source ("XNAS")
    pub fn code(&self) -> &'static str {
        match self {
            Exchange::Xnas => "XNAS",
            Exchange::Xnys => "XNYS",
            Exchange::Xase => "XASE",
        }
    }

    /// Lower-case code used in topic and table names ("xnas")
    pub fn slug(&self) -> &'static str {
        match self {
            Exchange::Xnas => "xnas",
            Exchange::Xnys => "xnys",
            Exchange::Xase => "xase",
        }
    }

    /// Parse a comma-separated list such as "XNAS,XNYS"
    ///
    /// Order is preserved and duplicates are removed, so the result can be
    /// used directly as a routing priority list.
    pub fn parse_list(value: &str) -> Result<Vec<Exchange>, UnknownExchange> {
        let mut exchanges = Vec::new();
        for part in value.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let exchange = part.parse::<Exchange>()?;
            if !exchanges.contains(&exchange) {
                exchanges.push(exchange);
            }
        }
        Ok(exchanges)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown exchange code: {0}")]
pub struct UnknownExchange(pub String);

impl FromStr for Exchange {
    type Err = UnknownExchange;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "XNAS" => Ok(Exchange::Xnas),
            "XNYS" => Ok(Exchange::Xnys),
            "XASE" => Ok(Exchange::Xase),
            _ => Err(UnknownExchange(s.to_string())),
        }
    }
}

impl fmt::Display for Exchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticker_rejects_empty() {
        assert!(Ticker::new("").is_err());
        assert!(Ticker::new("   ").is_err());
        assert_eq!(Ticker::new("AAPL").unwrap().as_str(), "AAPL");
    }

    #[test]
    fn test_ticker_serde_is_plain_string() {
        let ticker = Ticker::new("BRK.A").unwrap();
        assert_eq!(serde_json::to_string(&ticker).unwrap(), "\"BRK.A\"");

        let parsed: Ticker = serde_json::from_str("\"MSFT\"").unwrap();
        assert_eq!(parsed.as_str(), "MSFT");
        assert!(serde_json::from_str::<Ticker>("\"\"").is_err());
    }

    #[test]
    fn test_exchange_parsing() {
        assert_eq!("xnys".parse::<Exchange>().unwrap(), Exchange::Xnys);
        assert_eq!(" XASE ".parse::<Exchange>().unwrap(), Exchange::Xase);
        assert!("ARCX".parse::<Exchange>().is_err());
    }

    #[test]
    fn test_exchange_list_keeps_order_and_dedups() {
        let list = Exchange::parse_list("XNYS, xnas,XNYS,").unwrap();
        assert_eq!(list, vec![Exchange::Xnys, Exchange::Xnas]);
        assert!(Exchange::parse_list("XNYS,BATS").is_err());
    }

    #[test]
    fn test_exchange_serializes_as_code() {
        assert_eq!(serde_json::to_string(&Exchange::Xnas).unwrap(), "\"XNAS\"");
        assert_eq!(Exchange::Xase.slug(), "xase");
    }
}

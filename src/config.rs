//! Process configuration
//!
//! Every setting has a default; an environment variable that is present but
//! cannot be parsed is an error rather than a silent fallback.

use std::collections::HashMap;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

use crate::market_cap::FetcherConfig;
use crate::models::Exchange;
use crate::rabbitmq::RabbitMQConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },

    #[error("Missing required setting: {0}")]
    Missing(String),
}

/// Batch ranking settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RankingConfig {
    pub top_n: usize,
    pub max_tickers: usize,
    pub max_workers: usize,
    pub inter_request_delay_ms: u64,
    pub retry_backoff_ms: u64,
    pub publish_timeout_secs: u64,
    /// Exchanges ranked by one run, in processing order
    pub exchanges: Vec<Exchange>,
}

impl RankingConfig {
    pub fn fetcher_config(&self) -> FetcherConfig {
        FetcherConfig {
            workers: self.max_workers,
            inter_request_delay: Duration::from_millis(self.inter_request_delay_ms),
            retry_backoff: Duration::from_millis(self.retry_backoff_ms),
        }
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_secs(self.publish_timeout_secs)
    }
}

impl Default for RankingConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            max_tickers: default_max_tickers(),
            max_workers: default_max_workers(),
            inter_request_delay_ms: default_inter_request_delay_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            publish_timeout_secs: default_publish_timeout_secs(),
            exchanges: default_exchanges(),
        }
    }
}

/// Membership index settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MembershipConfig {
    pub refresh_hours: u64,
    pub check_secs: u64,
    /// First match wins when a symbol is listed under several exchanges
    pub priority: Vec<Exchange>,
    /// Warehouse table queried for each exchange
    pub tables: HashMap<Exchange, String>,
}

impl MembershipConfig {
    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_hours * 3600)
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_secs)
    }
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            refresh_hours: default_refresh_hours(),
            check_secs: default_check_secs(),
            priority: default_exchanges(),
            tables: default_tables(),
        }
    }
}

/// Push-feed settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub feed_url: String,
    pub subscription: String,
    pub channel_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            subscription: default_subscription(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

/// Reference-data API settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolygonConfig {
    pub api_key: String,
    pub base_url: String,
    pub timeout_secs: u64,
    /// Extra attempts for a listing page that failed transiently
    pub retries: u32,
    /// Wait before the first page retry, doubled on each further one
    pub retry_backoff_ms: u64,
}

impl Default for PolygonConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_base_url(),
            timeout_secs: default_http_timeout_secs(),
            retries: 3,
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Warehouse connection settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub pool_size: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            pool_size: default_pool_size(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub ranking: RankingConfig,
    pub membership: MembershipConfig,
    pub stream: StreamConfig,
    pub polygon: PolygonConfig,
    pub rabbitmq: RabbitMQConfig,
    pub database: DatabaseConfig,
    pub ranking_cron: String,
    pub api_addr: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            ranking: RankingConfig::default(),
            membership: MembershipConfig::default(),
            stream: StreamConfig::default(),
            polygon: PolygonConfig::default(),
            rabbitmq: RabbitMQConfig::default(),
            database: DatabaseConfig::default(),
            ranking_cron: default_ranking_cron(),
            api_addr: default_api_addr(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment (call `dotenvy::dotenv()` first)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);
        let defaults = AppConfig::default();

        let ranking = RankingConfig {
            top_n: env.parse("TOP_N", defaults.ranking.top_n)?,
            max_tickers: env.parse("MAX_TICKERS", defaults.ranking.max_tickers)?,
            max_workers: env.parse("MAX_WORKERS", defaults.ranking.max_workers)?,
            inter_request_delay_ms: env
                .parse("INTER_REQUEST_DELAY_MS", defaults.ranking.inter_request_delay_ms)?,
            retry_backoff_ms: env.parse("RETRY_BACKOFF_MS", defaults.ranking.retry_backoff_ms)?,
            publish_timeout_secs: env
                .parse("PUBLISH_TIMEOUT_SECS", defaults.ranking.publish_timeout_secs)?,
            exchanges: env.exchanges("EXCHANGES", defaults.ranking.exchanges)?,
        };
        if ranking.top_n == 0 {
            return Err(ConfigError::Invalid {
                key: "TOP_N".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }
        if ranking.max_workers == 0 {
            return Err(ConfigError::Invalid {
                key: "MAX_WORKERS".into(),
                value: "0".into(),
                reason: "must be at least 1".into(),
            });
        }

        let mut tables = defaults.membership.tables;
        for exchange in Exchange::ALL {
            let key = format!("WAREHOUSE_TABLE_{}", exchange.code());
            if let Some(table) = env.get(&key) {
                validate_table_name(&key, &table)?;
                tables.insert(exchange, table);
            }
        }
        let membership = MembershipConfig {
            refresh_hours: env.parse("MEMBERSHIP_REFRESH_HOURS", defaults.membership.refresh_hours)?,
            check_secs: env.parse("MEMBERSHIP_CHECK_SECS", defaults.membership.check_secs)?,
            priority: env.exchanges("ROUTING_PRIORITY", defaults.membership.priority)?,
            tables,
        };

        let stream = StreamConfig {
            feed_url: env.get("FEED_URL").unwrap_or(defaults.stream.feed_url),
            subscription: env.get("FEED_SUBSCRIPTION").unwrap_or(defaults.stream.subscription),
            channel_capacity: env
                .parse("FEED_CHANNEL_CAPACITY", defaults.stream.channel_capacity)?
                .max(1),
        };

        let polygon = PolygonConfig {
            api_key: env.get("POLYGON_API_KEY").unwrap_or_default(),
            base_url: env.get("POLYGON_BASE_URL").unwrap_or(defaults.polygon.base_url),
            timeout_secs: env.parse("POLYGON_TIMEOUT_SECS", defaults.polygon.timeout_secs)?,
            retries: env.parse("POLYGON_RETRIES", defaults.polygon.retries)?,
            retry_backoff_ms: env
                .parse("POLYGON_RETRY_BACKOFF_MS", defaults.polygon.retry_backoff_ms)?,
        };

        let rabbitmq = RabbitMQConfig {
            uri: env.get("RABBITMQ_URI").unwrap_or(defaults.rabbitmq.uri),
            exchange: env.get("RABBITMQ_EXCHANGE").unwrap_or(defaults.rabbitmq.exchange),
            exchange_type: env
                .get("RABBITMQ_EXCHANGE_TYPE")
                .unwrap_or(defaults.rabbitmq.exchange_type),
            durable: env.parse("RABBITMQ_DURABLE", defaults.rabbitmq.durable)?,
            connection_timeout_secs: env
                .parse("RABBITMQ_TIMEOUT", defaults.rabbitmq.connection_timeout_secs)?,
            publisher_confirms: env
                .parse("RABBITMQ_PUBLISHER_CONFIRMS", defaults.rabbitmq.publisher_confirms)?,
            reconnect: defaults.rabbitmq.reconnect,
        };

        let database = DatabaseConfig {
            url: env.get("DATABASE_URL"),
            pool_size: env.parse("DB_POOL_MAX_SIZE", defaults.database.pool_size)?,
        };

        Ok(Self {
            ranking,
            membership,
            stream,
            polygon,
            rabbitmq,
            database,
            ranking_cron: env.get("RANKING_CRON").unwrap_or(defaults.ranking_cron),
            api_addr: env.get("API_ADDR").unwrap_or(defaults.api_addr),
        })
    }
}

struct Env<F>(F);

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Trimmed value; blank counts as unset
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: Display,
    {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.parse::<T>().map_err(|e| ConfigError::Invalid {
                key: key.to_string(),
                reason: e.to_string(),
                value,
            }),
        }
    }

    fn exchanges(&self, key: &str, default: Vec<Exchange>) -> Result<Vec<Exchange>, ConfigError> {
        let Some(value) = self.get(key) else {
            return Ok(default);
        };
        let parsed = Exchange::parse_list(&value).map_err(|e| ConfigError::Invalid {
            key: key.to_string(),
            value: value.clone(),
            reason: e.to_string(),
        })?;
        if parsed.is_empty() {
            return Err(ConfigError::Invalid {
                key: key.to_string(),
                value,
                reason: "no exchanges listed".into(),
            });
        }
        Ok(parsed)
    }
}

/// Table names are interpolated into SQL, so only identifier characters
/// (optionally schema-qualified) are accepted
fn validate_table_name(key: &str, table: &str) -> Result<(), ConfigError> {
    let valid = table.split('.').all(|part| {
        let mut chars = part.chars();
        matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
            && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    });
    if valid {
        Ok(())
    } else {
        Err(ConfigError::Invalid {
            key: key.to_string(),
            value: table.to_string(),
            reason: "not a valid table identifier".into(),
        })
    }
}

// Default values
fn default_top_n() -> usize {
    150
}

fn default_max_tickers() -> usize {
    6000
}

fn default_max_workers() -> usize {
    5
}

fn default_inter_request_delay_ms() -> u64 {
    200
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_publish_timeout_secs() -> u64 {
    30
}

fn default_exchanges() -> Vec<Exchange> {
    Exchange::ALL.to_vec()
}

fn default_refresh_hours() -> u64 {
    12
}

fn default_check_secs() -> u64 {
    300
}

fn default_tables() -> HashMap<Exchange, String> {
    Exchange::ALL
        .iter()
        .map(|e| (*e, format!("{}_top150tickers_marketcap", e.slug())))
        .collect()
}

fn default_feed_url() -> String {
    "wss://delayed.polygon.io/stocks".to_string()
}

fn default_subscription() -> String {
    "AM.*".to_string()
}

fn default_channel_capacity() -> usize {
    1024
}

fn default_base_url() -> String {
    "https://api.polygon.io".to_string()
}

fn default_http_timeout_secs() -> u64 {
    10
}

fn default_pool_size() -> u32 {
    5
}

fn default_ranking_cron() -> String {
    "0 30 22 * * Mon-Fri".to_string()
}

fn default_api_addr() -> String {
    "127.0.0.1:3000".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();

        assert_eq!(config.ranking.top_n, 150);
        assert_eq!(config.ranking.max_tickers, 6000);
        assert_eq!(config.ranking.max_workers, 5);
        assert_eq!(config.ranking.publish_timeout(), Duration::from_secs(30));
        assert_eq!(config.ranking.exchanges, Exchange::ALL.to_vec());
        assert_eq!(config.membership.refresh_interval(), Duration::from_secs(12 * 3600));
        assert_eq!(config.membership.check_interval(), Duration::from_secs(300));
        assert_eq!(
            config.membership.tables[&Exchange::Xnys],
            "xnys_top150tickers_marketcap"
        );
        assert_eq!(config.stream.subscription, "AM.*");
        assert_eq!(config.polygon.base_url, "https://api.polygon.io");
        assert_eq!(config.polygon.retries, 3);
        assert!(config.database.url.is_none());
        assert_eq!(config.api_addr, "127.0.0.1:3000");
    }

    #[test]
    fn test_fetcher_config_from_ranking() {
        let fetcher = RankingConfig::default().fetcher_config();
        assert_eq!(fetcher, FetcherConfig::default());
    }

    #[test]
    fn test_env_overrides() {
        let config = load(&[
            ("TOP_N", "50"),
            ("MAX_WORKERS", " 8 "),
            ("EXCHANGES", "xnys"),
            ("ROUTING_PRIORITY", "XNYS,XNAS,XNYS"),
            ("WAREHOUSE_TABLE_XASE", "analytics.xase_members"),
            ("DATABASE_URL", "postgres://localhost/warehouse"),
            ("RABBITMQ_PUBLISHER_CONFIRMS", "false"),
            ("POLYGON_RETRIES", "0"),
        ])
        .unwrap();

        assert_eq!(config.ranking.top_n, 50);
        assert_eq!(config.ranking.max_workers, 8);
        assert_eq!(config.ranking.exchanges, vec![Exchange::Xnys]);
        assert_eq!(config.membership.priority, vec![Exchange::Xnys, Exchange::Xnas]);
        assert_eq!(config.membership.tables[&Exchange::Xase], "analytics.xase_members");
        assert_eq!(config.database.url.as_deref(), Some("postgres://localhost/warehouse"));
        assert!(!config.rabbitmq.publisher_confirms);
        assert_eq!(config.polygon.retries, 0);
    }

    #[test]
    fn test_malformed_values_are_errors() {
        assert!(matches!(
            load(&[("TOP_N", "lots")]),
            Err(ConfigError::Invalid { key, .. }) if key == "TOP_N"
        ));
        assert!(load(&[("TOP_N", "0")]).is_err());
        assert!(load(&[("EXCHANGES", "XLON")]).is_err());
        assert!(load(&[("ROUTING_PRIORITY", ",")]).is_err());
    }

    #[test]
    fn test_table_names_are_identifiers() {
        assert!(load(&[("WAREHOUSE_TABLE_XNAS", "xnas; DROP TABLE x")]).is_err());
        assert!(load(&[("WAREHOUSE_TABLE_XNAS", "1table")]).is_err());
        assert!(load(&[("WAREHOUSE_TABLE_XNAS", "public.xnas_members")]).is_ok());
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = load(&[("TOP_N", "   "), ("FEED_URL", "")]).unwrap();
        assert_eq!(config.ranking.top_n, 150);
        assert_eq!(config.stream.feed_url, "wss://delayed.polygon.io/stocks");
    }
}

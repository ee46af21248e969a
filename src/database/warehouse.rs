use diesel::prelude::*;
use diesel::sql_types::Text;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::database::connection::{DatabaseError, PgPooledConnection};
use crate::models::{Exchange, Ticker};

/// Source of the ticker sets membership is built from
///
/// Calls block on I/O; async callers go through `spawn_blocking`.
pub trait TickerWarehouse: Send + Sync {
    /// Distinct non-null tickers stored for `exchange`
    fn query_distinct_tickers(&self, exchange: Exchange) -> Result<HashSet<Ticker>, DatabaseError>;
}

#[derive(QueryableByName)]
struct TickerRow {
    #[diesel(sql_type = Text)]
    ticker: String,
}

/// PostgreSQL warehouse with one table per exchange
pub struct TickerWarehouseImpl {
    get_conn: Arc<dyn Fn() -> Result<PgPooledConnection, DatabaseError> + Send + Sync>,
    tables: HashMap<Exchange, String>,
}

impl TickerWarehouseImpl {
    /// Create a warehouse reader with a connection provider
    ///
    /// Table names are interpolated into the query and must already be
    /// validated identifiers.
    pub fn new<F>(get_conn: F, tables: HashMap<Exchange, String>) -> Self
    where
        F: Fn() -> Result<PgPooledConnection, DatabaseError> + Send + Sync + 'static,
    {
        Self {
            get_conn: Arc::new(get_conn),
            tables,
        }
    }

    fn query_for(&self, exchange: Exchange) -> Result<String, DatabaseError> {
        let table = self.tables.get(&exchange).ok_or_else(|| {
            DatabaseError::QueryError(format!("No warehouse table configured for {}", exchange))
        })?;
        Ok(distinct_tickers_sql(table))
    }
}

fn distinct_tickers_sql(table: &str) -> String {
    format!("SELECT DISTINCT ticker FROM {} WHERE ticker IS NOT NULL", table)
}

impl TickerWarehouse for TickerWarehouseImpl {
    fn query_distinct_tickers(&self, exchange: Exchange) -> Result<HashSet<Ticker>, DatabaseError> {
        let sql = self.query_for(exchange)?;
        let mut conn = (self.get_conn)()?;

        let rows = diesel::sql_query(sql).load::<TickerRow>(&mut conn)?;

        // blank symbols cannot be routed to, skip them
        Ok(rows
            .into_iter()
            .filter_map(|row| Ticker::new(row.ticker).ok())
            .collect())
    }
}

/// Warehouse access over PostgreSQL
///
/// - Connection pooling (diesel + r2d2)
/// - `TickerWarehouse`: per-exchange distinct ticker queries

pub mod connection;
pub mod warehouse;

pub use connection::{establish_warehouse_pool, DatabaseError, WarehousePool};
pub use warehouse::{TickerWarehouse, TickerWarehouseImpl};

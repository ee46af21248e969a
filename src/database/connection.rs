use diesel::pg::PgConnection;
use diesel::r2d2::{self, ConnectionManager, Pool, PooledConnection};
use std::sync::Arc;
use thiserror::Error;

/// Type alias for PostgreSQL connection pool
pub type PgPool = Pool<ConnectionManager<PgConnection>>;

/// Type alias for pooled connection
pub type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

/// Pool for the analytical warehouse that membership sets are built from
#[derive(Clone)]
pub struct WarehousePool {
    pool: Arc<PgPool>,
}

impl WarehousePool {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Get a connection from the pool
    pub fn get_conn(&self) -> Result<PgPooledConnection, DatabaseError> {
        self.pool
            .get()
            .map_err(|e| DatabaseError::ConnectionPoolError(e.to_string()))
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    ConnectionPoolError(String),

    #[error("Database query error: {0}")]
    QueryError(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Diesel error: {0}")]
    DieselError(#[from] diesel::result::Error),
}

impl DatabaseError {
    /// The warehouse could not be reached, as opposed to a bad query
    pub fn is_connectivity(&self) -> bool {
        matches!(
            self,
            DatabaseError::ConnectionPoolError(_) | DatabaseError::ConnectionFailed(_)
        )
    }
}

/// Establish the warehouse connection pool and check that it answers
///
/// # Arguments
/// * `database_url` - PostgreSQL connection URL
/// * `pool_size` - Maximum number of pooled connections
pub fn establish_warehouse_pool(
    database_url: &str,
    pool_size: u32,
) -> Result<WarehousePool, DatabaseError> {
    tracing::info!("Establishing warehouse connection pool...");

    let manager = ConnectionManager::<PgConnection>::new(database_url);
    let pool = r2d2::Pool::builder()
        .max_size(pool_size)
        .build(manager)
        .map_err(|e| DatabaseError::ConnectionPoolError(format!("Warehouse pool: {}", e)))?;

    tracing::info!("Warehouse pool created with max size: {}", pool_size);

    let _ = pool
        .get()
        .map_err(|e| DatabaseError::ConnectionFailed(format!("Warehouse: {}", e)))?;

    tracing::info!("Warehouse connection successful");

    Ok(WarehousePool::new(pool))
}

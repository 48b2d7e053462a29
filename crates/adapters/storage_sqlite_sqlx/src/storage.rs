//! One storage handle implementing every repository port.

use sqlx::SqlitePool;

use crate::pool::Database;

/// `SQLite`-backed storage. Cheap to clone; clones share the pool.
#[derive(Debug, Clone)]
pub struct SqliteStorage {
    pub(crate) pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a storage handle using the given connection pool.
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl From<&Database> for SqliteStorage {
    fn from(db: &Database) -> Self {
        Self::new(db.pool().clone())
    }
}

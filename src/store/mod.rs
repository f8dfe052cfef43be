//! Transactional façade over the physical sqlite schema: a single
//! `Mutex<Connection>`, an idempotent schema bootstrap run once at
//! `open`/`open_in_memory`, and every write routed through the retry
//! policy in [`retry`].
//!
//! Higher-level modules (`entities`, `scope`, `snapshots`, ...) own their
//! domain SQL directly against `&Store` rather than going through a single
//! do-everything trait — the entity surface here is too wide (sixteen
//! tables) for one `GraphStore`-shaped interface to stay readable.

mod retry;
pub mod schema;

use crate::config::RetryConfig;
use crate::error::{EngineError, EngineResult};
use rusqlite::Connection;
use std::sync::Mutex;

pub use retry::with_retry;

/// Thin wrapper around a single sqlite connection, guarded by a mutex.
/// rusqlite connections aren't `Sync`, and WAL mode makes a single writer
/// uncontroversial for this crate's expected load.
pub struct Store {
    conn: Mutex<Connection>,
    retry: RetryConfig,
}

impl Store {
    /// Open (and migrate) the database file at `path`.
    pub fn open(path: &str, retry: RetryConfig) -> EngineResult<Self> {
        let conn = Connection::open(path)
            .map_err(|e| EngineError::Unavailable(format!("opening database: {e}")))?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retry,
        })
    }

    /// Open an ephemeral in-memory database, for tests and examples.
    pub fn open_in_memory() -> EngineResult<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Internal(format!("opening in-memory database: {e}")))?;
        schema::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            retry: RetryConfig::default(),
        })
    }

    /// Run `f` against the shared connection, retrying transient sqlite
    /// failures (SQLITE_BUSY/LOCKED) per the configured retry policy.
    pub fn with_conn<T>(
        &self,
        mut f: impl FnMut(&Connection) -> rusqlite::Result<T>,
    ) -> EngineResult<T> {
        let guard = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("store mutex poisoned".to_string()))?;
        with_retry(&self.retry, || f(&guard)).map_err(EngineError::from)
    }

    /// Run `f` inside an explicit transaction, committing on `Ok` and
    /// rolling back on `Err`. Retries the whole transaction on transient
    /// failure.
    pub fn transaction<T>(
        &self,
        mut f: impl FnMut(&rusqlite::Transaction) -> rusqlite::Result<T>,
    ) -> EngineResult<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| EngineError::Internal("store mutex poisoned".to_string()))?;
        with_retry(&self.retry, || {
            let tx = guard.transaction()?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
        .map_err(EngineError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_in_memory_bootstraps_schema_idempotently() {
        let store = Store::open_in_memory().unwrap();
        // Running init again against the same connection must not error.
        store
            .with_conn(|conn| schema::init(conn).map(|_| ()))
            .unwrap();
    }

    #[test]
    fn transaction_rolls_back_on_error() {
        let store = Store::open_in_memory().unwrap();
        let result: EngineResult<()> = store.transaction(|tx| {
            tx.execute(
                "INSERT INTO graph_spaces (graph_id, name, tenant_id, created_at, updated_at) \
                 VALUES ('G1', 'test', 'T1', '2026-01-01', '2026-01-01')",
                [],
            )?;
            Err(rusqlite::Error::ExecuteReturnedResults)
        });
        assert!(result.is_err());

        let count: i64 = store
            .with_conn(|conn| {
                conn.query_row("SELECT COUNT(*) FROM graph_spaces", [], |row| row.get(0))
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn live_concept_name_uniqueness_is_enforced_per_graph() {
        let store = Store::open_in_memory().unwrap();
        store
            .with_conn(|conn| {
                conn.execute(
                    "INSERT INTO concepts (node_id, graph_id, name, node_type, created_at, updated_at) \
                     VALUES ('N1', 'G1', 'Acme', 'Company', 't', 't')",
                    [],
                )
            })
            .unwrap();

        let dup = store.with_conn(|conn| {
            conn.execute(
                "INSERT INTO concepts (node_id, graph_id, name, node_type, created_at, updated_at) \
                 VALUES ('N2', 'G1', 'Acme', 'Company', 't', 't')",
                [],
            )
        });
        assert!(dup.is_err());
    }
}

//! Transient-failure retry policy for store writes.
//!
//! Any write that fails with a deadlock/busy/locked error retries with
//! exponential backoff up to `max_attempts`. `ErrUnavailable` (connection
//! failed) and constraint violations are never retried.

use crate::config::RetryConfig;
use std::thread::sleep;
use std::time::Duration;

/// True for sqlite errors that are worth retrying (lock contention), false
/// for everything else (constraint violations, connection failures, ...).
fn is_transient(err: &rusqlite::Error) -> bool {
    use rusqlite::ffi::ErrorCode;
    match err {
        rusqlite::Error::SqliteFailure(e, _) => {
            matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        }
        _ => false,
    }
}

/// Run `f`, retrying on transient sqlite errors with exponential backoff.
pub fn with_retry<T>(
    cfg: &RetryConfig,
    mut f: impl FnMut() -> rusqlite::Result<T>,
) -> rusqlite::Result<T> {
    let mut backoff = cfg.initial_backoff;
    let mut attempt = 0;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if is_transient(&e) && attempt + 1 < cfg.max_attempts => {
                attempt += 1;
                sleep(backoff);
                backoff *= 2;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn retries_transient_failures_up_to_max_attempts() {
        let cfg = RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
        };
        let calls = Cell::new(0);
        let result: rusqlite::Result<i32> = with_retry(&cfg, || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 {
                Err(rusqlite::Error::SqliteFailure(
                    rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
                    None,
                ))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn does_not_retry_non_transient_errors() {
        let cfg = RetryConfig::default();
        let calls = Cell::new(0);
        let result: rusqlite::Result<i32> = with_retry(&cfg, || {
            calls.set(calls.get() + 1);
            Err(rusqlite::Error::QueryReturnedNoRows)
        });
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }
}

//! Transient-error retry for database writes
//!
//! SQLite under WAL still serialises writers; a busy or locked error is
//! transient and the statement is retried on a fixed schedule of three
//! attempts at 100 ms, 500 ms and 2 s before the error propagates.

use std::time::Duration;

use tracing::warn;

/// Backoff schedule between attempts
const BACKOFF: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(500),
    Duration::from_secs(2),
];

/// Whether a sqlx error is worth retrying
fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => {
            let msg = db.message().to_lowercase();
            msg.contains("locked") || msg.contains("busy")
        }
        sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Executes a database operation, retrying transient failures
///
/// Non-transient errors return immediately.
pub(crate) async fn with_backoff<T, F, Fut>(operation: &str, f: F) -> Result<T, sqlx::Error>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut last_error: Option<sqlx::Error> = None;

    for attempt in 0..=BACKOFF.len() {
        match f().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt < BACKOFF.len() && is_transient(&err) {
                    warn!(
                        operation,
                        attempt,
                        delay_ms = BACKOFF[attempt].as_millis() as u64,
                        error = %err,
                        "Transient database error, retrying"
                    );
                    tokio::time::sleep(BACKOFF[attempt]).await;
                    last_error = Some(err);
                } else {
                    return Err(err);
                }
            }
        }
    }

    // Unreachable: the loop either returns a value or the final error.
    Err(last_error.expect("retry loop exited without an error"))
}

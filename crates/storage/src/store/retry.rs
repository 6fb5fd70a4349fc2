#![forbid(unsafe_code)]

use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use std::thread;
use std::time::Duration;

use super::StoreError;

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_STEP_MS: u64 = 25;

/// Runs `body` inside a write transaction, retrying the whole body on
/// serialization conflicts. Every attempt opens a fresh `BEGIN IMMEDIATE`
/// transaction; a failed attempt rolls back before the next one starts.
/// Conflicts surface to callers only as `RetryExhausted` once the attempt
/// budget is spent.
pub(super) fn run_serializable<T, F>(
    conn: &mut Connection,
    op: &'static str,
    mut body: F,
) -> Result<T, StoreError>
where
    F: FnMut(&Transaction<'_>) -> Result<T, StoreError>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match attempt_tx(conn, &mut body) {
            Ok(value) => return Ok(value),
            Err(err) if is_retryable(&err) => {
                if attempt >= MAX_ATTEMPTS {
                    tracing::warn!(op, attempts = attempt, error = %err, "giving up after repeated conflicts");
                    return Err(StoreError::RetryExhausted {
                        op,
                        attempts: attempt,
                    });
                }
                tracing::debug!(op, attempt, error = %err, "retrying after serialization conflict");
                thread::sleep(Duration::from_millis(BACKOFF_STEP_MS * u64::from(attempt)));
            }
            Err(err) => return Err(err),
        }
    }
}

fn attempt_tx<T, F>(conn: &mut Connection, body: &mut F) -> Result<T, StoreError>
where
    F: FnMut(&Transaction<'_>) -> Result<T, StoreError>,
{
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = body(&tx)?;
    tx.commit()?;
    Ok(value)
}

fn is_retryable(err: &StoreError) -> bool {
    match err {
        StoreError::Conflict(_) => true,
        StoreError::Sql(err) => is_busy(err),
        _ => false,
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    match err {
        rusqlite::Error::SqliteFailure(code, _) => {
            matches!(
                code.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            )
        }
        _ => false,
    }
}

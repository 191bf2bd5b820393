//! Scoped transaction runner.

use tracing::{debug, warn};

use crate::error::ServiceError;
use crate::publisher::{EventPublisher, Outbox};
use crate::store::{Transaction, UnitOfWork};

/// Run `body` in a fresh transaction, committing when it returns `Ok`.
///
/// The body receives the transaction and an outbox for the events it decides.
/// On error the transaction is dropped (rolled back) and the outbox discarded.
/// When the body or the commit fails with a retryable error (a concurrent
/// creation of the same unique row won), the whole body runs again in a new
/// transaction, up to `attempts` times. On success the outbox is flushed to
/// `publisher`.
pub fn run_in_transaction<U, T, F>(
    store: &U,
    publisher: &dyn EventPublisher,
    attempts: u32,
    mut body: F,
) -> Result<T, ServiceError>
where
    U: UnitOfWork,
    F: FnMut(&mut U::Tx, &mut Outbox) -> Result<T, ServiceError>,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match attempt_once(store, &mut body) {
            Ok((value, outbox)) => {
                outbox.flush(publisher);
                return Ok(value);
            }
            Err(err) if err.is_retryable() && attempt < attempts => {
                debug!(attempt, error = %err, "retrying transaction after integrity race");
                attempt += 1;
            }
            Err(err) => {
                if err.is_retryable() {
                    warn!(attempts, error = %err, "transaction retries exhausted");
                }
                return Err(err);
            }
        }
    }
}

fn attempt_once<U, T, F>(store: &U, body: &mut F) -> Result<(T, Outbox), ServiceError>
where
    U: UnitOfWork,
    F: FnMut(&mut U::Tx, &mut Outbox) -> Result<T, ServiceError>,
{
    let mut tx = store.begin()?;
    let mut outbox = Outbox::new();

    let value = body(&mut tx, &mut outbox)?;
    tx.commit()?;

    Ok((value, outbox))
}

use store::UnitOfWork;

use crate::Result;

/// Commits `tx` if `result` is `Ok`, otherwise rolls it back and returns the
/// original error. A failed rollback is logged; the database discards the
/// transaction anyway once the connection is reused or closed.
pub(crate) async fn finish<U: UnitOfWork, T>(tx: U, result: Result<T>) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::error!(error = %rollback_err, "rollback failed");
            }
            Err(e)
        }
    }
}

/*!
 * Transaction helper used by every ledger write.
 *
 * Either every statement in the closure commits or none does.
 */

pub use futures::future::BoxFuture;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionError, TransactionTrait};

use crate::errors::ServiceError;

/// Execute a function within a database transaction
///
/// The closure's `ServiceError` is returned after rollback; failures to begin
/// or commit surface as `ServiceError::DatabaseError`. Row-lock timeouts and
/// deadlocks reported by the database come back as `ServiceError::LockTimeout`.
///
/// # Example
///
/// ```rust,ignore
/// let movement = with_transaction(&db, move |txn| {
///     Box::pin(async move {
///         let aggregate = ledger_store::load_or_create_aggregate(txn, &key, now).await?;
///         ledger_store::apply_movement(txn, aggregate, draft, now).await
///     })
/// })
/// .await?;
/// ```
pub async fn with_transaction<F, T>(db: &DatabaseConnection, f: F) -> Result<T, ServiceError>
where
    F: for<'c> FnOnce(&'c DatabaseTransaction) -> BoxFuture<'c, Result<T, ServiceError>> + Send,
    T: Send,
{
    db.transaction::<F, T, ServiceError>(f)
        .await
        .map_err(|e| {
            let err = match e {
                TransactionError::Connection(db_err) => ServiceError::db_error(db_err),
                TransactionError::Transaction(service_err) => service_err,
            };
            err.classify_contention()
        })
}

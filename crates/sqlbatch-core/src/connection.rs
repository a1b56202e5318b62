//! Connection trait: the execution seam every engine adapter implements

use crate::{Dialect, ProvisionalResult, Result};
use async_trait::async_trait;
use std::sync::Arc;

/// Handle for cancelling a running statement from any task.
///
/// The handle is safe to call from any thread and can be called multiple
/// times. Cancellation is best effort: failures are logged, not returned.
#[async_trait]
pub trait QueryCancelHandle: Send + Sync {
    /// Ask the server to cancel the statement running on the associated
    /// connection. Resolves once the request has been delivered.
    async fn cancel(&self);
}

/// An open administrative connection bound to one database and one dialect.
///
/// Connections are lent to the batch executor by the caller. The executor
/// never opens, pools or closes them.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Get the driver name (e.g., "postgresql", "mysql")
    fn driver_name(&self) -> &str;

    /// Dialect family used to split scripts for this connection
    fn dialect(&self) -> Dialect;

    /// Execute one statement exactly as written.
    ///
    /// Returns one provisional result per native result set, in driver
    /// order. A plain statement yields exactly one; a MySQL `CALL` may yield
    /// several. The statement runs in autocommit mode unless a transaction
    /// was opened with [`Connection::begin`].
    async fn execute(&self, sql: &str) -> Result<Vec<ProvisionalResult>>;

    /// Open an explicit transaction spanning subsequent `execute` calls
    async fn begin(&self) -> Result<()>;

    /// Commit the open transaction
    async fn commit(&self) -> Result<()>;

    /// Roll back the open transaction
    async fn rollback(&self) -> Result<()>;

    /// Check if the connection is closed
    fn is_closed(&self) -> bool;

    /// Get a handle that can be used to cancel running statements.
    ///
    /// Returns `None` if the driver does not support cancellation.
    fn cancel_handle(&self) -> Option<Arc<dyn QueryCancelHandle>> {
        None
    }

    /// Wait until a statement abandoned after a cancel request has finished
    /// on the server and its leftover results are discarded, so the session
    /// can run the next statement.
    async fn settle_after_cancel(&self) -> Result<()> {
        Ok(())
    }
}

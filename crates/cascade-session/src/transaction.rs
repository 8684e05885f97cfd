//! The transaction rule shared by every writing entry point.

use cascade_core::{Connection, RecordGraph, Result};

/// Run `op` atomically.
///
/// When the connection already has an open transaction `op` joins it and the
/// caller stays responsible for commit or rollback. Otherwise a transaction is
/// opened here, committed when `op` succeeds and rolled back when it (or the
/// commit) fails; the graph is then restored to its state before the call.
pub(crate) fn atomically<C, T, F>(conn: &C, graph: &mut RecordGraph, op: F) -> Result<T>
where
    C: Connection + ?Sized,
    F: FnOnce(&mut RecordGraph) -> Result<T>,
{
    if conn.in_transaction() {
        tracing::debug!("Joining the open transaction");
        return op(graph);
    }

    let snapshot = graph.clone();
    conn.begin()?;
    let result = op(graph).and_then(|value| conn.commit().map(|()| value));
    if let Err(e) = &result {
        if conn.in_transaction() {
            if let Err(rollback) = conn.rollback() {
                tracing::warn!(error = %rollback, "Rollback failed");
            }
        }
        *graph = snapshot;
        tracing::debug!(error = %e, "Rolled back");
    }
    result
}

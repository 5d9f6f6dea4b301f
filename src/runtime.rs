use std::future::Future;

/// Spawn a best-effort background task onto the ambient tokio runtime. Teardown paths use this
/// for the `killCursors` a dropped cursor still owes; without an active runtime the task is
/// silently discarded, as there is nothing left to drive the I/O anyway.
pub(crate) fn execute<F>(fut: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(handle) = tokio::runtime::Handle::try_current() {
        handle.spawn(fut);
    }
}

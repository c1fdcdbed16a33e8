use std::future::Future;
use tokio::sync::Mutex;

/// Runs the operations submitted to it one at a time, in submission order.
///
/// Waiters are woken in FIFO order by the underlying [`tokio::sync::Mutex`],
/// so an operation can't be starved by the ones submitted after it.
#[derive(Debug, Default)]
pub(crate) struct OperationQueue(Mutex<()>);

impl OperationQueue {
    /// Wait for every previously submitted operation to complete, then run `operation`.
    ///
    /// The next operation starts as soon as this one completes, whether it succeeded or not.
    pub(crate) async fn run<F>(&self, operation: F) -> F::Output
    where
        F: Future,
    {
        let _turn = self.0.lock().await;
        operation.await
    }
}

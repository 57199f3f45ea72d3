//! Scatter-gather over tokio tasks.
//!
//! Every fan-out in a scrape cycle (per application, per name filter, per
//! metric chunk) has the same shape: spawn one producer per input, let all of
//! them write into one channel, and close the channel once the last producer
//! has returned. Each producer owns a clone of the sender and the coordinator
//! keeps none, so the channel closes exactly when the last producer finishes.

use std::future::Future;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::error;

/// Channel capacity between producers and the consumer.
pub const CHANNEL_CAPACITY: usize = 1024;

/// Receiving side of a running fan-out.
///
/// Dropping a `Gather` aborts every producer still running.
pub struct Gather<T> {
    rx: mpsc::Receiver<T>,
    tasks: JoinSet<bool>,
}

/// Spawns `produce(input, sender)` for every input.
///
/// A producer returns `true` when it finished cleanly. Failures are expected
/// to be logged by the producer itself; the coordinator only counts them.
pub fn scatter<I, T, F, Fut>(inputs: I, produce: F) -> Gather<T>
where
    I: IntoIterator,
    T: Send + 'static,
    F: Fn(I::Item, mpsc::Sender<T>) -> Fut,
    Fut: Future<Output = bool> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    let mut tasks = JoinSet::new();

    for input in inputs {
        tasks.spawn(produce(input, tx.clone()));
    }

    Gather { rx, tasks }
}

impl<T> Gather<T> {
    /// Number of producers spawned and not yet joined.
    #[cfg(test)]
    fn producers(&self) -> usize {
        self.tasks.len()
    }

    /// Receives the next item. `None` once every producer has returned.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Discards anything still queued, joins all producers and returns how
    /// many of them did not finish cleanly.
    pub async fn finish(mut self) -> usize {
        while self.rx.recv().await.is_some() {}

        let mut failed = 0;
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(true) => {}
                Ok(false) => failed += 1,
                Err(e) => {
                    error!("Producer task failed: {}", e);
                    failed += 1;
                }
            }
        }
        failed
    }

    /// Drains every item, then joins.
    pub async fn collect(mut self) -> (Vec<T>, usize) {
        let mut items = Vec::new();
        while let Some(item) = self.rx.recv().await {
            items.push(item);
        }
        let failed = self.finish().await;
        (items, failed)
    }

    /// Forwards every item into `out`, then joins.
    ///
    /// Items are dropped once `out` has been closed by its receiver.
    pub async fn forward(mut self, out: &mpsc::Sender<T>) -> usize {
        while let Some(item) = self.rx.recv().await {
            if out.send(item).await.is_err() {
                break;
            }
        }
        self.finish().await
    }
}

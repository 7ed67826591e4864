//! Coalescing hand-off between the watcher and the pipeline worker
//!
//! Each class holds at most one pending batch. A batch pushed while its class
//! is already pending merges into it and keeps the original queue position.

use crate::watcher::classify::{ChangeBatch, ChangeClass};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct QueueState {
    order: VecDeque<ChangeClass>,
    pending: HashMap<ChangeClass, BTreeSet<PathBuf>>,
    closed: bool,
}

#[derive(Debug, Default)]
pub struct BatchQueue {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl BatchQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, QueueState> {
        // A poisoned lock only means a holder panicked; the state is still usable
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Enqueue a batch, merging it into a pending batch of the same class.
    /// Batches pushed after `close` are dropped.
    pub fn push(&self, batch: ChangeBatch) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            match state.pending.get_mut(&batch.class) {
                Some(paths) => paths.extend(batch.paths),
                None => {
                    state.order.push_back(batch.class);
                    state
                        .pending
                        .insert(batch.class, batch.paths.into_iter().collect());
                }
            }
        }
        self.notify.notify_one();
    }

    /// Take the oldest pending batch without waiting
    pub fn try_next(&self) -> Option<ChangeBatch> {
        let mut state = self.lock();
        let class = state.order.pop_front()?;
        let paths = state.pending.remove(&class).unwrap_or_default();
        Some(ChangeBatch {
            class,
            paths: paths.into_iter().collect(),
        })
    }

    /// Wait for the next batch. Returns `None` once the queue is closed and drained.
    pub async fn next(&self) -> Option<ChangeBatch> {
        loop {
            let notified = self.notify.notified();
            if let Some(batch) = self.try_next() {
                return Some(batch);
            }
            if self.lock().closed {
                return None;
            }
            notified.await;
        }
    }

    /// Stop accepting batches and wake the consumer
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
        self.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::sync::Arc;
    use std::time::Duration;

    fn batch(class: ChangeClass, path: &str) -> ChangeBatch {
        ChangeBatch {
            class,
            paths: vec![PathBuf::from(path)],
        }
    }

    #[test]
    fn test_same_class_coalesces_into_one_slot() {
        let queue = BatchQueue::new();
        queue.push(batch(ChangeClass::Schema, "b.sql"));
        queue.push(batch(ChangeClass::Schema, "a.sql"));
        queue.push(batch(ChangeClass::Schema, "b.sql"));

        assert_eq!(queue.len(), 1);
        assert_eq!(
            queue.try_next(),
            Some(ChangeBatch {
                class: ChangeClass::Schema,
                paths: vec![PathBuf::from("a.sql"), PathBuf::from("b.sql")],
            })
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_classes_come_out_in_arrival_order() {
        let queue = BatchQueue::new();
        queue.push(batch(ChangeClass::Schema, "users.sql"));
        queue.push(batch(ChangeClass::Migration, "m.sql"));
        queue.push(batch(ChangeClass::Schema, "posts.sql"));

        assert_eq!(queue.try_next().map(|b| b.class), Some(ChangeClass::Schema));
        assert_eq!(queue.try_next().map(|b| b.class), Some(ChangeClass::Migration));
        assert_eq!(queue.try_next(), None);
    }

    #[test]
    fn test_push_after_close_is_dropped() {
        let queue = BatchQueue::new();
        queue.close();
        queue.push(batch(ChangeClass::Seed, "seed.sql"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_next_waits_for_push() {
        let queue = Arc::new(BatchQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.push(batch(ChangeClass::Seed, "seed.sql"));

        let received = consumer.await.unwrap();
        assert_eq!(received.map(|b| b.class), Some(ChangeClass::Seed));
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let queue = Arc::new(BatchQueue::new());
        queue.push(batch(ChangeClass::Migration, "m.sql"));
        queue.close();

        assert!(queue.next().await.is_some());
        assert!(queue.next().await.is_none());
    }

    #[tokio::test]
    async fn test_close_wakes_waiting_consumer() {
        let queue = Arc::new(BatchQueue::new());
        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.next().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }
}

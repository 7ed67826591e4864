//! Per-class debouncing
//!
//! Every event pushes its class's deadline out by one window. A class is due
//! once its deadline passes with no further events; due batches come out in
//! deadline order.

use crate::watcher::classify::{ChangeBatch, ChangeClass};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Pending {
    deadline: Instant,
    paths: BTreeSet<PathBuf>,
}

#[derive(Debug)]
pub struct Debouncer {
    window: Duration,
    pending: BTreeMap<ChangeClass, Pending>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: BTreeMap::new(),
        }
    }

    /// Record an event and restart the class's quiet period
    pub fn record(&mut self, class: ChangeClass, path: PathBuf, now: Instant) {
        let deadline = now + self.window;
        let entry = self.pending.entry(class).or_insert_with(|| Pending {
            deadline,
            paths: BTreeSet::new(),
        });
        entry.deadline = deadline;
        entry.paths.insert(path);
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Remove and return every batch whose quiet period has ended
    pub fn due(&mut self, now: Instant) -> Vec<ChangeBatch> {
        let mut ready: Vec<(Instant, ChangeClass)> = self
            .pending
            .iter()
            .filter(|(_, p)| p.deadline <= now)
            .map(|(class, p)| (p.deadline, *class))
            .collect();
        ready.sort();

        ready
            .into_iter()
            .filter_map(|(_, class)| {
                self.pending.remove(&class).map(|p| ChangeBatch {
                    class,
                    paths: p.paths.into_iter().collect(),
                })
            })
            .collect()
    }

    #[cfg(test)]
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const WINDOW: Duration = Duration::from_millis(500);

    #[test]
    fn test_burst_within_window_yields_one_batch() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        for i in 0..10u64 {
            debouncer.record(
                ChangeClass::Schema,
                PathBuf::from("supabase/schemas/users.sql"),
                start + Duration::from_millis(i * 40),
            );
        }

        // Nothing is due a millisecond before the last deadline
        assert!(debouncer
            .due(start + Duration::from_millis(360 + 499))
            .is_empty());

        let batches = debouncer.due(start + Duration::from_millis(360 + 500));
        assert_eq!(
            batches,
            vec![ChangeBatch {
                class: ChangeClass::Schema,
                paths: vec![PathBuf::from("supabase/schemas/users.sql")],
            }]
        );
        assert!(debouncer.is_idle());
        assert!(debouncer.due(start + Duration::from_secs(10)).is_empty());
    }

    #[test]
    fn test_each_event_resets_the_timer() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.record(ChangeClass::Schema, PathBuf::from("a.sql"), start);
        debouncer.record(
            ChangeClass::Schema,
            PathBuf::from("b.sql"),
            start + Duration::from_millis(400),
        );

        assert!(debouncer.due(start + WINDOW).is_empty());
        assert_eq!(
            debouncer.next_deadline(),
            Some(start + Duration::from_millis(900))
        );

        let batches = debouncer.due(start + Duration::from_millis(900));
        assert_eq!(batches.len(), 1);
        assert_eq!(
            batches[0].paths,
            vec![PathBuf::from("a.sql"), PathBuf::from("b.sql")]
        );
    }

    #[test]
    fn test_classes_debounce_independently_in_arrival_order() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.record(ChangeClass::Seed, PathBuf::from("seed.sql"), start);
        debouncer.record(
            ChangeClass::Schema,
            PathBuf::from("users.sql"),
            start + Duration::from_millis(100),
        );
        debouncer.record(
            ChangeClass::Migration,
            PathBuf::from("m.sql"),
            start + Duration::from_millis(50),
        );

        let classes: Vec<ChangeClass> = debouncer
            .due(start + Duration::from_secs(1))
            .into_iter()
            .map(|b| b.class)
            .collect();
        assert_eq!(
            classes,
            vec![ChangeClass::Seed, ChangeClass::Migration, ChangeClass::Schema]
        );
    }

    #[test]
    fn test_only_expired_classes_are_released() {
        let start = Instant::now();
        let mut debouncer = Debouncer::new(WINDOW);
        debouncer.record(ChangeClass::Migration, PathBuf::from("m.sql"), start);
        debouncer.record(
            ChangeClass::Schema,
            PathBuf::from("users.sql"),
            start + Duration::from_millis(300),
        );

        let first = debouncer.due(start + WINDOW);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].class, ChangeClass::Migration);
        assert!(!debouncer.is_idle());
    }
}

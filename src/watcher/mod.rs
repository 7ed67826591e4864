//! File watcher
//!
//! A `notify` watcher feeds raw events to a debouncer task, which classifies
//! each path, debounces per class and pushes finished batches into the
//! shared `BatchQueue`. Watch roots that do not exist yet are picked up once
//! they are created.

pub mod classify;
pub mod debounce;
pub mod queue;

pub use classify::{ChangeBatch, ChangeClass, PathClassifier};
pub use debounce::Debouncer;
pub use queue::BatchQueue;

use crate::error::{AppError, AppResult};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Handle to the running watcher task
pub struct FileWatcher {
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl FileWatcher {
    /// Start watching `root` and deliver batches to `queue`
    pub fn spawn(
        root: &Path,
        classifier: PathClassifier,
        debounce: Duration,
        queue: Arc<BatchQueue>,
    ) -> AppResult<Self> {
        let root = root.canonicalize().map_err(|e| AppError::fs(root, e))?;
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = raw_tx.send(res);
        })
        .map_err(|e| watch_error(&root, e))?;

        let mut state = WatchState {
            root: root.clone(),
            debouncer: Debouncer::new(debounce),
            watcher,
            recursive: Vec::new(),
            shallow: Vec::new(),
            waiting: Vec::new(),
        };
        for relative in collapse_nested(classifier.watch_roots()) {
            state.add_root(root.join(relative))?;
        }
        state.watch_waiting_ancestors();

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(state, classifier, raw_rx, shutdown_rx, queue));

        info!("👀 Watching {} for changes", root.display());
        Ok(Self {
            shutdown: Some(shutdown_tx),
            task,
        })
    }

    /// Stop the watcher and wait for its task to finish
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Err(e) = (&mut self.task).await {
            warn!("⚠️  Watcher task ended abnormally: {}", e);
        }
    }
}

struct WatchState {
    root: PathBuf,
    debouncer: Debouncer,
    watcher: RecommendedWatcher,
    /// Directories watched recursively
    recursive: Vec<PathBuf>,
    /// Ancestors of missing roots, watched only for the roots' creation
    shallow: Vec<PathBuf>,
    /// Roots that do not exist yet
    waiting: Vec<PathBuf>,
}

impl WatchState {
    fn add_root(&mut self, dir: PathBuf) -> AppResult<()> {
        if !dir.is_dir() {
            debug!("Watch root {} does not exist yet", dir.display());
            self.waiting.push(dir);
            return Ok(());
        }
        self.watcher
            .watch(&dir, RecursiveMode::Recursive)
            .map_err(|e| watch_error(&dir, e))?;
        debug!("Watching {} recursively", dir.display());
        self.recursive.push(dir);
        Ok(())
    }

    fn is_covered(&self, dir: &Path) -> bool {
        self.recursive.iter().any(|r| dir.starts_with(r)) || self.shallow.iter().any(|s| s == dir)
    }

    /// Watch the nearest existing ancestor of every missing root
    fn watch_waiting_ancestors(&mut self) {
        let ancestors: Vec<PathBuf> = self
            .waiting
            .iter()
            .filter_map(|missing| {
                missing
                    .ancestors()
                    .skip(1)
                    .take_while(|a| a.starts_with(&self.root))
                    .find(|a| a.is_dir())
                    .map(Path::to_path_buf)
            })
            .collect();

        for ancestor in ancestors {
            if self.is_covered(&ancestor) {
                continue;
            }
            match self.watcher.watch(&ancestor, RecursiveMode::NonRecursive) {
                Ok(()) => {
                    debug!("Watching {} for missing roots", ancestor.display());
                    self.shallow.push(ancestor);
                }
                Err(e) => debug!("Could not watch {}: {}", ancestor.display(), e),
            }
        }
    }

    /// Start watching missing roots that exist now. Files already inside them
    /// are recorded, since they were created before the watch.
    fn activate_waiting(&mut self, classifier: &PathClassifier) {
        let waiting = std::mem::take(&mut self.waiting);
        for dir in waiting {
            if !dir.is_dir() {
                self.waiting.push(dir);
                continue;
            }
            match self.add_root(dir.clone()) {
                Ok(()) => {
                    info!("👀 Now watching {}", dir.display());
                    self.record_existing(&dir, classifier);
                }
                Err(e) => {
                    warn!("⚠️  {}", e);
                    self.waiting.push(dir);
                }
            }
        }
        self.watch_waiting_ancestors();
    }

    fn record_existing(&mut self, dir: &Path, classifier: &PathClassifier) {
        let now = Instant::now();
        for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
            if entry.file_type().is_file() {
                self.record(entry.path(), classifier, now);
            }
        }
    }

    fn handle(&mut self, event: Event, classifier: &PathClassifier) {
        if matches!(event.kind, EventKind::Access(_)) {
            return;
        }
        if matches!(event.kind, EventKind::Create(_)) && !self.waiting.is_empty() {
            self.activate_waiting(classifier);
        }
        let now = Instant::now();
        for path in &event.paths {
            self.record(path, classifier, now);
        }
    }

    fn record(&mut self, path: &Path, classifier: &PathClassifier, now: Instant) {
        let Ok(relative) = path.strip_prefix(&self.root) else {
            return;
        };
        if path.is_dir() {
            return;
        }
        if let Some(class) = classifier.classify(relative) {
            debug!("{:?} change: {}", class, relative.display());
            self.debouncer.record(class, relative.to_path_buf(), now);
        }
    }
}

async fn run(
    mut state: WatchState,
    classifier: PathClassifier,
    mut raw_rx: mpsc::UnboundedReceiver<notify::Result<Event>>,
    mut shutdown: oneshot::Receiver<()>,
    queue: Arc<BatchQueue>,
) {
    loop {
        let deadline = state.debouncer.next_deadline();
        let wake = tokio::time::Instant::from_std(
            deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600)),
        );

        tokio::select! {
            _ = &mut shutdown => break,
            event = raw_rx.recv() => match event {
                Some(Ok(event)) => state.handle(event, &classifier),
                Some(Err(e)) => warn!("⚠️  File watcher error: {}", e),
                None => break,
            },
            _ = tokio::time::sleep_until(wake), if deadline.is_some() => {}
        }

        for batch in state.debouncer.due(Instant::now()) {
            debug!("Dispatching {:?} batch of {} path(s)", batch.class, batch.paths.len());
            queue.push(batch);
        }
    }
    debug!("File watcher stopped");
}

/// Drop roots contained in another root, since those are watched recursively
fn collapse_nested(roots: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut kept: Vec<PathBuf> = Vec::new();
    for root in roots {
        if kept.iter().any(|k| root.starts_with(k)) {
            continue;
        }
        kept.retain(|k| !k.starts_with(&root));
        kept.push(root);
    }
    kept
}

fn watch_error(path: &Path, err: notify::Error) -> AppError {
    AppError::fs(path, std::io::Error::other(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs;

    const DEBOUNCE: Duration = Duration::from_millis(50);

    fn classifier() -> PathClassifier {
        PathClassifier::new(&["supabase/schemas/**/*.sql".to_string()], &[]).unwrap()
    }

    #[test]
    fn test_nested_roots_collapse() {
        let roots = vec![
            PathBuf::from("supabase"),
            PathBuf::from("supabase/migrations"),
            PathBuf::from("supabase/schemas"),
            PathBuf::from("db"),
        ];
        assert_eq!(
            collapse_nested(roots),
            vec![PathBuf::from("supabase"), PathBuf::from("db")]
        );
        assert_eq!(
            collapse_nested(vec![PathBuf::from("a/b"), PathBuf::from("a")]),
            vec![PathBuf::from("a")]
        );
    }

    #[tokio::test]
    async fn test_schema_write_produces_batch() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("supabase/schemas")).unwrap();
        let queue = Arc::new(BatchQueue::new());
        let watcher = FileWatcher::spawn(dir.path(), classifier(), DEBOUNCE, queue.clone()).unwrap();

        fs::write(
            dir.path().join("supabase/schemas/users.sql"),
            "create table public.users (id uuid primary key);",
        )
        .unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(5), queue.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.class, ChangeClass::Schema);
        assert_eq!(batch.paths, vec![PathBuf::from("supabase/schemas/users.sql")]);
        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_missing_root_becomes_active() {
        let dir = tempfile::tempdir().unwrap();
        let queue = Arc::new(BatchQueue::new());
        let watcher = FileWatcher::spawn(dir.path(), classifier(), DEBOUNCE, queue.clone()).unwrap();

        fs::create_dir_all(dir.path().join("supabase/schemas")).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        fs::write(dir.path().join("supabase/schemas/posts.sql"), "select 1;").unwrap();

        let batch = tokio::time::timeout(Duration::from_secs(5), queue.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.class, ChangeClass::Schema);
        assert!(batch
            .paths
            .contains(&PathBuf::from("supabase/schemas/posts.sql")));
        watcher.stop().await;
    }

    #[tokio::test]
    async fn test_editor_noise_never_dispatches() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("supabase/schemas")).unwrap();
        let queue = Arc::new(BatchQueue::new());
        let watcher = FileWatcher::spawn(dir.path(), classifier(), DEBOUNCE, queue.clone()).unwrap();

        fs::write(dir.path().join("supabase/schemas/users.sql~"), "x").unwrap();
        fs::write(dir.path().join("supabase/schemas/4913"), "").unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert!(queue.is_empty());
        watcher.stop().await;
    }
}

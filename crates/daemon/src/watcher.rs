//! Debounced filesystem watcher with self-write suppression.
//!
//! Raw `notify` events are funneled into a tokio task that keeps one timer
//! per path; rapid bursts collapse into a single emission carrying whatever
//! the file holds when the timer fires (last write wins). Writes the daemon
//! performs itself are registered in a [`SuppressionSet`] beforehand so they
//! never come back as local changes.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// One debounced external modification.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: PathBuf,
    pub source: String,
}

/// Paths whose next observed change is self-caused and must be ignored.
///
/// A single `fs::write` can surface as several raw notify events, so an
/// entry blankets its path for one debounce window after registration
/// instead of being dropped on the first hit; after the window it lapses
/// whether or not an event ever arrived. Re-registering just refreshes the
/// window, so redundant calls are harmless.
#[derive(Debug, Clone)]
pub struct SuppressionSet {
    window: Duration,
    entries: Arc<Mutex<HashMap<PathBuf, Instant>>>,
}

impl SuppressionSet {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Mark `path` as self-written.
    pub fn register(&self, path: impl Into<PathBuf>) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(path.into(), Instant::now());
        }
    }

    /// Should a raw event for `path` be discarded? Lapsed entries are pruned
    /// as a side effect.
    pub fn should_suppress(&self, path: &Path) -> bool {
        let Ok(mut entries) = self.entries.lock() else {
            return false;
        };
        let now = Instant::now();
        entries.retain(|_, registered| now.duration_since(*registered) <= self.window);
        entries.contains_key(path)
    }
}

/// Watches the sync root and emits debounced [`WatchEvent`]s.
pub struct FileWatcher {
    debounce: Duration,
    suppressed: SuppressionSet,
    watcher: Option<RecommendedWatcher>,
    debouncer: Option<JoinHandle<()>>,
}

impl FileWatcher {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            suppressed: SuppressionSet::new(debounce),
            watcher: None,
            debouncer: None,
        }
    }

    /// Begin observing `base_dir` recursively, emitting debounced changes to
    /// `.{extension}` files on `events_tx`. A missing directory is treated
    /// as an empty one; recreating it is the projector's business.
    pub fn watch(
        &mut self,
        base_dir: &Path,
        extension: &str,
        events_tx: mpsc::UnboundedSender<WatchEvent>,
    ) -> Result<(), notify::Error> {
        if self.watcher.is_some() {
            return Ok(());
        }

        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<PathBuf>();
        let suppressed = self.suppressed.clone();
        let ext = extension.to_string();

        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| {
                let event = match result {
                    Ok(event) => event,
                    Err(err) => {
                        warn!(%err, "watch error");
                        return;
                    }
                };
                if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
                    return;
                }
                for path in event.paths {
                    let is_script = path
                        .extension()
                        .and_then(|e| e.to_str())
                        .is_some_and(|e| e == ext);
                    if !is_script {
                        continue;
                    }
                    if suppressed.should_suppress(&path) {
                        debug!(path = %path.display(), "suppressed self-write");
                        continue;
                    }
                    let _ = raw_tx.send(path);
                }
            },
            notify::Config::default(),
        )?;

        match watcher.watch(base_dir, RecursiveMode::Recursive) {
            Ok(()) => {}
            Err(err) => {
                // Nothing to observe yet; stay alive and report emptiness.
                warn!(dir = %base_dir.display(), %err, "watch root unavailable");
                return Ok(());
            }
        }

        self.watcher = Some(watcher);
        self.debouncer = Some(tokio::spawn(debounce_loop(
            raw_rx,
            events_tx,
            self.debounce,
        )));
        debug!(dir = %base_dir.display(), "watching");
        Ok(())
    }

    /// Discard the next change observed for `path`. Call immediately before
    /// any self-initiated write. Safe to call redundantly.
    pub fn suppress_next_change(&self, path: impl Into<PathBuf>) {
        self.suppressed.register(path);
    }

    /// Stop observing. Safe to call multiple times.
    pub fn stop(&mut self) {
        self.watcher = None;
        if let Some(task) = self.debouncer.take() {
            task.abort();
        }
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Per-path timers: a new raw event resets the path's deadline; when a
/// deadline passes, the file is read once and emitted.
async fn debounce_loop(
    mut raw_rx: mpsc::UnboundedReceiver<PathBuf>,
    events_tx: mpsc::UnboundedSender<WatchEvent>,
    window: Duration,
) {
    let mut pending: HashMap<PathBuf, tokio::time::Instant> = HashMap::new();

    loop {
        let next_deadline = pending.values().min().copied();

        tokio::select! {
            raw = raw_rx.recv() => {
                match raw {
                    Some(path) => {
                        pending.insert(path, tokio::time::Instant::now() + window);
                    }
                    None => break,
                }
            }
            _ = sleep_until_or_never(next_deadline) => {
                let now = tokio::time::Instant::now();
                let due: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, deadline)| **deadline <= now)
                    .map(|(path, _)| path.clone())
                    .collect();
                for path in due {
                    pending.remove(&path);
                    match std::fs::read_to_string(&path) {
                        Ok(source) => {
                            if events_tx.send(WatchEvent { path, source }).is_err() {
                                return;
                            }
                        }
                        Err(err) => {
                            // Deleted or unreadable before the timer fired.
                            debug!(path = %path.display(), %err, "dropped unreadable change");
                        }
                    }
                }
            }
        }
    }
}

async fn sleep_until_or_never(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn suppression_blankets_one_window() {
        let set = SuppressionSet::new(Duration::from_millis(50));
        let path = Path::new("/sync/Shared/Util.module.luau");

        set.register(path);
        assert!(set.should_suppress(path));
        // A write produces several raw events; all fall inside the window.
        assert!(set.should_suppress(path));
        assert!(!set.should_suppress(Path::new("/sync/Other.module.luau")));
    }

    #[test]
    fn suppression_lapses_after_window() {
        let set = SuppressionSet::new(Duration::from_millis(10));
        let path = Path::new("/sync/a.luau");
        set.register(path);
        std::thread::sleep(Duration::from_millis(25));
        assert!(!set.should_suppress(path));
    }

    #[test]
    fn redundant_registration_is_harmless() {
        let set = SuppressionSet::new(Duration::from_millis(50));
        let path = Path::new("/sync/a.luau");
        set.register(path);
        set.register(path);
        assert!(set.should_suppress(path));
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_collapses_bursts_to_latest_content() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("Util.module.luau");
        std::fs::write(&file, "return 1").expect("write");

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let window = Duration::from_millis(100);
        let task = tokio::spawn(debounce_loop(raw_rx, events_tx, window));

        // Three rapid events for the same path.
        raw_tx.send(file.clone()).expect("send");
        tokio::time::sleep(Duration::from_millis(30)).await;
        raw_tx.send(file.clone()).expect("send");
        tokio::time::sleep(Duration::from_millis(30)).await;
        std::fs::write(&file, "return 2").expect("write");
        raw_tx.send(file.clone()).expect("send");

        tokio::time::sleep(Duration::from_millis(150)).await;
        let event = events_rx.recv().await.expect("one event");
        assert_eq!(event.path, file);
        assert_eq!(event.source, "return 2");
        assert!(events_rx.try_recv().is_err(), "burst must collapse to one event");

        task.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn debounce_drops_vanished_files() {
        let temp = tempfile::tempdir().expect("tempdir");
        let file = temp.path().join("Ghost.module.luau");

        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(debounce_loop(raw_rx, events_tx, Duration::from_millis(50)));

        raw_tx.send(file).expect("send");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(events_rx.try_recv().is_err());

        task.abort();
    }

    #[test]
    fn stop_is_idempotent() {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        runtime.block_on(async {
            let mut watcher = FileWatcher::new(Duration::from_millis(100));
            watcher.stop();
            watcher.stop();
        });
    }
}

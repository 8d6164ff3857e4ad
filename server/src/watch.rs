//! Filesystem watcher and initial discovery walk.
//!
//! Watches remembered roots recursively and publishes `FileChanged` events
//! after a debounce period of quiet; the initial walk publishes
//! `FileDiscovered` for every eligible file. The watcher knows nothing about
//! the queue; events flow through the bus only.

use crate::bus::EventBus;
use crate::types::Event;
use ignore::WalkBuilder;
use notify::{Event as FsEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Debounce window: wait this long after the last event before publishing.
const DEBOUNCE_MS: u64 = 500;

/// Directory names never walked or watched into.
fn default_skip_dirs() -> HashSet<String> {
    [".git", "node_modules", "__pycache__", "target", "dist", "build", ".next", "vendor"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn publish_for_path(bus: &EventBus, path: &Path, discovered: bool) {
    let Ok(meta) = std::fs::metadata(path) else { return };
    if !meta.is_file() {
        return;
    }
    let mod_time = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0);
    let path = path.to_string_lossy().to_string();
    let event = if discovered {
        Event::FileDiscovered { path, size: meta.len(), mod_time }
    } else {
        Event::FileChanged { path, size: meta.len(), mod_time }
    };
    bus.publish(event);
}

/// Walk a root once, publishing `FileDiscovered` for every file that clears
/// the skip list. Returns how many files were announced.
pub fn discover(root: &Path, bus: &EventBus) -> usize {
    let skip = default_skip_dirs();
    let mut count = 0usize;

    let walker = WalkBuilder::new(root)
        .hidden(true)
        .git_ignore(true)
        .filter_entry(move |entry| {
            entry
                .file_name()
                .to_str()
                .map(|name| !skip.contains(name))
                .unwrap_or(true)
        })
        .build();

    for entry in walker.flatten() {
        if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            publish_for_path(bus, entry.path(), true);
            count += 1;
        }
    }

    info!(root = %root.display(), files = count, "discovery walk complete");
    count
}

/// Start a recursive watcher on `roots`. Returns the watcher handle (must be
/// kept alive — dropping it stops the watcher).
pub fn start_watcher(roots: &[PathBuf], bus: EventBus) -> Option<RecommendedWatcher> {
    let (tx, rx) = mpsc::channel::<FsEvent>();

    let mut watcher = match RecommendedWatcher::new(
        move |res: Result<FsEvent, notify::Error>| {
            if let Ok(event) = res {
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    ) {
        Ok(w) => w,
        Err(err) => {
            warn!(error = %err, "failed to create file watcher");
            return None;
        }
    };

    for root in roots {
        match watcher.watch(root, RecursiveMode::Recursive) {
            Ok(()) => info!(root = %root.display(), "watching"),
            Err(err) => warn!(root = %root.display(), error = %err, "failed to watch"),
        }
    }

    // Debounce loop runs on its own thread; notify's callback thread only
    // forwards into the channel.
    std::thread::spawn(move || debounce_loop(rx, bus));

    Some(watcher)
}

/// Collect paths from raw events and publish them after a quiet period.
fn debounce_loop(rx: mpsc::Receiver<FsEvent>, bus: EventBus) {
    let skip = default_skip_dirs();
    let mut pending: HashMap<PathBuf, Instant> = HashMap::new();

    loop {
        match rx.recv_timeout(Duration::from_millis(DEBOUNCE_MS)) {
            Ok(event) => {
                let relevant = matches!(
                    event.kind,
                    EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                );
                if relevant {
                    let now = Instant::now();
                    for path in event.paths {
                        let skipped = path
                            .components()
                            .filter_map(|c| c.as_os_str().to_str())
                            .any(|c| skip.contains(c));
                        if !skipped {
                            pending.insert(path, now);
                        }
                    }
                }
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                if pending.is_empty() {
                    continue;
                }
                let cutoff = Instant::now() - Duration::from_millis(DEBOUNCE_MS);
                let ready: Vec<PathBuf> = pending
                    .iter()
                    .filter(|(_, t)| **t <= cutoff)
                    .map(|(p, _)| p.clone())
                    .collect();
                for path in ready {
                    pending.remove(&path);
                    debug!(path = %path.display(), "change debounced");
                    publish_for_path(&bus, &path, false);
                }
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Recursive filesystem watcher for the user-scope subtree.
//!
//! Emits `{path, action}` events on a bounded channel, dropping overflow
//! with a warning. The orchestrator disables the watcher for the whole
//! critical section of a sync, so its own writes into the user scope never
//! re-trigger a sync; while disabled, events are consumed and discarded.

use crate::paths::PathPolicy;
use notify::event::{EventKind, ModifyKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::WalkDir;

/// Capacity of the outgoing change channel.
const CHANGE_CHANNEL_CAPACITY: usize = 100;

#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("user scope directory does not exist: {0}")]
    MissingUserScope(PathBuf),

    #[error("failed to create file watcher: {0}")]
    Notify(#[from] notify::Error),
}

/// What happened to a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeAction {
    Create,
    Modify,
    Delete,
}

impl std::fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChangeAction::Create => write!(f, "create"),
            ChangeAction::Modify => write!(f, "modify"),
            ChangeAction::Delete => write!(f, "delete"),
        }
    }
}

/// A single filesystem change inside the user scope.
#[derive(Debug, Clone)]
pub struct FileChange {
    pub path: PathBuf,
    pub action: ChangeAction,
}

/// Enable/disable toggle shared with the orchestrator.
#[derive(Debug, Clone)]
pub struct WatcherHandle {
    enabled: Arc<AtomicBool>,
}

impl WatcherHandle {
    /// Resume forwarding events.
    pub fn enable(&self) {
        self.enabled.store(true, Ordering::SeqCst);
        debug!("file watcher enabled");
    }

    /// Consume and discard events until re-enabled.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::SeqCst);
        debug!("file watcher disabled");
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
}

/// Watch the user scope recursively.
///
/// Returns a toggle handle and the change stream. The watcher itself lives
/// inside a forwarding task and shuts down when the receiver is dropped.
pub fn spawn(
    user_scope: &Path,
    policy: Arc<PathPolicy>,
    debounce: Duration,
) -> Result<(WatcherHandle, mpsc::Receiver<FileChange>), WatcherError> {
    if !user_scope.is_dir() {
        return Err(WatcherError::MissingUserScope(user_scope.to_path_buf()));
    }

    let (raw_tx, raw_rx) = mpsc::channel::<Result<Event, notify::Error>>(CHANGE_CHANNEL_CAPACITY);
    let mut watcher = RecommendedWatcher::new(
        move |res| {
            let _ = raw_tx.blocking_send(res);
        },
        notify::Config::default(),
    )?;

    register_watches(&mut watcher, user_scope, &policy)?;
    info!("file watcher started on {}", user_scope.display());

    let (change_tx, change_rx) = mpsc::channel::<FileChange>(CHANGE_CHANNEL_CAPACITY);
    let enabled = Arc::new(AtomicBool::new(true));
    let handle = WatcherHandle {
        enabled: enabled.clone(),
    };

    tokio::spawn(forward_events(
        watcher,
        raw_rx,
        change_tx,
        enabled,
        policy,
        user_scope.to_path_buf(),
        debounce,
    ));

    Ok((handle, change_rx))
}

/// Register watches on every non-excluded directory under the scope.
fn register_watches(
    watcher: &mut RecommendedWatcher,
    user_scope: &Path,
    policy: &PathPolicy,
) -> Result<(), WatcherError> {
    watcher.watch(user_scope, RecursiveMode::NonRecursive)?;

    for entry in WalkDir::new(user_scope)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Some(rel) = scoped_rel(user_scope, entry.path()) {
            if policy.is_excluded(&rel) {
                continue;
            }
        }
        debug!("adding watch for directory: {}", entry.path().display());
        if let Err(e) = watcher.watch(entry.path(), RecursiveMode::NonRecursive) {
            warn!("failed to watch {}: {}", entry.path().display(), e);
        }
    }
    Ok(())
}

/// Event pump: filters raw notify events and forwards qualifying changes.
async fn forward_events(
    mut watcher: RecommendedWatcher,
    mut raw_rx: mpsc::Receiver<Result<Event, notify::Error>>,
    change_tx: mpsc::Sender<FileChange>,
    enabled: Arc<AtomicBool>,
    policy: Arc<PathPolicy>,
    user_scope: PathBuf,
    debounce: Duration,
) {
    let mut last_change: HashMap<PathBuf, Instant> = HashMap::new();

    while let Some(res) = raw_rx.recv().await {
        let event = match res {
            Ok(e) => e,
            Err(e) => {
                error!("file watcher error: {}", e);
                continue;
            }
        };

        let Some(action) = map_action(&event.kind) else {
            continue;
        };

        for path in &event.paths {
            // Newly created directories get their own watch so changes
            // beneath them are seen.
            if action == ChangeAction::Create && path.is_dir() {
                let excluded = scoped_rel(&user_scope, path)
                    .map(|rel| policy.is_excluded(&rel))
                    .unwrap_or(false);
                if !excluded {
                    debug!("adding new directory to watch: {}", path.display());
                    if let Err(e) = watcher.watch(path, RecursiveMode::NonRecursive) {
                        warn!("failed to watch new directory {}: {}", path.display(), e);
                    }
                }
            }

            if !enabled.load(Ordering::SeqCst) {
                continue;
            }

            let Some(rel) = scoped_rel(&user_scope, path) else {
                continue;
            };
            if policy.is_excluded(&rel) || !policy.is_included(&rel) {
                continue;
            }

            // Collapse bursts on the same path inside the debounce window.
            let now = Instant::now();
            if let Some(last) = last_change.get(path) {
                if now.duration_since(*last) < debounce {
                    continue;
                }
            }
            last_change.insert(path.clone(), now);

            debug!("file changed: {} ({})", path.display(), action);
            let change = FileChange {
                path: path.clone(),
                action,
            };
            if let Err(mpsc::error::TrySendError::Full(_)) = change_tx.try_send(change) {
                warn!("change channel full, dropping event for {}", path.display());
            }
        }
    }
}

fn map_action(kind: &EventKind) -> Option<ChangeAction> {
    match kind {
        EventKind::Create(_) => Some(ChangeAction::Create),
        EventKind::Modify(ModifyKind::Metadata(_)) => None,
        EventKind::Modify(_) => Some(ChangeAction::Modify),
        EventKind::Remove(_) => Some(ChangeAction::Delete),
        _ => None,
    }
}

/// Policy-scoped relative path (`User/<rel>`), or `None` outside the scope.
fn scoped_rel(user_scope: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(user_scope).ok()?;
    let rel = rel.to_string_lossy().replace('\\', "/");
    if rel.is_empty() {
        return None;
    }
    Some(format!("User/{}", rel))
}

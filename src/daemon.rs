//! The long-running sync daemon.
//!
//! Two trigger sources feed one single-writer serializer: debounced watcher
//! events (realtime, push-only) and a periodic ticker (pull then push). A
//! sync is rejected while another is in progress or within 30 seconds of
//! the previous one. The watcher is disabled for the entire critical
//! section of every sync so the daemon's own writes never re-trigger it.
//! A `paused` sentinel file under the application home, managed by the
//! external CLI, suspends all triggers while present.

use crate::config::Config;
use crate::sync::{SyncError, Syncer};
use crate::watcher::{self, WatcherHandle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Name of the pause sentinel under the application home.
pub const PAUSE_SENTINEL: &str = "paused";

/// Minimum spacing between sync starts.
const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Default)]
struct SyncState {
    in_progress: bool,
    last_sync: Option<Instant>,
}

pub struct Daemon {
    config: Arc<Config>,
    syncer: Arc<Syncer>,
    app_home: PathBuf,
    state: Mutex<SyncState>,
}

impl Daemon {
    pub fn new(config: Arc<Config>, syncer: Arc<Syncer>, app_home: PathBuf) -> Self {
        Self {
            config,
            syncer,
            app_home,
            state: Mutex::new(SyncState::default()),
        }
    }

    /// Run until the shutdown signal flips. The in-flight sync, if any,
    /// always completes before return; partial pushes are worse than late
    /// shutdowns.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!("starting cursor-sync daemon");

        let (watcher_handle, mut change_rx) = if self.config.sync.watch_enabled {
            match watcher::spawn(
                &self.config.user_scope_path(),
                self.syncer.policy(),
                self.config.sync.debounce_time,
            ) {
                Ok((handle, rx)) => {
                    info!("realtime file watching active (primary sync trigger)");
                    (Some(handle), Some(rx))
                }
                Err(e) => {
                    error!("failed to start file watcher: {}", e);
                    (None, None)
                }
            }
        } else {
            warn!("file watching disabled - relying on periodic sync only");
            (None, None)
        };

        // Startup sync: decides bootstrap direction via the marker.
        if self.is_paused() {
            info!("daemon is paused, skipping initial sync");
        } else {
            self.initial_sync(&watcher_handle).await;
        }

        let min_interval = self
            .config
            .sync
            .pull_interval
            .min(self.config.sync.push_interval);
        info!(
            "periodic sync active (fallback trigger) every {:?}",
            min_interval
        );
        let mut ticker = tokio::time::interval(min_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        ticker.tick().await; // the first tick fires immediately; skip it

        let debounce = self.config.sync.debounce_time;
        let mut pending_change = false;
        let mut debounce_deadline: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown signal received");
                    break;
                }

                event = async {
                    match change_rx.as_mut() {
                        Some(rx) => rx.recv().await,
                        None => std::future::pending().await,
                    }
                } => {
                    match event {
                        Some(change) => {
                            if self.is_paused() {
                                debug!("paused; ignoring change event");
                            } else {
                                debug!(
                                    "file change detected: {} ({})",
                                    change.path.display(),
                                    change.action
                                );
                                pending_change = true;
                                debounce_deadline = Some(Instant::now() + debounce);
                            }
                        }
                        None => {
                            warn!("watcher channel closed");
                            change_rx = None;
                        }
                    }
                }

                _ = async {
                    match debounce_deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    debounce_deadline = None;
                    if pending_change && !self.is_paused() {
                        info!("realtime sync triggered after {:?} debounce", debounce);
                        self.realtime_sync(&watcher_handle).await;
                    }
                    pending_change = false;
                }

                _ = ticker.tick() => {
                    if self.is_paused() {
                        debug!("paused; skipping periodic sync");
                    } else {
                        self.periodic_sync(&watcher_handle).await;
                    }
                }
            }
        }

        info!("daemon shut down");
    }

    /// Whether the external pause sentinel is present.
    pub fn is_paused(&self) -> bool {
        self.app_home.join(PAUSE_SENTINEL).exists()
    }

    /// Try to enter the sync critical section. Rejected while a sync is in
    /// progress or within the rate-limit window.
    async fn try_begin_sync(&self) -> bool {
        let mut state = self.state.lock().await;
        if state.in_progress {
            debug!("sync already in progress, skipping");
            return false;
        }
        if let Some(last) = state.last_sync {
            if last.elapsed() < MIN_SYNC_INTERVAL {
                debug!(
                    "too soon since last sync ({:?} ago), skipping",
                    last.elapsed()
                );
                return false;
            }
        }
        state.in_progress = true;
        true
    }

    /// Leave the critical section. `last_sync` only advances when the cycle
    /// ran; a privacy-blocked cycle leaves it untouched so the next tick
    /// retries without waiting out the rate limit.
    async fn end_sync(&self, advance_last_sync: bool) {
        let mut state = self.state.lock().await;
        state.in_progress = false;
        if advance_last_sync {
            state.last_sync = Some(Instant::now());
        }
    }

    async fn initial_sync(&self, watcher: &Option<WatcherHandle>) {
        if !self.try_begin_sync().await {
            return;
        }
        if let Some(w) = watcher {
            w.disable();
        }

        info!("performing initial sync on daemon startup");
        let advance = match self.syncer.initialize().await {
            Ok(()) => {
                info!("initial sync completed successfully");
                true
            }
            Err(e) => {
                error!("initial sync failed: {}", e);
                !matches!(e, SyncError::Privacy(_))
            }
        };

        if let Some(w) = watcher {
            w.enable();
        }
        self.end_sync(advance).await;
    }

    /// Realtime path: push only. The user's edit is the freshest state;
    /// pulling first would overwrite it. The periodic loop covers pulls.
    async fn realtime_sync(&self, watcher: &Option<WatcherHandle>) {
        if !self.try_begin_sync().await {
            return;
        }
        if let Some(w) = watcher {
            w.disable();
        }

        let advance = match self.syncer.sync_to_remote().await {
            Ok(()) => true,
            Err(e) => {
                error!("realtime push failed: {}", e);
                !matches!(e, SyncError::Privacy(_))
            }
        };

        if let Some(w) = watcher {
            w.enable();
        }
        self.end_sync(advance).await;
    }

    /// Periodic path: pull remote changes, then push local ones.
    async fn periodic_sync(&self, watcher: &Option<WatcherHandle>) {
        if !self.try_begin_sync().await {
            return;
        }
        if let Some(w) = watcher {
            w.disable();
        }

        debug!("periodic comprehensive sync triggered");
        let mut advance = true;
        if let Err(e) = self.syncer.sync_from_remote().await {
            error!("periodic pull sync failed: {}", e);
            advance = advance && !matches!(e, SyncError::Privacy(_));
        }
        if let Err(e) = self.syncer.sync_to_remote().await {
            error!("periodic push sync failed: {}", e);
            advance = advance && !matches!(e, SyncError::Privacy(_));
        }

        if let Some(w) = watcher {
            w.enable();
        }
        self.end_sync(advance).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn test_daemon(app_home: PathBuf) -> Daemon {
        let yaml = r#"
repository:
  url: "https://github.com/me/settings.git"
  local_path: "/tmp/cursor-sync-test/settings"
cursor:
  config_path: "/tmp/cursor-sync-test/Cursor"
"#;
        let config: Arc<Config> = Arc::new(serde_yaml::from_str(yaml).unwrap());
        let syncer =
            Arc::new(Syncer::new(config.clone(), "ghp_testtoken".to_string()).unwrap());
        Daemon::new(config, syncer, app_home)
    }

    #[tokio::test]
    async fn test_sync_rate_limit() {
        let home = tempdir().unwrap();
        let daemon = test_daemon(home.path().to_path_buf());

        assert!(daemon.try_begin_sync().await);
        // In progress: rejected.
        assert!(!daemon.try_begin_sync().await);
        daemon.end_sync(true).await;
        // Within the 30 s window: still rejected.
        assert!(!daemon.try_begin_sync().await);
    }

    #[tokio::test]
    async fn test_privacy_failure_does_not_consume_rate_limit() {
        let home = tempdir().unwrap();
        let daemon = test_daemon(home.path().to_path_buf());

        assert!(daemon.try_begin_sync().await);
        // Privacy-blocked cycle: last_sync untouched.
        daemon.end_sync(false).await;
        // The next trigger may run immediately.
        assert!(daemon.try_begin_sync().await);
        daemon.end_sync(true).await;
    }

    #[tokio::test]
    async fn test_pause_sentinel() {
        let home = tempdir().unwrap();
        let daemon = test_daemon(home.path().to_path_buf());

        assert!(!daemon.is_paused());
        std::fs::write(home.path().join(PAUSE_SENTINEL), "").unwrap();
        assert!(daemon.is_paused());
        std::fs::remove_file(home.path().join(PAUSE_SENTINEL)).unwrap();
        assert!(!daemon.is_paused());
    }

    #[tokio::test]
    async fn test_last_sync_is_monotonic() {
        let home = tempdir().unwrap();
        let daemon = test_daemon(home.path().to_path_buf());

        assert!(daemon.try_begin_sync().await);
        daemon.end_sync(true).await;
        let first = daemon.state.lock().await.last_sync.unwrap();

        tokio::time::pause();
        tokio::time::advance(MIN_SYNC_INTERVAL + Duration::from_secs(1)).await;
        assert!(daemon.try_begin_sync().await);
        daemon.end_sync(true).await;
        let second = daemon.state.lock().await.last_sync.unwrap();
        assert!(second >= first);
    }
}

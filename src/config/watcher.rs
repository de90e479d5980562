//! Coalesced reload of settings files
//!
//! The filesystem watcher callback runs on its own thread and only raises a
//! pending flag. The owning loop polls at a fixed interval; any number of
//! changes between two polls produce a single reload.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tracing::{debug, warn};

/// Shared "something changed" flag
#[derive(Debug, Clone, Default)]
pub struct PendingFlag(Arc<Mutex<bool>>);

impl PendingFlag {
    pub fn mark(&self) {
        let mut pending = self.0.lock().unwrap_or_else(|e| e.into_inner());
        *pending = true;
    }

    /// Read and clear
    pub fn take(&self) -> bool {
        let mut pending = self.0.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *pending, false)
    }
}

pub struct ReloadWatcher {
    pending: PendingFlag,
    interval: Duration,
    last_poll: Option<Instant>,
    watcher: Option<RecommendedWatcher>,
}

impl ReloadWatcher {
    pub fn new(interval: Duration) -> Self {
        Self {
            pending: PendingFlag::default(),
            interval,
            last_poll: None,
            watcher: None,
        }
    }

    /// Watch `dir` for settings file changes
    pub fn watch(&mut self, dir: &Path) -> Result<()> {
        let pending = self.pending.clone();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                if matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)) {
                    debug!(paths = ?event.paths, "Settings change detected");
                    pending.mark();
                }
            }
            Err(e) => warn!(error = %e, "Watch error"),
        })
        .context("Failed to create filesystem watcher")?;

        watcher
            .watch(dir, RecursiveMode::NonRecursive)
            .context(format!("Failed to watch {}", dir.display()))?;
        self.watcher = Some(watcher);
        Ok(())
    }

    /// Handle for other threads to flag a change
    pub fn flag(&self) -> PendingFlag {
        self.pending.clone()
    }

    pub fn mark_changed(&self) {
        self.pending.mark();
    }

    /// Whether a reload is due at `now`. At most once per interval; changes
    /// that arrive before the interval has passed stay pending.
    pub fn poll(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_poll
            && now.duration_since(last) < self.interval
        {
            return false;
        }
        self.last_poll = Some(now);
        self.pending.take()
    }
}

//! Per-target debug-session lifecycle.
//!
//! Attaching a debugger to a page surfaces the browser's "is being debugged"
//! banner, so sessions are opened lazily and released after an inactivity
//! window instead of being held for the whole process lifetime. Callers go
//! through [`SessionManager::send`] / [`SessionManager::with_session`] and
//! never attach or detach themselves.

use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use pagescope_core_types::TargetId;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::metrics;
use crate::transport::DebugTransport;

/// Attachment state for one target.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionPhase {
    Detached,
    Attaching,
    Attached,
    Detaching,
}

struct EntryInner {
    phase: SessionPhase,
    /// Bumped on every use; a release timer armed at generation `g` only
    /// fires while the generation is still `g`.
    generation: u64,
    release_task: Option<JoinHandle<()>>,
}

struct SessionEntry {
    /// Serializes attach/detach transitions: a second `ensure` waits here
    /// until the first one's attach has finished.
    guard: tokio::sync::Mutex<()>,
    inner: parking_lot::Mutex<EntryInner>,
}

impl SessionEntry {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            guard: tokio::sync::Mutex::new(()),
            inner: parking_lot::Mutex::new(EntryInner {
                phase: SessionPhase::Detached,
                generation: 0,
                release_task: None,
            }),
        })
    }
}

/// Owns attachment state for every inspected target.
pub struct SessionManager<T: DebugTransport> {
    transport: Arc<T>,
    idle_release: Duration,
    entries: DashMap<TargetId, Arc<SessionEntry>>,
    watcher: parking_lot::Mutex<Option<JoinHandle<()>>>,
}

impl<T: DebugTransport + 'static> SessionManager<T> {
    pub fn new(transport: Arc<T>, idle_release: Duration) -> Arc<Self> {
        Arc::new(Self {
            transport,
            idle_release,
            entries: DashMap::new(),
            watcher: parking_lot::Mutex::new(None),
        })
    }

    /// Begin observing externally-triggered detaches so phase bookkeeping
    /// follows reality (user closed devtools, tab navigated away, …).
    pub fn start(self: &Arc<Self>) {
        let mut watcher = self.watcher.lock();
        if watcher.is_some() {
            return;
        }
        let mut rx = self.transport.detach_events();
        let weak: Weak<Self> = Arc::downgrade(self);
        *watcher = Some(tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(target) => {
                        let Some(this) = weak.upgrade() else { break };
                        this.on_external_detach(&target);
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        }));
    }

    pub fn stop(&self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
    }

    pub fn transport(&self) -> Arc<T> {
        Arc::clone(&self.transport)
    }

    pub fn phase(&self, target: &TargetId) -> SessionPhase {
        self.entries
            .get(target)
            .map(|entry| entry.inner.lock().phase)
            .unwrap_or(SessionPhase::Detached)
    }

    /// Make sure a debug session exists for `target`, attaching if needed,
    /// and refresh the inactivity timer. Concurrent callers serialize on the
    /// per-target guard; the second one finds the session already attached.
    pub async fn ensure(&self, target: &TargetId) -> Result<(), TransportError> {
        let entry = self.entry(target);
        let _guard = entry.guard.lock().await;

        if entry.inner.lock().phase == SessionPhase::Attached {
            self.arm_release(target, &entry);
            return Ok(());
        }

        entry.inner.lock().phase = SessionPhase::Attaching;
        match self.transport.attach(target).await {
            Ok(()) => {
                entry.inner.lock().phase = SessionPhase::Attached;
                self.arm_release(target, &entry);
                Ok(())
            }
            Err(err) => {
                entry.inner.lock().phase = SessionPhase::Detached;
                Err(err)
            }
        }
    }

    /// Issue one protocol command through an ensured session. Success counts
    /// as activity; failure does not refresh the timer.
    pub async fn send(
        &self,
        target: &TargetId,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, TransportError> {
        self.ensure(target).await?;
        let result = self.transport.send(target, method, params).await?;
        let entry = self.entry(target);
        self.arm_release(target, &entry);
        Ok(result)
    }

    /// Run `f` against an ensured session. The timer is refreshed once more
    /// after `f` succeeds; a failing `f` is not treated as use.
    pub async fn with_session<F, Fut, R>(&self, target: &TargetId, f: F) -> Result<R, TransportError>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = Result<R, TransportError>>,
    {
        self.ensure(target).await?;
        let result = f(Arc::clone(&self.transport)).await?;
        let entry = self.entry(target);
        self.arm_release(target, &entry);
        Ok(result)
    }

    /// Detach unconditionally, cancelling any pending auto-release.
    /// "Not attached" failures are swallowed: the caller wants it gone and
    /// it already is.
    pub async fn force_release(&self, target: &TargetId) {
        let entry = self.entry(target);
        {
            let mut inner = entry.inner.lock();
            inner.generation += 1;
            if let Some(task) = inner.release_task.take() {
                task.abort();
            }
        }
        let _guard = entry.guard.lock().await;
        {
            let mut inner = entry.inner.lock();
            if inner.phase == SessionPhase::Detached {
                return;
            }
            inner.phase = SessionPhase::Detaching;
        }
        match self.transport.detach(target).await {
            Ok(()) => {}
            Err(err) if err.is_not_attached() => {}
            Err(err) => {
                warn!(target: "cdp-bridge", target_id = %target, ?err, "forced release failed");
            }
        }
        entry.inner.lock().phase = SessionPhase::Detached;
    }

    pub async fn force_release_all(&self) {
        let targets: Vec<TargetId> = self.entries.iter().map(|e| e.key().clone()).collect();
        for target in targets {
            self.force_release(&target).await;
        }
    }

    fn entry(&self, target: &TargetId) -> Arc<SessionEntry> {
        self.entries
            .entry(target.clone())
            .or_insert_with(SessionEntry::new)
            .clone()
    }

    fn on_external_detach(&self, target: &TargetId) {
        let Some(entry) = self.entries.get(target).map(|e| e.value().clone()) else {
            return;
        };
        let mut inner = entry.inner.lock();
        inner.generation += 1;
        if let Some(task) = inner.release_task.take() {
            task.abort();
        }
        inner.phase = SessionPhase::Detached;
        debug!(target: "cdp-bridge", target_id = %target, "session marked detached by host");
    }

    /// (Re)arm the inactivity timer for `target`. The timer captures the
    /// generation at arm time; any later activity bumps the generation and
    /// the stale timer does nothing when it fires.
    fn arm_release(&self, target: &TargetId, entry: &Arc<SessionEntry>) {
        let mut inner = entry.inner.lock();
        inner.generation += 1;
        let armed_gen = inner.generation;
        if let Some(task) = inner.release_task.take() {
            task.abort();
        }

        let transport = Arc::clone(&self.transport);
        let entry = Arc::clone(entry);
        let target = target.clone();
        let idle = self.idle_release;
        inner.release_task = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            {
                let inner = entry.inner.lock();
                if inner.generation != armed_gen || inner.phase != SessionPhase::Attached {
                    return;
                }
            }

            let _guard = entry.guard.lock().await;
            {
                let mut inner = entry.inner.lock();
                if inner.generation != armed_gen || inner.phase != SessionPhase::Attached {
                    return;
                }
                inner.phase = SessionPhase::Detaching;
            }

            let result = transport.detach(&target).await;
            entry.inner.lock().phase = SessionPhase::Detached;
            match result {
                Ok(()) => {
                    metrics::record_auto_release();
                    debug!(target: "cdp-bridge", target_id = %target, "idle session auto-released");
                }
                Err(err) if err.is_not_attached() => {}
                Err(err) => {
                    warn!(target: "cdp-bridge", target_id = %target, ?err, "auto-release failed");
                }
            }
        }));
    }
}

impl<T: DebugTransport> Drop for SessionManager<T> {
    fn drop(&mut self) {
        if let Some(handle) = self.watcher.lock().take() {
            handle.abort();
        }
        for entry in self.entries.iter() {
            if let Some(task) = entry.value().inner.lock().release_task.take() {
                task.abort();
            }
        }
    }
}

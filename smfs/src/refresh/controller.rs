//! Catalog refresh driven by the push channel.
//!
//! The controller owns one thread. It reconnects to the refresh channel
//! with exponential backoff, reloads the catalog after every successful
//! (re)connect, and translates frames into catalog mutations. Snapshot
//! fetches retry independently with the same backoff, bounded per
//! invocation; a fatal fetch abandons the cycle and keeps the previous
//! catalog in effect.

use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::catalog::{Catalog, VirtualNode};
use crate::error::FsError;
use crate::refresh::channel::{RefreshChannel, RefreshEvent};
use crate::shutdown::ShutdownFlag;
use crate::source::CatalogSource;

/// Snapshot fetch attempts per reload.
const SNAPSHOT_ATTEMPTS: u32 = 5;

/// Reconnect/retry backoff: 1, 2, 4, ... seconds, capped.
pub struct Backoff {
    delay: Duration,
}

impl Backoff {
    const START: Duration = Duration::from_secs(1);
    const CAP: Duration = Duration::from_secs(32);

    pub fn new() -> Self {
        Self {
            delay: Self::START,
        }
    }

    /// Current delay; doubles for the next call up to the cap.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (self.delay * 2).min(Self::CAP);
        delay
    }

    pub fn reset(&mut self) {
        self.delay = Self::START;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new()
    }
}

pub struct RefreshController {
    catalog: Arc<Catalog>,
    source: Arc<dyn CatalogSource>,
    shutdown: ShutdownFlag,
}

impl RefreshController {
    pub fn new(
        catalog: Arc<Catalog>,
        source: Arc<dyn CatalogSource>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            catalog,
            source,
            shutdown,
        }
    }

    /// Launch the controller thread.
    pub fn spawn(self, channel: Box<dyn RefreshChannel>) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("smfs-refresh".into())
            .spawn(move || self.run(channel))
    }

    fn run(self, mut channel: Box<dyn RefreshChannel>) {
        let mut backoff = Backoff::new();
        while !self.shutdown.is_set() {
            match channel.connect() {
                Ok(mut conn) => {
                    backoff.reset();
                    // the catalog may have drifted during the outage
                    self.reload();
                    loop {
                        if self.shutdown.is_set() {
                            conn.close();
                            return;
                        }
                        match conn.recv() {
                            Ok(Some(frame)) => {
                                if !self.handle_frame(&frame) {
                                    conn.close();
                                    return;
                                }
                            }
                            Ok(None) => continue,
                            Err(e) => {
                                warn!(error = %e, "refresh channel lost");
                                break;
                            }
                        }
                    }
                }
                Err(e) => warn!(error = %e, "refresh channel connect failed"),
            }
            if self.shutdown.wait_timeout(backoff.next_delay()) {
                return;
            }
        }
    }

    /// Returns false when the frame requested shutdown.
    fn handle_frame(&self, frame: &str) -> bool {
        match RefreshEvent::parse(frame) {
            RefreshEvent::Reload => {
                info!("reload requested");
                self.reload();
                true
            }
            RefreshEvent::Delete(raw) => {
                self.delete(&raw);
                true
            }
            RefreshEvent::Shutdown => {
                info!("shutdown requested by catalog service");
                self.shutdown.trigger();
                false
            }
            RefreshEvent::Unknown(frame) => {
                warn!(frame = %frame, "ignoring unknown refresh frame");
                true
            }
        }
    }

    /// Fetch a fresh snapshot and apply it, retrying transient failures
    /// with exponential backoff up to a bounded attempt count.
    pub fn reload(&self) {
        let mut backoff = Backoff::new();
        for attempt in 1..=SNAPSHOT_ATTEMPTS {
            match self.source.fetch_snapshot() {
                Ok(snapshot) => {
                    self.catalog.apply_snapshot(snapshot);
                    return;
                }
                Err(e) if e.is_transient() && attempt < SNAPSHOT_ATTEMPTS => {
                    warn!(error = %e, attempt, "snapshot fetch failed, retrying");
                    if self.shutdown.wait_timeout(backoff.next_delay()) {
                        return;
                    }
                }
                Err(e) => {
                    error!(error = %e, "catalog refresh abandoned, keeping previous catalog");
                    return;
                }
            }
        }
    }

    fn delete(&self, raw: &str) {
        match self.catalog.remove(raw) {
            Ok(Some(VirtualNode::Remote(remote))) => {
                info!(path = %raw, "deleted remote entry");
                if let Some(session) = &remote.session {
                    session.stop();
                }
                // joins the worker, if any
                drop(remote);
            }
            Ok(Some(_)) => info!(path = %raw, "deleted entry"),
            Ok(None) => warn!(path = %raw, "delete for unknown path"),
            Err(e) => warn!(path = %raw, error = %e, "delete for invalid path"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::snapshot::GroupMap;
    use crate::catalog::CatalogSnapshot;
    use crate::refresh::channel::RefreshConnection;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Instant;

    struct ScriptedSource {
        /// Errors to serve before succeeding.
        failures: AtomicU32,
        fatal: bool,
        fetches: AtomicU32,
    }

    impl CatalogSource for ScriptedSource {
        fn fetch_snapshot(&self) -> Result<CatalogSnapshot, FsError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return if self.fatal {
                    Err(FsError::NetworkFatal("scripted".into()))
                } else {
                    Err(FsError::NetworkTransient("scripted".into()))
                };
            }
            let groups: GroupMap = serde_json::from_str(
                r#"{"2":{"name":"A","url":"http://h/A","smfs":[{"name":"X","url":"http://h/X"}]}}"#,
            )
            .unwrap();
            Ok(CatalogSnapshot::from_groups(&groups))
        }
    }

    struct ScriptedConnection {
        frames: Vec<String>,
    }

    impl RefreshConnection for ScriptedConnection {
        fn recv(&mut self) -> Result<Option<String>, FsError> {
            if self.frames.is_empty() {
                Err(FsError::NetworkTransient("script exhausted".into()))
            } else {
                Ok(Some(self.frames.remove(0)))
            }
        }

        fn close(&mut self) {}
    }

    struct ScriptedChannel {
        scripts: Mutex<Vec<Vec<String>>>,
        connects: AtomicU32,
    }

    impl RefreshChannel for ScriptedChannel {
        fn connect(&mut self) -> Result<Box<dyn RefreshConnection>, FsError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let mut scripts = self.scripts.lock().unwrap();
            if scripts.is_empty() {
                Err(FsError::NetworkTransient("no service".into()))
            } else {
                Ok(Box::new(ScriptedConnection {
                    frames: scripts.remove(0),
                }))
            }
        }
    }

    fn controller_parts(
        failures: u32,
        fatal: bool,
    ) -> (Arc<Catalog>, Arc<ScriptedSource>, ShutdownFlag) {
        let catalog = Arc::new(Catalog::new(HashSet::new()));
        let source = Arc::new(ScriptedSource {
            failures: AtomicU32::new(failures),
            fatal,
            fetches: AtomicU32::new(0),
        });
        (catalog, source, ShutdownFlag::new())
    }

    #[test]
    fn backoff_doubles_to_cap() {
        let mut backoff = Backoff::new();
        let secs: Vec<u64> = (0..7).map(|_| backoff.next_delay().as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 16, 32, 32]);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn reload_applies_snapshot() {
        let (catalog, source, shutdown) = controller_parts(0, false);
        let controller =
            RefreshController::new(Arc::clone(&catalog), source.clone(), shutdown);
        controller.reload();
        assert!(catalog.contains("/A/X/X.ts").unwrap());
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn reload_retries_transient_failures() {
        let (catalog, source, shutdown) = controller_parts(2, false);
        let controller =
            RefreshController::new(Arc::clone(&catalog), source.clone(), shutdown);
        let start = Instant::now();
        controller.reload();
        // two 1s+2s waits before the third attempt succeeds
        assert!(start.elapsed() >= Duration::from_secs(3));
        assert_eq!(source.fetches.load(Ordering::SeqCst), 3);
        assert!(catalog.contains("/A").unwrap());
    }

    #[test]
    fn fatal_fetch_keeps_previous_catalog() {
        let (catalog, source, shutdown) = controller_parts(1, true);
        let controller =
            RefreshController::new(Arc::clone(&catalog), source.clone(), shutdown);
        controller.reload();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert!(!catalog.contains("/A").unwrap());
    }

    #[test]
    fn shutdown_frame_sets_the_flag_and_exits() {
        let (catalog, source, shutdown) = controller_parts(0, false);
        let controller = RefreshController::new(catalog, source, shutdown.clone());
        let channel = Box::new(ScriptedChannel {
            scripts: Mutex::new(vec![vec!["shutdown".to_string()]]),
            connects: AtomicU32::new(0),
        });
        let worker = controller.spawn(channel).unwrap();
        worker.join().unwrap();
        assert!(shutdown.is_set());
    }

    #[test]
    fn frames_drive_reload_and_delete() {
        let (catalog, source, shutdown) = controller_parts(0, false);
        let controller =
            RefreshController::new(Arc::clone(&catalog), source, shutdown.clone());
        let channel = Box::new(ScriptedChannel {
            scripts: Mutex::new(vec![vec![
                "bogus-frame".to_string(),
                "delete:/A/X/X.ts".to_string(),
                "shutdown".to_string(),
            ]]),
            connects: AtomicU32::new(0),
        });
        let worker = controller.spawn(channel).unwrap();
        worker.join().unwrap();
        // reload on connect populated the catalog, then the delete frame
        // removed the one path
        assert!(catalog.contains("/A").unwrap());
        assert!(!catalog.contains("/A/X/X.ts").unwrap());
    }
}

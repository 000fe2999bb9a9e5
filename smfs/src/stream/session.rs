//! Reader-counted HTTP streaming sessions.
//!
//! One session drives the fetch for one remote URL and feeds one
//! [`BoundedPipe`]. The session starts its worker thread when the first
//! reader arrives and asserts stop when the last one leaves; the worker
//! retries transient errors with a fixed delay until a retry cap.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::FsError;
use crate::pipe::{BoundedPipe, WriteOutcome};
use crate::shutdown::ShutdownFlag;
use crate::stream::client::{StreamEnd, StreamingClient};

/// Delay between retries after a transient stream error.
const RETRY_DELAY: Duration = Duration::from_secs(5);

/// Transient-error retries before the worker gives up.
const MAX_RETRIES: u32 = 10;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Created, no worker yet.
    Idle,
    /// Worker launched and streaming.
    Running,
    /// Stop asserted, worker still winding down.
    Stopping,
    /// Worker has exited.
    Stopped,
}

/// Process-unique session ids, so a file handle can tell whether the
/// session it opened is still the one attached to its node.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// State shared with the worker thread.
struct Shared {
    id: u64,
    url: String,
    pipe: BoundedPipe,
    stop: AtomicBool,
    phase: Mutex<SessionPhase>,
    shutdown: ShutdownFlag,
    client: Arc<dyn StreamingClient>,
}

/// Reader-count and worker handle, guarded by one mutex so count changes
/// are serialized with start/stop decisions.
struct Readers {
    count: u32,
    worker: Option<JoinHandle<()>>,
}

pub struct StreamSession {
    shared: Arc<Shared>,
    readers: Mutex<Readers>,
}

/// Cheap handle for draining the session's pipe without holding any
/// catalog lock.
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<Shared>,
}

impl StreamHandle {
    /// Read from the pipe; 0 means EOF for the filesystem read.
    pub fn read_stream(&self, buf: &mut [u8]) -> usize {
        self.shared.pipe.read(buf, &self.shared.stop)
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }
}

impl StreamSession {
    pub fn new(
        url: impl Into<String>,
        pipe_capacity: usize,
        client: Arc<dyn StreamingClient>,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
                url: url.into(),
                pipe: BoundedPipe::new(pipe_capacity),
                stop: AtomicBool::new(false),
                phase: Mutex::new(SessionPhase::Idle),
                shutdown,
                client,
            }),
            readers: Mutex::new(Readers {
                count: 0,
                worker: None,
            }),
        }
    }

    /// Process-unique identity of this session.
    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn url(&self) -> &str {
        &self.shared.url
    }

    pub fn phase(&self) -> SessionPhase {
        *self.shared.phase.lock().unwrap()
    }

    pub fn reader_count(&self) -> u32 {
        self.readers.lock().unwrap().count
    }

    /// True once stop has been asserted; the session will not stream again.
    pub fn is_stopped(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }

    /// Handle for pipe reads, valid past catalog rebuilds.
    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Add a reader, launching the worker if the session is idle.
    pub fn incr_readers(&self) -> Result<(), FsError> {
        let mut readers = self.readers.lock().unwrap();
        readers.count += 1;
        let mut phase = self.shared.phase.lock().unwrap();
        if *phase == SessionPhase::Idle {
            *phase = SessionPhase::Running;
            drop(phase);
            let shared = Arc::clone(&self.shared);
            match thread::Builder::new()
                .name("smfs-stream".into())
                .spawn(move || worker_loop(shared))
            {
                Ok(handle) => readers.worker = Some(handle),
                Err(e) => {
                    readers.count -= 1;
                    *self.shared.phase.lock().unwrap() = SessionPhase::Stopped;
                    warn!(url = %self.shared.url, error = %e, "failed to spawn stream worker");
                    return Err(FsError::OutOfMemory);
                }
            }
        }
        debug!(url = %self.shared.url, readers = readers.count, "reader added");
        Ok(())
    }

    /// Drop a reader; asserts stop when the count reaches zero. Returns the
    /// remaining count. Never blocks on the worker.
    pub fn decr_readers(&self) -> u32 {
        let mut readers = self.readers.lock().unwrap();
        readers.count = readers.count.saturating_sub(1);
        debug!(url = %self.shared.url, readers = readers.count, "reader removed");
        if readers.count == 0 {
            self.request_stop();
        }
        readers.count
    }

    /// Assert stop and wake pipe waiters. Idempotent; returns without
    /// waiting for the worker.
    pub fn stop(&self) {
        self.request_stop();
    }

    fn request_stop(&self) {
        self.shared.stop.store(true, Ordering::SeqCst);
        let mut phase = self.shared.phase.lock().unwrap();
        if *phase == SessionPhase::Running {
            *phase = SessionPhase::Stopping;
        }
        drop(phase);
        self.shared.pipe.wake_all();
    }

    /// Wait for the worker to exit. Used by tests and drain paths.
    pub fn join_worker(&self) {
        let handle = self.readers.lock().unwrap().worker.take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

impl std::fmt::Debug for StreamSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamSession")
            .field("url", &self.shared.url)
            .field("phase", &self.phase())
            .finish()
    }
}

impl Drop for StreamSession {
    /// Dropping the session stops the stream and waits for the worker.
    fn drop(&mut self) {
        self.request_stop();
        if let Ok(mut readers) = self.readers.lock() {
            if let Some(handle) = readers.worker.take() {
                let _ = handle.join();
            }
        }
    }
}

fn worker_loop(shared: Arc<Shared>) {
    info!(url = %shared.url, "stream worker started");
    let mut retries = 0u32;

    while !shared.stop.load(Ordering::SeqCst) && !shared.shutdown.is_set() {
        let outcome = shared.client.stream(&shared.url, &mut |chunk| {
            if shared.stop.load(Ordering::SeqCst) {
                return false;
            }
            !matches!(
                shared.pipe.write(chunk, &shared.stop),
                WriteOutcome::Aborted
            )
        });

        match outcome {
            Ok(StreamEnd::Finished) => {
                info!(url = %shared.url, "stream completed");
                break;
            }
            Ok(StreamEnd::Cancelled) => {
                debug!(url = %shared.url, "stream cancelled");
                break;
            }
            Err(e) => {
                if shared.stop.load(Ordering::SeqCst) || shared.shutdown.is_set() {
                    break;
                }
                retries += 1;
                if retries > MAX_RETRIES {
                    warn!(url = %shared.url, retries, "giving up on stream after repeated errors");
                    break;
                }
                warn!(url = %shared.url, error = %e, retry = retries, "stream error, retrying");
                if shared.shutdown.wait_timeout(RETRY_DELAY) {
                    break;
                }
            }
        }
    }

    shared.stop.store(true, Ordering::SeqCst);
    shared.pipe.clear();
    shared.pipe.wake_all();
    *shared.phase.lock().unwrap() = SessionPhase::Stopped;
    debug!(url = %shared.url, "stream worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::client::tests::MockStreamingClient;
    use std::time::Instant;

    fn session_with(body: &[u8], hold_open: bool) -> (StreamSession, Arc<MockStreamingClient>) {
        let client = Arc::new(MockStreamingClient::new(body.to_vec(), hold_open));
        let session = StreamSession::new(
            "http://h/X",
            1024 * 1024,
            Arc::clone(&client) as Arc<dyn StreamingClient>,
            ShutdownFlag::new(),
        );
        (session, client)
    }

    fn wait_until(deadline: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        cond()
    }

    #[test]
    fn first_reader_starts_worker() {
        let (session, client) = session_with(b"data", true);
        assert_eq!(session.phase(), SessionPhase::Idle);

        session.incr_readers().unwrap();
        assert_eq!(session.phase(), SessionPhase::Running);
        assert!(wait_until(Duration::from_secs(1), || {
            client.active.load(Ordering::SeqCst) == 1
        }));
        drop(session);
    }

    #[test]
    fn read_stream_delivers_producer_bytes_in_order() {
        let (session, _client) = session_with(b"0123456789", true);
        session.incr_readers().unwrap();

        let mut collected = Vec::new();
        let mut buf = [0u8; 4];
        while collected.len() < 10 {
            let n = session.handle().read_stream(&mut buf);
            assert!(n > 0);
            collected.extend_from_slice(&buf[..n]);
        }
        assert_eq!(collected, b"0123456789");
        drop(session);
    }

    #[test]
    fn last_reader_stops_and_worker_becomes_joinable() {
        let (session, client) = session_with(b"data", true);
        session.incr_readers().unwrap();
        session.incr_readers().unwrap();
        assert_eq!(session.reader_count(), 2);

        assert_eq!(session.decr_readers(), 1);
        assert!(!session.is_stopped());

        assert_eq!(session.decr_readers(), 0);
        assert!(session.is_stopped());
        assert!(wait_until(Duration::from_secs(1), || {
            client.active.load(Ordering::SeqCst) == 0
        }));
        session.join_worker();
        assert_eq!(session.phase(), SessionPhase::Stopped);
    }

    #[test]
    fn stop_on_stopped_session_is_a_noop() {
        let (session, _client) = session_with(b"data", false);
        session.incr_readers().unwrap();
        session.join_worker();
        assert_eq!(session.phase(), SessionPhase::Stopped);

        session.stop();
        session.stop();
        assert_eq!(session.phase(), SessionPhase::Stopped);
    }

    #[test]
    fn remote_eof_stops_without_retry() {
        let (session, client) = session_with(b"short", false);
        session.incr_readers().unwrap();
        session.join_worker();
        assert_eq!(session.phase(), SessionPhase::Stopped);
        assert_eq!(client.requested.lock().unwrap().len(), 1);
    }

    #[test]
    fn reads_observe_eof_after_stop() {
        let (session, _client) = session_with(b"", true);
        session.incr_readers().unwrap();
        let handle = session.handle();
        session.stop();
        session.join_worker();

        let mut buf = [0u8; 4];
        assert_eq!(handle.read_stream(&mut buf), 0);
    }
}

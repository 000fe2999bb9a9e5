//! HTTP client abstraction for streaming and on-demand fetches.
//!
//! The trait allows dependency injection: production code uses
//! [`ReqwestStreamingClient`], tests substitute scripted mocks.

use std::io::Read;
use std::time::Duration;

use crate::error::FsError;

/// How a streaming transfer ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The remote side completed the body.
    Finished,
    /// The chunk sink requested cancellation.
    Cancelled,
}

/// Client used by stream sessions and playlist reads.
pub trait StreamingClient: Send + Sync {
    /// Stream the body of `url`, feeding each received chunk to `sink`.
    ///
    /// The sink returns false to cancel the transfer; the client must stop
    /// promptly and return [`StreamEnd::Cancelled`].
    fn stream(
        &self,
        url: &str,
        sink: &mut (dyn FnMut(&[u8]) -> bool + '_),
    ) -> Result<StreamEnd, FsError>;

    /// Fetch the full body of `url`, following redirects.
    fn fetch(&self, url: &str) -> Result<Vec<u8>, FsError>;
}

/// Read buffer size for streaming transfers.
const CHUNK_SIZE: usize = 64 * 1024;

/// Streaming client backed by a blocking reqwest client.
///
/// Configured for live media delivery: no request timeout, TCP keepalive,
/// HTTP/2 negotiated where the server supports it. Each session owns its
/// own instance, so connections are never shared between streams.
pub struct ReqwestStreamingClient {
    client: reqwest::blocking::Client,
}

impl ReqwestStreamingClient {
    pub fn new() -> Result<Self, FsError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(None)
            .tcp_keepalive(Duration::from_secs(30))
            .build()
            .map_err(|e| FsError::NetworkFatal(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

impl StreamingClient for ReqwestStreamingClient {
    fn stream(
        &self,
        url: &str,
        sink: &mut (dyn FnMut(&[u8]) -> bool + '_),
    ) -> Result<StreamEnd, FsError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| FsError::NetworkTransient(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(FsError::NetworkTransient(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        let mut body = response;
        let mut chunk = [0u8; CHUNK_SIZE];
        loop {
            let n = body
                .read(&mut chunk)
                .map_err(|e| FsError::NetworkTransient(format!("read from {url}: {e}")))?;
            if n == 0 {
                return Ok(StreamEnd::Finished);
            }
            if !sink(&chunk[..n]) {
                return Ok(StreamEnd::Cancelled);
            }
        }
    }

    fn fetch(&self, url: &str) -> Result<Vec<u8>, FsError> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| FsError::NetworkTransient(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(FsError::NetworkTransient(format!(
                "HTTP {} from {url}",
                response.status()
            )));
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| FsError::NetworkTransient(format!("read from {url}: {e}")))
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    /// Scripted client for tests: delivers `body` to the sink, then either
    /// completes or keeps the transfer open until the sink cancels it,
    /// mimicking a live stream.
    pub struct MockStreamingClient {
        pub body: Vec<u8>,
        pub hold_open: bool,
        /// Number of streaming transfers currently in flight.
        pub active: Arc<AtomicUsize>,
        /// URLs the client was asked to stream or fetch.
        pub requested: std::sync::Mutex<Vec<String>>,
    }

    impl MockStreamingClient {
        pub fn new(body: Vec<u8>, hold_open: bool) -> Self {
            Self {
                body,
                hold_open,
                active: Arc::new(AtomicUsize::new(0)),
                requested: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    impl StreamingClient for MockStreamingClient {
        fn stream(
            &self,
            url: &str,
            sink: &mut (dyn FnMut(&[u8]) -> bool + '_),
        ) -> Result<StreamEnd, FsError> {
            self.requested.lock().unwrap().push(url.to_string());
            self.active.fetch_add(1, Ordering::SeqCst);
            let end = (|| {
                if !sink(&self.body) {
                    return StreamEnd::Cancelled;
                }
                if self.hold_open {
                    // poll with empty chunks until the sink cancels
                    loop {
                        if !sink(&[]) {
                            return StreamEnd::Cancelled;
                        }
                        thread::sleep(std::time::Duration::from_millis(5));
                    }
                }
                StreamEnd::Finished
            })();
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(end)
        }

        fn fetch(&self, url: &str) -> Result<Vec<u8>, FsError> {
            self.requested.lock().unwrap().push(url.to_string());
            Ok(self.body.clone())
        }
    }
}

//! Per-URL streaming: HTTP clients, reader-counted sessions, and the
//! on-demand playlist fetch used for `.m3u`/`.xml` reads.

mod client;
mod session;

pub use client::{ReqwestStreamingClient, StreamEnd, StreamingClient};
pub use session::{SessionPhase, StreamHandle, StreamSession};

#[cfg(test)]
pub use client::tests::MockStreamingClient;

use crate::error::FsError;

/// Fetch the full body of `url` and copy the byte range starting at
/// `offset` into `buf`, returning the number of bytes copied.
///
/// Used for `.m3u`/`.xml` reads; the body is buffered in memory per call
/// and never touches a streaming pipe.
pub fn fetch_url_range(
    client: &dyn StreamingClient,
    url: &str,
    buf: &mut [u8],
    offset: u64,
) -> Result<usize, FsError> {
    let body = client.fetch(url)?;
    let offset = offset as usize;
    if offset >= body.len() {
        return Ok(0);
    }
    let n = buf.len().min(body.len() - offset);
    buf[..n].copy_from_slice(&body[offset..offset + n]);
    Ok(n)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fetch_url_range_copies_requested_window() {
        let client = MockStreamingClient::new(b"0123456789".to_vec(), false);
        let mut buf = [0u8; 4];
        assert_eq!(
            fetch_url_range(&client, "http://h/list", &mut buf, 2).unwrap(),
            4
        );
        assert_eq!(&buf, b"2345");
    }

    #[test]
    fn fetch_url_range_truncates_at_body_end() {
        let client = MockStreamingClient::new(b"0123456789".to_vec(), false);
        let mut buf = [0u8; 8];
        assert_eq!(
            fetch_url_range(&client, "http://h/list", &mut buf, 7).unwrap(),
            3
        );
        assert_eq!(&buf[..3], b"789");
    }

    #[test]
    fn fetch_url_range_past_end_is_empty() {
        let client = MockStreamingClient::new(b"0123".to_vec(), false);
        let mut buf = [0u8; 8];
        assert_eq!(
            fetch_url_range(&client, "http://h/list", &mut buf, 4).unwrap(),
            0
        );
    }
}

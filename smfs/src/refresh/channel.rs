//! Refresh channel abstraction and frame parsing.
//!
//! The catalog service pushes UTF-8 text frames: `reload`,
//! `delete:<path>`, and `shutdown`. Anything else is logged and ignored.
//! The transport is pluggable; the bundled implementation reads
//! newline-delimited frames from a TCP socket.

use std::io::{self, BufRead, BufReader};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

use tracing::debug;

use crate::error::FsError;

/// Parsed refresh frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    Reload,
    Delete(String),
    Shutdown,
    Unknown(String),
}

impl RefreshEvent {
    pub fn parse(frame: &str) -> Self {
        let frame = frame.trim();
        match frame {
            "reload" => RefreshEvent::Reload,
            "shutdown" => RefreshEvent::Shutdown,
            _ => match frame.strip_prefix("delete:") {
                Some(path) => RefreshEvent::Delete(path.to_string()),
                None => RefreshEvent::Unknown(frame.to_string()),
            },
        }
    }
}

/// Established connection delivering text frames.
pub trait RefreshConnection: Send {
    /// `Ok(Some(frame))` on a frame, `Ok(None)` on an idle tick (so the
    /// caller can observe shutdown), `Err` when the connection is lost.
    fn recv(&mut self) -> Result<Option<String>, FsError>;

    fn close(&mut self);
}

/// Connection factory; the controller reconnects through it with backoff.
pub trait RefreshChannel: Send {
    fn connect(&mut self) -> Result<Box<dyn RefreshConnection>, FsError>;
}

/// Poll interval used so a blocked `recv` observes shutdown promptly.
const RECV_POLL: Duration = Duration::from_millis(500);

/// Newline-delimited text frames over TCP.
pub struct TcpRefreshChannel {
    addr: String,
}

impl TcpRefreshChannel {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
        }
    }
}

impl RefreshChannel for TcpRefreshChannel {
    fn connect(&mut self) -> Result<Box<dyn RefreshConnection>, FsError> {
        let stream = TcpStream::connect(&self.addr)
            .map_err(|e| FsError::NetworkTransient(format!("connect {}: {e}", self.addr)))?;
        stream
            .set_read_timeout(Some(RECV_POLL))
            .map_err(FsError::Io)?;
        debug!(addr = %self.addr, "refresh channel connected");
        Ok(Box::new(TcpRefreshConnection {
            reader: BufReader::new(stream),
            pending: String::new(),
        }))
    }
}

struct TcpRefreshConnection {
    reader: BufReader<TcpStream>,
    pending: String,
}

impl RefreshConnection for TcpRefreshConnection {
    fn recv(&mut self) -> Result<Option<String>, FsError> {
        match self.reader.read_line(&mut self.pending) {
            Ok(0) => Err(FsError::NetworkTransient(
                "refresh channel closed by peer".to_string(),
            )),
            Ok(_) => {
                if self.pending.ends_with('\n') {
                    let frame = self.pending.trim().to_string();
                    self.pending.clear();
                    Ok(Some(frame))
                } else {
                    // mid-frame; keep accumulating
                    Ok(None)
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(e) => Err(FsError::NetworkTransient(format!(
                "refresh channel read: {e}"
            ))),
        }
    }

    fn close(&mut self) {
        let _ = self.reader.get_ref().shutdown(Shutdown::Both);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_frames() {
        assert_eq!(RefreshEvent::parse("reload"), RefreshEvent::Reload);
        assert_eq!(RefreshEvent::parse("shutdown"), RefreshEvent::Shutdown);
        assert_eq!(
            RefreshEvent::parse("delete:/A/X/X.ts"),
            RefreshEvent::Delete("/A/X/X.ts".to_string())
        );
    }

    #[test]
    fn trims_surrounding_whitespace() {
        assert_eq!(RefreshEvent::parse("  reload\n"), RefreshEvent::Reload);
    }

    #[test]
    fn unknown_frames_are_preserved_verbatim() {
        assert_eq!(
            RefreshEvent::parse("rescan-all"),
            RefreshEvent::Unknown("rescan-all".to_string())
        );
    }
}

//! Catalog refresh: the push-channel abstraction and the controller that
//! turns its frames into catalog rebuilds and deletions.

mod channel;
mod controller;

pub use channel::{RefreshChannel, RefreshConnection, RefreshEvent, TcpRefreshChannel};
pub use controller::{Backoff, RefreshController};

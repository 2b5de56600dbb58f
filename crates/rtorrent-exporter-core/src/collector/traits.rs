//! Abstraction over the rTorrent download interface to enable testing and mocking.
//!
//! The `DownloadsSource` trait is the only way the collector reaches rTorrent.
//! In production it is implemented by [`crate::client::RtorrentClient`]; tests
//! use [`super::mock::MockDownloadsSource`].

use crate::xmlrpc::Value;

/// One positionally-encoded detail row: position 0 is the info hash,
/// position 1 the display name, the rest follow the requested selector list.
pub type DetailRow = Vec<Value>;

/// The download lifecycle lists rTorrent exposes as views.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateList {
    All,
    Started,
    Stopped,
    Complete,
    Incomplete,
    Hashing,
    Seeding,
    Leeching,
}

impl StateList {
    /// The rTorrent view name backing this list. The default view `main`
    /// holds every download.
    pub fn view(self) -> &'static str {
        match self {
            StateList::All => "main",
            StateList::Started => "started",
            StateList::Stopped => "stopped",
            StateList::Complete => "complete",
            StateList::Incomplete => "incomplete",
            StateList::Hashing => "hashing",
            StateList::Seeding => "seeding",
            StateList::Leeching => "leeching",
        }
    }
}

/// Error type for capability-source queries.
///
/// The collector propagates these verbatim; it never retries or masks them.
#[derive(Debug)]
pub enum SourceError {
    /// The call itself failed (connection, HTTP status, timeout).
    Transport(String),
    /// rTorrent answered with an XML-RPC fault.
    Fault { code: i64, message: String },
    /// The response parsed but did not have the expected shape.
    Unexpected(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceError::Transport(msg) => write!(f, "rTorrent request failed: {}", msg),
            SourceError::Fault { code, message } => {
                write!(f, "rTorrent fault {}: {}", code, message)
            }
            SourceError::Unexpected(msg) => {
                write!(f, "unexpected rTorrent response: {}", msg)
            }
        }
    }
}

impl std::error::Error for SourceError {}

/// A type which can retrieve downloads information from rTorrent.
pub trait DownloadsSource {
    /// Returns the info hashes of every download in the given state list.
    fn state_list(&self, list: StateList) -> Result<Vec<String>, SourceError>;

    /// Issues one batched query over the `active` view and returns one row
    /// per active download. `selectors` defines both the request shape and
    /// the positional order of every returned row.
    fn download_details(&self, selectors: &[&str]) -> Result<Vec<DetailRow>, SourceError>;
}

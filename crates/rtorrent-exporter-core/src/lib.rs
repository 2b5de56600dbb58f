//! rtorrent-exporter-core — metric extraction engine for the rTorrent exporter.
//!
//! Provides:
//! - `collector` — descriptor set, downloads collector, row decoding, and the
//!   `DownloadsSource` capability trait (with a mock for tests)
//! - `client` — blocking XML-RPC client implementing `DownloadsSource`
//! - `xmlrpc` — the XML-RPC value model and wire codec

pub mod client;
pub mod collector;
pub mod xmlrpc;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

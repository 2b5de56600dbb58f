//! Positional decoding of batched download detail rows.
//!
//! `d.multicall2` returns a flat heterogeneous tuple per download, not a keyed
//! record, so the selector list is both the request shape and the only source
//! of truth for interpreting each row. The two must never go out of sync:
//! changing [`DEFAULT_SELECTORS`] changes what is requested *and* how
//! responses are decoded.

use std::collections::HashMap;

use crate::xmlrpc::Value;

/// Field selector requesting the info hash (label position 0).
pub const SELECTOR_HASH: &str = "d.hash=";
/// Field selector requesting the display name (label position 1).
pub const SELECTOR_BASE_FILENAME: &str = "d.base_filename=";
/// Field selector for the current download rate in bytes per second.
pub const SELECTOR_DOWN_RATE: &str = "d.down.rate=";
/// Field selector for total bytes downloaded.
pub const SELECTOR_DOWN_TOTAL: &str = "d.down.total=";
/// Field selector for the current upload rate in bytes per second.
pub const SELECTOR_UP_RATE: &str = "d.up.rate=";
/// Field selector for total bytes uploaded.
pub const SELECTOR_UP_TOTAL: &str = "d.up.total=";

/// The selector list sent with every batched detail query. Positions 0 and 1
/// carry the labels, the rest map to detail metrics via the dispatch table.
pub const DEFAULT_SELECTORS: [&str; 6] = [
    SELECTOR_HASH,
    SELECTOR_BASE_FILENAME,
    SELECTOR_DOWN_RATE,
    SELECTOR_DOWN_TOTAL,
    SELECTOR_UP_RATE,
    SELECTOR_UP_TOTAL,
];

/// The per-download detail metrics this decoder can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DetailMetric {
    DownloadRate,
    DownloadTotal,
    UploadRate,
    UploadTotal,
}

impl DetailMetric {
    /// Metric name suffix under the `rtorrent_downloads` subsystem.
    pub fn name(self) -> &'static str {
        match self {
            DetailMetric::DownloadRate => "download_rate_bytes",
            DetailMetric::DownloadTotal => "download_total_bytes",
            DetailMetric::UploadRate => "upload_rate_bytes",
            DetailMetric::UploadTotal => "upload_total_bytes",
        }
    }
}

/// Selector token to detail metric mapping. Selectors absent from this table
/// are skipped during decoding, which keeps the decoder forward-compatible
/// with selector lists carrying fields it does not expose yet.
const DISPATCH: [(&str, DetailMetric); 4] = [
    (SELECTOR_DOWN_RATE, DetailMetric::DownloadRate),
    (SELECTOR_DOWN_TOTAL, DetailMetric::DownloadTotal),
    (SELECTOR_UP_RATE, DetailMetric::UploadRate),
    (SELECTOR_UP_TOTAL, DetailMetric::UploadTotal),
];

/// Error decoding one detail row.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeError {
    /// The row does not have one value per requested selector.
    RowLength { expected: usize, got: usize },
    /// A label position did not hold a string.
    LabelType {
        label: &'static str,
        found: &'static str,
    },
    /// A recognized selector's value was not a 64-bit integer.
    ValueType {
        metric: DetailMetric,
        found: &'static str,
    },
}

impl std::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DecodeError::RowLength { expected, got } => {
                write!(
                    f,
                    "detail row has {} values, expected {} (one per selector)",
                    got, expected
                )
            }
            DecodeError::LabelType { label, found } => {
                write!(f, "label {} is a {}, expected string", label, found)
            }
            DecodeError::ValueType { metric, found } => {
                write!(
                    f,
                    "failed to decode {}: value is a {}, expected integer",
                    metric.name(),
                    found
                )
            }
        }
    }
}

impl std::error::Error for DecodeError {}

/// One fully-validated detail row. A row that fails mid-decode yields no
/// `DecodedRow` at all, so partially-decoded fields are never emitted.
#[derive(Debug, PartialEq, Eq)]
pub struct DecodedRow {
    pub info_hash: String,
    pub name: String,
    pub fields: Vec<(DetailMetric, i64)>,
}

/// Decodes detail rows against a fixed selector list.
///
/// Built once at collector construction; the dispatch map avoids string
/// comparisons against every known selector in the per-row loop.
#[derive(Debug)]
pub struct RowDecoder {
    selectors: Vec<&'static str>,
    dispatch: HashMap<&'static str, DetailMetric>,
}

impl RowDecoder {
    /// Builds a decoder for `selectors`.
    ///
    /// # Panics
    ///
    /// Panics if `selectors` has fewer than two entries: positions 0 and 1
    /// must carry the info-hash and name label selectors.
    pub fn new(selectors: &[&'static str]) -> Self {
        assert!(
            selectors.len() >= 2,
            "selector list must start with the info-hash and name selectors"
        );
        Self {
            selectors: selectors.to_vec(),
            dispatch: DISPATCH.into_iter().collect(),
        }
    }

    /// The selector list this decoder was built for, in request order.
    pub fn selectors(&self) -> &[&'static str] {
        &self.selectors
    }

    /// Validates and decodes one row.
    ///
    /// Positions 0 and 1 must be strings (info hash, display name); every
    /// later position is dispatched by the selector at the same index.
    pub fn decode(&self, row: &[Value]) -> Result<DecodedRow, DecodeError> {
        if row.len() != self.selectors.len() {
            return Err(DecodeError::RowLength {
                expected: self.selectors.len(),
                got: row.len(),
            });
        }

        let info_hash = row[0]
            .as_str()
            .ok_or(DecodeError::LabelType {
                label: "info_hash",
                found: row[0].type_name(),
            })?
            .to_string();
        let name = row[1]
            .as_str()
            .ok_or(DecodeError::LabelType {
                label: "name",
                found: row[1].type_name(),
            })?
            .to_string();

        let mut fields = Vec::with_capacity(row.len().saturating_sub(2));
        for (selector, value) in self.selectors.iter().zip(row).skip(2) {
            let Some(&metric) = self.dispatch.get(selector) else {
                continue;
            };
            let n = value.as_i64().ok_or(DecodeError::ValueType {
                metric,
                found: value.type_name(),
            })?;
            fields.push((metric, n));
        }

        Ok(DecodedRow {
            info_hash,
            name,
            fields,
        })
    }
}

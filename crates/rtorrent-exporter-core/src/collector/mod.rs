//! Downloads metric collection.
//!
//! This module turns one rTorrent scrape into gauge observations:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │                   DownloadsCollector                     │
//! │  count phase: eight state lists → eight unlabeled gauges │
//! │  detail phase (optional):                                │
//! │    d.multicall2 rows ──► RowDecoder ──► labeled gauges   │
//! └───────────────────────────┬──────────────────────────────┘
//!                             │
//!                 ┌───────────▼───────────┐
//!                 │   DownloadsSource     │ (trait)
//!                 └───────────┬───────────┘
//!           ┌─────────────────┴─────────────────┐
//!    ┌──────▼─────────┐              ┌──────────▼──────────┐
//!    │ RtorrentClient │              │ MockDownloadsSource │
//!    │ (production)   │              │ (testing)           │
//!    └────────────────┘              └─────────────────────┘
//! ```
//!
//! A scrape is a single-pass protocol: observations are pushed onto a
//! [`MetricSink`] as they are produced, and the first failure pushes one
//! invalid-metric signal naming the descriptor being populated, then aborts
//! the scrape. Observations pushed before the failure stay valid.
//!
//! The collector is immutable after construction (descriptors, selector list,
//! options), so concurrent scrapes need no locking; all mutable state lives
//! in the sink owned by the caller.

mod decode;
pub mod mock;
mod traits;

pub use decode::{
    DEFAULT_SELECTORS, DecodeError, DecodedRow, DetailMetric, RowDecoder, SELECTOR_BASE_FILENAME,
    SELECTOR_DOWN_RATE, SELECTOR_DOWN_TOTAL, SELECTOR_HASH, SELECTOR_UP_RATE, SELECTOR_UP_TOTAL,
};
pub use traits::{DetailRow, DownloadsSource, SourceError, StateList};

use tracing::error;

/// Metric namespace prefix for everything this exporter emits.
pub const NAMESPACE: &str = "rtorrent";

const SUBSYSTEM: &str = "downloads";

/// Label schema of the per-download detail metrics.
const DETAIL_LABELS: &[&str] = &["info_hash", "name"];

/// Joins the non-empty name parts with underscores, e.g.
/// `("rtorrent", "downloads", "started")` → `rtorrent_downloads_started`.
fn build_fq_name(namespace: &str, subsystem: &str, name: &str) -> String {
    [namespace, subsystem, name]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("_")
}

// ============================================================
// Descriptors and the observation protocol
// ============================================================

/// The immutable identity of one emittable metric: fully-qualified name,
/// help text, and label schema.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    name: String,
    help: &'static str,
    labels: &'static [&'static str],
}

impl Descriptor {
    fn new(subsystem: &str, name: &str, help: &'static str) -> Self {
        Self {
            name: build_fq_name(NAMESPACE, subsystem, name),
            help,
            labels: &[],
        }
    }

    fn with_labels(subsystem: &str, name: &str, help: &'static str) -> Self {
        Self {
            labels: DETAIL_LABELS,
            ..Self::new(subsystem, name, help)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn help(&self) -> &str {
        self.help
    }

    pub fn labels(&self) -> &'static [&'static str] {
        self.labels
    }
}

/// One concrete gauge emission. `label_values` matches the descriptor's label
/// schema in arity and order.
#[derive(Debug)]
pub struct Observation<'a> {
    pub descriptor: &'a Descriptor,
    pub value: f64,
    pub label_values: Vec<String>,
}

/// Receiving end of one scrape.
///
/// [`DownloadsCollector::collect`] pushes observations in a single pass and
/// signals at most one failure per scrape through `invalid`.
pub trait MetricSink {
    fn observe(&mut self, observation: Observation<'_>);

    /// Signals that the scrape failed while populating `descriptor` (`None`
    /// if no descriptor was being targeted yet). Observations already pushed
    /// remain valid.
    fn invalid(&mut self, descriptor: Option<&Descriptor>, error: &CollectError);
}

/// Error terminating a scrape.
#[derive(Debug)]
pub enum CollectError {
    /// The capability source call failed; propagated verbatim.
    Source(SourceError),
    /// A detail row could not be decoded.
    Decode(DecodeError),
}

impl std::fmt::Display for CollectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CollectError::Source(e) => e.fmt(f),
            CollectError::Decode(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for CollectError {}

impl From<SourceError> for CollectError {
    fn from(e: SourceError) -> Self {
        CollectError::Source(e)
    }
}

impl From<DecodeError> for CollectError {
    fn from(e: DecodeError) -> Self {
        CollectError::Decode(e)
    }
}

/// A scrape abort: the error plus the descriptor being populated when it hit.
struct Failure<'a> {
    descriptor: &'a Descriptor,
    error: CollectError,
}

// ============================================================
// Collector
// ============================================================

/// Collector configuration.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectorOpts {
    /// Collect per-download rate and total bytes for every active download.
    /// Greatly increases metric cardinality.
    pub download_details: bool,
}

/// Descriptors for the state-list count gauges. All nine always exist.
#[derive(Debug)]
struct CountDescriptors {
    downloads: Descriptor,
    started: Descriptor,
    stopped: Descriptor,
    complete: Descriptor,
    incomplete: Descriptor,
    hashing: Descriptor,
    seeding: Descriptor,
    leeching: Descriptor,
    active: Descriptor,
}

impl CountDescriptors {
    fn new() -> Self {
        Self {
            // Subsystem used as the name so we get plain "rtorrent_downloads".
            downloads: Descriptor::new("", SUBSYSTEM, "Total number of downloads."),
            started: Descriptor::new(SUBSYSTEM, "started", "Number of started downloads."),
            stopped: Descriptor::new(SUBSYSTEM, "stopped", "Number of stopped downloads."),
            complete: Descriptor::new(SUBSYSTEM, "complete", "Number of complete downloads."),
            incomplete: Descriptor::new(
                SUBSYSTEM,
                "incomplete",
                "Number of incomplete downloads.",
            ),
            hashing: Descriptor::new(SUBSYSTEM, "hashing", "Number of hashing downloads."),
            seeding: Descriptor::new(SUBSYSTEM, "seeding", "Number of seeding downloads."),
            leeching: Descriptor::new(SUBSYSTEM, "leeching", "Number of leeching downloads."),
            active: Descriptor::new(SUBSYSTEM, "active", "Number of active downloads."),
        }
    }
}

/// Detail-phase machinery: the four labeled descriptors plus the row decoder
/// bound to the fixed selector list. Exists only when detail collection is
/// enabled, so disabled configurations cannot reference these descriptors.
#[derive(Debug)]
struct DetailDescriptors {
    download_rate: Descriptor,
    download_total: Descriptor,
    upload_rate: Descriptor,
    upload_total: Descriptor,
    decoder: RowDecoder,
}

impl DetailDescriptors {
    fn new() -> Self {
        Self {
            download_rate: Descriptor::with_labels(
                SUBSYSTEM,
                "download_rate_bytes",
                "Current download rate in bytes.",
            ),
            download_total: Descriptor::with_labels(
                SUBSYSTEM,
                "download_total_bytes",
                "Total Bytes downloaded.",
            ),
            upload_rate: Descriptor::with_labels(
                SUBSYSTEM,
                "upload_rate_bytes",
                "Current upload rate in bytes.",
            ),
            upload_total: Descriptor::with_labels(
                SUBSYSTEM,
                "upload_total_bytes",
                "Total Bytes uploaded.",
            ),
            decoder: RowDecoder::new(&DEFAULT_SELECTORS),
        }
    }

    fn descriptor(&self, metric: DetailMetric) -> &Descriptor {
        match metric {
            DetailMetric::DownloadRate => &self.download_rate,
            DetailMetric::DownloadTotal => &self.download_total,
            DetailMetric::UploadRate => &self.upload_rate,
            DetailMetric::UploadTotal => &self.upload_total,
        }
    }
}

/// Collects metrics regarding rTorrent downloads from a [`DownloadsSource`].
///
/// Immutable after construction; one instance may serve concurrent scrapes.
#[derive(Debug)]
pub struct DownloadsCollector<S> {
    source: S,
    opts: CollectorOpts,
    counts: CountDescriptors,
    detail: Option<DetailDescriptors>,
}

impl<S: DownloadsSource> DownloadsCollector<S> {
    /// Creates a collector over `source`. Detail descriptors are built only
    /// when `opts.download_details` is set.
    pub fn new(source: S, opts: CollectorOpts) -> Self {
        Self {
            source,
            opts,
            counts: CountDescriptors::new(),
            detail: opts.download_details.then(DetailDescriptors::new),
        }
    }

    pub fn opts(&self) -> CollectorOpts {
        self.opts
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Every descriptor a scrape may emit under the current configuration,
    /// in stable order. Idempotent and side-effect free.
    pub fn describe(&self) -> Vec<&Descriptor> {
        let mut descriptors = vec![
            &self.counts.downloads,
            &self.counts.started,
            &self.counts.stopped,
            &self.counts.complete,
            &self.counts.incomplete,
            &self.counts.hashing,
            &self.counts.seeding,
            &self.counts.leeching,
            &self.counts.active,
        ];
        if let Some(detail) = &self.detail {
            descriptors.extend([
                &detail.download_rate,
                &detail.download_total,
                &detail.upload_rate,
                &detail.upload_total,
            ]);
        }
        descriptors
    }

    /// Runs one scrape, pushing every gauge onto `sink`.
    ///
    /// On failure, logs and pushes a single invalid-metric signal naming the
    /// descriptor that was being populated, then stops. Observations already
    /// pushed are kept.
    pub fn collect(&self, sink: &mut dyn MetricSink) {
        if let Err(failure) = self.try_collect(sink) {
            error!(
                descriptor = failure.descriptor.name(),
                error = %failure.error,
                "failed collecting download metric"
            );
            sink.invalid(Some(failure.descriptor), &failure.error);
        }
    }

    fn try_collect<'a>(&'a self, sink: &mut dyn MetricSink) -> Result<(), Failure<'a>> {
        self.collect_download_counts(sink)?;

        if let Some(detail) = &self.detail {
            self.collect_download_details(detail, sink)?;
        }

        Ok(())
    }

    /// Count phase: all eight list queries run before anything is emitted,
    /// so a failed scrape emits no partial counts.
    fn collect_download_counts<'a>(
        &'a self,
        sink: &mut dyn MetricSink,
    ) -> Result<(), Failure<'a>> {
        let lists = [
            (StateList::All, &self.counts.downloads),
            (StateList::Started, &self.counts.started),
            (StateList::Stopped, &self.counts.stopped),
            (StateList::Complete, &self.counts.complete),
            (StateList::Incomplete, &self.counts.incomplete),
            (StateList::Hashing, &self.counts.hashing),
            (StateList::Seeding, &self.counts.seeding),
            (StateList::Leeching, &self.counts.leeching),
        ];

        let mut sizes = Vec::with_capacity(lists.len());
        for (list, descriptor) in lists {
            let hashes = self.source.state_list(list).map_err(|e| Failure {
                descriptor,
                error: e.into(),
            })?;
            sizes.push((descriptor, hashes.len()));
        }

        for (descriptor, len) in sizes {
            sink.observe(Observation {
                descriptor,
                value: len as f64,
                label_values: Vec::new(),
            });
        }

        Ok(())
    }

    /// Detail phase: one batched query over the active view, then one gauge
    /// per decodable field per row. Rows decode and flush one at a time; a
    /// bad row aborts the rest of the scrape but keeps earlier rows.
    fn collect_download_details<'a>(
        &'a self,
        detail: &'a DetailDescriptors,
        sink: &mut dyn MetricSink,
    ) -> Result<(), Failure<'a>> {
        let rows = self
            .source
            .download_details(detail.decoder.selectors())
            .map_err(|e| Failure {
                descriptor: &self.counts.active,
                error: e.into(),
            })?;

        sink.observe(Observation {
            descriptor: &self.counts.active,
            value: rows.len() as f64,
            label_values: Vec::new(),
        });

        for row in &rows {
            let decoded = detail.decoder.decode(row).map_err(|e| {
                let descriptor = match &e {
                    DecodeError::ValueType { metric, .. } => detail.descriptor(*metric),
                    DecodeError::LabelType { .. } => &detail.download_rate,
                    // The malformed row came from the active-details query.
                    DecodeError::RowLength { .. } => &self.counts.active,
                };
                Failure {
                    descriptor,
                    error: e.into(),
                }
            })?;

            let labels = vec![decoded.info_hash, decoded.name];
            for (metric, value) in decoded.fields {
                sink.observe(Observation {
                    descriptor: detail.descriptor(metric),
                    value: value as f64,
                    label_values: labels.clone(),
                });
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockDownloadsSource, RecordingSink};
    use super::*;
    use crate::xmlrpc::Value;

    fn detail_row() -> DetailRow {
        vec![
            Value::String("hash1".into()),
            Value::String("name1".into()),
            Value::Int(100),
            Value::Int(200),
            Value::Int(300),
            Value::Int(400),
        ]
    }

    #[test]
    fn test_describe_without_details() {
        let collector =
            DownloadsCollector::new(MockDownloadsSource::new(), CollectorOpts::default());
        let names: Vec<&str> = collector.describe().iter().map(|d| d.name()).collect();
        assert_eq!(
            names,
            vec![
                "rtorrent_downloads",
                "rtorrent_downloads_started",
                "rtorrent_downloads_stopped",
                "rtorrent_downloads_complete",
                "rtorrent_downloads_incomplete",
                "rtorrent_downloads_hashing",
                "rtorrent_downloads_seeding",
                "rtorrent_downloads_leeching",
                "rtorrent_downloads_active",
            ]
        );
    }

    #[test]
    fn test_describe_with_details() {
        let collector = DownloadsCollector::new(
            MockDownloadsSource::new(),
            CollectorOpts {
                download_details: true,
            },
        );
        let descriptors = collector.describe();
        assert_eq!(descriptors.len(), 13);
        assert_eq!(descriptors[9].name(), "rtorrent_downloads_download_rate_bytes");
        assert_eq!(descriptors[9].labels(), &["info_hash", "name"]);
        assert_eq!(descriptors[12].name(), "rtorrent_downloads_upload_total_bytes");
        // Idempotent.
        assert_eq!(collector.describe().len(), 13);
    }

    #[test]
    fn test_collect_counts_match_list_lengths() {
        let source = MockDownloadsSource::new()
            .with_list(StateList::Started, &["a", "b"]);
        let collector = DownloadsCollector::new(source, CollectorOpts::default());

        let mut sink = RecordingSink::default();
        collector.collect(&mut sink);

        assert!(sink.invalid.is_none());
        assert_eq!(sink.observations.len(), 8);
        for obs in &sink.observations {
            assert!(obs.labels.is_empty());
            let expected = if obs.metric == "rtorrent_downloads_started" {
                2.0
            } else {
                0.0
            };
            assert_eq!(obs.value, expected, "{}", obs.metric);
        }
    }

    #[test]
    fn test_collect_count_failure_emits_nothing_but_sentinel() {
        let source = MockDownloadsSource::new()
            .with_list(StateList::All, &["a"])
            .failing_list(StateList::Complete);
        let collector = DownloadsCollector::new(
            source,
            CollectorOpts {
                download_details: true,
            },
        );

        let mut sink = RecordingSink::default();
        collector.collect(&mut sink);

        // Queries before the failing one produce no observations either, and
        // the detail query is never issued.
        assert!(sink.observations.is_empty());
        let (descriptor, _error) = sink.invalid.expect("sentinel expected");
        assert_eq!(descriptor.as_deref(), Some("rtorrent_downloads_complete"));
        assert_eq!(collector.source().detail_calls(), 0);
    }

    #[test]
    fn test_collect_details_end_to_end() {
        let source = MockDownloadsSource::new()
            .with_list(StateList::All, &["hash1"])
            .with_details(vec![detail_row()]);
        let collector = DownloadsCollector::new(
            source,
            CollectorOpts {
                download_details: true,
            },
        );

        let mut sink = RecordingSink::default();
        collector.collect(&mut sink);

        assert!(sink.invalid.is_none());
        // 8 counts + active + 4 detail gauges.
        assert_eq!(sink.observations.len(), 13);

        let active = sink
            .observations
            .iter()
            .find(|o| o.metric == "rtorrent_downloads_active")
            .unwrap();
        assert_eq!(active.value, 1.0);

        let expected = [
            ("rtorrent_downloads_download_rate_bytes", 100.0),
            ("rtorrent_downloads_download_total_bytes", 200.0),
            ("rtorrent_downloads_upload_rate_bytes", 300.0),
            ("rtorrent_downloads_upload_total_bytes", 400.0),
        ];
        for (metric, value) in expected {
            let obs = sink
                .observations
                .iter()
                .find(|o| o.metric == metric)
                .unwrap_or_else(|| panic!("missing {}", metric));
            assert_eq!(obs.value, value);
            assert_eq!(obs.labels, vec!["hash1".to_string(), "name1".to_string()]);
        }
    }

    #[test]
    fn test_collect_details_disabled_never_queries() {
        let source = MockDownloadsSource::new().failing_details();
        let collector = DownloadsCollector::new(source, CollectorOpts::default());

        let mut sink = RecordingSink::default();
        collector.collect(&mut sink);

        assert!(sink.invalid.is_none());
        assert_eq!(sink.observations.len(), 8);
        assert_eq!(collector.source().detail_calls(), 0);
    }

    #[test]
    fn test_detail_query_failure_tags_active() {
        let source = MockDownloadsSource::new().failing_details();
        let collector = DownloadsCollector::new(
            source,
            CollectorOpts {
                download_details: true,
            },
        );

        let mut sink = RecordingSink::default();
        collector.collect(&mut sink);

        // Counts were already emitted and stay.
        assert_eq!(sink.observations.len(), 8);
        let (descriptor, _error) = sink.invalid.expect("sentinel expected");
        assert_eq!(descriptor.as_deref(), Some("rtorrent_downloads_active"));
    }

    #[test]
    fn test_bad_row_keeps_earlier_rows() {
        let mut bad = detail_row();
        bad[3] = Value::String("oops".into());
        let source = MockDownloadsSource::new().with_details(vec![detail_row(), bad]);
        let collector = DownloadsCollector::new(
            source,
            CollectorOpts {
                download_details: true,
            },
        );

        let mut sink = RecordingSink::default();
        collector.collect(&mut sink);

        // 8 counts + active + the 4 gauges of the first row.
        assert_eq!(sink.observations.len(), 13);
        let (descriptor, error) = sink.invalid.expect("sentinel expected");
        assert_eq!(
            descriptor.as_deref(),
            Some("rtorrent_downloads_download_total_bytes")
        );
        assert!(error.contains("download_total_bytes"));
    }

    #[test]
    fn test_partially_decoded_row_is_discarded() {
        let mut bad = detail_row();
        bad[4] = Value::String("oops".into());
        let source = MockDownloadsSource::new().with_details(vec![bad]);
        let collector = DownloadsCollector::new(
            source,
            CollectorOpts {
                download_details: true,
            },
        );

        let mut sink = RecordingSink::default();
        collector.collect(&mut sink);

        // Fields decoded before the failing one (positions 2 and 3) are not
        // emitted: the row contributes only to the active count.
        assert_eq!(sink.observations.len(), 9);
        assert!(
            sink.observations
                .iter()
                .all(|o| !o.metric.ends_with("_bytes"))
        );
        let (descriptor, _error) = sink.invalid.expect("sentinel expected");
        assert_eq!(
            descriptor.as_deref(),
            Some("rtorrent_downloads_upload_rate_bytes")
        );
    }

    #[test]
    fn test_short_row_tags_active() {
        let source = MockDownloadsSource::new().with_details(vec![vec![
            Value::String("hash1".into()),
            Value::String("name1".into()),
        ]]);
        let collector = DownloadsCollector::new(
            source,
            CollectorOpts {
                download_details: true,
            },
        );

        let mut sink = RecordingSink::default();
        collector.collect(&mut sink);

        let (descriptor, error) = sink.invalid.expect("sentinel expected");
        assert_eq!(descriptor.as_deref(), Some("rtorrent_downloads_active"));
        assert!(error.contains("expected 6"));
    }
}

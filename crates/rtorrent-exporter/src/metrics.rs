//! Bridge between the downloads collector and the prometheus-client registry.
//!
//! prometheus-client drives scrapes through [`Collector::encode`], which is
//! family-oriented: every metric family is encoded once, with all its label
//! sets. The downloads collector instead streams observations one at a time,
//! so each scrape runs into a buffering sink first and is then encoded
//! grouped per descriptor, in declaration order.
//!
//! A failed scrape keeps whatever was pushed before the failure and adds one
//! `rtorrent_scrape_error` gauge whose `collector` label names the descriptor
//! that was being populated. prometheus-client has no invalid-metric channel
//! item, so this gauge is the wire form of that signal.

use std::fmt;

use prometheus_client::collector::Collector;
use prometheus_client::encoding::{DescriptorEncoder, EncodeMetric};
use prometheus_client::metrics::MetricType;
use prometheus_client::metrics::gauge::ConstGauge;

use rtorrent_exporter_core::collector::{
    CollectError, Descriptor, DownloadsCollector, DownloadsSource, MetricSink, Observation,
};

const SCRAPE_ERROR_NAME: &str = "rtorrent_scrape_error";
const SCRAPE_ERROR_HELP: &str =
    "1 if the scrape failed; the collector label names the failing metric.";
/// Label value when the failure preceded any descriptor being targeted.
const NO_DESCRIPTOR: &str = "none";

/// One buffered gauge: descriptor name, value, label pairs.
type BufferedObservation = (String, f64, Vec<(String, String)>);

/// Sink collecting one scrape's output before family-oriented encoding.
#[derive(Debug, Default)]
struct ScrapeBuffer {
    observations: Vec<BufferedObservation>,
    failed: Option<String>,
}

impl MetricSink for ScrapeBuffer {
    fn observe(&mut self, observation: Observation<'_>) {
        let labels = observation
            .descriptor
            .labels()
            .iter()
            .map(|name| name.to_string())
            .zip(observation.label_values)
            .collect();
        self.observations.push((
            observation.descriptor.name().to_string(),
            observation.value,
            labels,
        ));
    }

    fn invalid(&mut self, descriptor: Option<&Descriptor>, _error: &CollectError) {
        self.failed = Some(
            descriptor
                .map(|d| d.name().to_string())
                .unwrap_or_else(|| NO_DESCRIPTOR.to_string()),
        );
    }
}

/// Registry-facing adapter around a [`DownloadsCollector`].
#[derive(Debug)]
pub struct DownloadsMetrics<S> {
    collector: DownloadsCollector<S>,
}

impl<S> DownloadsMetrics<S> {
    pub fn new(collector: DownloadsCollector<S>) -> Self {
        Self { collector }
    }
}

impl<S> Collector for DownloadsMetrics<S>
where
    S: DownloadsSource + fmt::Debug + Send + Sync + 'static,
{
    fn encode(&self, mut encoder: DescriptorEncoder) -> Result<(), fmt::Error> {
        let mut buffer = ScrapeBuffer::default();
        self.collector.collect(&mut buffer);

        for descriptor in self.collector.describe() {
            let mut observations = buffer
                .observations
                .iter()
                .filter(|(name, _, _)| name == descriptor.name())
                .peekable();
            if observations.peek().is_none() {
                continue;
            }

            let mut family = encoder.encode_descriptor(
                descriptor.name(),
                descriptor.help(),
                None,
                MetricType::Gauge,
            )?;
            if descriptor.labels().is_empty() {
                // Unlabeled descriptors carry at most one gauge per scrape,
                // which consumes the family encoder.
                if let Some((_, value, _)) = observations.next() {
                    ConstGauge::new(*value).encode(family)?;
                }
            } else {
                for (_, value, labels) in observations {
                    ConstGauge::new(*value).encode(family.encode_family(labels)?)?;
                }
            }
        }

        if let Some(failed) = &buffer.failed {
            let mut family = encoder.encode_descriptor(
                SCRAPE_ERROR_NAME,
                SCRAPE_ERROR_HELP,
                None,
                MetricType::Gauge,
            )?;
            let labels = vec![("collector".to_string(), failed.clone())];
            ConstGauge::new(1.0).encode(family.encode_family(&labels)?)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus_client::encoding::text;
    use prometheus_client::registry::Registry;
    use rtorrent_exporter_core::collector::mock::MockDownloadsSource;
    use rtorrent_exporter_core::collector::{CollectorOpts, StateList};
    use rtorrent_exporter_core::xmlrpc::Value;

    fn encode(registry: &Registry) -> String {
        let mut buffer = String::new();
        text::encode(&mut buffer, registry).unwrap();
        buffer
    }

    fn registry_with<S>(collector: DownloadsCollector<S>) -> Registry
    where
        S: DownloadsSource + fmt::Debug + Send + Sync + 'static,
    {
        let mut registry = Registry::default();
        registry.register_collector(Box::new(DownloadsMetrics::new(collector)));
        registry
    }

    #[test]
    fn test_encode_count_gauges() {
        let source = MockDownloadsSource::new()
            .with_list(StateList::All, &["a", "b", "c"])
            .with_list(StateList::Started, &["a", "b"]);
        let registry = registry_with(DownloadsCollector::new(source, CollectorOpts::default()));

        let text = encode(&registry);
        assert!(text.contains("# HELP rtorrent_downloads Total number of downloads."));
        assert!(text.contains("# TYPE rtorrent_downloads gauge"));
        assert!(text.contains("rtorrent_downloads 3"));
        assert!(text.contains("rtorrent_downloads_started 2"));
        assert!(text.contains("rtorrent_downloads_stopped 0"));
        assert!(!text.contains("rtorrent_scrape_error"));
        // Detail collection disabled: neither declared nor emitted.
        assert!(!text.contains("download_rate_bytes"));
        assert!(!text.contains("rtorrent_downloads_active"));
    }

    #[test]
    fn test_encode_single_sample_per_count_family() {
        let source = MockDownloadsSource::new().with_list(StateList::All, &["a"]);
        let registry = registry_with(DownloadsCollector::new(source, CollectorOpts::default()));

        let text = encode(&registry);
        assert_eq!(text.matches("# TYPE rtorrent_downloads gauge").count(), 1);
        assert_eq!(text.matches("\nrtorrent_downloads ").count(), 1);
    }

    #[test]
    fn test_encode_detail_gauges_with_labels() {
        let source = MockDownloadsSource::new().with_details(vec![vec![
            Value::String("hash1".into()),
            Value::String("name1".into()),
            Value::Int(100),
            Value::Int(200),
            Value::Int(300),
            Value::Int(400),
        ]]);
        let registry = registry_with(DownloadsCollector::new(
            source,
            CollectorOpts {
                download_details: true,
            },
        ));

        let text = encode(&registry);
        assert!(text.contains("rtorrent_downloads_active 1"));
        assert!(text.contains(
            "rtorrent_downloads_download_rate_bytes{info_hash=\"hash1\",name=\"name1\"} 100"
        ));
        assert!(text.contains(
            "rtorrent_downloads_upload_total_bytes{info_hash=\"hash1\",name=\"name1\"} 400"
        ));
    }

    #[test]
    fn test_encode_failure_emits_scrape_error_only() {
        let source = MockDownloadsSource::new().failing_list(StateList::Complete);
        let registry = registry_with(DownloadsCollector::new(source, CollectorOpts::default()));

        let text = encode(&registry);
        assert!(text.contains("rtorrent_scrape_error{collector=\"rtorrent_downloads_complete\"} 1"));
        assert!(!text.contains("rtorrent_downloads_started "));
    }

    #[test]
    fn test_encode_failure_keeps_earlier_output() {
        let source = MockDownloadsSource::new()
            .with_list(StateList::Seeding, &["a"])
            .failing_details();
        let registry = registry_with(DownloadsCollector::new(
            source,
            CollectorOpts {
                download_details: true,
            },
        ));

        let text = encode(&registry);
        // Counts survive the detail-phase failure.
        assert!(text.contains("rtorrent_downloads_seeding 1"));
        assert!(text.contains("rtorrent_scrape_error{collector=\"rtorrent_downloads_active\"} 1"));
    }
}

//! Mock downloads source and sink for testing.
//!
//! `MockDownloadsSource` serves canned state lists and detail rows and can be
//! told to fail any single query, which is how the fail-fast behavior of the
//! collector is exercised without a live rTorrent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::traits::{DetailRow, DownloadsSource, SourceError, StateList};
use super::{CollectError, Descriptor, MetricSink, Observation};

/// In-memory implementation of [`DownloadsSource`].
#[derive(Debug, Default)]
pub struct MockDownloadsSource {
    lists: HashMap<StateList, Vec<String>>,
    fail_list: Option<StateList>,
    details: Vec<DetailRow>,
    fail_details: bool,
    detail_calls: AtomicUsize,
}

impl MockDownloadsSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the info hashes of one state list. Unset lists are empty.
    pub fn with_list(mut self, list: StateList, hashes: &[&str]) -> Self {
        self.lists
            .insert(list, hashes.iter().map(|h| h.to_string()).collect());
        self
    }

    /// Sets the rows returned by the batched detail query.
    pub fn with_details(mut self, rows: Vec<DetailRow>) -> Self {
        self.details = rows;
        self
    }

    /// Makes the query for `list` fail with a transport error.
    pub fn failing_list(mut self, list: StateList) -> Self {
        self.fail_list = Some(list);
        self
    }

    /// Makes the batched detail query fail with a transport error.
    pub fn failing_details(mut self) -> Self {
        self.fail_details = true;
        self
    }

    /// Number of batched detail queries issued against this mock.
    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::Relaxed)
    }
}

impl DownloadsSource for MockDownloadsSource {
    fn state_list(&self, list: StateList) -> Result<Vec<String>, SourceError> {
        if self.fail_list == Some(list) {
            return Err(SourceError::Transport(format!(
                "mock failure for {} list",
                list.view()
            )));
        }
        Ok(self.lists.get(&list).cloned().unwrap_or_default())
    }

    fn download_details(&self, _selectors: &[&str]) -> Result<Vec<DetailRow>, SourceError> {
        self.detail_calls.fetch_add(1, Ordering::Relaxed);
        if self.fail_details {
            return Err(SourceError::Transport(
                "mock failure for detail query".to_string(),
            ));
        }
        Ok(self.details.clone())
    }
}

/// One observation captured by [`RecordingSink`], with the descriptor flattened
/// to its name for easy assertions.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedObservation {
    pub metric: String,
    pub value: f64,
    pub labels: Vec<String>,
}

/// Sink that records everything a scrape pushes.
#[derive(Debug, Default)]
pub struct RecordingSink {
    pub observations: Vec<RecordedObservation>,
    /// Failing descriptor name (if any was targeted) and the error message.
    pub invalid: Option<(Option<String>, String)>,
}

impl MetricSink for RecordingSink {
    fn observe(&mut self, observation: Observation<'_>) {
        self.observations.push(RecordedObservation {
            metric: observation.descriptor.name().to_string(),
            value: observation.value,
            labels: observation.label_values,
        });
    }

    fn invalid(&mut self, descriptor: Option<&Descriptor>, error: &CollectError) {
        self.invalid = Some((
            descriptor.map(|d| d.name().to_string()),
            error.to_string(),
        ));
    }
}

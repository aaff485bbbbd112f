use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{provider_record::ProviderRecord, source_spec::SourceSpec},
    error::FetchError,
};

use super::pagination::PaginationState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    /// Nothing left to fetch.
    Finished,
    /// Time budget elapsed.
    Timeout,
    /// Item cap reached.
    ItemCap,
}

/// One failed fetch, as shown in the run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEntry {
    pub url: String,
    pub status: Option<u16>,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
}

impl ErrorEntry {
    pub fn from_fetch_error(url: &str, error: &FetchError) -> Self {
        ErrorEntry {
            url: url.to_string(),
            status: error.status(),
            kind: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

/// Outcome of one run, persisted once at the end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub reason: TerminationReason,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total_items: usize,
    /// Every configured source, enabled or not, so zero-count sources show up.
    pub sources: Vec<String>,
    pub produced: BTreeMap<String, usize>,
    pub errors: BTreeMap<String, Vec<ErrorEntry>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VisitKind {
    Listing,
    Detail,
}

/// Mutable state scoped to exactly one run.
///
/// Owned by the crawl driver and lent to the page processor for each
/// response, so it is only ever touched from one place at a time.
#[derive(Debug)]
pub struct RunContext {
    sources: Vec<String>,
    min_per_source: usize,
    pagination: BTreeMap<String, PaginationState>,
    errors: BTreeMap<String, Vec<ErrorEntry>>,
    seen_phones: HashMap<String, HashSet<String>>,
    visited: HashSet<(String, VisitKind, String)>,
    total_items: usize,
    started_at: DateTime<Utc>,
}

impl RunContext {
    pub fn new(sources: &[SourceSpec], min_per_source: usize) -> Self {
        RunContext {
            sources: sources.iter().map(|source| source.name.clone()).collect(),
            min_per_source,
            pagination: BTreeMap::new(),
            errors: BTreeMap::new(),
            seen_phones: HashMap::new(),
            visited: HashSet::new(),
            total_items: 0,
            started_at: Utc::now(),
        }
    }

    pub fn min_per_source(&self) -> usize {
        self.min_per_source
    }

    /// Pagination state for `source`, created on first use.
    pub fn pagination_mut(&mut self, source: &str) -> &mut PaginationState {
        self.pagination.entry(source.to_string()).or_default()
    }

    pub fn pagination(&self, source: &str) -> PaginationState {
        self.pagination.get(source).cloned().unwrap_or_default()
    }

    pub fn produced(&self, source: &str) -> usize {
        self.pagination.get(source).map_or(0, |state| state.produced)
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    pub fn record_emitted(&mut self, record: &ProviderRecord) {
        let source = record.source.as_deref().unwrap_or_default();
        self.pagination_mut(source).produced += 1;
        self.total_items += 1;
    }

    pub fn record_error(&mut self, source: &str, entry: ErrorEntry) {
        self.errors.entry(source.to_string()).or_default().push(entry);
    }

    pub fn errors(&self, source: &str) -> &[ErrorEntry] {
        self.errors.get(source).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Remembers a phone as emitted for `source`.
    pub fn mark_phone(&mut self, source: &str, phone: &str) {
        self.seen_phones
            .entry(source.to_string())
            .or_default()
            .insert(phone.to_string());
    }

    pub fn phone_seen(&self, source: &str, phone: &str) -> bool {
        self.seen_phones
            .get(source)
            .is_some_and(|phones| phones.contains(phone))
    }

    /// Records a page visit. Returns false if `url` was already visited as
    /// the same kind of page for `source` during this run.
    pub fn first_visit(&mut self, source: &str, kind: VisitKind, url: &str) -> bool {
        self.visited
            .insert((source.to_string(), kind, url.to_string()))
    }

    pub fn finish(self, reason: TerminationReason) -> RunSummary {
        let produced = self
            .sources
            .iter()
            .map(|source| (source.clone(), self.produced(source)))
            .collect();

        let summary = RunSummary {
            reason,
            started_at: self.started_at,
            finished_at: Utc::now(),
            total_items: self.total_items,
            sources: self.sources,
            produced,
            errors: self.errors,
        };

        log::info!(
            "Run finished ({:?}) with {} items across {} sources",
            summary.reason,
            summary.total_items,
            summary.sources.len()
        );
        for (source, count) in summary.produced.iter() {
            let errors = summary.errors.get(source).map_or(0, Vec::len);
            log::info!("  {}: {} items, {} errors", source, count, errors);
        }

        summary
    }
}

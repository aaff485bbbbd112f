use std::collections::{BTreeMap, HashSet};

use serde::Deserialize;
use url::Url;

use crate::error::ConfigError;

use super::{provider_record::RESERVED_FIELDS, selector::SelectorChain};

/// Query-parameter pagination is always bounded; this applies when a source
/// configures a page parameter without `max_pages`.
pub const DEFAULT_MAX_PAGES: u32 = 50;

/// One configured scrape target. Immutable for the duration of a run.
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub start_urls: Vec<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub listing: ListingSpec,
    #[serde(default)]
    pub detail: Option<DetailSpec>,
    #[serde(default)]
    pub pagination: PaginationSpec,
    #[serde(default)]
    pub visit_website_for_email: bool,
    #[serde(default)]
    pub scan_phones_on_page: bool,
    #[serde(default)]
    pub skip_visited_listings: bool,
    #[serde(default)]
    pub skip_visited_details: bool,
    #[serde(default = "default_true", alias = "jsonld_fallback")]
    pub structured_data_fallback: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListingSpec {
    #[serde(default)]
    pub item_selector: Option<SelectorChain>,
    #[serde(default)]
    pub fields: FieldSelectors,
    #[serde(default)]
    pub detail_link_selector: Option<SelectorChain>,
    #[serde(default)]
    pub follow_links_selector: Option<SelectorChain>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DetailSpec {
    #[serde(default)]
    pub fields: FieldSelectors,
}

/// Selector chain per output field, keyed by field name. Names outside the
/// standard record fields become source-specific extra columns.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct FieldSelectors(BTreeMap<String, SelectorChain>);

impl FieldSelectors {
    pub fn get(&self, field: &str) -> Option<&SelectorChain> {
        self.0.get(field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SelectorChain)> {
        self.0
            .iter()
            .filter(|(_, chain)| !chain.is_empty())
            .map(|(field, chain)| (field.as_str(), chain))
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl FromIterator<(String, SelectorChain)> for FieldSelectors {
    fn from_iter<T: IntoIterator<Item = (String, SelectorChain)>>(iter: T) -> Self {
        FieldSelectors(iter.into_iter().collect())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationSpec {
    /// Link to the next page; followed whenever it resolves.
    #[serde(default)]
    pub next_page_selector: Option<SelectorChain>,
    /// Numeric query parameter incremented per page, e.g. `page`.
    #[serde(default)]
    pub page_param: Option<String>,
    /// Value of `page_param` on the first page.
    #[serde(default = "default_start_page")]
    pub start_page: u32,
    #[serde(default)]
    pub max_pages: Option<u32>,
    /// Overrides the run-level minimum-per-source target for this source.
    #[serde(default)]
    pub min_per_source: Option<usize>,
}

impl Default for PaginationSpec {
    fn default() -> Self {
        PaginationSpec {
            next_page_selector: None,
            page_param: None,
            start_page: default_start_page(),
            max_pages: None,
            min_per_source: None,
        }
    }
}

impl PaginationSpec {
    /// Page cap for this source: the configured one, or the default bound
    /// when query-parameter paging is on.
    pub fn page_cap(&self) -> Option<u32> {
        self.max_pages
            .or_else(|| self.page_param.as_ref().map(|_| DEFAULT_MAX_PAGES))
    }
}

impl SourceSpec {
    /// Detail pages are only worth fetching when there is something to read there.
    pub fn follows_details(&self) -> bool {
        self.detail
            .as_ref()
            .is_some_and(|detail| !detail.fields.is_empty())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::Source {
            source_name: self.name.clone(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }

        if self.enabled && self.start_urls.is_empty() {
            return Err(invalid("no start_urls configured".to_string()));
        }
        for url in &self.start_urls {
            if let Err(e) = Url::parse(url) {
                return Err(invalid(format!("invalid start url `{}`: {}", url, e)));
            }
        }

        let detail_fields = self.detail.iter().flat_map(|detail| detail.fields.iter());
        for (field, _) in self.listing.fields.iter().chain(detail_fields) {
            if RESERVED_FIELDS.contains(&field) {
                return Err(invalid(format!("field `{}` cannot be extracted", field)));
            }
        }

        if let Some(param) = &self.pagination.page_param {
            if param.trim().is_empty() {
                return Err(invalid("pagination.page_param must not be empty".to_string()));
            }
        }
        if self.pagination.max_pages == Some(0) {
            return Err(invalid("pagination.max_pages must be at least 1".to_string()));
        }

        Ok(())
    }
}

/// Checks every source and that names are unique across the run.
pub fn validate_sources(sources: &[SourceSpec]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();
    for source in sources {
        source.validate()?;
        if !names.insert(source.name.as_str()) {
            return Err(ConfigError::Source {
                source_name: source.name.clone(),
                reason: "duplicate source name".to_string(),
            });
        }
    }
    Ok(())
}

fn default_true() -> bool {
    true
}

fn default_start_page() -> u32 {
    1
}

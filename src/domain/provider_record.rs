use std::collections::BTreeMap;

use super::{normalizer::normalize_phone, source_spec::SourceSpec};

/// Output column order. Source-specific extras follow, sorted by name.
pub const PREFERRED_FIELDS: [&str; 13] = [
    "source",
    "category",
    "region",
    "business_name",
    "phone",
    "email",
    "website",
    "address",
    "city",
    "province",
    "postal_code",
    "listing_url",
    "detail_url",
];

/// Fields a source's selectors are not allowed to write.
pub const RESERVED_FIELDS: [&str; 5] = ["source", "category", "region", "listing_url", "detail_url"];

/// One extracted business listing.
///
/// Empty values are never stored: setters ignore blank strings, so a present
/// field is always a non-empty one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderRecord {
    pub source: Option<String>,
    pub category: Option<String>,
    pub region: Option<String>,
    pub business_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub postal_code: Option<String>,
    pub listing_url: Option<String>,
    pub detail_url: Option<String>,
    pub extras: BTreeMap<String, String>,
}

impl ProviderRecord {
    /// Blank record stamped with the source's identity and the page it came from.
    pub fn for_source(source: &SourceSpec, listing_url: &str) -> Self {
        let mut record = ProviderRecord::default();
        record.set("source", &source.name);
        if let Some(category) = &source.category {
            record.set("category", category);
        }
        if let Some(region) = &source.region {
            record.set("region", region);
        }
        record.set("listing_url", listing_url);
        record
    }

    /// Builds a record from named string columns, e.g. a CSV row.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut record = ProviderRecord::default();
        for (field, value) in pairs {
            record.set(field.as_ref(), value.as_ref());
        }
        record
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        match self.slot(field) {
            Some(slot) => slot.as_deref(),
            None => self.extras.get(field).map(String::as_str),
        }
    }

    /// Stores `value` under `field`, overwriting. Blank values are ignored.
    pub fn set(&mut self, field: &str, value: &str) {
        let value = value.trim();
        if value.is_empty() || field.is_empty() {
            return;
        }
        match self.slot_mut(field) {
            Some(slot) => *slot = Some(value.to_string()),
            None => {
                self.extras.insert(field.to_string(), value.to_string());
            }
        }
    }

    /// Stores `value` only if `field` is still empty. Returns whether it did.
    pub fn set_if_absent(&mut self, field: &str, value: Option<&str>) -> bool {
        if self.get(field).is_some() {
            return false;
        }
        match value {
            Some(value) if !value.trim().is_empty() => {
                self.set(field, value);
                true
            }
            _ => false,
        }
    }

    pub fn has_phone(&self) -> bool {
        self.normalized_phone().is_some()
    }

    pub fn normalized_phone(&self) -> Option<String> {
        self.phone.as_deref().and_then(normalize_phone)
    }

    /// Present fields as `(name, value)`, preferred fields first, then extras.
    pub fn fields(&self) -> Vec<(&str, &str)> {
        PREFERRED_FIELDS
            .iter()
            .filter_map(|&field| self.get(field).map(|value| (field, value)))
            .chain(
                self.extras
                    .iter()
                    .map(|(field, value)| (field.as_str(), value.as_str())),
            )
            .collect()
    }

    fn slot(&self, field: &str) -> Option<&Option<String>> {
        match field {
            "source" => Some(&self.source),
            "category" => Some(&self.category),
            "region" => Some(&self.region),
            "business_name" => Some(&self.business_name),
            "phone" => Some(&self.phone),
            "email" => Some(&self.email),
            "website" => Some(&self.website),
            "address" => Some(&self.address),
            "city" => Some(&self.city),
            "province" => Some(&self.province),
            "postal_code" => Some(&self.postal_code),
            "listing_url" => Some(&self.listing_url),
            "detail_url" => Some(&self.detail_url),
            _ => None,
        }
    }

    fn slot_mut(&mut self, field: &str) -> Option<&mut Option<String>> {
        match field {
            "source" => Some(&mut self.source),
            "category" => Some(&mut self.category),
            "region" => Some(&mut self.region),
            "business_name" => Some(&mut self.business_name),
            "phone" => Some(&mut self.phone),
            "email" => Some(&mut self.email),
            "website" => Some(&mut self.website),
            "address" => Some(&mut self.address),
            "city" => Some(&mut self.city),
            "province" => Some(&mut self.province),
            "postal_code" => Some(&mut self.postal_code),
            "listing_url" => Some(&mut self.listing_url),
            "detail_url" => Some(&mut self.detail_url),
            _ => None,
        }
    }
}

/// Column header for a set of records: every preferred field, then the
/// union of extra fields in sorted order.
pub fn column_order(records: &[ProviderRecord]) -> Vec<String> {
    let extras: std::collections::BTreeSet<&str> = records
        .iter()
        .flat_map(|record| record.extras.keys().map(String::as_str))
        .collect();

    PREFERRED_FIELDS
        .iter()
        .copied()
        .chain(extras)
        .map(str::to_string)
        .collect()
}

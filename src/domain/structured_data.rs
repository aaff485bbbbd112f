use once_cell::sync::Lazy;
use scraper::{Html, Selector};
use serde_json::{Map, Value};
use url::Url;

use super::{
    normalizer::{absolute_url, normalize_email, normalize_phone},
    provider_record::ProviderRecord,
};

/// schema.org types accepted as a business listing.
pub const BUSINESS_TYPES: [&str; 4] = [
    "LocalBusiness",
    "Organization",
    "ProfessionalService",
    "HomeAndConstructionBusiness",
];

static JSON_LD_SCRIPT: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).unwrap());

/// Business fields read from one embedded structured-data object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StructuredListing {
    pub business_name: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub province: Option<String>,
    pub postal_code: Option<String>,
}

impl StructuredListing {
    fn pairs(&self) -> [(&'static str, Option<&str>); 8] {
        [
            ("business_name", self.business_name.as_deref()),
            ("phone", self.phone.as_deref()),
            ("email", self.email.as_deref()),
            ("website", self.website.as_deref()),
            ("address", self.address.as_deref()),
            ("city", self.city.as_deref()),
            ("province", self.province.as_deref()),
            ("postal_code", self.postal_code.as_deref()),
        ]
    }

    /// Writes every field this listing has into `record`.
    pub fn apply_to(&self, record: &mut ProviderRecord) {
        for (field, value) in self.pairs() {
            if let Some(value) = value {
                record.set(field, value);
            }
        }
    }

    /// Writes only the fields `record` is still missing.
    pub fn fill_absent(&self, record: &mut ProviderRecord) {
        for (field, value) in self.pairs() {
            record.set_if_absent(field, value);
        }
    }
}

/// Parses every `application/ld+json` block on the page and returns the
/// business-typed objects, graphs flattened. Malformed blocks are skipped.
pub fn extract_structured(document: &Html, page_url: &Url) -> Vec<StructuredListing> {
    let mut objects = vec![];
    for script in document.select(&JSON_LD_SCRIPT) {
        let text: String = script.text().collect();
        match serde_json::from_str::<Value>(text.trim()) {
            Ok(value) => flatten_graph(value, &mut objects),
            Err(e) => log::debug!("Skipping malformed structured data block: {}", e),
        }
    }

    objects
        .iter()
        .filter_map(Value::as_object)
        .filter(|object| is_business(object))
        .map(|object| to_listing(object, page_url))
        .collect()
}

/// Lists and `@graph` containers are unpacked recursively into `out`.
pub fn flatten_graph(value: Value, out: &mut Vec<Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                flatten_graph(item, out);
            }
        }
        Value::Object(mut object) => {
            if let Some(graph) = object.remove("@graph") {
                flatten_graph(graph, out);
            }
            if object.contains_key("@type") {
                out.push(Value::Object(object));
            }
        }
        _ => {}
    }
}

fn is_business(object: &Map<String, Value>) -> bool {
    match object.get("@type") {
        Some(Value::String(kind)) => BUSINESS_TYPES.contains(&kind.as_str()),
        Some(Value::Array(kinds)) => kinds
            .iter()
            .filter_map(Value::as_str)
            .any(|kind| BUSINESS_TYPES.contains(&kind)),
        _ => false,
    }
}

fn to_listing(object: &Map<String, Value>, page_url: &Url) -> StructuredListing {
    let address = object.get("address");
    let address_part = |key: &str| {
        address
            .and_then(Value::as_object)
            .and_then(|address| first_string(address.get(key)))
    };

    StructuredListing {
        business_name: first_string(object.get("name"))
            .or_else(|| first_string(object.get("legalName"))),
        phone: first_string(object.get("telephone")).and_then(|phone| normalize_phone(&phone)),
        email: first_string(object.get("email")).and_then(|email| normalize_email(&email)),
        website: first_string(object.get("url"))
            .or_else(|| first_string(object.get("sameAs")))
            .and_then(|url| absolute_url(page_url, &url)),
        address: address_part("streetAddress")
            .or_else(|| address.and_then(Value::as_str).map(str::to_string)),
        city: address_part("addressLocality"),
        province: address_part("addressRegion"),
        postal_code: address_part("postalCode"),
    }
}

/// A string value, or the first string of a list.
fn first_string(value: Option<&Value>) -> Option<String> {
    let text = match value? {
        Value::String(text) => text.as_str(),
        Value::Array(items) => items.iter().find_map(Value::as_str)?,
        _ => return None,
    };
    let text = text.trim();
    match text.is_empty() {
        true => None,
        false => Some(text.to_string()),
    }
}

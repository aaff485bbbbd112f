use serde::Serialize;
use url::Url;

use crate::domain::source_spec::PaginationSpec;

/// Position of a listing page within the chain that started at one start URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    /// 1-based.
    pub page: u32,
}

impl PageCursor {
    pub fn first() -> Self {
        PageCursor { page: 1 }
    }

    pub fn next(self) -> Self {
        PageCursor {
            page: self.page + 1,
        }
    }
}

/// Per-source crawl progress for the current run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PaginationState {
    pub pages_visited: u32,
    /// Records emitted for the source so far.
    pub produced: usize,
}

/// What the controller needs to know about the page that was just processed.
#[derive(Debug, Clone)]
pub struct PageFacts<'a> {
    pub page_url: &'a Url,
    /// Absolute next-page link, if the next-page chain resolved.
    pub next_link: Option<String>,
    /// Candidate records built from this page.
    pub page_produced: usize,
    /// Records emitted for the source, including this page's.
    pub source_produced: usize,
    /// Minimum-per-source target; 0 disables it.
    pub min_per_source: usize,
}

/// Decides whether to request another listing page, and which one.
///
/// A resolved next-page link is followed regardless of yield. Otherwise the
/// query-parameter cursor advances only when the page produced something or
/// the source is still under its target. Both are bounded by the page cap.
pub fn next_page(
    spec: &PaginationSpec,
    cursor: PageCursor,
    facts: &PageFacts,
) -> Option<(String, PageCursor)> {
    if let Some(cap) = spec.page_cap() {
        if cursor.page >= cap {
            return None;
        }
    }

    if let Some(next_link) = &facts.next_link {
        return Some((next_link.clone(), cursor.next()));
    }

    let param = spec.page_param.as_deref()?;
    let under_target = facts.source_produced < facts.min_per_source;
    if facts.page_produced == 0 && !under_target {
        return None;
    }

    let next = cursor.next();
    let value = spec.start_page + next.page - 1;
    Some((with_query_param(facts.page_url, param, value), next))
}

/// `url` with `param` set to `value`, replacing any existing occurrence.
pub fn with_query_param(url: &Url, param: &str, value: u32) -> String {
    let retained: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(name, _)| name != param)
        .map(|(name, value)| (name.into_owned(), value.into_owned()))
        .collect();

    let mut next = url.clone();
    next.query_pairs_mut()
        .clear()
        .extend_pairs(retained)
        .append_pair(param, &value.to_string());
    next.to_string()
}

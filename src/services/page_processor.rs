use std::{collections::HashSet, sync::Arc};

use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::{
    domain::{
        normalizer::{
            absolute_url, discover_email, discover_phone, is_web_url, normalize_email,
            normalize_phone, tel_links,
        },
        provider_record::ProviderRecord,
        selector::{resolve, resolve_all_hrefs, resolve_href},
        source_spec::{FieldSelectors, SourceSpec},
        structured_data::extract_structured,
    },
    error::FetchError,
};

use super::{
    fetcher::{HeaderSet, Response},
    pagination::{next_page, PageCursor, PageFacts},
    run_aggregator::{ErrorEntry, RunContext, VisitKind},
};

static LINK: Lazy<Selector> = Lazy::new(|| Selector::parse("a[href]").unwrap());

/// Which kind of page a request is for, and the partial record it carries.
#[derive(Debug, Clone, PartialEq)]
pub enum PageState {
    Listing { cursor: PageCursor },
    Detail { record: ProviderRecord },
    /// The business's own website, fetched to look for an email.
    ExternalSite { record: ProviderRecord },
    /// A contact page on the business's website. Never leads anywhere else,
    /// so a record makes at most one contact-page hop.
    ContactPage { record: ProviderRecord },
}

#[derive(Debug, Clone)]
pub struct CrawlRequest {
    pub url: String,
    pub source: Arc<SourceSpec>,
    pub state: PageState,
}

impl CrawlRequest {
    pub fn new(url: String, source: Arc<SourceSpec>, state: PageState) -> Self {
        CrawlRequest { url, source, state }
    }

    pub fn listing(url: String, source: Arc<SourceSpec>, cursor: PageCursor) -> Self {
        CrawlRequest::new(url, source, PageState::Listing { cursor })
    }

    /// Source headers go to the directory only, never to third-party sites.
    pub fn headers(&self) -> HeaderSet {
        match self.state {
            PageState::Listing { .. } | PageState::Detail { .. } => self.source.headers.clone(),
            PageState::ExternalSite { .. } | PageState::ContactPage { .. } => HeaderSet::new(),
        }
    }
}

/// Everything one processed page hands back to the crawl driver.
#[derive(Debug, Default)]
pub struct PageOutcome {
    /// Finalized records, every one of them with a phone.
    pub records: Vec<ProviderRecord>,
    pub follow_ups: Vec<CrawlRequest>,
}

/// Runs one fetched page through the state machine.
///
/// Failures never propagate: they are recorded on `ctx` and the request's
/// carried record, if any, is finalized as it stands.
pub fn process_fetch(
    ctx: &mut RunContext,
    request: CrawlRequest,
    result: Result<Response, FetchError>,
) -> PageOutcome {
    let CrawlRequest { url, source, state } = request;
    let mut outcome = PageOutcome::default();

    let response = match result.and_then(Response::ensure_success) {
        Ok(response) => response,
        Err(e) => {
            handle_failure(ctx, &source, &url, state, e, &mut outcome);
            return outcome;
        }
    };

    let page_url = match Url::parse(&response.final_url).or_else(|_| Url::parse(&url)) {
        Ok(page_url) => page_url,
        Err(e) => {
            let error = FetchError::Transport(format!("unusable page url: {}", e));
            handle_failure(ctx, &source, &url, state, error, &mut outcome);
            return outcome;
        }
    };

    let document = Html::parse_document(&response.body);
    let page = Page {
        source: &source,
        url: &page_url,
        document: &document,
        root: document.root_element(),
    };

    match state {
        PageState::Listing { cursor } => process_listing(ctx, &page, cursor, &mut outcome),
        PageState::Detail { record } => process_detail(ctx, &page, record, &mut outcome),
        PageState::ExternalSite { record } => {
            process_external(ctx, &page, record, true, &mut outcome)
        }
        PageState::ContactPage { record } => {
            process_external(ctx, &page, record, false, &mut outcome)
        }
    }

    outcome
}

/// The parsed page plus the source it belongs to.
struct Page<'a> {
    source: &'a Arc<SourceSpec>,
    url: &'a Url,
    document: &'a Html,
    root: ElementRef<'a>,
}

impl Page<'_> {
    fn follow_up(&self, url: String, state: PageState) -> CrawlRequest {
        CrawlRequest::new(url, Arc::clone(self.source), state)
    }
}

fn process_listing(ctx: &mut RunContext, page: &Page, cursor: PageCursor, outcome: &mut PageOutcome) {
    let source = page.source;
    ctx.pagination_mut(&source.name).pages_visited += 1;

    let mut candidates = 0;
    let mut page_phones = HashSet::new();

    if let Some(items) = &source.listing.item_selector {
        for container in items.select_all(page.root) {
            let mut record = ProviderRecord::for_source(source, page.url.as_str());
            apply_fields(&mut record, container, &source.listing.fields, page.url);
            record.set_if_absent("email", discover_email(container).as_deref());
            record.set_if_absent("phone", discover_phone(container).as_deref());

            if let Some(phone) = record.normalized_phone() {
                page_phones.insert(phone);
            }
            candidates += 1;

            let detail_link = source
                .listing
                .detail_link_selector
                .as_ref()
                .and_then(|chain| resolve_href(container, chain))
                .and_then(|href| absolute_url(page.url, &href));

            match detail_link {
                Some(detail_url) if source.follows_details() => {
                    schedule_detail(ctx, page, detail_url, record, outcome)
                }
                _ => seek_email_or_finalize(ctx, page, record, outcome),
            }
        }
    }

    if let Some(chain) = &source.listing.follow_links_selector {
        for href in resolve_all_hrefs(page.root, chain) {
            let Some(detail_url) = absolute_url(page.url, &href) else {
                continue;
            };
            let record = ProviderRecord::for_source(source, page.url.as_str());
            candidates += 1;
            schedule_detail(ctx, page, detail_url, record, outcome);
        }
    }

    if candidates == 0 && source.structured_data_fallback {
        for listing in extract_structured(page.document, page.url) {
            let mut record = ProviderRecord::for_source(source, page.url.as_str());
            listing.apply_to(&mut record);
            if let Some(phone) = record.normalized_phone() {
                page_phones.insert(phone);
            }
            candidates += 1;
            seek_email_or_finalize(ctx, page, record, outcome);
        }
    }

    if source.scan_phones_on_page {
        for phone in tel_links(page.root) {
            if ctx.phone_seen(&source.name, &phone) || !page_phones.insert(phone.clone()) {
                continue;
            }
            let mut record = ProviderRecord::for_source(source, page.url.as_str());
            record.set("phone", &phone);
            candidates += 1;
            finalize(ctx, &source.name, record, outcome);
        }
    }

    let next_link = source
        .pagination
        .next_page_selector
        .as_ref()
        .and_then(|chain| resolve_href(page.root, chain))
        .and_then(|href| absolute_url(page.url, &href));

    log::info!(
        "[{}] listing page {} ({}) yielded {} candidates",
        source.name,
        cursor.page,
        page.url,
        candidates
    );

    schedule_next_page(ctx, source, page.url, cursor, next_link, candidates, outcome);
}

fn process_detail(
    ctx: &mut RunContext,
    page: &Page,
    mut record: ProviderRecord,
    outcome: &mut PageOutcome,
) {
    let source = page.source;
    record.set("detail_url", page.url.as_str());

    if let Some(detail) = &source.detail {
        apply_fields(&mut record, page.root, &detail.fields, page.url);
    }
    if record.email.is_none() {
        record.set_if_absent("email", discover_email(page.root).as_deref());
    }
    if source.structured_data_fallback {
        for listing in extract_structured(page.document, page.url) {
            listing.fill_absent(&mut record);
        }
    }

    seek_email_or_finalize(ctx, page, record, outcome);
}

/// Email discovery on the business's own site. Only the first visit may
/// hop to a contact page.
fn process_external(
    ctx: &mut RunContext,
    page: &Page,
    mut record: ProviderRecord,
    may_hop: bool,
    outcome: &mut PageOutcome,
) {
    record.set_if_absent("email", discover_email(page.root).as_deref());

    if record.email.is_none() && may_hop {
        if let Some(contact_url) = find_contact_link(page) {
            outcome
                .follow_ups
                .push(page.follow_up(contact_url, PageState::ContactPage { record }));
            return;
        }
    }

    finalize(ctx, &page.source.name, record, outcome);
}

fn handle_failure(
    ctx: &mut RunContext,
    source: &Arc<SourceSpec>,
    url: &str,
    state: PageState,
    error: FetchError,
    outcome: &mut PageOutcome,
) {
    log::error!("[{}] Failed to fetch {}: {}", source.name, url, error);
    ctx.record_error(&source.name, ErrorEntry::from_fetch_error(url, &error));

    match state {
        PageState::Listing { cursor } => {
            let Ok(page_url) = Url::parse(url) else {
                return;
            };
            schedule_next_page(ctx, source, &page_url, cursor, None, 0, outcome);
        }
        PageState::Detail { record }
        | PageState::ExternalSite { record }
        | PageState::ContactPage { record } => finalize(ctx, &source.name, record, outcome),
    }
}

/// Reads every configured field into `record`, leaving present values alone.
fn apply_fields(record: &mut ProviderRecord, node: ElementRef, fields: &FieldSelectors, page_url: &Url) {
    for (field, chain) in fields.iter() {
        if record.get(field).is_some() {
            continue;
        }
        let value = match field {
            "website" => resolve_href(node, chain).and_then(|href| absolute_url(page_url, &href)),
            "email" => resolve(node, chain).and_then(|value| normalize_email(&value)),
            "phone" => resolve(node, chain).and_then(|value| normalize_phone(&value)),
            _ => resolve(node, chain),
        };
        record.set_if_absent(field, value.as_deref());
    }
}

fn schedule_detail(
    ctx: &mut RunContext,
    page: &Page,
    detail_url: String,
    record: ProviderRecord,
    outcome: &mut PageOutcome,
) {
    let first = ctx.first_visit(&page.source.name, VisitKind::Detail, &detail_url);
    if !first && page.source.skip_visited_details {
        log::debug!("[{}] Skipping visited detail page {}", page.source.name, detail_url);
        return;
    }
    outcome
        .follow_ups
        .push(page.follow_up(detail_url, PageState::Detail { record }));
}

/// Sends the record to the business's website when it still lacks an email
/// and the source allows it, otherwise finalizes it.
fn seek_email_or_finalize(
    ctx: &mut RunContext,
    page: &Page,
    record: ProviderRecord,
    outcome: &mut PageOutcome,
) {
    let wants_email =
        record.email.is_none() && page.source.visit_website_for_email && record.has_phone();
    let website = record
        .website
        .clone()
        .filter(|website| wants_email && is_web_url(website));

    match website {
        Some(website) => outcome
            .follow_ups
            .push(page.follow_up(website, PageState::ExternalSite { record })),
        None => finalize(ctx, &page.source.name, record, outcome),
    }
}

fn finalize(ctx: &mut RunContext, source: &str, record: ProviderRecord, outcome: &mut PageOutcome) {
    match record.normalized_phone() {
        Some(phone) => {
            ctx.mark_phone(source, &phone);
            outcome.records.push(record);
        }
        None => log::debug!(
            "[{}] Dropping record without phone: {:?}",
            source,
            record.business_name
        ),
    }
}

fn schedule_next_page(
    ctx: &mut RunContext,
    source: &Arc<SourceSpec>,
    page_url: &Url,
    cursor: PageCursor,
    next_link: Option<String>,
    page_produced: usize,
    outcome: &mut PageOutcome,
) {
    let min_per_source = source
        .pagination
        .min_per_source
        .unwrap_or(ctx.min_per_source());
    let facts = PageFacts {
        page_url,
        next_link,
        page_produced,
        source_produced: ctx.produced(&source.name) + outcome.records.len(),
        min_per_source,
    };

    let Some((next_url, next_cursor)) = next_page(&source.pagination, cursor, &facts) else {
        return;
    };

    let first = ctx.first_visit(&source.name, VisitKind::Listing, &next_url);
    if !first && source.skip_visited_listings {
        log::debug!("[{}] Skipping visited listing page {}", source.name, next_url);
        return;
    }
    outcome
        .follow_ups
        .push(CrawlRequest::listing(next_url, Arc::clone(source), next_cursor));
}

fn find_contact_link(page: &Page) -> Option<String> {
    page.root
        .select(&LINK)
        .filter(|link| {
            let href = link.value().attr("href").unwrap_or_default().to_lowercase();
            let text = link.text().collect::<String>().to_lowercase();
            href.contains("contact") || text.contains("contact")
        })
        .filter_map(|link| absolute_url(page.url, link.value().attr("href")?))
        .find(|url| is_web_url(url) && url != page.url.as_str())
}

#[cfg(test)]
mod tests {
    use crate::configuration::parse_sources;

    use super::*;

    fn source(yaml: &str) -> Arc<SourceSpec> {
        let mut sources = parse_sources(yaml).unwrap();
        Arc::new(sources.remove(0))
    }

    fn ok(url: &str, body: &str) -> Result<Response, FetchError> {
        Ok(Response {
            status: 200,
            body: body.to_string(),
            final_url: url.to_string(),
        })
    }

    const LISTING_URL: &str = "https://dir.example.ca/plumbers";

    const CARDS: &str = r#"
sources:
  - name: dir
    category: plumber
    region: ON
    start_urls: ["https://dir.example.ca/plumbers"]
    listing:
      item_selector: ".card"
      fields:
        business_name: "h2::text"
        website: "a.site::attr(href)"
"#;

    #[test]
    fn only_cards_with_a_phone_are_emitted() {
        let mut ctx = RunContext::new(&[], 0);
        let request = CrawlRequest::listing(LISTING_URL.to_string(), source(CARDS), PageCursor::first());
        let body = r#"
            <div class="card"><h2>Maple Plumbing</h2><a href="tel:+1-416-555-0100">Call</a></div>
            <div class="card"><h2>Birch Heating</h2><p>Family owned</p></div>
        "#;

        let outcome = process_fetch(&mut ctx, request, ok(LISTING_URL, body));

        assert_eq!(outcome.records.len(), 1);
        let record = &outcome.records[0];
        assert_eq!(record.business_name.as_deref(), Some("Maple Plumbing"));
        assert_eq!(record.phone.as_deref(), Some("+14165550100"));
        assert_eq!(record.source.as_deref(), Some("dir"));
        assert_eq!(record.category.as_deref(), Some("plumber"));
        assert_eq!(record.listing_url.as_deref(), Some(LISTING_URL));
        assert!(outcome.follow_ups.is_empty());
        assert_eq!(ctx.pagination("dir").pages_visited, 1);
    }

    #[test]
    fn detail_structured_data_fills_missing_phone() {
        let spec = source(
            r#"
sources:
  - name: dir
    start_urls: ["https://dir.example.ca/plumbers"]
    listing:
      item_selector: ".card"
      fields:
        business_name: "h2"
      detail_link_selector: "a.more"
    detail:
      fields:
        business_name: "h1"
        address: ".addr"
"#,
        );
        let mut ctx = RunContext::new(&[], 0);
        let listing = r#"<div class="card"><h2>Maple Plumbing</h2><a class="more" href="/biz/maple">More</a></div>"#;

        let outcome = process_fetch(
            &mut ctx,
            CrawlRequest::listing(LISTING_URL.to_string(), spec, PageCursor::first()),
            ok(LISTING_URL, listing),
        );
        assert!(outcome.records.is_empty());
        assert_eq!(outcome.follow_ups.len(), 1);
        let detail = outcome.follow_ups.into_iter().next().unwrap();
        assert_eq!(detail.url, "https://dir.example.ca/biz/maple");

        let detail_page = r#"
            <html><head><script type="application/ld+json">
              {"@type": "LocalBusiness", "name": "Other Name", "telephone": "+1 416-555-0100",
               "address": {"streetAddress": "1 King St", "addressLocality": "Toronto"}}
            </script></head>
            <body><h1>Maple Plumbing Ltd.</h1></body></html>
        "#;
        let url = detail.url.clone();
        let outcome = process_fetch(&mut ctx, detail, ok(&url, detail_page));

        assert_eq!(outcome.records.len(), 1);
        let record = &outcome.records[0];
        assert_eq!(record.phone.as_deref(), Some("+14165550100"));
        assert_eq!(record.business_name.as_deref(), Some("Maple Plumbing"));
        assert_eq!(record.address.as_deref(), Some("1 King St"));
        assert_eq!(record.city.as_deref(), Some("Toronto"));
        assert_eq!(record.detail_url.as_deref(), Some("https://dir.example.ca/biz/maple"));
    }

    #[test]
    fn missing_email_sends_record_to_website_without_source_headers() {
        let spec = source(
            r#"
sources:
  - name: dir
    start_urls: ["https://dir.example.ca/plumbers"]
    headers:
      Referer: "https://dir.example.ca/"
    visit_website_for_email: true
    listing:
      item_selector: ".card"
      fields:
        website: "a.site"
"#,
        );
        let mut ctx = RunContext::new(&[], 0);
        let body = r#"<div class="card">Call 416-555-0100 <a class="site" href="https://maple.example.ca">Site</a></div>"#;

        let outcome = process_fetch(
            &mut ctx,
            CrawlRequest::listing(LISTING_URL.to_string(), spec, PageCursor::first()),
            ok(LISTING_URL, body),
        );

        assert!(outcome.records.is_empty());
        let external = &outcome.follow_ups[0];
        assert_eq!(external.url, "https://maple.example.ca/");
        assert!(matches!(external.state, PageState::ExternalSite { .. }));
        assert!(external.headers().is_empty());
    }

    #[test]
    fn contact_page_is_visited_at_most_once() {
        let spec = source(CARDS);
        let mut ctx = RunContext::new(&[], 0);
        let record = ProviderRecord::from_pairs([("source", "dir"), ("phone", "+14165550100")]);
        let site = "https://maple.example.ca/";
        let no_email = r#"<p>Welcome</p><a href="/contact-us">Contact</a>"#;

        let outcome = process_fetch(
            &mut ctx,
            CrawlRequest::new(site.to_string(), Arc::clone(&spec), PageState::ExternalSite { record }),
            ok(site, no_email),
        );
        assert!(outcome.records.is_empty());
        let contact = outcome.follow_ups.into_iter().next().unwrap();
        assert_eq!(contact.url, "https://maple.example.ca/contact-us");
        assert!(matches!(contact.state, PageState::ContactPage { .. }));

        let url = contact.url.clone();
        let outcome = process_fetch(&mut ctx, contact, ok(&url, no_email));

        assert!(outcome.follow_ups.is_empty());
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].email, None);
    }

    #[test]
    fn external_site_email_is_deobfuscated() {
        let spec = source(CARDS);
        let mut ctx = RunContext::new(&[], 0);
        let record = ProviderRecord::from_pairs([("phone", "+14165550100")]);
        let site = "https://maple.example.ca/";

        let outcome = process_fetch(
            &mut ctx,
            CrawlRequest::new(site.to_string(), spec, PageState::ExternalSite { record }),
            ok(site, "<footer>Write to info [at] example [dot] com</footer>"),
        );

        assert_eq!(outcome.records[0].email.as_deref(), Some("info@example.com"));
    }

    #[test]
    fn phone_scan_adds_uncaptured_tel_links_once() {
        let spec = source(
            r#"
sources:
  - name: dir
    start_urls: ["https://dir.example.ca/plumbers"]
    scan_phones_on_page: true
    listing:
      item_selector: ".card"
"#,
        );
        let mut ctx = RunContext::new(&[], 0);
        let body = r#"
            <div class="card"><a href="tel:4165550100">Maple</a></div>
            <footer>
              <a href="tel:416-555-0100">Maple again</a>
              <a href="tel:+1 905 555 0199">Birch</a>
              <a href="tel:+19055550199">Birch again</a>
            </footer>
        "#;

        let outcome = process_fetch(
            &mut ctx,
            CrawlRequest::listing(LISTING_URL.to_string(), spec, PageCursor::first()),
            ok(LISTING_URL, body),
        );

        let phones: Vec<_> = outcome
            .records
            .iter()
            .filter_map(|record| record.phone.as_deref())
            .collect();
        assert_eq!(phones, vec!["4165550100", "+19055550199"]);
        assert!(ctx.phone_seen("dir", "+19055550199"));
    }

    #[test]
    fn structured_data_is_used_when_no_cards_match() {
        let spec = source(CARDS);
        let mut ctx = RunContext::new(&[], 0);
        let body = r#"
            <html><head><script type="application/ld+json">
              [{"@type": "Organization", "name": "Maple Plumbing", "telephone": "416 555 0100"},
               {"@type": "Organization", "name": "No Phone Inc."}]
            </script></head><body><p>Redesigned page</p></body></html>
        "#;

        let outcome = process_fetch(
            &mut ctx,
            CrawlRequest::listing(LISTING_URL.to_string(), spec, PageCursor::first()),
            ok(LISTING_URL, body),
        );

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].business_name.as_deref(), Some("Maple Plumbing"));
        assert_eq!(outcome.records[0].phone.as_deref(), Some("4165550100"));
    }

    #[test]
    fn failed_detail_fetch_finalizes_carried_record() {
        let spec = source(CARDS);
        let mut ctx = RunContext::new(&[], 0);
        let record = ProviderRecord::from_pairs([("source", "dir"), ("phone", "4165550100")]);
        let url = "https://dir.example.ca/biz/maple";

        let outcome = process_fetch(
            &mut ctx,
            CrawlRequest::new(url.to_string(), spec, PageState::Detail { record }),
            Ok(Response {
                status: 503,
                body: "Service Unavailable".to_string(),
                final_url: url.to_string(),
            }),
        );

        assert_eq!(outcome.records.len(), 1);
        assert_eq!(ctx.errors("dir")[0].status, Some(503));
        assert_eq!(ctx.errors("dir")[0].url, url);
    }

    #[test]
    fn failed_listing_under_target_still_pages_on() {
        let spec = source(
            r#"
sources:
  - name: dir
    start_urls: ["https://dir.example.ca/plumbers?page=1"]
    listing:
      item_selector: ".card"
    pagination:
      page_param: page
      max_pages: 3
      min_per_source: 10
"#,
        );
        let mut ctx = RunContext::new(&[], 0);
        let url = "https://dir.example.ca/plumbers?page=1";

        let outcome = process_fetch(
            &mut ctx,
            CrawlRequest::listing(url.to_string(), spec, PageCursor::first()),
            Err(FetchError::Transport("connection reset".to_string())),
        );

        assert_eq!(outcome.follow_ups.len(), 1);
        assert_eq!(outcome.follow_ups[0].url, "https://dir.example.ca/plumbers?page=2");
        assert_eq!(ctx.errors("dir")[0].kind, "transport");
    }

    #[test]
    fn visited_detail_pages_are_skipped_when_configured() {
        let spec = source(
            r#"
sources:
  - name: dir
    start_urls: ["https://dir.example.ca/plumbers"]
    skip_visited_details: true
    listing:
      follow_links_selector: "a.biz"
"#,
        );
        let mut ctx = RunContext::new(&[], 0);
        let body = r#"<a class="biz" href="/biz/1">One</a><a class="biz" href="/biz/1">One again</a><a class="biz" href="/biz/2">Two</a>"#;

        let outcome = process_fetch(
            &mut ctx,
            CrawlRequest::listing(LISTING_URL.to_string(), spec, PageCursor::first()),
            ok(LISTING_URL, body),
        );

        let urls: Vec<_> = outcome.follow_ups.iter().map(|request| request.url.as_str()).collect();
        assert_eq!(
            urls,
            vec!["https://dir.example.ca/biz/1", "https://dir.example.ca/biz/2"]
        );
    }

    #[test]
    fn detail_link_without_detail_fields_finalizes_from_the_listing() {
        let spec = source(
            r#"
sources:
  - name: dir
    start_urls: ["https://dir.example.ca/plumbers"]
    listing:
      item_selector: ".card"
      fields:
        business_name: "h2"
      detail_link_selector: "a.more"
"#,
        );
        let mut ctx = RunContext::new(&[], 0);
        let body = r#"<div class="card"><h2>Maple Plumbing</h2><a href="tel:4165550100">Call</a><a class="more" href="/biz/maple">More</a></div>"#;

        let outcome = process_fetch(
            &mut ctx,
            CrawlRequest::listing(LISTING_URL.to_string(), spec, PageCursor::first()),
            ok(LISTING_URL, body),
        );

        assert!(outcome.follow_ups.is_empty());
        assert_eq!(outcome.records.len(), 1);
        assert_eq!(outcome.records[0].business_name.as_deref(), Some("Maple Plumbing"));
        assert_eq!(outcome.records[0].detail_url, None);
    }

    #[test]
    fn detail_without_email_goes_on_to_the_website() {
        let spec = source(
            r#"
sources:
  - name: dir
    visit_website_for_email: true
    start_urls: ["https://dir.example.ca/plumbers"]
    listing:
      item_selector: ".card"
      detail_link_selector: "a.more"
    detail:
      fields:
        address: ".addr"
"#,
        );
        let mut ctx = RunContext::new(&[], 0);
        let carried = ProviderRecord::from_pairs([
            ("source", "dir"),
            ("business_name", "Maple Plumbing"),
            ("phone", "4165550100"),
            ("website", "https://maple.example.ca/"),
        ]);
        let detail_url = "https://dir.example.ca/biz/maple";

        let outcome = process_fetch(
            &mut ctx,
            CrawlRequest::new(detail_url.to_string(), spec, PageState::Detail { record: carried }),
            ok(detail_url, r#"<h1>Maple Plumbing</h1><p class="addr">1 Main St</p>"#),
        );

        assert!(outcome.records.is_empty());
        assert_eq!(outcome.follow_ups.len(), 1);
        let follow_up = &outcome.follow_ups[0];
        assert_eq!(follow_up.url, "https://maple.example.ca/");
        match &follow_up.state {
            PageState::ExternalSite { record } => {
                assert_eq!(record.address.as_deref(), Some("1 Main St"));
                assert_eq!(record.detail_url.as_deref(), Some(detail_url));
                assert_eq!(record.email, None);
            }
            other => panic!("expected an external site request, got {:?}", other),
        }
        assert!(follow_up.headers().is_empty());
    }

    #[test]
    fn visited_next_page_is_skipped_only_when_configured() {
        let yaml = |skip: bool| {
            format!(
                r#"
sources:
  - name: dir
    skip_visited_listings: {}
    start_urls: ["https://dir.example.ca/plumbers"]
    listing:
      item_selector: ".card"
    pagination:
      next_page_selector: "a[rel=next]"
"#,
                skip
            )
        };
        let next_url = "https://dir.example.ca/plumbers?page=2";
        let body = r#"<div class="card"><a href="tel:4165550100">Call</a></div><a rel="next" href="/plumbers?page=2">Next</a>"#;

        for (skip, expected) in [(true, 0), (false, 1)] {
            let mut ctx = RunContext::new(&[], 0);
            assert!(ctx.first_visit("dir", VisitKind::Listing, next_url));

            let outcome = process_fetch(
                &mut ctx,
                CrawlRequest::listing(LISTING_URL.to_string(), source(&yaml(skip)), PageCursor::first()),
                ok(LISTING_URL, body),
            );

            assert_eq!(outcome.follow_ups.len(), expected, "skip_visited_listings: {}", skip);
            assert_eq!(outcome.records.len(), 1);
        }
    }
}

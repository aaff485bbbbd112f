use std::{collections::VecDeque, sync::Arc};

use tokio::{
    task::{JoinHandle, JoinSet},
    time::Instant,
};

use crate::{
    configuration::CrawlSettings,
    domain::{provider_record::ProviderRecord, source_spec::SourceSpec},
    error::FetchError,
};

use super::{
    fetcher::{Fetcher, Response},
    page_processor::{process_fetch, CrawlRequest},
    pagination::PageCursor,
    run_aggregator::{RunContext, RunSummary, TerminationReason, VisitKind},
};

pub struct CrawlOutput {
    pub records: Vec<ProviderRecord>,
    pub summary: RunSummary,
}

type FetchDone = (CrawlRequest, Result<Response, FetchError>);

/// Crawls every enabled source until the queue drains, the time budget runs
/// out or the item cap is hit.
///
/// Fetches run in a `JoinSet`; each finished task hands back its request and
/// result, which are processed one at a time on this task, the sole owner of
/// the run context.
pub async fn crawl(
    fetcher: Arc<dyn Fetcher>,
    sources: Vec<SourceSpec>,
    settings: &CrawlSettings,
) -> CrawlOutput {
    let mut ctx = RunContext::new(&sources, settings.min_per_source);
    let mut queue = seed_requests(&mut ctx, sources);
    log::info!("Starting crawl with {} start urls", queue.len());

    let deadline = Instant::now() + settings.time_budget();
    let item_cap = settings.item_cap();
    let cap_reached = |ctx: &RunContext| item_cap.is_some_and(|cap| ctx.total_items() >= cap);

    let mut fetch_set: JoinSet<FetchDone> = JoinSet::new();
    let mut records = vec![];

    let reason = loop {
        while fetch_set.len() < settings.concurrency() {
            let Some(request) = queue.pop_front() else {
                break;
            };
            fetch_set.spawn(fetch_request(Arc::clone(&fetcher), request));
        }

        if fetch_set.is_empty() {
            break TerminationReason::Finished;
        }

        tokio::select! {
            joined = fetch_set.join_next() => {
                let (request, result) = match joined {
                    Some(Ok(done)) => done,
                    Some(Err(e)) => {
                        log::error!("Fetch task was lost: {}", e);
                        continue;
                    }
                    None => break TerminationReason::Finished,
                };

                let outcome = process_fetch(&mut ctx, request, result);
                for record in outcome.records {
                    if cap_reached(&ctx) {
                        break;
                    }
                    ctx.record_emitted(&record);
                    records.push(record);
                }
                if cap_reached(&ctx) {
                    break TerminationReason::ItemCap;
                }
                queue.extend(outcome.follow_ups);
            }
            _ = tokio::time::sleep_until(deadline) => {
                break TerminationReason::Timeout;
            }
        }
    };

    if !fetch_set.is_empty() || !queue.is_empty() {
        log::info!(
            "Dropping {} in-flight and {} queued requests",
            fetch_set.len(),
            queue.len()
        );
    }
    fetch_set.shutdown().await;

    CrawlOutput {
        records,
        summary: ctx.finish(reason),
    }
}

/// Runs one fetch on its own task so a panicking fetcher surfaces as a
/// transport error for that request instead of losing it.
async fn fetch_request(fetcher: Arc<dyn Fetcher>, request: CrawlRequest) -> FetchDone {
    let url = request.url.clone();
    let headers = request.headers();
    let mut fetch = AbortOnDrop(tokio::spawn(async move { fetcher.fetch(&url, &headers).await }));

    let result = match (&mut fetch.0).await {
        Ok(result) => result,
        Err(e) => Err(FetchError::Transport(format!("fetch task failed: {}", e))),
    };
    (request, result)
}

/// Cancels the inner fetch when the crawl drops its task.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn seed_requests(ctx: &mut RunContext, sources: Vec<SourceSpec>) -> VecDeque<CrawlRequest> {
    let mut queue = VecDeque::new();
    for source in sources {
        if !source.enabled {
            log::info!("Skipping disabled source {}", source.name);
            continue;
        }

        let source = Arc::new(source);
        for url in &source.start_urls {
            let first = ctx.first_visit(&source.name, VisitKind::Listing, url);
            if !first && source.skip_visited_listings {
                continue;
            }
            queue.push_back(CrawlRequest::listing(
                url.clone(),
                Arc::clone(&source),
                PageCursor::first(),
            ));
        }
    }
    queue
}

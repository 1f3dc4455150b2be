//! The crawl orchestrator: a bounded worker pool driving the URL queue.
//!
//! Workers claim URLs from the shared queue (claim = leave queue, enter
//! visited, atomically under one lock), fetch, extract, record links, and
//! persist the page record. The orchestrator loop keeps up to `workers`
//! tasks in flight, checkpoints every N completions, and honors a
//! cooperative stop flag between fetches.

use anyhow::Context;
use dashmap::DashSet;
use futures::stream::FuturesUnordered;
use futures::StreamExt;
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, Semaphore};
use url::Url;

use super::fetcher::{FetchError, Fetcher};
use super::progress::{NoOpProgress, ProgressReporter};
use super::types::{AuditError, AuditOutcome, TerminationReason};
use crate::audit::{AuditHandle, AuditManager, AuditStatus};
use crate::config::AuditConfig;
use crate::extractor::{ExtractionOutput, ExtractorPipeline, PageRecord, ResponseMeta};
use crate::page_store::PageDataStore;
use crate::state_store::{CrawlState, LinkStatus, StateStore};
use crate::url_norm::{self, LinkClass};

/// Reason line written to the failure log when the budget pre-empts a fetch.
const BUDGET_SKIP_REASON: &str = "SKIPPED (page budget exhausted)";

/// A prepared, resumable crawl over one seed host.
pub struct CrawlEngine {
    config: AuditConfig,
    seed: Url,
    seed_canonical: String,
    manager: AuditManager,
    handle: AuditHandle,
    state_store: StateStore,
    state: Arc<Mutex<CrawlState>>,
    store: Arc<PageDataStore>,
    fetcher: Arc<Fetcher>,
    extractor: Arc<dyn ExtractorPipeline>,
    stop: Arc<AtomicBool>,
}

impl CrawlEngine {
    /// Resolve the seed, create or resume the audit, and load (or seed) the
    /// crawl state. A snapshot unreadable in both variants is logged and a
    /// fresh audit is started in its place.
    pub async fn prepare(
        config: AuditConfig,
        extractor: Arc<dyn ExtractorPipeline>,
    ) -> Result<Self, AuditError> {
        let seed = url_norm::seed_url(config.seed_url())
            .map_err(|e| AuditError::InvalidInput(e.to_string()))?;
        let seed_canonical = url_norm::canonicalize(seed.as_str(), None)
            .map_err(|e| AuditError::InvalidInput(e.to_string()))?;
        let host = seed
            .host_str()
            .ok_or_else(|| AuditError::InvalidInput("seed has no host".into()))?
            .to_string();

        let manager = AuditManager::new(config.audits_root());
        let state_store = StateStore::new();

        let mut handle = manager
            .create_or_resume(&host, config.force_new())
            .await
            .map_err(AuditError::Other)?;

        let state = if handle.resumed {
            match state_store.load(&handle.state_path()).await {
                Ok(Some(state)) => {
                    info!(
                        "restored snapshot: {} visited, {} queued",
                        state.visited.len(),
                        state.queue.len()
                    );
                    state
                }
                Ok(None) => CrawlState::seeded(&seed_canonical),
                Err(e) => {
                    warn!("snapshot unreadable, starting a fresh audit: {e:#}");
                    handle = manager.create_new(&host).await.map_err(AuditError::Other)?;
                    CrawlState::seeded(&seed_canonical)
                }
            }
        } else {
            CrawlState::seeded(&seed_canonical)
        };

        let fetcher = Fetcher::new(
            config.user_agent(),
            config.request_timeout(),
            config.max_response_bytes(),
        )
        .map_err(AuditError::Other)?;

        let store = Arc::new(PageDataStore::with_capacity(
            handle.page_data_dir(),
            config.cache_capacity(),
        ));

        Ok(Self {
            config,
            seed,
            seed_canonical,
            manager,
            handle,
            state_store,
            state: Arc::new(Mutex::new(state)),
            store,
            fetcher: Arc::new(fetcher),
            extractor,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// The audit this engine is bound to.
    #[must_use]
    pub fn handle(&self) -> &AuditHandle {
        &self.handle
    }

    /// Flag polled between fetches; set it to request a cooperative stop.
    #[must_use]
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// Add a URL to the queue, deduplicating against `visited` and the
    /// current queue. The URL must canonicalize and be same-host.
    pub async fn enqueue(&self, raw: &str) -> Result<bool, AuditError> {
        let canonical = url_norm::canonicalize(raw, Some(&self.seed))
            .map_err(|e| AuditError::InvalidInput(e.to_string()))?;
        let parsed = Url::parse(&canonical)
            .map_err(|e| AuditError::InvalidInput(e.to_string()))?;
        if !url_norm::same_host(&parsed, &self.seed) {
            return Err(AuditError::InvalidInput(format!(
                "not on the seed host: {canonical}"
            )));
        }

        let mut st = self.state.lock().await;
        if st.visited.contains(&canonical) {
            return Ok(false);
        }
        Ok(st.queue.insert(canonical))
    }

    /// Run to completion with no progress output.
    pub async fn run(&self) -> Result<AuditOutcome, AuditError> {
        self.run_with_progress(NoOpProgress).await
    }

    /// Run the crawl until the queue drains, the budget is hit, or a stop is
    /// requested; checkpoint along the way and set the terminal status.
    pub async fn run_with_progress<P>(&self, progress: P) -> Result<AuditOutcome, AuditError>
    where
        P: ProgressReporter + 'static,
    {
        let started = Instant::now();
        let progress: Arc<dyn ProgressReporter> = Arc::new(progress);
        progress.report_started(self.seed.as_str(), self.handle.resumed);

        // A zero budget disables fetching outright; the seed still counts as
        // attempted so the run leaves a complete, explainable audit behind.
        if self.config.max_internal_links() == Some(0) {
            return self.finish_zero_budget(started, progress.as_ref()).await;
        }

        let ctx = Arc::new(WorkerContext {
            config: self.config.clone(),
            seed: self.seed.clone(),
            fetcher: Arc::clone(&self.fetcher),
            extractor: Arc::clone(&self.extractor),
            store: Arc::clone(&self.store),
            state: Arc::clone(&self.state),
            probed: DashSet::new(),
            failed_log: self.handle.failed_log_path(),
            progress: Arc::clone(&progress),
        });

        let concurrency = self.config.workers();
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let processed = AtomicUsize::new(0);
        let mut since_checkpoint = 0usize;
        let reason;

        let mut active: FuturesUnordered<tokio::task::JoinHandle<PageOutcome>> =
            FuturesUnordered::new();

        loop {
            let stop_requested = self.stop.load(Ordering::Relaxed);
            let budget_reached = self
                .config
                .max_internal_links()
                .is_some_and(|b| processed.load(Ordering::Relaxed) >= b);

            if !stop_requested && !budget_reached {
                while active.len() < concurrency {
                    let Some(url) = self.claim_next().await else {
                        break;
                    };

                    let permit = semaphore
                        .clone()
                        .acquire_owned()
                        .await
                        .map_err(|e| AuditError::FatalInternal(format!("semaphore closed: {e}")))?;

                    let ctx = Arc::clone(&ctx);
                    active.push(tokio::spawn(async move {
                        let _permit = permit;
                        process_page(ctx, url).await
                    }));
                }
            }

            if active.is_empty() {
                let queue_empty = self.state.lock().await.queue.is_empty();
                if stop_requested {
                    reason = TerminationReason::Cancelled;
                    break;
                }
                if budget_reached {
                    reason = TerminationReason::BudgetReached;
                    break;
                }
                if queue_empty {
                    reason = TerminationReason::QueueDrained;
                    break;
                }
                continue;
            }

            match active.next().await {
                Some(Ok(outcome)) => {
                    let done = processed.fetch_add(1, Ordering::Relaxed) + 1;
                    since_checkpoint += 1;

                    let queue_len = self.state.lock().await.queue.len();
                    progress.report_page(&outcome.url, outcome.status, queue_len, done);

                    if since_checkpoint >= self.config.checkpoint_interval() {
                        match self.checkpoint().await {
                            Ok(()) => progress.report_checkpoint(done),
                            Err(e @ AuditError::FatalInternal(_)) => return self.fail(e).await,
                            Err(e) => {
                                // The store already retried and fell back;
                                // the previous checkpoint is still intact.
                                warn!("checkpoint failed: {e}");
                                progress.report_error(&format!("checkpoint failed: {e}"));
                            }
                        }
                        since_checkpoint = 0;
                    }
                }
                Some(Err(e)) => {
                    error!("worker task panicked: {e}");
                }
                None => {}
            }
        }

        let total = processed.load(Ordering::Relaxed);

        // Final checkpoint. A save that fails even after the store's own
        // retry and fallback is logged, not fatal: the crawl work is done
        // and the previous checkpoint is still intact on disk.
        if let Err(e) = self.checkpoint().await {
            match e {
                AuditError::FatalInternal(_) => return self.fail(e).await,
                other => {
                    warn!("final checkpoint failed: {other}");
                    progress.report_error(&format!("final checkpoint failed: {other}"));
                }
            }
        }

        match reason {
            TerminationReason::QueueDrained | TerminationReason::BudgetReached => {
                self.manager
                    .mark(&self.handle, AuditStatus::Completed)
                    .await
                    .map_err(AuditError::Other)?;
            }
            // A cancelled audit stays in progress so the next invocation
            // resumes it.
            TerminationReason::Cancelled => {}
        }

        progress.report_finished(reason, total);
        Ok(AuditOutcome {
            audit_id: self.handle.id.clone(),
            audit_dir: self.handle.dir.clone(),
            reason,
            pages_processed: total,
            duration: started.elapsed(),
        })
    }

    /// Claim an arbitrary queue member: remove it and mark it visited in the
    /// same critical section, skipping anything already visited.
    async fn claim_next(&self) -> Option<String> {
        let mut st = self.state.lock().await;
        loop {
            let url = st.queue.iter().next().cloned()?;
            st.queue.remove(&url);
            if st.visited.insert(url.clone()) {
                return Some(url);
            }
        }
    }

    async fn checkpoint(&self) -> Result<(), AuditError> {
        let snapshot = {
            let st = self.state.lock().await;
            if !st.queue_visited_disjoint() {
                return Err(AuditError::FatalInternal(
                    "queue and visited overlap".into(),
                ));
            }
            st.clone()
        };
        self.state_store
            .save(snapshot, &self.handle.state_path())
            .await
            .map_err(|e| AuditError::Storage(format!("{e:#}")))
    }

    async fn finish_zero_budget(
        &self,
        started: Instant,
        progress: &dyn ProgressReporter,
    ) -> Result<AuditOutcome, AuditError> {
        {
            let mut st = self.state.lock().await;
            st.queue.remove(&self.seed_canonical);
            st.visited.insert(self.seed_canonical.clone());
        }
        append_failed(
            &self.handle.failed_log_path(),
            &self.seed_canonical,
            BUDGET_SKIP_REASON,
        )
        .await;

        self.checkpoint().await?;
        self.manager
            .mark(&self.handle, AuditStatus::Completed)
            .await
            .map_err(AuditError::Other)?;

        progress.report_finished(TerminationReason::BudgetReached, 0);
        Ok(AuditOutcome {
            audit_id: self.handle.id.clone(),
            audit_dir: self.handle.dir.clone(),
            reason: TerminationReason::BudgetReached,
            pages_processed: 0,
            duration: started.elapsed(),
        })
    }

    /// Invariant violation: checkpoint what we can, mark the audit failed,
    /// and surface the error with the state preserved for inspection.
    async fn fail(&self, e: AuditError) -> Result<AuditOutcome, AuditError> {
        error!("fatal: {e}");
        if let Err(mark_err) = self.manager.mark(&self.handle, AuditStatus::Failed).await {
            warn!("could not mark audit failed: {mark_err:#}");
        }
        Err(e)
    }
}

/// Everything a worker task needs, cloned once per spawn.
struct WorkerContext {
    config: AuditConfig,
    seed: Url,
    fetcher: Arc<Fetcher>,
    extractor: Arc<dyn ExtractorPipeline>,
    store: Arc<PageDataStore>,
    state: Arc<Mutex<CrawlState>>,
    /// External URLs already probed this run; survives across pages so each
    /// link is checked at most once per run.
    probed: DashSet<String>,
    failed_log: std::path::PathBuf,
    progress: Arc<dyn ProgressReporter>,
}

struct PageOutcome {
    url: String,
    /// HTTP status, or 0 when no response arrived.
    status: u16,
}

/// Fetch, extract, record, and persist one claimed URL. All failures are
/// recorded and swallowed; a worker never takes the run down.
async fn process_page(ctx: Arc<WorkerContext>, url: String) -> PageOutcome {
    let page = match ctx.fetcher.fetch_page(&url).await {
        Ok(page) => page,
        Err(e) => {
            let (status, reason) = match &e {
                FetchError::Timeout => (LinkStatus::timeout(), "TIMEOUT".to_string()),
                FetchError::Network(msg) => (LinkStatus::error(), msg.clone()),
            };
            ctx.state.lock().await.record_bad_request(&url, status);
            append_failed(&ctx.failed_log, &url, &reason).await;
            ctx.progress.report_failure(&url, &reason);
            return PageOutcome { url, status: 0 };
        }
    };

    // Internal redirects record the final URL in visited (no chain); the
    // record lands under both keys so neither visited entry dangles.
    let final_canonical = url_norm::canonicalize(&page.final_url, None).unwrap_or_else(|_| {
        debug!("unparseable final URL {}, keeping claim", page.final_url);
        url.clone()
    });
    if final_canonical != url {
        let mut st = ctx.state.lock().await;
        st.queue.remove(&final_canonical);
        st.visited.insert(final_canonical.clone());
    }

    let meta = ResponseMeta {
        status: page.status,
        headers: page.headers.clone(),
        body_size: page.body_bytes,
        elapsed_ms: page.elapsed_ms,
    };

    {
        let mut st = ctx.state.lock().await;
        if (200..300).contains(&page.status) {
            // Success overwrites any earlier bad outcome.
            st.bad_requests.remove(&url);
        } else {
            st.record_bad_request(&url, LinkStatus::Code(page.status));
        }
    }

    // Extraction is CPU-bound and the DOM is not Send: both point to a
    // blocking-pool call that parses, extracts, and drops the tree.
    let output = if page.is_html && !page.body.is_empty() {
        let extractor = Arc::clone(&ctx.extractor);
        let body = page.body;
        let record_url = final_canonical.clone();
        let meta_for_task = meta.clone();
        match tokio::task::spawn_blocking(move || {
            extractor.extract(&body, &record_url, &meta_for_task)
        })
        .await
        {
            Ok(output) => output,
            Err(e) => {
                warn!("extractor panicked on {url}: {e}");
                ExtractionOutput {
                    record: PageRecord::minimal(&final_canonical, &meta),
                    links: Vec::new(),
                }
            }
        }
    } else {
        ExtractionOutput {
            record: PageRecord::minimal(&final_canonical, &meta),
            links: Vec::new(),
        }
    };

    let probe_targets = record_links(&ctx, &url, &final_canonical, &output).await;

    persist_record(&ctx, &url, &final_canonical, output.record).await;

    if ctx.config.probe_external_links() {
        for target in probe_targets {
            probe_external(&ctx, &target).await;
        }
    }

    PageOutcome {
        url,
        status: page.status,
    }
}

/// Classify and record every discovered link under one short state lock.
/// Returns the external URLs that still need probing.
async fn record_links(
    ctx: &WorkerContext,
    source: &str,
    final_canonical: &str,
    output: &ExtractionOutput,
) -> Vec<String> {
    let base = Url::parse(final_canonical).ok();
    let mut probe_targets = Vec::new();

    let mut st = ctx.state.lock().await;
    for link in &output.links {
        match url_norm::classify(&link.href, &ctx.seed) {
            Ok(LinkClass::Mailto) => {
                st.record_mailto(&url_norm::functional_key(&link.href), source);
            }
            Ok(LinkClass::Tel) => {
                st.record_tel(&url_norm::functional_key(&link.href), source);
            }
            Ok(LinkClass::NonFetchable) => {
                // Same-host assets are recorded like any internal link but
                // never enqueued; schemes we cannot canonicalize are skipped.
                if let Ok(canonical) = url_norm::canonicalize(&link.href, base.as_ref()) {
                    if Url::parse(&canonical)
                        .is_ok_and(|u| url_norm::same_host(&u, &ctx.seed))
                    {
                        st.record_internal_link(&canonical, &link.anchor_text, source);
                    }
                }
            }
            Ok(LinkClass::Internal) => {
                let canonical = match url_norm::canonicalize(&link.href, base.as_ref()) {
                    Ok(c) => c,
                    Err(e) => {
                        debug!("dropping link {}: {e}", link.href);
                        continue;
                    }
                };

                // A page that redirected off-host can make relative links
                // resolve externally; re-check before treating as internal.
                let on_seed_host = Url::parse(&canonical)
                    .is_ok_and(|u| url_norm::same_host(&u, &ctx.seed));
                if !on_seed_host {
                    if st.record_external_link(&canonical, source) {
                        probe_targets.push(canonical);
                    }
                    continue;
                }

                st.record_internal_link(&canonical, &link.anchor_text, source);

                let budget_allows = ctx
                    .config
                    .max_internal_links()
                    .is_none_or(|b| st.visited.len() < b);
                if !st.visited.contains(&canonical) && budget_allows {
                    let cap_allows = ctx
                        .config
                        .max_queue()
                        .is_none_or(|cap| st.queue.len() < cap);
                    if cap_allows {
                        st.queue.insert(canonical);
                    } else {
                        debug!("queue cap reached, dropping discovery {canonical}");
                    }
                }
            }
            Ok(LinkClass::External) => {
                match url_norm::canonicalize(&link.href, base.as_ref()) {
                    Ok(canonical) => {
                        if st.record_external_link(&canonical, source) {
                            probe_targets.push(canonical);
                        }
                    }
                    Err(e) => debug!("dropping external link {}: {e}", link.href),
                }
            }
            Err(e) => {
                debug!("unclassifiable link {}: {e}", link.href);
            }
        }
    }

    probe_targets
}

/// Write the record under the claimed key, and under the redirect target
/// when the fetch moved. A store failure leaves the URL visited without a
/// record; the warning is the integrity breadcrumb.
async fn persist_record(
    ctx: &WorkerContext,
    claimed: &str,
    final_canonical: &str,
    record: PageRecord,
) {
    let mut new_records = 0u64;

    if final_canonical != claimed {
        match ctx.store.put(final_canonical, record.clone()).await {
            Ok(true) => new_records += 1,
            Ok(false) => {}
            Err(e) => {
                warn!("could not persist record for {final_canonical}: {e:#}");
                ctx.progress
                    .report_error(&format!("record write failed: {final_canonical}"));
            }
        }
    }

    match ctx.store.put(claimed, record).await {
        Ok(true) => new_records += 1,
        Ok(false) => {}
        Err(e) => {
            warn!("could not persist record for {claimed}: {e:#}");
            ctx.progress
                .report_error(&format!("record write failed: {claimed}"));
        }
    }

    if new_records > 0 {
        ctx.state.lock().await.page_data_size += new_records;
    }
}

/// Fill in an external link's status from a HEAD/GET probe.
async fn probe_external(ctx: &WorkerContext, target: &str) {
    if !ctx.probed.insert(target.to_string()) {
        return;
    }
    let outcome = ctx.fetcher.probe(target).await;
    debug!("probed {target}: {}", outcome.status);

    let mut st = ctx.state.lock().await;
    if let Some(entry) = st.external_links.get_mut(target) {
        entry.status = Some(outcome.status);
        entry.headers = outcome.headers;
        entry.redirect_chain = outcome.redirect_chain;
    }
}

/// Append one line to the failure log. Best-effort: a logging failure must
/// never fail a crawl.
async fn append_failed(path: &Path, url: &str, reason: &str) {
    let line = format!("{}\t{url}\t{reason}\n", chrono::Utc::now().to_rfc3339());
    let result = async {
        let mut file = tokio::fs::OpenOptions::new()
            .append(true)
            .create(true)
            .open(path)
            .await
            .with_context(|| format!("open {}", path.display()))?;
        file.write_all(line.as_bytes()).await.context("append")?;
        Ok::<(), anyhow::Error>(())
    }
    .await;

    if let Err(e) = result {
        warn!("could not write failure log: {e:#}");
    }
}

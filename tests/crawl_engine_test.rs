use domain_audit::audit::{AuditManager, AuditStatus};
use domain_audit::config::AuditConfig;
use domain_audit::crawl_engine::{CrawlEngine, ProgressReporter, TerminationReason};
use domain_audit::extractor::DefaultExtractor;
use domain_audit::page_store::PageDataStore;
use domain_audit::state_store::{CrawlState, LinkStatus, StateStore};
use std::collections::HashSet;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

fn config(seed: &str, root: &Path) -> AuditConfig {
    AuditConfig::builder()
        .seed_url(seed)
        .audits_root(root)
        .workers(2)
        .request_timeout_secs(5)
        .build()
        .unwrap()
}

async fn load_state(path: &Path) -> CrawlState {
    StateStore::new()
        .load(path)
        .await
        .unwrap()
        .expect("snapshot present")
}

fn html(body: &str) -> String {
    format!("<html><body>{body}</body></html>")
}

#[tokio::test]
async fn crawl_records_internal_external_and_functional_links() {
    let mut internal = mockito::Server::new_async().await;
    let mut external = mockito::Server::new_async().await;
    let ext_link = format!("{}/x", external.url());

    let root = internal
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(html(&format!(
            r#"<a href="/a">A</a><a href="{ext_link}">X</a><a href="mailto:u@example.test">m</a>"#
        )))
        .create_async()
        .await;
    let page_a = internal
        .mock("GET", "/a")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html>ok</html>")
        .create_async()
        .await;
    let probe = external
        .mock("HEAD", "/x")
        .with_status(404)
        .create_async()
        .await;

    let tmp = TempDir::new().unwrap();
    let engine = CrawlEngine::prepare(
        config(&internal.url(), tmp.path()),
        Arc::new(DefaultExtractor),
    )
    .await
    .unwrap();
    let handle = engine.handle().clone();

    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome.reason, TerminationReason::QueueDrained);
    assert_eq!(outcome.pages_processed, 2);

    let seed_url = format!("{}/", internal.url());
    let a_url = format!("{}/a", internal.url());

    let state = load_state(&handle.state_path()).await;
    let expected: HashSet<String> = [seed_url.clone(), a_url.clone()].into_iter().collect();
    assert_eq!(state.visited, expected);
    assert!(state.queue.is_empty());
    assert!(state.bad_requests.is_empty());

    let a_stat = &state.stats[&a_url];
    assert_eq!(a_stat.count, 1);
    assert!(a_stat.sources.contains(&seed_url));
    assert!(a_stat.anchors.contains("A"));

    let ext = &state.external_links[&ext_link];
    assert_eq!(ext.status, Some(LinkStatus::Code(404)));
    assert!(ext.sources.contains(&seed_url));

    let mailto = &state.mailto_links["mailto:u@example.test"];
    assert!(mailto.sources.contains(&seed_url));

    // One record per visited URL, both readable.
    let store = PageDataStore::new(handle.page_data_dir());
    assert!(store.get(&seed_url).await.is_some());
    assert!(store.get(&a_url).await.is_some());
    assert_eq!(state.page_data_size, 2);

    let manager = AuditManager::new(tmp.path());
    assert_eq!(manager.status_of(&handle.dir).await, AuditStatus::Completed);

    root.assert_async().await;
    page_a.assert_async().await;
    probe.assert_async().await;
}

#[tokio::test]
async fn seed_returning_500_still_completes() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/")
        .with_status(500)
        .with_header("content-type", "text/plain")
        .with_body("oops")
        .create_async()
        .await;

    let tmp = TempDir::new().unwrap();
    let engine = CrawlEngine::prepare(
        config(&server.url(), tmp.path()),
        Arc::new(DefaultExtractor),
    )
    .await
    .unwrap();
    let handle = engine.handle().clone();

    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome.reason, TerminationReason::QueueDrained);

    let seed_url = format!("{}/", server.url());
    let state = load_state(&handle.state_path()).await;
    assert_eq!(state.visited.len(), 1);
    assert!(state.visited.contains(&seed_url));
    assert!(state.queue.is_empty());
    assert_eq!(
        state.bad_requests[&seed_url].status,
        LinkStatus::Code(500)
    );

    // A minimal record is still written for the failed page.
    let store = PageDataStore::new(handle.page_data_dir());
    let record = store.get(&seed_url).await.expect("minimal record");
    assert_eq!(record.status, 500);

    let manager = AuditManager::new(tmp.path());
    assert_eq!(manager.status_of(&handle.dir).await, AuditStatus::Completed);
}

#[tokio::test]
async fn paths_are_case_sensitive() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(html(r#"<a href="/a">lower</a><a href="/A">upper</a>"#))
        .create_async()
        .await;
    for path in ["/a", "/A"] {
        server
            .mock("GET", path)
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html>ok</html>")
            .create_async()
            .await;
    }

    let tmp = TempDir::new().unwrap();
    let engine = CrawlEngine::prepare(
        config(&server.url(), tmp.path()),
        Arc::new(DefaultExtractor),
    )
    .await
    .unwrap();
    let handle = engine.handle().clone();
    engine.run().await.unwrap();

    let state = load_state(&handle.state_path()).await;
    let lower = format!("{}/a", server.url());
    let upper = format!("{}/A", server.url());
    assert!(state.stats.contains_key(&lower));
    assert!(state.stats.contains_key(&upper));
    assert!(state.visited.contains(&lower));
    assert!(state.visited.contains(&upper));
    assert_eq!(state.visited.len(), 3);
}

#[tokio::test]
async fn zero_budget_claims_seed_without_fetching() {
    let mut server = mockito::Server::new_async().await;
    let root = server
        .mock("GET", "/")
        .with_status(200)
        .expect(0)
        .create_async()
        .await;

    let tmp = TempDir::new().unwrap();
    let config = AuditConfig::builder()
        .seed_url(server.url())
        .audits_root(tmp.path())
        .max_internal_links(Some(0))
        .build()
        .unwrap();
    let engine = CrawlEngine::prepare(config, Arc::new(DefaultExtractor))
        .await
        .unwrap();
    let handle = engine.handle().clone();

    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome.reason, TerminationReason::BudgetReached);
    assert_eq!(outcome.pages_processed, 0);

    let seed_url = format!("{}/", server.url());
    let state = load_state(&handle.state_path()).await;
    assert!(state.visited.contains(&seed_url));
    assert!(state.queue.is_empty());

    // The seed shows up in the failure log, keeping the visited set
    // explainable without a page record.
    let log = std::fs::read_to_string(handle.failed_log_path()).unwrap();
    assert!(log.contains(&seed_url));

    let manager = AuditManager::new(tmp.path());
    assert_eq!(manager.status_of(&handle.dir).await, AuditStatus::Completed);

    root.assert_async().await;
}

/// Requests a cooperative stop once the first page completes.
struct StopAfterFirstPage {
    stop: Arc<AtomicBool>,
}

impl ProgressReporter for StopAfterFirstPage {
    fn report_started(&self, _seed: &str, _resumed: bool) {}
    fn report_page(&self, _url: &str, _status: u16, _queue_len: usize, processed: usize) {
        if processed >= 1 {
            self.stop.store(true, Ordering::Relaxed);
        }
    }
    fn report_failure(&self, _url: &str, _reason: &str) {}
    fn report_checkpoint(&self, _processed: usize) {}
    fn report_finished(&self, _reason: TerminationReason, _processed: usize) {}
    fn report_error(&self, _error: &str) {}
}

#[tokio::test]
async fn interrupted_crawl_resumes_without_refetching() {
    let mut server = mockito::Server::new_async().await;
    let root = server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(html(r#"<a href="/a">A</a><a href="/b">B</a>"#))
        .expect(1)
        .create_async()
        .await;
    let page_a = server
        .mock("GET", "/a")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html>a</html>")
        .expect(1)
        .create_async()
        .await;
    let page_b = server
        .mock("GET", "/b")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html>b</html>")
        .expect(1)
        .create_async()
        .await;

    let tmp = TempDir::new().unwrap();

    // First run: stop after the seed page.
    let engine = CrawlEngine::prepare(
        config(&server.url(), tmp.path()),
        Arc::new(DefaultExtractor),
    )
    .await
    .unwrap();
    let first_handle = engine.handle().clone();
    let reporter = StopAfterFirstPage {
        stop: engine.stop_handle(),
    };
    let outcome = engine.run_with_progress(reporter).await.unwrap();
    assert_eq!(outcome.reason, TerminationReason::Cancelled);
    assert_eq!(outcome.pages_processed, 1);

    let manager = AuditManager::new(tmp.path());
    assert_eq!(
        manager.status_of(&first_handle.dir).await,
        AuditStatus::InProgress,
        "a cancelled audit stays resumable"
    );
    let state = load_state(&first_handle.state_path()).await;
    assert_eq!(state.visited.len(), 1);
    assert_eq!(state.queue.len(), 2);

    // Second run: resumes the same audit and drains the remainder. The
    // expect(1) mocks prove nothing is fetched twice.
    let engine = CrawlEngine::prepare(
        config(&server.url(), tmp.path()),
        Arc::new(DefaultExtractor),
    )
    .await
    .unwrap();
    assert_eq!(engine.handle().id, first_handle.id);
    assert!(engine.handle().resumed);

    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome.reason, TerminationReason::QueueDrained);
    assert_eq!(outcome.pages_processed, 2);

    let state = load_state(&first_handle.state_path()).await;
    assert_eq!(state.visited.len(), 3);
    assert!(state.queue.is_empty());
    assert_eq!(
        manager.status_of(&first_handle.dir).await,
        AuditStatus::Completed
    );

    root.assert_async().await;
    page_a.assert_async().await;
    page_b.assert_async().await;
}

#[tokio::test]
async fn internal_redirects_record_the_final_url() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(html(r#"<a href="/moved">moved</a>"#))
        .create_async()
        .await;
    server
        .mock("GET", "/moved")
        .with_status(302)
        .with_header("location", "/target")
        .create_async()
        .await;
    server
        .mock("GET", "/target")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body("<html>landed</html>")
        .create_async()
        .await;

    let tmp = TempDir::new().unwrap();
    let engine = CrawlEngine::prepare(
        config(&server.url(), tmp.path()),
        Arc::new(DefaultExtractor),
    )
    .await
    .unwrap();
    let handle = engine.handle().clone();
    engine.run().await.unwrap();

    let moved = format!("{}/moved", server.url());
    let target = format!("{}/target", server.url());

    let state = load_state(&handle.state_path()).await;
    assert!(state.visited.contains(&moved));
    assert!(
        state.visited.contains(&target),
        "redirect target joins visited"
    );

    // Both visited entries are backed by a record; no chain is kept for
    // internal redirects.
    let store = PageDataStore::new(handle.page_data_dir());
    assert!(store.get(&moved).await.is_some());
    assert!(store.get(&target).await.is_some());
}

#[tokio::test]
async fn enqueue_deduplicates_and_rejects_foreign_hosts() {
    let server = mockito::Server::new_async().await;
    let tmp = TempDir::new().unwrap();
    let engine = CrawlEngine::prepare(
        config(&server.url(), tmp.path()),
        Arc::new(DefaultExtractor),
    )
    .await
    .unwrap();

    let extra = format!("{}/extra", server.url());
    assert!(engine.enqueue(&extra).await.unwrap());
    assert!(!engine.enqueue(&extra).await.unwrap(), "already queued");
    assert!(engine.enqueue("https://elsewhere.test/x").await.is_err());
}

#[tokio::test]
async fn page_budget_stops_fetching_but_keeps_recording() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("GET", "/")
        .with_status(200)
        .with_header("content-type", "text/html")
        .with_body(html(r#"<a href="/a">A</a><a href="/b">B</a><a href="/c">C</a>"#))
        .create_async()
        .await;

    let tmp = TempDir::new().unwrap();
    let config = AuditConfig::builder()
        .seed_url(server.url())
        .audits_root(tmp.path())
        .workers(1)
        .max_internal_links(Some(1))
        .build()
        .unwrap();
    let engine = CrawlEngine::prepare(config, Arc::new(DefaultExtractor))
        .await
        .unwrap();
    let handle = engine.handle().clone();

    let outcome = engine.run().await.unwrap();
    assert_eq!(outcome.reason, TerminationReason::BudgetReached);
    assert_eq!(outcome.pages_processed, 1);

    let state = load_state(&handle.state_path()).await;
    assert_eq!(state.visited.len(), 1);
    // Discoveries are recorded even though nothing further was fetched.
    assert_eq!(state.stats.len(), 3);

    let manager = AuditManager::new(tmp.path());
    assert_eq!(manager.status_of(&handle.dir).await, AuditStatus::Completed);
}

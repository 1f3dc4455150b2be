use domain_audit::audit::{AuditManager, AuditStatus};
use domain_audit::state_store::{CrawlState, LinkStatus, StateStore};
use tempfile::TempDir;

const HOST: &str = "example.com";

/// Fabricate an audit directory as a finished run would leave it.
async fn fabricate_audit(
    manager: &AuditManager,
    id: &str,
    status: AuditStatus,
    pages: u64,
) -> std::path::PathBuf {
    let dir = manager.domain_dir(HOST).join(id);
    std::fs::create_dir_all(dir.join("page-data")).unwrap();
    std::fs::create_dir_all(dir.join("comparisons")).unwrap();
    std::fs::write(dir.join("status"), format!("{status}\n")).unwrap();

    let mut state = CrawlState::seeded("https://example.com/");
    state.queue.clear();
    for i in 0..pages {
        let url = format!("https://example.com/p{i}");
        state.visited.insert(url.clone());
        state.record_internal_link(&url, "p", "https://example.com/");
    }
    state.record_external_link("https://ext.test/x", "https://example.com/");
    state.record_bad_request("https://example.com/broken", LinkStatus::Code(404));
    state.page_data_size = pages;

    StateStore::new()
        .save(state, &dir.join(format!("{id}-crawl-state.json")))
        .await
        .unwrap();
    dir
}

#[tokio::test]
async fn create_new_builds_the_skeleton() {
    let tmp = TempDir::new().unwrap();
    let manager = AuditManager::new(tmp.path());

    let handle = manager.create_new(HOST).await.unwrap();
    assert!(handle.id.starts_with("audit-"));
    assert!(!handle.resumed);
    assert!(handle.page_data_dir().is_dir());
    assert!(handle.comparisons_dir().is_dir());
    assert_eq!(
        manager.status_of(&handle.dir).await,
        AuditStatus::InProgress
    );
}

#[tokio::test]
async fn resume_picks_newest_in_progress() {
    let tmp = TempDir::new().unwrap();
    let manager = AuditManager::new(tmp.path());

    fabricate_audit(&manager, "audit-2025-01-01-00-00-00", AuditStatus::Completed, 3).await;
    fabricate_audit(&manager, "audit-2025-02-01-00-00-00", AuditStatus::InProgress, 1).await;
    fabricate_audit(&manager, "audit-2025-01-15-00-00-00", AuditStatus::InProgress, 2).await;

    let handle = manager.create_or_resume(HOST, false).await.unwrap();
    assert!(handle.resumed);
    assert_eq!(handle.id, "audit-2025-02-01-00-00-00");

    // force_new ignores the resumable audit.
    let fresh = manager.create_or_resume(HOST, true).await.unwrap();
    assert!(!fresh.resumed);
    assert_ne!(fresh.id, handle.id);
}

#[tokio::test]
async fn create_or_resume_starts_fresh_when_all_terminal() {
    let tmp = TempDir::new().unwrap();
    let manager = AuditManager::new(tmp.path());

    fabricate_audit(&manager, "audit-2025-01-01-00-00-00", AuditStatus::Completed, 3).await;
    fabricate_audit(&manager, "audit-2025-01-02-00-00-00", AuditStatus::Failed, 0).await;

    let handle = manager.create_or_resume(HOST, false).await.unwrap();
    assert!(!handle.resumed);
}

#[tokio::test]
async fn terminal_status_is_sticky() {
    let tmp = TempDir::new().unwrap();
    let manager = AuditManager::new(tmp.path());

    let handle = manager.create_new(HOST).await.unwrap();
    manager.mark(&handle, AuditStatus::Completed).await.unwrap();
    manager
        .mark(&handle, AuditStatus::InProgress)
        .await
        .unwrap();
    assert_eq!(manager.status_of(&handle.dir).await, AuditStatus::Completed);

    // completed -> failed is also refused.
    manager.mark(&handle, AuditStatus::Failed).await.unwrap();
    assert_eq!(manager.status_of(&handle.dir).await, AuditStatus::Completed);
}

#[tokio::test]
async fn list_is_newest_first_with_snapshot_counts() {
    let tmp = TempDir::new().unwrap();
    let manager = AuditManager::new(tmp.path());

    fabricate_audit(&manager, "audit-2025-01-01-00-00-00", AuditStatus::Completed, 5).await;
    fabricate_audit(&manager, "audit-2025-03-01-00-00-00", AuditStatus::Completed, 9).await;
    fabricate_audit(&manager, "audit-2025-02-01-00-00-00", AuditStatus::Failed, 2).await;

    let summaries = manager.list(HOST).await.unwrap();
    let ids: Vec<&str> = summaries.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "audit-2025-03-01-00-00-00",
            "audit-2025-02-01-00-00-00",
            "audit-2025-01-01-00-00-00",
        ]
    );

    let newest = &summaries[0];
    assert_eq!(newest.status, AuditStatus::Completed);
    assert_eq!(newest.pages, Some(9));
    assert_eq!(newest.broken_links, Some(1));
    assert_eq!(newest.external_links, Some(1));
    assert!(newest.started_at.is_some());
}

#[tokio::test]
async fn stats_aggregates_history() {
    let tmp = TempDir::new().unwrap();
    let manager = AuditManager::new(tmp.path());

    fabricate_audit(&manager, "audit-2025-01-01-00-00-00", AuditStatus::Completed, 4).await;
    fabricate_audit(&manager, "audit-2025-01-02-00-00-00", AuditStatus::Completed, 6).await;
    fabricate_audit(&manager, "audit-2025-01-03-00-00-00", AuditStatus::InProgress, 0).await;

    let stats = manager.stats(HOST).await.unwrap();
    assert_eq!(stats.audits, 3);
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.in_progress, 1);
    assert_eq!(stats.total_pages, 10);
    assert_eq!(stats.page_trend.len(), 3);
}

#[tokio::test]
async fn cleanup_keeps_newest_and_spares_in_progress() {
    let tmp = TempDir::new().unwrap();
    let manager = AuditManager::new(tmp.path());

    // Five completed audits plus one old in-progress one.
    for day in 1..=5 {
        fabricate_audit(
            &manager,
            &format!("audit-2025-01-0{day}-00-00-00"),
            AuditStatus::Completed,
            1,
        )
        .await;
    }
    let in_progress =
        fabricate_audit(&manager, "audit-2024-06-01-00-00-00", AuditStatus::InProgress, 0).await;

    let report = manager.cleanup(HOST, 2).await.unwrap();
    assert_eq!(report.removed, 3);
    assert_eq!(report.kept, 3);

    let remaining = manager.list(HOST).await.unwrap();
    let ids: Vec<&str> = remaining.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "audit-2025-01-05-00-00-00",
            "audit-2025-01-04-00-00-00",
            "audit-2024-06-01-00-00-00",
        ]
    );
    assert!(in_progress.is_dir());
}

#[tokio::test]
async fn compare_diffs_two_snapshots_and_writes_the_report() {
    let tmp = TempDir::new().unwrap();
    let manager = AuditManager::new(tmp.path());

    fabricate_audit(&manager, "audit-2025-01-01-00-00-00", AuditStatus::Completed, 4).await;
    let newer_dir =
        fabricate_audit(&manager, "audit-2025-02-01-00-00-00", AuditStatus::Completed, 6).await;

    // Argument order must not matter.
    let report = manager
        .compare(HOST, "audit-2025-02-01-00-00-00", "audit-2025-01-01-00-00-00")
        .await
        .unwrap();

    assert_eq!(report.older, "audit-2025-01-01-00-00-00");
    assert_eq!(report.newer, "audit-2025-02-01-00-00-00");
    assert_eq!(report.deltas["pages"].change, 2.0);
    assert_eq!(report.older_metrics.pages, 4);
    assert_eq!(report.newer_metrics.pages, 6);

    let report_file = newer_dir
        .join("comparisons")
        .join("audit-2025-01-01-00-00-00-vs-audit-2025-02-01-00-00-00.json");
    assert!(report_file.is_file(), "report written under newer audit");
}

#[tokio::test]
async fn compare_unknown_audit_is_an_error() {
    let tmp = TempDir::new().unwrap();
    let manager = AuditManager::new(tmp.path());
    fabricate_audit(&manager, "audit-2025-01-01-00-00-00", AuditStatus::Completed, 4).await;

    assert!(manager
        .compare(HOST, "audit-2025-01-01-00-00-00", "audit-missing")
        .await
        .is_err());
}

// domain-audit CLI: thin wrappers over the library operations.
//
// Exit codes: 0 on success, 1 on argument errors, 2 on operational failure.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use domain_audit::audit::PAGE_DATA_DIR;
use domain_audit::{
    AuditConfig, AuditManager, CrawlEngine, DefaultExtractor, LogProgress, PageDataStore,
    StateStore,
};

#[derive(Parser)]
#[command(name = "domain-audit", version, about = "Crawl and audit a web domain")]
struct Cli {
    /// Root directory for audit storage.
    #[arg(long, default_value = "audits", global = true)]
    audits_root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl a host, resuming an interrupted audit when one exists.
    Audit {
        host: String,
        /// Page budget; omit for an unbounded crawl.
        max: Option<usize>,
        /// Start a fresh audit even if one is resumable.
        #[arg(long)]
        force_new: bool,
        /// Concurrent fetch workers.
        #[arg(long)]
        workers: Option<usize>,
        /// User-agent header for outbound requests.
        #[arg(long)]
        user_agent: Option<String>,
        /// Skip HEAD/GET probing of external links.
        #[arg(long)]
        no_probe: bool,
    },
    /// List audits for a host, newest first.
    List { host: String },
    /// Aggregate statistics over a host's audit history.
    Stats { host: String },
    /// Delete old audits, keeping the newest N (in-progress always kept).
    Cleanup {
        host: String,
        #[arg(default_value_t = 10)]
        keep: usize,
    },
    /// Compress oversized stored files for one host.
    Migrate { host: String },
    /// Compress oversized stored files for every audited host.
    MigrateAll,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // clap renders its own message; argument problems are exit 1,
            // requested help/version output is a success.
            let code = match e.kind() {
                clap::error::ErrorKind::DisplayHelp | clap::error::ErrorKind::DisplayVersion => 0,
                _ => 1,
            };
            let _ = e.print();
            return ExitCode::from(code);
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Audit {
            host,
            max,
            force_new,
            workers,
            user_agent,
            no_probe,
        } => {
            let mut builder = AuditConfig::builder()
                .seed_url(host.as_str())
                .audits_root(&cli.audits_root)
                .max_internal_links(max)
                .force_new(force_new)
                .probe_external_links(!no_probe);
            if let Some(workers) = workers {
                builder = builder.workers(workers);
            }
            if let Some(ua) = user_agent {
                builder = builder.user_agent(ua);
            }
            let config = builder.build()?;

            let engine = CrawlEngine::prepare(config, Arc::new(DefaultExtractor)).await?;

            // Ctrl-C requests a cooperative stop; the audit stays resumable.
            let stop = engine.stop_handle();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    eprintln!("stop requested, draining workers...");
                    stop.store(true, Ordering::Relaxed);
                }
            });

            let outcome = engine.run_with_progress(LogProgress).await?;
            println!(
                "{}: {} ({} pages in {:.1}s)",
                outcome.audit_id,
                outcome.reason,
                outcome.pages_processed,
                outcome.duration.as_secs_f64()
            );
        }

        Command::List { host } => {
            let manager = AuditManager::new(&cli.audits_root);
            let summaries = manager.list(&host).await?;
            if summaries.is_empty() {
                println!("no audits for {host}");
                return Ok(());
            }
            for s in summaries {
                println!(
                    "{}  {:<11}  pages: {}  internal: {}  external: {}  broken: {}  queued: {}",
                    s.id,
                    s.status.to_string(),
                    fmt_opt(s.pages),
                    fmt_opt(s.internal_links),
                    fmt_opt(s.external_links),
                    fmt_opt(s.broken_links),
                    fmt_opt(s.queue_remaining),
                );
            }
        }

        Command::Stats { host } => {
            let manager = AuditManager::new(&cli.audits_root);
            let stats = manager.stats(&host).await?;
            println!(
                "{} audits ({} completed, {} in progress, {} failed)",
                stats.audits, stats.completed, stats.in_progress, stats.failed
            );
            println!(
                "pages: {} total, {:.1} average",
                stats.total_pages, stats.avg_pages
            );
            for (id, pages) in &stats.page_trend {
                println!("  {id}: {pages} pages");
            }
        }

        Command::Cleanup { host, keep } => {
            let manager = AuditManager::new(&cli.audits_root);
            let report = manager.cleanup(&host, keep).await?;
            println!("removed {} audits, kept {}", report.removed, report.kept);
        }

        Command::Migrate { host } => {
            let manager = AuditManager::new(&cli.audits_root);
            migrate_domain(&manager, &host).await?;
        }

        Command::MigrateAll => {
            let manager = AuditManager::new(&cli.audits_root);
            let mut entries = match tokio::fs::read_dir(&cli.audits_root).await {
                Ok(e) => e,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    println!("nothing to migrate");
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                if !entry.path().is_dir() {
                    continue;
                }
                if let Some(host) = entry.file_name().to_str() {
                    migrate_domain(&manager, host).await?;
                }
            }
        }
    }
    Ok(())
}

async fn migrate_domain(manager: &AuditManager, host: &str) -> anyhow::Result<()> {
    let domain_dir = manager.domain_dir(host);

    let snapshots = StateStore::new().migrate(&domain_dir).await?;
    let mut records_migrated = 0usize;
    let mut records_errors = 0usize;
    let mut records_saved = 0u64;

    for summary in manager.list(host).await? {
        let store = PageDataStore::new(domain_dir.join(&summary.id).join(PAGE_DATA_DIR));
        let report = store.migrate().await?;
        records_migrated += report.migrated;
        records_errors += report.errors;
        records_saved += report.bytes_saved;
    }

    println!(
        "{host}: {} snapshots migrated ({} bytes saved), {} records migrated ({} bytes saved), {} errors",
        snapshots.migrated,
        snapshots.bytes_saved,
        records_migrated,
        records_saved,
        snapshots.errors + records_errors
    );
    Ok(())
}

fn fmt_opt<T: std::fmt::Display>(v: Option<T>) -> String {
    v.map_or_else(|| "-".to_string(), |v| v.to_string())
}

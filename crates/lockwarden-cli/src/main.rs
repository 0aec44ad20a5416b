//! Lockwarden CLI - exercise and inspect the in-process lock manager

use clap::{Parser, Subcommand};
use lockwarden_core::config::Config;
use lockwarden_core::locking::{
    CleanupMethod, LockError, LockOptions, LockProvider, LockQuery, MemoryLockManager, SortField,
};
use lockwarden_core::Error;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "lockwarden")]
#[command(author, version, about = "In-process named-resource lock manager", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Race many requesters for one resource with try-lock
    Contend {
        /// Resource name
        #[arg(short, long, default_value = "demo.resource")]
        resource: String,
        /// Number of parallel requesters
        #[arg(short, long, default_value_t = 100)]
        workers: usize,
    },

    /// Queue waiters behind a holder and report the grant order
    Queue {
        /// Resource name
        #[arg(short, long, default_value = "demo.resource")]
        resource: String,
        /// Number of queued requesters
        #[arg(short, long, default_value_t = 3)]
        waiters: usize,
        /// How long each holder keeps the lock (milliseconds)
        #[arg(long, default_value_t = 20)]
        hold_ms: u64,
        /// Give up waiting after this many milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Create and release locks, then run one cleanup pass
    Cleanup {
        /// Cleanup method (always, amount, time, process_memory)
        #[arg(short, long)]
        method: Option<String>,
        /// Number of locks to create
        #[arg(short, long, default_value_t = 10)]
        locks: usize,
    },

    /// Create sample locks and query them
    Query {
        /// Number of sample resources
        #[arg(short, long, default_value_t = 9)]
        locks: usize,
        /// Substring filter on resource names
        #[arg(short, long)]
        filter: Option<String>,
        /// Match the filter case-sensitively
        #[arg(long)]
        case_sensitive: bool,
        /// Sort field
        #[arg(short, long)]
        sort_by: Option<SortArg>,
        /// Sort descending
        #[arg(short, long)]
        descending: bool,
        /// 1-indexed page (0 = everything)
        #[arg(long, default_value_t = 0)]
        page: usize,
        /// Page size (0 = everything)
        #[arg(long, default_value_t = 0)]
        page_size: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Clone, Copy, clap::ValueEnum)]
enum SortArg {
    Resource,
    LockedBy,
    LockedAt,
    ExpiryDate,
    LastLockDate,
    PendingRequests,
}

impl From<SortArg> for SortField {
    fn from(arg: SortArg) -> Self {
        match arg {
            SortArg::Resource => SortField::Resource,
            SortArg::LockedBy => SortField::LockedBy,
            SortArg::LockedAt => SortField::LockedAt,
            SortArg::ExpiryDate => SortField::ExpiryDate,
            SortArg::LastLockDate => SortField::LastLockDate,
            SortArg::PendingRequests => SortField::PendingRequests,
        }
    }
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
    /// Show the configuration file path
    Path,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("{}", render_error(&err));
        std::process::exit(1);
    }
}

/// Format an error with its code and hint when it came from lockwarden-core
fn render_error(err: &anyhow::Error) -> String {
    let coded = if let Some(e) = err.downcast_ref::<Error>() {
        Some((e.code(), e.suggestion()))
    } else {
        err.downcast_ref::<LockError>().map(|e| (e.code(), e.suggestion()))
    };

    match coded {
        Some((code, Some(hint))) => format!("Error [{}]: {:#}\nHint: {}", code, err, hint),
        Some((code, None)) => format!("Error [{}]: {:#}", code, err),
        None => format!("Error: {:#}", err),
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    // Initialize tracing
    let directive = if cli.quiet { "lockwarden=warn" } else { "lockwarden=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(directive.parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Contend { resource, workers } => cmd_contend(&resource, workers, cli.format).await,
        Commands::Queue {
            resource,
            waiters,
            hold_ms,
            timeout_ms,
        } => cmd_queue(&resource, waiters, hold_ms, timeout_ms, cli.format).await,
        Commands::Cleanup { method, locks } => cmd_cleanup(method.as_deref(), locks, cli.format).await,
        Commands::Query {
            locks,
            filter,
            case_sensitive,
            sort_by,
            descending,
            page,
            page_size,
        } => {
            let mut query = LockQuery::new()
                .case_sensitive(case_sensitive)
                .descending(descending)
                .page(page, page_size);
            if let Some(filter) = filter {
                query = query.filter(filter);
            }
            if let Some(sort_by) = sort_by {
                query = query.sort_by(sort_by.into());
            }
            cmd_query(locks, &query, cli.format).await
        }
        Commands::Config { action } => cmd_config(action, cli.quiet),
    }
}

// ============================================================================
// Command Implementations
// ============================================================================

/// Build a manager from the saved configuration
fn load_manager(method: Option<CleanupMethod>) -> anyhow::Result<MemoryLockManager> {
    let mut lock_config = Config::load()?.lock_config();
    if let Some(method) = method {
        lock_config = lock_config.with_cleanup_method(method);
    }
    Ok(MemoryLockManager::new(lock_config)?)
}

async fn cmd_contend(resource: &str, workers: usize, format: OutputFormat) -> anyhow::Result<()> {
    let manager = load_manager(None)?;
    let started = Instant::now();

    let tasks: Vec<_> = (0..workers)
        .map(|i| {
            let manager = manager.clone();
            let resource = resource.to_string();
            tokio::spawn(async move {
                manager
                    .try_lock(&resource, &format!("worker-{i}"), None, false)
                    .await
            })
        })
        .collect();

    let mut outcomes = Vec::with_capacity(workers);
    for task in tasks {
        outcomes.push(task.await??);
    }
    let winners: Vec<&str> = outcomes
        .iter()
        .filter_map(|o| o.lock().map(|l| l.locked_by()))
        .collect();
    let elapsed_ms = started.elapsed().as_millis() as u64;
    info!(resource = %resource, workers, winners = winners.len(), elapsed_ms, "Contention finished");

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "resource": resource,
                "workers": workers,
                "winners": winners,
                "elapsed_ms": elapsed_ms,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!("Workers: {}", workers);
            println!("Winners: {}", winners.len());
            if let Some(winner) = winners.first() {
                println!("Holder: {}", winner);
            }
        }
    }

    drop(outcomes);
    manager.shutdown().await;
    Ok(())
}

async fn cmd_queue(
    resource: &str,
    waiters: usize,
    hold_ms: u64,
    timeout_ms: Option<u64>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let manager = load_manager(None)?;
    let hold = Duration::from_millis(hold_ms);
    let holder = manager
        .try_lock(resource, "holder", None, false)
        .await?
        .into_lock()
        .ok_or_else(|| anyhow::anyhow!("Resource '{}' is already locked", resource))?;

    let (granted_tx, mut granted_rx) = mpsc::unbounded_channel();
    let mut tasks = Vec::with_capacity(waiters);
    for i in 1..=waiters {
        let task_manager = manager.clone();
        let task_resource = resource.to_string();
        let granted_tx = granted_tx.clone();
        let mut options = LockOptions::new();
        if let Some(ms) = timeout_ms {
            options = options.timeout(Duration::from_millis(ms));
        }
        tasks.push(tokio::spawn(async move {
            let requester = format!("waiter-{i}");
            match task_manager.lock(&task_resource, &requester, options).await {
                Ok(lock) => {
                    let _ = granted_tx.send(Ok(requester));
                    tokio::time::sleep(hold).await;
                    lock.unlock();
                }
                Err(e) => {
                    let _ = granted_tx.send(Err(format!("{}: {}", requester, e)));
                }
            }
        }));

        // Wait for this request to be queued before issuing the next one
        while manager.get_pending_requests(resource).await?.len() < i
            && !tasks.last().is_some_and(|t| t.is_finished())
        {
            tokio::task::yield_now().await;
        }
    }
    drop(granted_tx);

    let pending: Vec<String> = manager
        .get_pending_requests(resource)
        .await?
        .into_iter()
        .map(|r| r.requester)
        .collect();

    tokio::time::sleep(hold).await;
    holder.unlock();

    let mut granted = Vec::new();
    let mut failed = Vec::new();
    while let Some(result) = granted_rx.recv().await {
        match result {
            Ok(requester) => granted.push(requester),
            Err(reason) => {
                warn!(reason = %reason, "Queued request failed");
                failed.push(reason);
            }
        }
    }
    for task in tasks {
        task.await?;
    }

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "resource": resource,
                "queued": pending,
                "granted": granted,
                "failed": failed,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!("Queued: {}", pending.join(", "));
            println!("Granted: {}", granted.join(", "));
            for reason in &failed {
                println!("Failed: {}", reason);
            }
        }
    }

    manager.shutdown().await;
    Ok(())
}

async fn cmd_cleanup(method: Option<&str>, locks: usize, format: OutputFormat) -> anyhow::Result<()> {
    let method = method.map(str::parse::<CleanupMethod>).transpose()?;
    let manager = load_manager(method)?;

    for i in 0..locks {
        let resource = format!("cleanup.{i}");
        if let Some(lock) = manager.try_lock(&resource, "cli", None, false).await?.into_lock() {
            lock.unlock();
        }
    }

    let before = manager.query(&LockQuery::new()).await?.total;
    let evicted = manager.run_cleanup();
    let after = manager.query(&LockQuery::new()).await?.total;

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "method": manager.config().cleanup_method.as_str(),
                "before": before,
                "evicted": evicted,
                "remaining": after,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            println!("Method: {}", manager.config().cleanup_method);
            println!("Records before: {}", before);
            println!("Evicted: {}", evicted);
            println!("Remaining: {}", after);
        }
    }

    manager.shutdown().await;
    Ok(())
}

async fn cmd_query(locks: usize, query: &LockQuery, format: OutputFormat) -> anyhow::Result<()> {
    let manager = load_manager(None)?;

    // Every other sample resource stays locked
    let mut held = Vec::new();
    for i in 1..=locks {
        let resource = i.to_string();
        if let Some(lock) = manager
            .try_lock(&resource, &format!("owner-{i}"), None, false)
            .await?
            .into_lock()
        {
            if i % 2 == 0 {
                held.push(lock);
            } else {
                lock.unlock();
            }
        }
    }

    let page = manager.query(query).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&page)?),
        OutputFormat::Text => {
            println!("{:<16} {:<12} {}", "RESOURCE", "LOCKED BY", "PENDING");
            for record in &page.items {
                println!(
                    "{:<16} {:<12} {}",
                    record.resource,
                    record.locked_by.as_deref().unwrap_or("-"),
                    record.pending_requests
                );
            }
            println!("Showing {} of {}", page.len(), page.total);
        }
    }

    drop(held);
    manager.shutdown().await;
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            let items = config.list()?;
            for (key, value) in items {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

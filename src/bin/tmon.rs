//! tmon - live monitor for a task orchestrator
//!
//! Watches the orchestrator's task tree, queries its history and issues the
//! few commands the HTTP surface accepts.
//!
//! # Usage
//!
//! ```text
//! tmon                      # Same as `tmon watch`
//! tmon watch --interval-ms 1000
//! tmon stop 42 --reason "Operator stop"
//! tmon restart 42
//! tmon history --owner-type DemoTask --page 2
//! tmon locale en
//! ```

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use tmon_client::locale::{open_locale_store, FileLocalePersistence, Text};
use tmon_client::{
    logging, Dashboard, HistoryEngine, HistoryPage, Locale, LocaleStore, MemoryPersistence,
    MonitorConfig, Notification, SyncConfig, SyncEvent, Synchronizer, TaskGateway,
};
use tmon_core::{HistoryFilter, HistoryRecord, HistoryStats, SessionId, TaskId, TaskType};

// ============================================================================
// CLI Arguments
// ============================================================================

/// tmon - live monitor for a task orchestrator
#[derive(Parser, Debug)]
#[command(name = "tmon")]
#[command(about = "Monitor an orchestrator's task tree and history")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// API base URL, e.g. http://localhost:8082/api (overrides config and TMON_API_BASE)
    #[arg(long, global = true)]
    api_base: Option<String>,

    /// Request timeout in milliseconds
    #[arg(long, global = true)]
    timeout_ms: Option<u64>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Live task tree, refreshed on an interval
    Watch {
        /// Poll interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Print the task tree once
    Tree,
    /// Show one task
    Show { id: u32 },
    /// Ask the orchestrator to stop a task
    Stop {
        id: u32,
        /// Reason recorded with the stop
        #[arg(long)]
        reason: Option<String>,
    },
    /// Stop a task with a restart reason, then create a fresh demo task
    Restart { id: u32 },
    /// Create a demo task
    Create,
    /// Query task history
    History(HistoryArgs),
    /// History statistics for a session
    Stats {
        /// Session to aggregate (defaults to the current one)
        #[arg(long)]
        session: Option<String>,
        /// Use the orchestrator's own statistics instead of aggregating locally
        #[arg(long)]
        remote: bool,
    },
    /// Current orchestrator session
    Session,
    /// Counters for live tasks
    TaskStats,
    /// Show or set the display language
    Locale { locale: Option<Locale> },
}

#[derive(ClapArgs, Debug)]
struct HistoryArgs {
    /// Owner type, e.g. DemoTask
    #[arg(long)]
    owner_type: Option<String>,
    /// Task type: TASK, JOB, WORK or CHANNEL
    #[arg(long)]
    task_type: Option<TaskType>,
    /// Session id (defaults to the current session)
    #[arg(long)]
    session: Option<String>,
    /// Only children of this task
    #[arg(long)]
    parent: Option<u32>,
    /// Records started at or after this RFC 3339 time
    #[arg(long)]
    since: Option<DateTime<Utc>>,
    /// Records started before this RFC 3339 time
    #[arg(long)]
    until: Option<DateTime<Utc>>,
    /// 1-based page number
    #[arg(long, default_value_t = 1)]
    page: u32,
    /// Page size (defaults to the configured one)
    #[arg(long)]
    page_size: Option<u32>,
    /// Fetch every page
    #[arg(long)]
    all: bool,
}

impl HistoryArgs {
    fn filter(&self) -> HistoryFilter {
        let mut filter = HistoryFilter::new().between(self.since, self.until);
        if let Some(owner) = &self.owner_type {
            filter = filter.owner_type(owner.clone());
        }
        if let Some(task_type) = self.task_type {
            filter = filter.task_type(task_type);
        }
        if let Some(session) = &self.session {
            filter = filter.session(SessionId::new(session.clone()));
        }
        if let Some(parent) = self.parent {
            filter = filter.parent(TaskId::new(parent));
        }
        filter
    }
}

// ============================================================================
// Watch Mode
// ============================================================================

/// Lines typed while watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Input {
    Refresh,
    Next,
    Previous,
    Quit,
}

impl Input {
    fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "r" => Some(Self::Refresh),
            "j" => Some(Self::Next),
            "k" => Some(Self::Previous),
            "q" => Some(Self::Quit),
            _ => None,
        }
    }
}

/// Reads commands from stdin on a dedicated thread.
///
/// Blocking stdin reads cannot be cancelled, so the thread is never joined;
/// it exits on EOF or once the receiver is gone.
fn spawn_input_thread(input_tx: mpsc::UnboundedSender<Input>) {
    let spawned = std::thread::Builder::new()
        .name("tmon-input".to_string())
        .spawn(move || {
            for line in std::io::stdin().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "Failed to read stdin");
                        break;
                    }
                };
                let Some(input) = Input::parse(&line) else {
                    continue;
                };
                if input_tx.send(input).is_err() {
                    debug!("Input channel closed, input thread exiting");
                    break;
                }
            }
            debug!("Stdin closed");
        });
    if let Err(e) = spawned {
        warn!(error = %e, "Failed to spawn input thread, keyboard commands disabled");
    }
}

fn draw(dashboard: &Dashboard, locale: Locale) {
    // Clear screen, cursor home.
    print!("\x1b[2J\x1b[H");
    print!("{}", dashboard.render(locale));
    if let Some(fetched_at) = dashboard.snapshot().fetched_at {
        println!(
            "\n{}: {}",
            locale.text(Text::LastUpdated),
            fetched_at.with_timezone(&chrono::Local).format("%H:%M:%S")
        );
    }
    for notification in dashboard.notifications() {
        println!("{notification}");
    }
    println!("\n[r] refresh  [j/k] move  [q] quit");
}

async fn run_watch(config: &MonitorConfig, gateway: Arc<TaskGateway>, locale: Locale) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<SyncEvent>();
    let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Input>();
    let cancel_token = CancellationToken::new();

    let sync = Synchronizer::spawn(gateway, SyncConfig::from(config), event_tx, &cancel_token);
    let mut snapshots = sync.subscribe();
    spawn_input_thread(input_tx);

    let mut dashboard = Dashboard::new();
    let mut clock = tokio::time::interval(Duration::from_secs(1));
    draw(&dashboard, locale);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
            changed = snapshots.changed() => {
                if changed.is_err() {
                    warn!("Synchronizer stopped");
                    break;
                }
                let snapshot = snapshots.borrow_and_update().clone();
                dashboard.apply_snapshot(snapshot, Utc::now());
            }
            Some(event) = event_rx.recv() => {
                dashboard.handle_sync_event(&event);
            }
            Some(input) = input_rx.recv() => match input {
                Input::Refresh => {
                    if !sync.refresh() {
                        dashboard.push_notification(Notification::error("Synchronizer is not running"));
                    }
                }
                Input::Next => dashboard.select_next(),
                Input::Previous => dashboard.select_previous(),
                Input::Quit => dashboard.quit(),
            },
            _ = clock.tick() => {
                dashboard.refresh_elapsed(Utc::now());
            }
        }

        if dashboard.should_quit {
            break;
        }
        draw(&dashboard, locale);
    }

    cancel_token.cancel();
    sync.stop().await;
    Ok(())
}

// ============================================================================
// One-shot Commands
// ============================================================================

async fn print_tree(gateway: &TaskGateway, locale: Locale) -> Result<()> {
    let root = gateway.fetch_tree().await.context("Failed to fetch task tree")?;
    let mut dashboard = Dashboard::new();
    dashboard.apply_snapshot(
        Arc::new(tmon_client::TaskSnapshot {
            tree: tmon_core::TaskTree::from_optional_root(root),
            seq: 1,
            fetched_at: Some(Utc::now()),
        }),
        Utc::now(),
    );
    print!("{}", dashboard.render(locale));
    Ok(())
}

async fn show_task(gateway: &TaskGateway, id: u32, locale: Locale) -> Result<()> {
    let task = gateway.get_task(TaskId::new(id)).await?;
    let now = Utc::now();
    println!("{}: {}", locale.text(Text::Id), task.id);
    println!("{}: {}", locale.text(Text::Owner), task.owner);
    println!("{}: {}", locale.text(Text::Type), task.task_type);
    println!("{}: {}", locale.text(Text::State), task.state);
    println!("{}: {}", locale.text(Text::Elapsed), task.elapsed_at(now));
    println!("{}: {}", locale.text(Text::Retries), task.retry_budget());
    if let Some(reason) = &task.stop_reason {
        println!("{}: {reason}", locale.text(Text::StopReason));
    }
    for (key, value) in &task.description {
        println!("  {key}: {value}");
    }
    for child in &task.children {
        println!("  - {} {} {}", child.id, child.owner, child.state);
    }
    Ok(())
}

fn print_history(records: &[HistoryRecord], locale: Locale) {
    println!(
        "{:>5}  {:<24}  {:<8}  {:<10}  {:<19}  {:>10}  {}",
        locale.text(Text::Id),
        locale.text(Text::Owner),
        locale.text(Text::Type),
        locale.text(Text::State),
        "Start",
        locale.text(Text::Duration),
        locale.text(Text::StopReason),
    );
    for record in records {
        println!(
            "{:>5}  {:<24}  {:<8}  {:<10}  {:<19}  {:>10}  {}",
            record.id,
            record.owner_type,
            record.task_type.to_string(),
            record.state.to_string(),
            record
                .start_time
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M:%S"),
            record.duration.format(),
            record.stop_reason.as_deref().unwrap_or("-"),
        );
    }
}

fn print_page_footer(page: &HistoryPage, locale: Locale) {
    let pages = page
        .page_count()
        .map_or_else(|| "?".to_string(), |count| count.to_string());
    let more = if page.is_last_page { "" } else { " (more)" };
    println!("\n{} {}/{pages}{more}", locale.text(Text::Page), page.page);
}

fn print_stats(stats: &HistoryStats, locale: Locale) {
    println!("{}: {}", locale.text(Text::Session), stats.session_id);
    println!("{}: {}", locale.text(Text::TotalTasks), stats.total_tasks);
    println!("{}: {}", locale.text(Text::TotalDuration), stats.total_duration);
    println!("{}: {}", locale.text(Text::AverageDuration), stats.average_duration);
    for (title, counts) in [
        (locale.text(Text::Owner), &stats.owner_type_stats),
        (locale.text(Text::Type), &stats.task_type_stats),
        (locale.text(Text::State), &stats.state_stats),
    ] {
        if counts.is_empty() {
            continue;
        }
        println!("{title}:");
        for (key, count) in counts {
            println!("  {key:<24} {count}");
        }
    }
}

async fn run_history(
    engine: &mut HistoryEngine,
    args: &HistoryArgs,
    locale: Locale,
) -> Result<()> {
    if args.session.is_none() {
        if let Err(e) = engine.refresh_session().await {
            warn!(error = %e, "Querying history without a session scope");
        }
    }

    let filter = args.filter();
    println!("{}", locale.text(Text::History));

    if args.all {
        let page_size = args.page_size.unwrap_or(engine.page_size());
        let records = engine.collect_all(filter, page_size).await?;
        print_history(&records, locale);
        println!("\n{}: {}", locale.text(Text::TotalTasks), records.len());
        return Ok(());
    }

    let limit = args.page_size.unwrap_or(engine.page_size()).max(1);
    let offset = args.page.max(1).saturating_sub(1).saturating_mul(limit);
    let page = engine.query(filter.page(limit, offset)).await?;
    print_history(&page.records, locale);
    print_page_footer(&page, locale);
    Ok(())
}

fn open_locale() -> LocaleStore {
    match FileLocalePersistence::default_path() {
        Some(path) => open_locale_store(FileLocalePersistence::new(path)),
        None => open_locale_store(MemoryPersistence::new()),
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_path = logging::init();

    let mut config = MonitorConfig::load()?.with_env_overrides();
    if let Some(base) = args.api_base {
        config.base_url = base;
    }
    if let Some(timeout_ms) = args.timeout_ms.filter(|t| *t > 0) {
        config.timeout_ms = timeout_ms;
    }

    let command = args.command.unwrap_or(Command::Watch { interval_ms: None });
    info!(base_url = %config.base_url, ?log_path, ?command, "tmon starting");

    let locale_store = open_locale();
    let locale = locale_store.read();

    if let Command::Locale { locale } = command {
        match locale {
            Some(locale) => {
                locale_store.write(locale);
                println!("{}", locale.code());
            }
            None => println!("{}", locale_store.read().code()),
        }
        return Ok(());
    }

    let gateway = Arc::new(
        TaskGateway::from_config(&config)
            .with_context(|| format!("Invalid API base {}", config.base_url))?,
    );
    let (notification_tx, _notification_rx) = mpsc::unbounded_channel();
    let mut engine = HistoryEngine::new(gateway.clone(), config.history_page_size, notification_tx);

    match command {
        Command::Watch { interval_ms } => {
            if let Some(interval_ms) = interval_ms.filter(|i| *i > 0) {
                config.poll_interval_ms = interval_ms;
            }
            run_watch(&config, gateway, locale).await?;
        }
        Command::Tree => print_tree(&gateway, locale).await?,
        Command::Show { id } => show_task(&gateway, id, locale).await?,
        Command::Stop { id, reason } => {
            gateway.stop_task(TaskId::new(id), reason).await?;
            println!("Stop requested for task {id}");
        }
        Command::Restart { id } => {
            gateway.restart_task(TaskId::new(id)).await?;
            println!("Restart requested for task {id}");
        }
        Command::Create => {
            gateway.create_demo_task().await?;
            println!("Demo task created");
        }
        Command::History(history_args) => run_history(&mut engine, &history_args, locale).await?,
        Command::Stats { session, remote } => {
            let stats = if remote {
                gateway.history_stats().await?
            } else {
                if let Some(session) = session {
                    engine.select_session(SessionId::new(session));
                }
                engine.stats().await?
            };
            print_stats(&stats, locale);
        }
        Command::Session => {
            let session = gateway.session_info().await?;
            println!("{}: {}", locale.text(Text::Session), session.id);
            println!("pid: {}", session.pid);
            println!("args: {}", session.args);
            println!(
                "start: {}",
                session.start_time.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S")
            );
            println!("uptime: {}", session.uptime_at(Utc::now()));
        }
        Command::TaskStats => {
            let stats = gateway.task_stats().await?;
            println!("{}: {}", locale.text(Text::TotalTasks), stats.total_tasks);
            println!("running: {}", stats.running_tasks);
            println!("completed: {}", stats.completed_tasks);
            println!("failed: {}", stats.failed_tasks);
            println!("retries: {}", stats.retry_count);
        }
        Command::Locale { .. } => {}
    }

    info!("tmon stopped");
    Ok(())
}

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use fib_workflow::api::{AnalysisApi, HttpAnalysisClient};
use fib_workflow::levels::{LevelService, LevelSettings};
use fib_workflow::persistence::{archive, AppStore, FileBackend};
use fib_workflow::pivots::{NewPivot, PivotManager};
use fib_workflow::workflow::{
    scan_patterns, Step, StoredWorkflow, TradeStatus, Trend, WorkflowManager, WorkflowPatch,
};
use fib_workflow::{AppConfig, Direction, PivotType};

#[derive(Parser, Debug)]
#[command(name = "fib-workflow")]
#[command(about = "Eight-step Fibonacci trade planning workflow")]
struct Args {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding the persisted store
    #[arg(long, global = true, env = "FIB_WORKFLOW_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Analysis backend base URL
    #[arg(long, global = true, env = "FIB_WORKFLOW_API_URL")]
    api_url: Option<String>,

    /// Work without the analysis backend
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Start a new workflow and make it active
    New {
        /// Symbol to trade
        #[arg(short, long)]
        symbol: Option<String>,

        #[arg(long, default_value = "1D")]
        higher: String,

        #[arg(long, default_value = "4H")]
        lower: String,
    },

    /// List stored workflows
    List,

    /// Show a workflow (default: the active one)
    Show { id: Option<String> },

    /// Make a workflow active
    Activate { id: String },

    /// Navigate the active workflow to a step (1-8)
    Step { step: u8 },

    /// Set higher and lower timeframe trends (up/down/neutral)
    Trend { higher: String, lower: String },

    /// Manage pivots for the active workflow's symbol
    Pivot {
        #[command(subcommand)]
        command: PivotCommand,
    },

    /// Compute levels and confluence zones from stored pivots
    Levels {
        /// Override the trade direction (long/short)
        #[arg(short, long)]
        direction: Option<String>,
    },

    /// Run the pattern and signal scan
    Scan {
        /// Timeframe to scan (default: the lower timeframe)
        #[arg(short, long)]
        timeframe: Option<String>,
    },

    /// Confirm a scanned signal bar as the entry trigger
    Entry {
        /// Position in the scanned signal list
        signal: usize,
    },

    /// Set entry, stop and targets; size and R:R are derived
    Risk {
        entry: f64,
        stop: f64,
        #[arg(required = true)]
        targets: Vec<f64>,

        #[arg(long)]
        balance: Option<f64>,

        #[arg(long)]
        risk_percent: Option<f64>,
    },

    /// Show the checklist, or tick an item
    Checklist {
        item: Option<String>,

        /// Untick instead
        #[arg(long)]
        uncheck: bool,
    },

    /// Mark the trade open
    Open,

    /// Close the trade and complete the workflow
    Complete {
        id: Option<String>,

        /// Exit price used for P&L
        #[arg(long)]
        exit: Option<f64>,
    },

    /// Cancel a workflow
    Cancel { id: Option<String> },

    /// Copy a workflow back to step 1
    Duplicate { id: String },

    /// Delete a workflow
    Delete { id: String },

    /// Write a compressed backup of the store
    Export { path: PathBuf },

    /// Restore the store from a backup
    Import { path: PathBuf },

    /// Delete every workflow
    Clear,
}

#[derive(Subcommand, Debug)]
enum PivotCommand {
    Add {
        timeframe: String,
        index: usize,
        price: f64,
        /// high or low
        kind: String,
    },
    List {
        timeframe: String,
    },
    Remove {
        timeframe: String,
        id: String,
    },
    /// Protect a timeframe's pivots from detection refreshes
    Lock {
        timeframe: String,
    },
    Unlock {
        timeframe: String,
    },
    /// Replace a timeframe's pivots with detected ones
    Detect {
        timeframe: String,
    },
}

struct App {
    config: AppConfig,
    store: Arc<AppStore>,
    workflows: WorkflowManager,
    api: Option<Arc<dyn AnalysisApi>>,
}

impl App {
    fn active(&self) -> Result<StoredWorkflow> {
        self.workflows
            .active_workflow()
            .ok_or_else(|| anyhow!("No active workflow, start one with `fib-workflow new`"))
    }

    fn resolve(&self, id: Option<String>) -> Result<String> {
        match id {
            Some(id) => Ok(id),
            None => Ok(self.active()?.id),
        }
    }

    fn pivots_for(&self, symbol: &str) -> PivotManager {
        let manager = PivotManager::new(Arc::clone(&self.store), symbol);
        match &self.api {
            Some(api) => manager.with_api(Arc::clone(api), self.config.detection),
            None => manager,
        }
    }

    fn update(&self, patch: WorkflowPatch) -> Result<()> {
        if !self.workflows.update_active_workflow(&patch) {
            bail!("No active workflow to update");
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("fib_workflow=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = AppConfig::from_env()?;
    if let Some(dir) = args.data_dir {
        config.data_dir = dir;
    }
    if let Some(url) = args.api_url {
        config.api_url = url;
    }

    let backend = FileBackend::new(&config.data_dir).with_quota(config.quota_bytes);
    let store = Arc::new(AppStore::new(Arc::new(backend)));
    let api: Option<Arc<dyn AnalysisApi>> = if args.offline {
        None
    } else {
        Some(Arc::new(HttpAnalysisClient::new(
            config.api_url.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )))
    };

    let app = App {
        workflows: WorkflowManager::new(Arc::clone(&store)),
        store,
        api,
        config,
    };

    run(&app, args.command).await
}

async fn run(app: &App, command: Commands) -> Result<()> {
    match command {
        Commands::New { symbol, higher, lower } => {
            let patch = WorkflowPatch::market(symbol.as_deref().unwrap_or(""), &higher, &lower);
            let wf = app.workflows.create_workflow(Some(patch));
            println!("{}  {}", wf.id, wf.name);
        }

        Commands::List => {
            let summaries = app.workflows.get_summaries();
            if summaries.is_empty() {
                println!("No workflows");
            }
            for s in summaries {
                println!(
                    "{} {:<28} {:<10} step {}/8  {:>3}%  {}",
                    if s.is_active { "*" } else { " " },
                    s.id,
                    s.status,
                    s.current_step,
                    s.progress,
                    s.name
                );
            }
        }

        Commands::Show { id } => {
            let id = app.resolve(id)?;
            let wf = app
                .workflows
                .get_workflow(&id)
                .ok_or_else(|| anyhow!("Workflow {} not found", id))?;
            print_workflow(app, &wf);
        }

        Commands::Activate { id } => {
            if !app.workflows.set_active_workflow(Some(&id)) {
                bail!("Workflow {} not found", id);
            }
            println!("Active: {}", id);
        }

        Commands::Step { step } => {
            let target = Step::from_number(step).ok_or_else(|| anyhow!("Step must be 1-8"))?;
            match app.workflows.go_to_step(target) {
                Ok(()) => println!("Now at {}", target),
                Err(validation) => bail!("Cannot move to step {}: {}", step, validation),
            }
        }

        Commands::Trend { higher, lower } => {
            let higher: Trend = higher.parse()?;
            let lower: Trend = lower.parse()?;
            app.update(WorkflowPatch::trend(higher, lower))?;
            println!("Trade direction: {}", app.active()?.state.trade_direction);
        }

        Commands::Pivot { command } => run_pivot(app, command).await?,

        Commands::Levels { direction } => {
            let wf = app.active()?;
            let direction = match direction {
                Some(d) => parse_direction(&d)?,
                None => wf
                    .state
                    .trade_direction
                    .direction()
                    .ok_or_else(|| anyhow!("Trade direction is STAND_ASIDE, pass --direction"))?,
            };

            let snapshot = app.store.load();
            let mut settings = LevelSettings::from_preferences(&snapshot.validation, &snapshot.visibility);
            settings.tolerance_pct = app.config.tolerance_pct;
            settings.extended_ratios |= app.config.extended_ratios;

            let mut service = LevelService::new(settings);
            if let Some(api) = &app.api {
                service = service.with_api(Arc::clone(api));
            }
            let pivots = app.pivots_for(&wf.state.symbol);
            let Some(set) = service.refresh(&pivots, direction).await else {
                bail!("Level refresh superseded");
            };

            for level in &set.levels {
                println!(
                    "{:>12.5}  {:<18}{}",
                    level.price,
                    level.label,
                    if level.is_confluence { "  *" } else { "" }
                );
            }
            for zone in &set.zones {
                println!(
                    "{}  {:.5} [{:.5} - {:.5}] x{} {} ({})",
                    zone.id,
                    zone.price,
                    zone.low(),
                    zone.high(),
                    zone.strength,
                    zone.direction,
                    zone.timeframes().join(", ")
                );
            }

            let points = pivots
                .get_pivots(&wf.state.lower_timeframe)
                .into_iter()
                .map(|p| p.point)
                .collect();
            app.update(WorkflowPatch {
                pivots: Some(points),
                fib_levels: Some(set.levels),
                ..WorkflowPatch::default()
            })?;
        }

        Commands::Scan { timeframe } => {
            let wf = app.active()?;
            let timeframe = timeframe.unwrap_or_else(|| wf.state.lower_timeframe.clone());
            let points: Vec<_> = app
                .pivots_for(&wf.state.symbol)
                .get_pivots(&timeframe)
                .into_iter()
                .map(|p| p.point)
                .collect();

            let bars = match &app.api {
                Some(api) => api
                    .market_data(&wf.state.symbol, &timeframe, app.config.detection.periods)
                    .await
                    .unwrap_or_else(|e| {
                        warn!("Market data unavailable, scanning without bars: {}", e);
                        Vec::new()
                    }),
                None => Vec::new(),
            };

            let scan = scan_patterns(
                app.api.as_deref(),
                &timeframe,
                &points,
                &bars,
                wf.state.trade_direction.direction(),
            )
            .await;
            for pattern in &scan.patterns {
                println!("Pattern: {} on {}", pattern.name, pattern.timeframe);
            }
            for (i, signal) in scan.signals.iter().enumerate() {
                println!(
                    "[{}] {} {} at bar {} (entry {}, stop {})",
                    i, signal.direction, signal.kind, signal.bar_index, signal.trigger_price, signal.invalidation_price
                );
            }
            app.update(scan.into_patch())?;
        }

        Commands::Entry { signal } => {
            let wf = app.active()?;
            let bar = wf
                .state
                .signals
                .get(signal)
                .cloned()
                .ok_or_else(|| anyhow!("No signal #{}, run `fib-workflow scan`", signal))?;
            app.update(WorkflowPatch {
                entry_price: Some(bar.trigger_price),
                stop_loss: Some(bar.invalidation_price),
                entry_signal: Some(Some(bar)),
                ..WorkflowPatch::default()
            })?;
            println!("Entry confirmed");
        }

        Commands::Risk {
            entry,
            stop,
            targets,
            balance,
            risk_percent,
        } => {
            app.update(WorkflowPatch {
                account_balance: balance,
                risk_percent,
                ..WorkflowPatch::risk(entry, stop, targets)
            })?;
            let state = app.active()?.state;
            println!(
                "Size {}  R:R {:.2}",
                state.position_size, state.risk_reward_ratio
            );
        }

        Commands::Checklist { item, uncheck } => {
            if let Some(item) = item {
                app.update(WorkflowPatch::check(&item, !uncheck))?;
            }
            let state = app.active()?.state;
            for c in &state.checklist {
                println!(
                    "[{}] {:<14} {}{}",
                    if c.checked { "x" } else { " " },
                    c.id,
                    c.label,
                    if c.required { " (required)" } else { "" }
                );
            }
            println!("Decision: {}", state.go_no_go);
        }

        Commands::Open => {
            app.update(WorkflowPatch {
                trade_status: Some(TradeStatus::Open),
                ..WorkflowPatch::default()
            })?;
            println!("Trade open");
        }

        Commands::Complete { id, exit } => {
            let id = app.resolve(id)?;
            if let Some(exit) = exit {
                app.workflows.update_workflow(
                    &id,
                    &WorkflowPatch {
                        exit_price: Some(Some(exit)),
                        ..WorkflowPatch::default()
                    },
                );
            }
            if !app.workflows.complete_workflow(&id) {
                bail!("Workflow {} not found", id);
            }
            if let Some(pnl) = app.workflows.get_workflow(&id).and_then(|w| w.state.pnl) {
                println!("P&L {:.2}", pnl);
            }
            info!("Completed workflow {}", id);
        }

        Commands::Cancel { id } => {
            let id = app.resolve(id)?;
            if !app.workflows.cancel_workflow(&id) {
                bail!("Workflow {} not found", id);
            }
            info!("Cancelled workflow {}", id);
        }

        Commands::Duplicate { id } => {
            let copy = app
                .workflows
                .duplicate_workflow(&id)
                .ok_or_else(|| anyhow!("Workflow {} not found", id))?;
            println!("{}  {}", copy.id, copy.name);
        }

        Commands::Delete { id } => {
            if !app.workflows.delete_workflow(&id) {
                bail!("Workflow {} not found", id);
            }
            info!("Deleted workflow {}", id);
        }

        Commands::Export { path } => {
            archive::export_snapshot(&*app.store, &path)?;
            println!("Exported to {}", path.display());
        }

        Commands::Import { path } => {
            if !archive::import_snapshot(&*app.store, &path)? {
                bail!("Imported snapshot could not be persisted");
            }
            println!("Imported {}", path.display());
        }

        Commands::Clear => {
            app.workflows.clear_all();
            println!("All workflows removed");
        }
    }

    Ok(())
}

async fn run_pivot(app: &App, command: PivotCommand) -> Result<()> {
    let symbol = app.active()?.state.symbol;
    if symbol.is_empty() {
        bail!("Active workflow has no symbol");
    }
    let pivots = app.pivots_for(&symbol);

    match command {
        PivotCommand::Add {
            timeframe,
            index,
            price,
            kind,
        } => {
            let pivot_type = match kind.to_ascii_lowercase().as_str() {
                "high" | "h" => PivotType::High,
                "low" | "l" => PivotType::Low,
                other => bail!("Pivot kind must be high or low, got '{}'", other),
            };
            let pivot = pivots.add_pivot(
                &timeframe,
                NewPivot {
                    index,
                    price,
                    pivot_type,
                },
            );
            println!("{}", pivot.id);
        }
        PivotCommand::List { timeframe } => {
            for p in pivots.get_pivots_with_labels(&timeframe) {
                let label = p.abc_label.map(|l| l.to_string()).unwrap_or_default();
                println!(
                    "{:<32} {:>5} {:>12.5} {:<4} {}",
                    p.id, p.point.index, p.point.price, p.point.pivot_type, label
                );
            }
            if pivots.is_locked(&timeframe) {
                println!("(locked)");
            }
        }
        PivotCommand::Remove { timeframe, id } => {
            if !pivots.remove_pivot(&timeframe, &id) {
                bail!("Pivot {} not found on {}", id, timeframe);
            }
        }
        PivotCommand::Lock { timeframe } => pivots.lock_pivots(&timeframe, true),
        PivotCommand::Unlock { timeframe } => pivots.lock_pivots(&timeframe, false),
        PivotCommand::Detect { timeframe } => {
            if app.api.is_none() {
                bail!("Pivot detection needs the analysis backend");
            }
            if pivots.detect_pivots(&timeframe).await {
                println!("{} pivots on {}", pivots.get_pivots(&timeframe).len(), timeframe);
            } else {
                println!("No pivots applied (locked, empty or failed)");
            }
        }
    }
    Ok(())
}

fn parse_direction(s: &str) -> Result<Direction> {
    match s.to_ascii_lowercase().as_str() {
        "long" | "buy" => Ok(Direction::Long),
        "short" | "sell" => Ok(Direction::Short),
        other => Err(anyhow!("Direction must be long or short, got '{}'", other)),
    }
}

fn print_workflow(app: &App, wf: &StoredWorkflow) {
    let state = &wf.state;
    println!("{}  {}", wf.id, wf.name);
    println!(
        "Status {}  {}  progress {}%",
        wf.status,
        state.step(),
        wf.progress()
    );
    println!(
        "Market {} ({} / {})  trend {:?}/{:?} -> {}",
        if state.symbol.is_empty() { "-" } else { &state.symbol },
        state.higher_timeframe,
        state.lower_timeframe,
        state.higher_trend,
        state.lower_trend,
        state.trade_direction
    );
    if state.position_size > 0.0 {
        println!(
            "Entry {} stop {} targets {:?}  size {}  R:R {:.2}",
            state.entry_price, state.stop_loss, state.targets, state.position_size, state.risk_reward_ratio
        );
    }
    println!("Checklist {}  trade {:?}", state.go_no_go, state.trade_status);
    for entry in &state.trade_log {
        println!("  {}  {}", entry.timestamp, entry.message);
    }

    if let Some(validation) = app.workflows.get_validation(&wf.id) {
        for e in &validation.errors {
            println!("error: {}", e);
        }
        for w in &validation.warnings {
            println!("warning: {}", w);
        }
    }
}

//! Candlekeep CLI: inspect the store, pull updates and review corporate actions.
//!
//! Commands:
//! - `stats`, `info`, `read`, `missing`: inspect stored datasets
//! - `update`: incremental update from a CSV directory
//! - `delete`: remove one dataset or every interval of a symbol
//! - `detect`: scan stored rows for suspected splits and bonuses
//! - `actions list|verify|reject`: work the corporate action ledger
//! - `adjust`, `check`: apply verified actions, report what is missing
//! - `backup`, `vacuum`: maintenance
//!
//! Results go to stdout as JSON; logs go to stderr (`RUST_LOG`).

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use candlekeep_core::actions::{ActionFilter, ActionLedger, Detector};
use candlekeep_core::adjust::DataAdjuster;
use candlekeep_core::domain::{
    normalize_symbol, ActionStatus, ActionType, DatasetKey, Exchange, Interval, MarketClock,
    Ratio,
};
use candlekeep_core::sync::{CsvSource, IncrementalUpdater};
use candlekeep_core::{Store, StoreConfig};

#[derive(Parser)]
#[command(
    name = "candlekeep",
    about = "Candlekeep: append-only OHLCV store with corporate action handling"
)]
struct Cli {
    /// TOML config file. Defaults apply to anything it leaves out.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Store root; overrides `storage.root` from the config.
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
struct DatasetArgs {
    /// Exchange (NSE, BSE, NFO, BFO, MCX, CDS).
    exchange: Exchange,

    symbol: String,

    /// Interval (minute, 3minute, ..., 60minute, day).
    interval: Interval,
}

impl DatasetArgs {
    fn key(&self) -> DatasetKey {
        DatasetKey::new(self.exchange, &self.symbol, self.interval)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Per-exchange dataset, row and size totals.
    Stats,
    /// Metadata of one dataset.
    Info {
        #[command(flatten)]
        dataset: DatasetArgs,
    },
    /// Rows of one dataset, optionally within a range.
    Read {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// Start (YYYY-MM-DD trading date or UTC seconds).
        #[arg(long)]
        from: Option<String>,

        /// End, inclusive (YYYY-MM-DD trading date or UTC seconds).
        #[arg(long)]
        to: Option<String>,

        /// Only print the last N rows.
        #[arg(long)]
        tail: Option<usize>,
    },
    /// Ranges an update would fetch.
    Missing {
        #[command(flatten)]
        dataset: DatasetArgs,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,
    },
    /// Fetch missing rows from `<csv-dir>/<EXCHANGE>/<SYMBOL>/<interval>.csv`.
    Update {
        #[command(flatten)]
        dataset: DatasetArgs,

        #[arg(long)]
        csv_dir: PathBuf,

        #[arg(long)]
        from: String,

        #[arg(long)]
        to: String,

        /// Sort, dedup and drop bad rows before saving.
        #[arg(long, default_value_t = false)]
        sanitize: bool,
    },
    /// Delete a dataset, or every interval of a symbol when no interval is given.
    Delete {
        exchange: Exchange,

        symbol: String,

        interval: Option<Interval>,
    },
    /// Scan stored rows for suspected corporate actions.
    Detect {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// Record the candidates in the ledger.
        #[arg(long, default_value_t = false)]
        record: bool,
    },
    /// Corporate action ledger.
    Actions {
        #[command(subcommand)]
        action: ActionsCommand,
    },
    /// Apply one action, or every verified action still missing from the data.
    Adjust {
        #[command(flatten)]
        dataset: DatasetArgs,

        /// Action date (YYYY-MM-DD). Without it, verified actions are applied.
        #[arg(long, requires_all = ["action_type", "ratio"])]
        date: Option<NaiveDate>,

        /// bonus or split.
        #[arg(long = "type")]
        action_type: Option<ActionType>,

        /// Ratio N:D, e.g. 1:1.
        #[arg(long)]
        ratio: Option<Ratio>,

        /// Compute and report without writing.
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    /// Consistency of stored data against verified actions.
    Check {
        exchange: Option<Exchange>,

        symbol: Option<String>,

        interval: Option<Interval>,
    },
    /// Snapshot datasets and the ledger into `backups/`.
    Backup,
    /// Remove orphaned row files and crash leftovers.
    Vacuum,
}

#[derive(Subcommand)]
enum ActionsCommand {
    /// List ledger records, newest first.
    List {
        #[arg(long)]
        symbol: Option<String>,

        #[arg(long)]
        exchange: Option<Exchange>,

        /// pending, verified or rejected.
        #[arg(long)]
        status: Option<ActionStatus>,

        #[arg(long)]
        from: Option<NaiveDate>,

        #[arg(long)]
        to: Option<NaiveDate>,
    },
    /// Confirm an action with its actual type and ratio.
    Verify {
        symbol: String,

        date: NaiveDate,

        #[arg(long = "type")]
        action_type: ActionType,

        #[arg(long)]
        ratio: Ratio,

        #[arg(long)]
        notes: Option<String>,
    },
    /// Mark a candidate as not a corporate action.
    Reject {
        symbol: String,

        date: NaiveDate,

        #[arg(long)]
        reason: String,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = open_store(cli.config, cli.root)?;

    match cli.command {
        Commands::Stats => print_json(&store.stats()?),
        Commands::Info { dataset } => {
            let key = dataset.key();
            match store.dataset_info(&key)? {
                Some(info) => print_json(&info),
                None => bail!("no data for {key}"),
            }
        }
        Commands::Read {
            dataset,
            from,
            to,
            tail,
        } => run_read(&store, &dataset.key(), from, to, tail),
        Commands::Missing { dataset, from, to } => {
            let clock = store.config().clock();
            let ranges = store.missing_ranges(
                &dataset.key(),
                parse_time(&from, clock, false)?,
                parse_time(&to, clock, true)?,
            )?;
            print_json(&ranges)
        }
        Commands::Update {
            dataset,
            csv_dir,
            from,
            to,
            sanitize,
        } => run_update(&store, &dataset.key(), csv_dir, &from, &to, sanitize),
        Commands::Delete {
            exchange,
            symbol,
            interval,
        } => {
            let removed = match interval {
                Some(interval) => {
                    usize::from(store.delete(&DatasetKey::new(exchange, &symbol, interval))?)
                }
                None => store.delete_symbol(exchange, &symbol)?,
            };
            print_json(&serde_json::json!({ "removed": removed }))
        }
        Commands::Detect { dataset, record } => run_detect(&store, &dataset.key(), record),
        Commands::Actions { action } => run_actions(&store, action),
        Commands::Adjust {
            dataset,
            date,
            action_type,
            ratio,
            dry_run,
        } => run_adjust(&store, &dataset.key(), date, action_type, ratio, dry_run),
        Commands::Check {
            exchange,
            symbol,
            interval,
        } => run_check(&store, exchange, symbol, interval),
        Commands::Backup => {
            let path = store.backup()?;
            print_json(&serde_json::json!({ "backup": path }))
        }
        Commands::Vacuum => print_json(&store.vacuum()?),
    }
}

fn open_store(config: Option<PathBuf>, root: Option<PathBuf>) -> Result<Store> {
    let mut config = match config {
        Some(path) => StoreConfig::from_file(&path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => StoreConfig::default(),
    };
    if let Some(root) = root {
        config.storage.root = root;
    }
    debug!(root = %config.storage.root.display(), "opening store");
    Ok(Store::open(config)?)
}

fn open_ledger(store: &Store) -> Result<ActionLedger> {
    Ok(ActionLedger::open(store.layout().ledger_path())?)
}

/// `YYYY-MM-DD` (start or end of that trading date) or raw UTC seconds.
fn parse_time(value: &str, clock: MarketClock, end_of_day: bool) -> Result<i64> {
    if let Ok(ts) = value.parse::<i64>() {
        return Ok(ts);
    }
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("'{value}' is neither a date nor a timestamp"))?;
    Ok(if end_of_day {
        clock.day_end(date)
    } else {
        clock.day_start(date)
    })
}

fn run_read(
    store: &Store,
    key: &DatasetKey,
    from: Option<String>,
    to: Option<String>,
    tail: Option<usize>,
) -> Result<()> {
    let clock = store.config().clock();
    let from = from.map(|s| parse_time(&s, clock, false)).transpose()?;
    let to = to.map(|s| parse_time(&s, clock, true)).transpose()?;

    let Some(mut rows) = store.read(key, from, to)? else {
        bail!("no data for {key}");
    };
    if let Some(n) = tail {
        rows.drain(..rows.len().saturating_sub(n));
    }
    print_json(&rows)
}

fn run_update(
    store: &Store,
    key: &DatasetKey,
    csv_dir: PathBuf,
    from: &str,
    to: &str,
    sanitize: bool,
) -> Result<()> {
    let clock = store.config().clock();
    let (from, to) = (parse_time(from, clock, false)?, parse_time(to, clock, true)?);

    let source = CsvSource::new(csv_dir);
    let mut ledger = open_ledger(store)?;
    let outcome = IncrementalUpdater::new(store, &source)
        .with_sanitize(sanitize)
        .update(key, from, to, &mut ledger)?;
    print_json(&outcome)?;

    if outcome.is_paused() {
        eprintln!("Update paused: verify or reject the pending actions, then re-run.");
        std::process::exit(2);
    }
    Ok(())
}

fn run_detect(store: &Store, key: &DatasetKey, record: bool) -> Result<()> {
    let Some(rows) = store.read(key, None, None)? else {
        bail!("no data for {key}");
    };
    let config = store.config();
    let candidates = Detector::new(&config.detection, config.clock()).detect(
        &rows,
        &key.symbol,
        key.exchange,
    );

    if record {
        let mut ledger = open_ledger(store)?;
        print_json(&ledger.record_all(&candidates)?)
    } else {
        print_json(&candidates)
    }
}

fn run_actions(store: &Store, action: ActionsCommand) -> Result<()> {
    let mut ledger = open_ledger(store)?;
    match action {
        ActionsCommand::List {
            symbol,
            exchange,
            status,
            from,
            to,
        } => {
            let filter = ActionFilter {
                symbol,
                exchange,
                status,
                from,
                to,
            };
            print_json(&ledger.query(&filter))
        }
        ActionsCommand::Verify {
            symbol,
            date,
            action_type,
            ratio,
            notes,
        } => print_json(&ledger.verify(&symbol, date, action_type, ratio, notes)?),
        ActionsCommand::Reject {
            symbol,
            date,
            reason,
        } => print_json(&ledger.reject(&symbol, date, &reason)?),
    }
}

fn run_adjust(
    store: &Store,
    key: &DatasetKey,
    date: Option<NaiveDate>,
    action_type: Option<ActionType>,
    ratio: Option<Ratio>,
    dry_run: bool,
) -> Result<()> {
    let adjuster = DataAdjuster::new(store);
    let mut ledger = open_ledger(store)?;
    match (date, action_type, ratio) {
        (Some(date), Some(action_type), Some(ratio)) => print_json(&adjuster.apply_recorded(
            key,
            &mut ledger,
            date,
            action_type,
            ratio,
            dry_run,
        )?),
        (None, None, None) => print_json(&adjuster.auto_adjust(key, &mut ledger, dry_run)?),
        _ => bail!("--date, --type and --ratio must be given together"),
    }
}

fn run_check(
    store: &Store,
    exchange: Option<Exchange>,
    symbol: Option<String>,
    interval: Option<Interval>,
) -> Result<()> {
    let keys: Vec<DatasetKey> = store
        .keys()?
        .into_iter()
        .filter(|k| exchange.map_or(true, |e| k.exchange == e))
        .filter(|k| {
            symbol
                .as_deref()
                .map_or(true, |s| k.symbol == normalize_symbol(s))
        })
        .filter(|k| interval.map_or(true, |i| k.interval == i))
        .collect();

    let ledger = open_ledger(store)?;
    let mut reports = Vec::new();
    let mut errors = Vec::new();
    for (key, result) in DataAdjuster::new(store).check_all(&keys, &ledger) {
        match result {
            Ok(report) => reports.push(report),
            Err(e) => errors.push(serde_json::json!({ "key": key, "error": e.to_string() })),
        }
    }

    let needing = reports.iter().filter(|r| r.needs_adjustment).count();
    print_json(&serde_json::json!({
        "checked": keys.len(),
        "needs_adjustment": needing,
        "reports": reports,
        "errors": errors,
    }))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

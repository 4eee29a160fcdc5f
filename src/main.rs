/*!
 * Sitesync CLI - offline inspection commands
 *
 * `check` runs the path validator, `scan` prints the records a deploy would
 * publish, and `plan` previews the mutations against a JSON snapshot of a
 * collection. None of these talk to a real content store or ledger.
 *
 * Author: Shane Wall <shaneawall@gmail.com>
 */

use clap::{Parser, Subcommand, ValueEnum};
use sitesync::{
    config::{DeployConfig, LogLevel},
    core::{
        diff, incremental, metadata::local_state, CanonicalPath, Deployer, LocatorMap,
        ScanReport, Scanner,
    },
    error::{Result, SiteError, EXIT_SUCCESS},
    logging,
};
use sitesync_interface::{
    ContentStoreClient, MemoryContentStore, MemoryLedger, RemoteResource,
};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "sitesync")]
#[command(version, about = "Incremental content-addressed site deployment", long_about = None)]
struct Cli {
    /// Configuration file (default: <dir>/sitesync.toml when present)
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, value_enum, default_value = "warn", global = true)]
    log_level: LogLevelArg,

    /// Path to log file (default: stdout)
    #[arg(long, value_name = "FILE", global = true)]
    log: Option<PathBuf>,

    /// Enable verbose logging (equivalent to --log-level=debug)
    #[arg(short = 'v', long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate path-like strings and print their canonical form
    Check {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Scan a directory and print the file records a deploy would publish
    Scan {
        dir: PathBuf,

        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Preview the publish plan for a directory against a collection snapshot
    Plan {
        dir: PathBuf,

        /// JSON array of remote resources (path, locator, hash, size)
        #[arg(long, value_name = "SNAPSHOT")]
        remote: PathBuf,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
enum LogLevelArg {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<LogLevelArg> for LogLevel {
    fn from(arg: LogLevelArg) -> Self {
        match arg {
            LogLevelArg::Error => LogLevel::Error,
            LogLevelArg::Warn => LogLevel::Warn,
            LogLevelArg::Info => LogLevel::Info,
            LogLevelArg::Debug => LogLevel::Debug,
            LogLevelArg::Trace => LogLevel::Trace,
        }
    }
}

fn main() {
    let code = match run() {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            e.exit_code()
        }
    };
    std::process::exit(code);
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    let project_root = match &cli.command {
        Commands::Scan { dir, .. } | Commands::Plan { dir, .. } => Some(dir.as_path()),
        Commands::Check { .. } => None,
    };
    let mut config = load_config(cli.config.as_deref(), project_root)?;

    config.logging.level = cli.log_level.into();
    config.logging.verbose = cli.verbose;
    if cli.log.is_some() {
        config.logging.log_file = cli.log.clone();
    }
    if let Err(e) = logging::init_logging(&config.logging) {
        eprintln!("Warning: Failed to initialize logging: {}", e);
    }

    match cli.command {
        Commands::Check { paths } => check_paths(&paths),
        Commands::Scan { dir, json } => {
            let report = block_on(Scanner::new(&config).scan(&dir))??;
            print_scan(&report, json)
        }
        Commands::Plan { dir, remote } => block_on(preview_plan(&config, &dir, &remote))?,
    }
}

fn load_config(explicit: Option<&Path>, project_root: Option<&Path>) -> Result<DeployConfig> {
    match (explicit, project_root) {
        (Some(path), _) => DeployConfig::load(path),
        (None, Some(root)) => DeployConfig::discover(root),
        (None, None) => Ok(DeployConfig::default()),
    }
}

fn block_on<F: std::future::Future>(future: F) -> Result<F::Output> {
    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| SiteError::Config(format!("Failed to start async runtime: {}", e)))?;
    Ok(runtime.block_on(future))
}

fn check_paths(paths: &[String]) -> Result<()> {
    let mut first_rejection = None;

    for raw in paths {
        match CanonicalPath::parse(raw) {
            Ok(canonical) => println!("ok        {}", canonical),
            Err(rejected) => {
                println!("rejected  {:?}: {}", raw, rejected.reason);
                first_rejection.get_or_insert(rejected);
            }
        }
    }

    match first_rejection {
        Some(rejected) => Err(SiteError::ValidationRejected(rejected)),
        None => Ok(()),
    }
}

fn print_scan(report: &ScanReport, json: bool) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(&report.records)
            .map_err(|e| SiteError::Config(format!("Failed to encode records: {}", e)))?;
        println!("{}", out);
    } else {
        for record in &report.records {
            println!(
                "{}  {:>10}  {:<24}  {}",
                record.hash, record.size, record.content_type, record.path
            );
        }
        println!(
            "{} files, {} bytes, {} rejected",
            report.records.len(),
            report.total_bytes(),
            report.rejected.len()
        );
    }

    for rejected in &report.rejected {
        eprintln!(
            "skipped {}: {}",
            rejected.path.display(),
            rejected.rejected.reason
        );
    }
    Ok(())
}

async fn preview_plan(config: &DeployConfig, dir: &Path, snapshot: &Path) -> Result<()> {
    let contents = std::fs::read_to_string(snapshot).map_err(|e| {
        SiteError::Config(format!("Failed to read {}: {}", snapshot.display(), e))
    })?;
    let resources: Vec<RemoteResource> = serde_json::from_str(&contents).map_err(|e| {
        SiteError::Config(format!("Failed to parse {}: {}", snapshot.display(), e))
    })?;

    let ledger = MemoryLedger::new();
    let (collection, _) = ledger.seed_collection("snapshot", resources);
    let store = MemoryContentStore::new();
    let deployer = Deployer::new(store.clone(), ledger, config.clone());

    let scan = Scanner::new(config).scan(dir).await?;
    let remote = deployer.fetch_remote(&collection).await?;
    let local = local_state(scan.records);
    let changes = diff(&local, &remote);

    // Preview locators come from the in-memory store
    let mut locators = LocatorMap::new();
    for path in changes.changed_paths() {
        if let Some(record) = local.get(&path) {
            let bytes = tokio::fs::read(&record.source)
                .await
                .map_err(|e| SiteError::ScanIo {
                    path: record.source.clone(),
                    source: e,
                })?;
            let locator = store.put(bytes).await.map_err(|e| SiteError::Upload {
                path: path.to_string(),
                reason: e.to_string(),
                orphans: Vec::new(),
            })?;
            locators.insert(path, locator);
        }
    }

    let plan = incremental(&changes, &local, &locators);
    let transactions = plan.transactions(config.max_mutations_per_transaction);

    for op in &plan.ops {
        println!("{}", op);
    }
    for skip in &plan.skipped {
        eprintln!("warning: {}", skip);
    }
    println!(
        "{}; {} mutations in {} transactions",
        changes.summary(),
        plan.len(),
        transactions.len()
    );
    Ok(())
}

// STS Reconciliation - batch runner
//
//   sts-reconcile run --register sts.csv --vehicles fvc.csv --vehicle-isins fvc_isin.csv
//   sts-reconcile count --column originator_country --from 2019-01-01
//   sts-reconcile check-isin XS2104129486

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use sts_reconcile::http::CancelToken;
use sts_reconcile::{
    count_by, db, export, isin, view, AuditLog, Column, Corrections, Reconciler, RecordStore,
    Settings, VehicleRegister,
};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "sts-reconcile", version)]
#[command(about = "Reconcile the STS securitisation register against vehicle, reference-data and LEI registers")]
struct Cli {
    /// SQLite database for reconciled records and the audit trail
    #[arg(long, global = true, env = "STS_DB", default_value = "sts.db")]
    db: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the full reconciliation
    Run(RunArgs),

    /// Count stored records per value of a column (Combo cells flattened)
    Count {
        /// Column header or snake_case name, e.g. originator_country
        #[arg(long, short = 'c')]
        column: String,

        /// First notification date to include
        #[arg(long)]
        from: Option<NaiveDate>,

        /// Last notification date to include
        #[arg(long)]
        to: Option<NaiveDate>,
    },

    /// Validate ISINs
    CheckIsin { isins: Vec<String> },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Primary register (CSV)
    #[arg(long, env = "STS_REGISTER")]
    register: PathBuf,

    /// Vehicle register attributes (CSV)
    #[arg(long, env = "STS_VEHICLES")]
    vehicles: PathBuf,

    /// Vehicle register ISIN → vehicle ID mapping (CSV)
    #[arg(long, env = "STS_VEHICLE_ISINS")]
    vehicle_isins: PathBuf,

    /// Settings file (JSON); CLI flags override it
    #[arg(long, env = "STS_SETTINGS")]
    settings: Option<PathBuf>,

    /// Correction/override tables (JSON) replacing the built-in ones
    #[arg(long, env = "STS_CORRECTIONS")]
    corrections: Option<PathBuf>,

    /// First publication date of reference-data documents to search
    #[arg(long)]
    reference_from: Option<NaiveDate>,

    /// Last publication date of reference-data documents to search
    #[arg(long)]
    reference_to: Option<NaiveDate>,

    /// Archive cache directory
    #[arg(long, env = "STS_DATA_DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, env = "COMPANIES_HOUSE_KEY", hide_env_values = true)]
    companies_house_key: Option<String>,

    /// Write reconciled records to this CSV
    #[arg(long, short = 'o')]
    out: Option<PathBuf>,

    /// Write the audit trail to this JSON file
    #[arg(long)]
    audit_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Run(args) => run(&cli.db, args).await,
        Command::Count { column, from, to } => count(&cli.db, &column, from, to),
        Command::CheckIsin { isins } => {
            check_isins(&isins);
            Ok(())
        }
    }
}

fn settings_for(args: &RunArgs) -> Result<Settings> {
    let mut settings = match &args.settings {
        Some(path) => Settings::from_file(path)?,
        None => Settings::default(),
    };

    if args.reference_from.is_some() {
        settings.reference_from = args.reference_from;
    }
    if args.reference_to.is_some() {
        settings.reference_to = args.reference_to;
    }
    if let Some(dir) = &args.data_dir {
        settings.data_dir = dir.clone();
    }
    if args.companies_house_key.is_some() {
        settings.companies_house_key = args.companies_house_key.clone();
    }
    if args.corrections.is_some() {
        settings.corrections_path = args.corrections.clone();
    }

    settings.validate()?;
    Ok(settings)
}

async fn run(db_path: &Path, args: RunArgs) -> Result<()> {
    println!("🔁 STS Reconciliation v{}", sts_reconcile::VERSION);
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let settings = settings_for(&args)?;
    let corrections = match &settings.corrections_path {
        Some(path) => Corrections::from_file(path)?,
        None => Corrections::builtin(),
    };
    std::fs::create_dir_all(&settings.data_dir)
        .with_context(|| format!("Failed to create data directory: {}", settings.data_dir.display()))?;

    // 1. Load registers
    println!("\n📂 Loading registers...");
    let mut audit = AuditLog::new();
    let store = RecordStore::load_csv(&args.register, &corrections, &mut audit)?;
    let vehicles = VehicleRegister::load_csv(&args.vehicles, &args.vehicle_isins, &corrections)?;
    println!("✓ {} records, {} vehicles", store.len(), vehicles.len());

    // 2. Reconcile
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling run");
            on_interrupt.cancel();
        }
    });

    println!("\n🔍 Reconciling...");
    let reconciler = Reconciler::from_settings(settings, corrections, cancel)?;
    let output = reconciler.run(store, &vehicles, audit).await?;

    // 3. Persist
    println!("\n💾 Storing results...");
    let conn = Connection::open(db_path)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    db::setup_database(&conn)?;
    let stored = db::insert_records(&conn, &output.records, &output.audit.run_id)?;
    let events = db::insert_audit_log(&conn, &output.audit)?;
    let total = db::count_records(&conn)?;
    println!(
        "✓ {} new, {} updated records ({} stored), {} audit events",
        stored.inserted, stored.updated, total, events
    );

    if let Some(path) = &args.out {
        export::write_records(path, &output.records)?;
        println!("✓ Records written to {}", path.display());
    }
    if let Some(path) = &args.audit_out {
        export::write_audit(path, &output.audit)?;
        println!("✓ Audit trail written to {}", path.display());
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{}", serde_json::to_string_pretty(&output.summary)?);
    info!("Run {} complete", output.audit.run_id);

    Ok(())
}

fn count(db_path: &Path, column: &str, from: Option<NaiveDate>, to: Option<NaiveDate>) -> Result<()> {
    let Some(column) = Column::parse(column) else {
        let known: Vec<&str> = Column::ALL.iter().map(Column::header).collect();
        bail!("Unknown column {:?}; expected one of: {}", column, known.join(", "));
    };

    if !db_path.exists() {
        bail!("Database not found: {} (run `sts-reconcile run` first)", db_path.display());
    }
    let conn = Connection::open(db_path)?;
    let records = db::get_all_records(&conn)?;
    let slice = view::between(&records, from, to);

    println!("📊 {} ({} records)", column.header(), slice.len());
    let mut counts: Vec<(String, usize)> = count_by(&slice, column).into_iter().collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (value, n) in counts {
        println!("  {:<40} {:>6}", value, n);
    }

    Ok(())
}

fn check_isins(isins: &[String]) {
    for candidate in isins {
        let status = isin::classify(candidate);
        let mark = if status.is_valid() { "✓" } else { "✗" };
        println!("{} {} {:?}", mark, candidate, status);
    }
}

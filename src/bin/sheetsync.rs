use std::sync::Arc;

use clap::{Args, Parser, Subcommand};

use sheetsync::{
    CredentialRef, GoogleSheetsReader, SheetReader, SheetSync, SqliteSink, StopOutcome,
    SyncOutcome, SyncTrigger, SyncUnit, TargetDescriptor,
};

#[derive(Parser)]
#[command(name = "sheetsync", about = "Sync Google Sheets into a local database")]
struct Cli {
    /// State database path (default: ~/.sheetsync/sheetsync.db)
    #[arg(long)]
    db: Option<String>,

    /// Increase logging verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

/// Progress reporter that writes to stderr.
struct StderrProgress;

impl sheetsync::SyncProgress for StderrProgress {
    fn on_sync_start(&self, unit_key: &str, trigger: SyncTrigger) {
        eprintln!("[{}] Syncing {}...", trigger.as_str(), unit_key);
    }

    fn on_sync_complete(&self, _unit_key: &str, _trigger: SyncTrigger, outcome: &SyncOutcome) {
        match &outcome.error {
            None => eprintln!("  Done: {} rows", outcome.rows_synced.unwrap_or(0)),
            Some(e) => eprintln!("  Failed: {e}"),
        }
    }

    fn on_tick_skipped(&self, unit_key: &str) {
        eprintln!("  Skipped tick for {unit_key}: previous sync still running");
    }
}

#[derive(Args)]
struct SourceArgs {
    /// Spreadsheet id or Google Sheets URL
    #[arg(value_name = "SPREADSHEET_ID_OR_URL")]
    spreadsheet: String,
    /// Sheet (tab) name
    #[arg(long)]
    sheet: Option<String>,
    /// Bearer token reference: env:NAME, file:PATH, or a literal token
    #[arg(long, default_value = "env:GOOGLE_SHEETS_TOKEN")]
    credentials: String,
}

#[derive(Args)]
struct TargetArgs {
    /// Target SQLite database file (default: config key default_target_db)
    #[arg(long)]
    out: Option<String>,
    /// Target table (default: config key default_table)
    #[arg(long)]
    table: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch a sheet and print its columns and first rows
    Preview {
        #[command(flatten)]
        source: SourceArgs,
        /// Number of rows to print
        #[arg(long, default_value = "10")]
        rows: usize,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync a sheet once
    Sync {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        target: TargetArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sync a sheet now and then on an interval until interrupted
    Watch {
        #[command(flatten)]
        source: SourceArgs,
        #[command(flatten)]
        target: TargetArgs,
        /// Minutes between syncs (default: SHEETSYNC_DEFAULT_INTERVAL or 5)
        #[arg(long)]
        interval: Option<u32>,
    },
    /// Show recent sync history
    Status {
        /// Number of runs to show
        #[arg(long, default_value = "10")]
        limit: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let mut settings = sheetsync::Settings::from_env()?;
    if let Some(path) = &cli.db {
        settings.db_path = Some(path.into());
    }
    let db = sheetsync::Database::open_at(settings.resolve_db_path()?).await?;
    let app = SheetSync::new(db, settings);

    match cli.command {
        Commands::Preview { source, rows, json } => {
            handle_preview(&app, source, rows, json).await?;
        }
        Commands::Sync {
            source,
            target,
            json,
        } => {
            let unit = build_unit(&app, source, target).await?;
            let scheduler = app.scheduler(make_executor(&app)?);
            let outcome = scheduler.run_once(unit).await?;
            print_outcome(&outcome, json)?;
            if !outcome.is_completed() {
                std::process::exit(1);
            }
        }
        Commands::Watch {
            source,
            target,
            interval,
        } => {
            let unit = build_unit(&app, source, target).await?;
            let interval = interval.unwrap_or(app.settings().default_sync_interval);
            handle_watch(&app, unit, interval).await?;
        }
        Commands::Status { limit, json } => {
            print_status(&app, limit, json).await?;
        }
        Commands::Config { action } => {
            handle_config(&app, action).await?;
        }
    }

    Ok(())
}

fn make_executor(app: &SheetSync) -> anyhow::Result<sheetsync::SyncExecutor> {
    let reader = Arc::new(GoogleSheetsReader::new()?);
    Ok(app.executor(reader, Arc::new(SqliteSink::new()), Arc::new(StderrProgress)))
}

/// Assemble a unit from CLI args, filling the target from stored config.
async fn build_unit(
    app: &SheetSync,
    source: SourceArgs,
    target: TargetArgs,
) -> anyhow::Result<SyncUnit> {
    let out = match target.out {
        Some(out) => out,
        None => app.config_get("default_target_db").await?.ok_or_else(|| {
            anyhow::anyhow!("No target database. Pass --out or run 'sheetsync config set default_target_db <PATH>'.")
        })?,
    };
    let table = match target.table {
        Some(table) => table,
        None => app.config_get("default_table").await?.ok_or_else(|| {
            anyhow::anyhow!("No target table. Pass --table or run 'sheetsync config set default_table <NAME>'.")
        })?,
    };
    let credentials: CredentialRef = source.credentials.parse()?;
    Ok(app.unit(
        credentials,
        &source.spreadsheet,
        source.sheet,
        TargetDescriptor::sqlite(out, table),
    )?)
}

async fn handle_preview(
    app: &SheetSync,
    source: SourceArgs,
    rows: usize,
    json: bool,
) -> anyhow::Result<()> {
    let credentials: CredentialRef = source.credentials.parse()?;
    let spreadsheet_id = sheetsync::resolve_spreadsheet_id(&source.spreadsheet)?;
    let sheet = source
        .sheet
        .unwrap_or_else(|| app.settings().default_sheet_name.clone());
    let descriptor = sheetsync::SourceDescriptor::new(credentials, spreadsheet_id, Some(sheet));

    let reader = GoogleSheetsReader::new()?;
    let records = reader.fetch(&descriptor).await?;
    let columns = sheetsync::source::column_names(&records);

    if json {
        let preview: Vec<_> = records.iter().take(rows).collect();
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "columns": columns,
                "total_rows": records.len(),
                "rows": preview,
            }))?
        );
        return Ok(());
    }

    println!("{} / {}", descriptor.spreadsheet_id, descriptor.sheet_name);
    println!("  Columns: {}", columns.join(", "));
    println!("  Rows:    {}", records.len());
    for record in records.iter().take(rows) {
        let cells: Vec<String> = columns
            .iter()
            .map(|c| match record.get(c) {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => String::new(),
            })
            .collect();
        println!("  {}", cells.join(" | "));
    }
    Ok(())
}

async fn handle_watch(app: &SheetSync, unit: SyncUnit, interval: u32) -> anyhow::Result<()> {
    let scheduler = app.scheduler(make_executor(app)?);
    let first = scheduler.start_auto_sync(unit, interval).await?;
    print_outcome(&first, false)?;
    println!("Watching every {interval} minutes. Press Ctrl-C to stop.");

    tokio::signal::ctrl_c().await?;
    eprintln!("Stopping...");
    if scheduler.stop_auto_sync().await == StopOutcome::Stopped {
        let status = scheduler.status().status;
        if let Some(last) = status.last_outcome {
            println!("Last sync:");
            print_outcome(&last, false)?;
        }
    }
    Ok(())
}

async fn print_status(app: &SheetSync, limit: u32, json: bool) -> anyhow::Result<()> {
    let runs = app.recent_runs(limit).await?;
    let last_sync = app.last_sync_at().await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "last_sync": last_sync,
                "runs": runs,
            }))?
        );
        return Ok(());
    }

    println!("Sync Status");
    println!(
        "  Last sync: {}",
        last_sync.unwrap_or_else(|| "never".to_string())
    );
    if runs.is_empty() {
        println!("  No sync runs recorded.");
        return Ok(());
    }
    println!("  Recent runs:");
    for run in runs {
        let detail = match (&run.rows_synced, &run.error_message) {
            (_, Some(err)) => err.clone(),
            (Some(rows), None) => format!("{rows} rows"),
            (None, None) => String::new(),
        };
        println!(
            "    {} {:<9} {:<7} {} {}",
            run.started_at, run.status, run.triggered_by, run.unit_key, detail
        );
    }
    Ok(())
}

async fn handle_config(app: &SheetSync, action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => match app.config_get(&key).await? {
            Some(v) => println!("{key} = {v}"),
            None => println!("{key} is not set"),
        },
        ConfigAction::Set { key, value } => {
            app.config_set(&key, &value).await?;
            println!("Config updated.");
        }
        ConfigAction::List => {
            let items = app.config_list().await?;
            if items.is_empty() {
                println!("No configuration set.");
            } else {
                for (k, v) in items {
                    println!("{k} = {v}");
                }
            }
        }
    }
    Ok(())
}

fn print_outcome(outcome: &SyncOutcome, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(outcome)?);
        return Ok(());
    }
    println!("  Status:   {}", outcome.status.as_str());
    println!("  Finished: {}", outcome.finished_at.to_rfc3339());
    if let Some(rows) = outcome.rows_synced {
        println!("  Rows:     {rows}");
    }
    if let Some(ref e) = outcome.error {
        println!("  Error:    {e}");
    }
    Ok(())
}

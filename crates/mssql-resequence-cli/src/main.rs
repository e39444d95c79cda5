//! mssql-resequence CLI - renumber SQL Server identifier columns to 1..N.

use clap::{Parser, Subcommand};
use mssql_resequence::{
    Config, DataChangeNotifier, MssqlPool, ResequenceError, ResequenceOrchestrator,
    ResequenceReport, ResequenceRequest, ResequenceState, ResequenceStore,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn, Level};
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Parser)]
#[command(name = "mssql-resequence")]
#[command(about = "Renumber a SQL Server identifier column to 1..N and rewrite its foreign keys")]
#[command(version)]
struct Cli {
    /// Path to YAML configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Output JSON result to stdout
    #[arg(long)]
    output_json: bool,

    /// Log format: text or json
    #[arg(long, default_value = "text")]
    log_format: String,

    /// Log verbosity: debug, info, warn, error
    #[arg(long, default_value = "info")]
    verbosity: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Default)]
struct TableArgs {
    /// Parent table (`name` or `schema.name`); omit to use the configured jobs
    #[arg(long)]
    table: Option<String>,

    /// Identifier column of the parent table
    #[arg(long, requires = "table")]
    id_column: Option<String>,

    /// Dependent foreign key column as Table.Column (repeatable)
    #[arg(long = "dependent", value_name = "TABLE.COLUMN")]
    dependents: Vec<String>,

    /// Add every single-column foreign key that references the table
    #[arg(long)]
    discover: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Resequence the table (or every configured job) and commit
    Run {
        #[command(flatten)]
        target: TableArgs,

        /// Leave the identity seed where it is after reloading
        #[arg(long)]
        no_reseed: bool,
    },

    /// Build the mapping and report what would change, then roll back
    Plan {
        #[command(flatten)]
        target: TableArgs,
    },

    /// List single-column foreign keys referencing a table's identifier
    Discover {
        /// Parent table (`name` or `schema.name`)
        #[arg(long)]
        table: String,

        /// Identifier column of the parent table
        #[arg(long)]
        id_column: String,
    },

    /// Test the database connection
    HealthCheck,
}

/// One resequencing request plus whether to add discovered dependents.
struct Job {
    request: ResequenceRequest,
    discover: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e.format_detailed());
            ExitCode::from(e.exit_code())
        }
    }
}

async fn run() -> Result<(), ResequenceError> {
    let cli = Cli::parse();

    setup_logging(&cli.verbosity, &cli.log_format)
        .map_err(|e| ResequenceError::Config(e.to_string()))?;

    let config = Config::load(&cli.config)?;
    info!("Loaded configuration from {:?}", cli.config);

    match cli.command {
        Commands::Run { target, no_reseed } => {
            let reseed = config.resequence.reseed_identity && !no_reseed;
            let jobs = build_jobs(&config, &target, reseed, false)?;
            let reports = execute_jobs(&config, jobs).await?;
            print_reports(&reports, cli.output_json)?;
        }

        Commands::Plan { target } => {
            let jobs = build_jobs(&config, &target, config.resequence.reseed_identity, true)?;
            let reports = execute_jobs(&config, jobs).await?;
            print_reports(&reports, cli.output_json)?;
        }

        Commands::Discover { table, id_column } => {
            let request = ResequenceRequest::in_schema(&table, &id_column, &config.connection.schema);
            request.validate(&config.connection.target())?;

            let pool = MssqlPool::new(&config.connection).await?;
            let mut store = pool.store().await?;
            let dependents = store
                .discover_dependents(&request.table, &request.id_column)
                .await?;

            if cli.output_json {
                let names: Vec<String> = dependents.iter().map(|d| d.to_string()).collect();
                println!("{}", serde_json::to_string_pretty(&names)?);
            } else {
                println!(
                    "Dependents of {}.{} ({}):",
                    request.table,
                    request.id_column,
                    dependents.len()
                );
                for dep in &dependents {
                    println!("  {}", dep);
                }
            }
        }

        Commands::HealthCheck => {
            let target = config.connection.target();
            let result = match MssqlPool::new(&config.connection).await {
                Ok(pool) => pool.health_check().await,
                Err(e) => Err(e),
            };

            let (healthy, latency_ms, error) = match &result {
                Ok(ms) => (true, *ms, None),
                Err(e) => (false, 0, Some(e.to_string())),
            };

            if cli.output_json {
                let json = serde_json::json!({
                    "target": target,
                    "healthy": healthy,
                    "latency_ms": latency_ms,
                    "error": error,
                });
                println!("{}", serde_json::to_string_pretty(&json)?);
            } else {
                println!("Health Check Results:");
                println!(
                    "  SQL Server {}: {} ({}ms)",
                    target,
                    if healthy { "OK" } else { "FAILED" },
                    latency_ms
                );
                if let Some(ref err) = error {
                    println!("    Error: {}", err);
                }
            }

            result?;
        }
    }

    Ok(())
}

/// Requests from the command line, or from the configured jobs when no table
/// is given. Every request is validated before any connection is made.
fn build_jobs(
    config: &Config,
    args: &TableArgs,
    reseed: bool,
    dry_run: bool,
) -> Result<Vec<Job>, ResequenceError> {
    let schema = &config.connection.schema;

    let jobs: Vec<Job> = match &args.table {
        Some(table) => {
            let id_column = args.id_column.as_deref().unwrap_or_default();
            vec![Job {
                request: ResequenceRequest::in_schema(table, id_column, schema)
                    .with_dependents(&args.dependents),
                discover: args.discover,
            }]
        }
        None => config
            .resequence
            .jobs
            .iter()
            .map(|job| Job {
                request: ResequenceRequest::in_schema(&job.table, &job.id_column, schema)
                    .with_dependents(&job.dependents),
                discover: job.discover_dependents || args.discover,
            })
            .collect(),
    };

    if jobs.is_empty() {
        return Err(ResequenceError::Config(
            "no resequencing jobs configured: pass --table/--id-column or add resequence.jobs"
                .into(),
        ));
    }

    let target = config.connection.target();
    jobs.into_iter()
        .map(|mut job| {
            job.request = job
                .request
                .with_reseed_identity(reseed)
                .with_dry_run(dry_run);
            job.request.validate(&target)?;
            Ok(job)
        })
        .collect()
}

/// Run each job in its own transaction, stopping at the first failure.
async fn execute_jobs(
    config: &Config,
    jobs: Vec<Job>,
) -> Result<Vec<ResequenceReport>, ResequenceError> {
    let pool = MssqlPool::new(&config.connection).await?;

    let notifier = DataChangeNotifier::global();
    notifier.subscribe(|table| {
        info!("Data changed: {}", table);
        Ok(())
    });

    let mut reports = Vec::with_capacity(jobs.len());
    for job in jobs {
        let mut store = pool.store().await?;
        let mut request = job.request;
        if job.discover {
            let found = store
                .discover_dependents(&request.table, &request.id_column)
                .await?;
            request = request.with_dependent_refs(found);
            request.validate(&store.target())?;
        }

        let report = match ResequenceOrchestrator::new(&mut store).run(&request).await {
            Ok(report) => report,
            Err(e) => {
                if !reports.is_empty() {
                    warn!(
                        "{} earlier job(s) were committed before {} failed",
                        reports.len(),
                        request.table
                    );
                }
                return Err(e);
            }
        };

        if report.state == ResequenceState::Committed {
            notifier.notify(&report.table);
        }
        reports.push(report);
    }

    Ok(reports)
}

fn print_reports(reports: &[ResequenceReport], output_json: bool) -> Result<(), ResequenceError> {
    if output_json {
        println!("{}", serde_json::to_string_pretty(reports)?);
        return Ok(());
    }

    for report in reports {
        let status = if report.dry_run {
            "Plan (rolled back)"
        } else {
            "Resequenced"
        };
        println!("\n{} {}.{}", status, report.table, report.id_column);
        println!("  Rows: {}", report.rows);
        println!("  Identifiers moved: {}", report.ids_moved);
        match report.max_id_before {
            Some(max) => println!("  Max id: {} -> {}", max, report.rows),
            None => println!("  Max id: (empty table)"),
        }
        for dep in &report.dependents {
            println!("  {}: {} rows rewritten", dep.reference, dep.rows_rewritten);
            if dep.unmapped_rows > 0 {
                println!("    {} rows reference no parent row (left unchanged)", dep.unmapped_rows);
            }
        }
        if report.explicit_override {
            println!("  Identity insert: used{}", if report.reseeded { ", reseeded" } else { "" });
        }
        println!("  Duration: {}ms", report.duration_ms);
    }

    Ok(())
}

fn setup_logging(verbosity: &str, format: &str) -> Result<(), String> {
    let level = match verbosity.to_lowercase().as_str() {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(false)
        .with_writer(std::io::stderr);

    if format == "json" {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

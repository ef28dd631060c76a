// Tremplin CLI - SIAE referential sync against the ASP fluxIAE exports.

mod exit_codes;
mod sync;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use exit_codes::{EXIT_INVALID_SETTINGS, EXIT_RUNTIME, EXIT_SUCCESS};

#[derive(Parser)]
#[command(name = "tremplin")]
#[command(about = "Keep the SIAE referential in sync with the ASP fluxIAE exports")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the referential against an export pair (dry-run by default)
    #[command(after_help = "\
Examples:
  tremplin sync --structures fluxIAE_Structure.csv --annexes fluxIAE_AnnexeFinanciere.csv --db referential.sqlite3
  tremplin sync --structures vue_structure.csv --annexes vue_af.csv --db referential.sqlite3 --wet-run
  tremplin sync --structures vue_structure.csv --annexes vue_af.csv --db referential.sqlite3 --as-of 2022-10-10 --json")]
    Sync {
        /// Path to the Vue Structure export (pipe-delimited CSV)
        #[arg(long)]
        structures: PathBuf,

        /// Path to the Vue AF export (pipe-delimited CSV)
        #[arg(long)]
        annexes: PathBuf,

        /// Path to the referential database
        #[arg(long)]
        db: PathBuf,

        /// Actually persist the decisions (default is a dry run)
        #[arg(long)]
        wet_run: bool,

        /// Evaluation date, YYYY-MM-DD (defaults to today); every activity
        /// and grace-period comparison keys off it
        #[arg(long)]
        as_of: Option<chrono::NaiveDate>,

        /// Path to a TOML settings file overriding the sync tunables
        #[arg(long)]
        settings: Option<PathBuf>,

        /// Output the full run (report, command log, emails) as JSON to stdout
        #[arg(long)]
        json: bool,
    },

    /// Validate a settings file without running
    #[command(after_help = "\
Examples:
  tremplin validate sync-settings.toml")]
    Validate {
        /// Path to the TOML settings file
        settings: PathBuf,
    },

    /// Create an empty referential database
    Init {
        /// Path to the database to create
        #[arg(long)]
        db: PathBuf,
    },
}

pub struct CliError {
    pub code: u8,
    pub message: String,
    pub hint: Option<String>,
}

impl CliError {
    pub fn runtime(msg: impl Into<String>) -> Self {
        Self { code: EXIT_RUNTIME, message: msg.into(), hint: None }
    }
}

fn cmd_validate(settings: PathBuf) -> Result<(), CliError> {
    match tremplin_config::SyncSettings::load(&settings) {
        Ok(settings) => {
            eprintln!(
                "valid: deactivation threshold {} (guard through month {}), reactivation guard \
                 {}d, staff grace {}d, convention grace {}d",
                settings.deactivation_threshold,
                settings.deactivation_guard_month_through,
                settings.reactivation_guard_days,
                settings.staff_grace_days,
                settings.convention_grace_days,
            );
            Ok(())
        }
        Err(e) => Err(CliError {
            code: EXIT_INVALID_SETTINGS,
            message: e.to_string(),
            hint: None,
        }),
    }
}

fn cmd_init(db: PathBuf) -> Result<(), CliError> {
    tremplin_store::Store::open(&db).map_err(|e| CliError::runtime(e.to_string()))?;
    eprintln!("initialized {}", db.display());
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Sync { structures, annexes, db, wet_run, as_of, settings, json } => {
            sync::cmd_sync(structures, annexes, db, wet_run, as_of, settings, json)
        }
        Commands::Validate { settings } => cmd_validate(settings),
        Commands::Init { db } => cmd_init(db),
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_SUCCESS),
        Err(CliError { code, message, hint }) => {
            if !message.is_empty() {
                eprintln!("error: {}", message);
            }
            if let Some(hint) = hint {
                eprintln!("hint:  {}", hint);
            }
            ExitCode::from(code)
        }
    }
}

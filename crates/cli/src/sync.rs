//! `tremplin sync` — the reconciliation run.

use std::path::PathBuf;

use chrono::{NaiveDate, NaiveTime, Utc};

use tremplin_config::SyncSettings;
use tremplin_store::Store;
use tremplin_sync::{
    loader, ActivationEmail, Mailer, NoGeocoder, SyncContext, SyncError, SyncInput,
};

use crate::exit_codes::{EXIT_ASSERTION, EXIT_FATAL_ERRORS, EXIT_INVALID_SETTINGS, EXIT_PARSE};
use crate::CliError;

/// Hands activation messages to the mail relay. The relay input is one log
/// line per message here; the real template rendering and delivery live in
/// the notification service.
struct RelayMailer;

impl Mailer for RelayMailer {
    fn send_activation_emails(&mut self, emails: &[ActivationEmail]) {
        for email in emails {
            tracing::info!(
                "activation email queued for {} ({} {} siret={})",
                email.to,
                email.kind,
                email.structure_name,
                email.siret
            );
        }
    }
}

fn sync_error_code(e: &SyncError) -> u8 {
    match e {
        SyncError::Assertion(_) => EXIT_ASSERTION,
        SyncError::MissingColumn { .. } | SyncError::FieldParse { .. } | SyncError::Csv { .. } => {
            EXIT_PARSE
        }
    }
}

#[allow(clippy::too_many_arguments)]
pub fn cmd_sync(
    structures: PathBuf,
    annexes: PathBuf,
    db: PathBuf,
    wet_run: bool,
    as_of: Option<NaiveDate>,
    settings: Option<PathBuf>,
    json: bool,
) -> Result<(), CliError> {
    let settings = match settings {
        Some(path) => SyncSettings::load(&path).map_err(|e| CliError {
            code: EXIT_INVALID_SETTINGS,
            message: e.to_string(),
            hint: None,
        })?,
        None => SyncSettings::default(),
    };

    let as_of = match as_of {
        Some(date) => date.and_time(NaiveTime::MIN).and_utc(),
        None => Utc::now(),
    };
    let ctx = SyncContext::new(settings, as_of);

    let structure_data = std::fs::read_to_string(&structures)
        .map_err(|e| CliError::runtime(format!("cannot read {}: {e}", structures.display())))?;
    let annex_data = std::fs::read_to_string(&annexes)
        .map_err(|e| CliError::runtime(format!("cannot read {}: {e}", annexes.display())))?;

    let input = SyncInput {
        structure_rows: loader::load_structure_rows(&structure_data)
            .map_err(|e| CliError { code: sync_error_code(&e), message: e.to_string(), hint: None })?,
        annex_rows: loader::load_annex_rows(&annex_data)
            .map_err(|e| CliError { code: sync_error_code(&e), message: e.to_string(), hint: None })?,
    };

    let mut store = Store::open(&db).map_err(|e| CliError::runtime(e.to_string()))?;
    let mut state = store.load_state().map_err(|e| CliError::runtime(e.to_string()))?;

    let outcome = tremplin_sync::run(&mut state, &input, &ctx, &NoGeocoder)
        .map_err(|e| CliError { code: sync_error_code(&e), message: e.to_string(), hint: None })?;

    if wet_run {
        store
            .apply_all(&outcome.commands, ctx.as_of)
            .map_err(|e| CliError::runtime(e.to_string()))?;
        RelayMailer.send_activation_emails(&outcome.activation_emails);
    } else {
        eprintln!(
            "dry run: {} command(s) computed, nothing persisted (use --wet-run to apply)",
            outcome.commands.len()
        );
    }

    if json {
        let payload = serde_json::json!({
            "as_of": ctx.as_of_date().to_string(),
            "wet_run": wet_run,
            "report": outcome.report,
            "commands": outcome.commands,
            "activation_emails": outcome.activation_emails,
        });
        let rendered = serde_json::to_string_pretty(&payload)
            .map_err(|e| CliError::runtime(format!("JSON serialization error: {e}")))?;
        println!("{rendered}");
    }

    // Human summary to stderr.
    eprintln!("{}", outcome.report);

    if outcome.report.fatal_errors() > 0 {
        return Err(CliError {
            code: EXIT_FATAL_ERRORS,
            message: format!(
                "the run completed all its actions but {} fatal error(s) need manual resolution, \
                 see the report above",
                outcome.report.fatal_errors()
            ),
            hint: Some("rerun with --json to inspect the full command log".to_string()),
        });
    }
    Ok(())
}

//! Orchestrator.
//!
//! Sequences the reconcilers, runs the convergence second pass, then the
//! final consistency checks. Structure creation and source fixing in pass
//! one can unblock convention matches impossible to resolve earlier (a
//! chicken-and-egg between structures and conventions); a cheap second pass
//! converges without a general fixed-point loop.

use chrono::{DateTime, NaiveDate, Utc};

use tremplin_config::SyncSettings;

use crate::command::Command;
use crate::convention;
use crate::error::SyncError;
use crate::financial_annex;
use crate::geo::Geocoder;
use crate::notify::ActivationEmail;
use crate::report::SyncReport;
use crate::state::State;
use crate::structure;
use crate::vue_af::{active_keys, resolve_candidates, AnnexRow};
use crate::vue_structure::{StructureRow, VueStructure};

/// Run parameters: tunables plus the evaluation instant every date
/// comparison keys off.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub settings: SyncSettings,
    pub as_of: DateTime<Utc>,
}

impl SyncContext {
    pub fn new(settings: SyncSettings, as_of: DateTime<Utc>) -> Self {
        Self { settings, as_of }
    }

    pub fn as_of_date(&self) -> NaiveDate {
        self.as_of.date_naive()
    }
}

/// The parsed export pair.
#[derive(Debug, Clone, Default)]
pub struct SyncInput {
    pub structure_rows: Vec<StructureRow>,
    pub annex_rows: Vec<AnnexRow>,
}

/// Everything one run decided.
#[derive(Debug)]
pub struct SyncOutcome {
    pub report: SyncReport,
    /// Full command log, in application order. Persisting a run means
    /// replaying it against the store.
    pub commands: Vec<Command>,
    /// One activation message per created structure, for the mail
    /// collaborator.
    pub activation_emails: Vec<ActivationEmail>,
}

fn apply_all(
    state: &mut State,
    log: &mut Vec<Command>,
    commands: Vec<Command>,
    ctx: &SyncContext,
) -> Result<(), SyncError> {
    for command in commands {
        state.apply(&command, ctx.as_of)?;
        log.push(command);
    }
    Ok(())
}

/// Run the full reconciliation against an in-memory snapshot.
///
/// The snapshot is mutated to the end state; the returned command log is
/// what a wet run replays against the store. Re-running on the resulting
/// state with the same input plans nothing.
pub fn run(
    state: &mut State,
    input: &SyncInput,
    ctx: &SyncContext,
    geocoder: &dyn Geocoder,
) -> Result<SyncOutcome, SyncError> {
    let vue = VueStructure::from_rows(input.structure_rows.clone());
    let candidates = resolve_candidates(&input.annex_rows, ctx.as_of_date());
    let keys = active_keys(&candidates, ctx.as_of_date());

    tracing::info!(
        "sync run as_of={} with {} structure rows, {} annex rows, {} candidate keys ({} active)",
        ctx.as_of_date(),
        vue.len(),
        input.annex_rows.len(),
        candidates.len(),
        keys.len()
    );

    let mut report = SyncReport::default();
    let mut log = Vec::new();
    let mut activation_emails = Vec::new();

    let commands = structure::plan_orphan_user_created(state, &mut report);
    apply_all(state, &mut log, commands, ctx)?;

    let commands = structure::plan_staff_created(state, ctx, &mut report);
    apply_all(state, &mut log, commands, ctx)?;

    let commands = structure::plan_siret_and_auth_email_updates(state, &vue, &mut report)?;
    apply_all(state, &mut log, commands, ctx)?;

    let commands = convention::plan_updates(state, &vue, &candidates, ctx, &mut report)?;
    apply_all(state, &mut log, commands, ctx)?;

    let (commands, emails) =
        structure::plan_creations(state, &vue, &keys, &mut report, geocoder)?;
    activation_emails.extend(emails);
    apply_all(state, &mut log, commands, ctx)?;

    let commands = convention::plan_creations(state, &vue, &candidates, ctx, &mut report)?;
    apply_all(state, &mut log, commands, ctx)?;

    let commands = convention::plan_deletions(state, &mut report);
    apply_all(state, &mut log, commands, ctx)?;

    let commands = financial_annex::plan(state, &input.annex_rows, ctx, &mut report)?;
    apply_all(state, &mut log, commands, ctx)?;

    let commands = structure::plan_grace_period_cleanup(state, ctx, &mut report);
    apply_all(state, &mut log, commands, ctx)?;

    // Run some updates a second time.
    let commands = structure::plan_siret_and_auth_email_updates(state, &vue, &mut report)?;
    apply_all(state, &mut log, commands, ctx)?;

    let commands = convention::plan_updates(state, &vue, &candidates, ctx, &mut report)?;
    apply_all(state, &mut log, commands, ctx)?;

    let commands = convention::plan_deletions(state, &mut report);
    apply_all(state, &mut log, commands, ctx)?;

    // Final checks.
    convention::check_consistency(state, &mut report)?;
    structure::check_signup_possible(state, &mut report);

    tracing::info!(
        "sync run done: {} commands, {} fatal errors",
        log.len(),
        report.fatal_errors()
    );

    Ok(SyncOutcome { report, commands: log, activation_emails })
}

//! Convention reconciler.
//!
//! Diffs the stored conventions against the Vue AF candidates: updates the
//! drifting identifiers, flips activity with a manual-override guard and a
//! start-of-year safety threshold, creates conventions for ASP structures
//! that lack one, and deletes conventions nothing references anymore.

use std::collections::HashMap;

use chrono::{Datelike, Duration, NaiveTime};

use tremplin_model::{ConventionId, StructureSource};

use crate::command::{Command, NewConvention};
use crate::engine::SyncContext;
use crate::error::{ensure, SyncError};
use crate::report::SyncReport;
use crate::state::State;
use crate::vue_af::{CandidateKey, ConventionCandidate};
use crate::vue_structure::VueStructure;

/// Update existing conventions, mainly the is_active field, and check data
/// integrity on the fly.
pub fn plan_updates(
    state: &State,
    vue: &VueStructure,
    candidates: &HashMap<CandidateKey, ConventionCandidate>,
    ctx: &SyncContext,
    report: &mut SyncReport,
) -> Result<Vec<Command>, SyncError> {
    let mut commands = Vec::new();
    let mut to_deactivate: Vec<ConventionId> = Vec::new();
    let guard_start = ctx.as_of - Duration::days(ctx.settings.reactivation_guard_days);

    for structure in state
        .structures()
        .filter(|s| s.source == StructureSource::Asp && s.convention_id.is_some())
    {
        let convention = state
            .convention_of(structure)
            .ok_or_else(|| {
                SyncError::assertion(format!(
                    "structure id={} references a missing convention",
                    structure.id
                ))
            })?;
        ensure!(
            convention.kind == structure.kind,
            "convention id={} kind={} does not match structure id={} kind={}",
            convention.id,
            convention.kind,
            structure.id,
            structure.kind
        );
        ensure!(
            convention.siren_signature() == structure.siren(),
            "convention id={} siren_signature={} does not match structure id={} siren={}",
            convention.id,
            convention.siren_signature(),
            structure.id,
            structure.siren()
        );

        let Some(asp_id) = vue.asp_id_for_siret(&structure.siret) else {
            // At some point old structures stop existing in the latest
            // export. When they still hold data they could not be deleted
            // earlier and will stay around forever; leave them untouched.
            if convention.is_active && !to_deactivate.contains(&convention.id) {
                to_deactivate.push(convention.id);
            }
            continue;
        };
        let siret_signature = vue
            .siret_signature_for_asp_id(asp_id)
            .ok_or_else(|| SyncError::assertion(format!("asp_id={asp_id} lost its export row")))?;

        // Sometimes the same siret moves from one asp_id to another between
        // two exports. The asp_id is supposed to be immutable, but one can
        // only hope. Update it and defer the remaining checks to the next
        // pass.
        if convention.asp_id != asp_id {
            ensure!(
                state.convention_by_key(asp_id, structure.kind).is_none(),
                "convention id={} cannot take asp_id={} kind={}: key already in use",
                convention.id,
                asp_id,
                structure.kind
            );
            tracing::info!(
                "convention id={} has changed asp_id from {} to {} (will be updated)",
                convention.id,
                convention.asp_id,
                asp_id
            );
            commands.push(Command::UpdateConventionAspId {
                convention_id: convention.id,
                new_asp_id: asp_id,
            });
            report.conventions_updated += 1;
            continue;
        }

        // Siret_signature can change from one export to the next.
        if convention.siret_signature != siret_signature {
            tracing::info!(
                "convention id={} has changed siret_signature from {} to {} (will be updated)",
                convention.id,
                convention.siret_signature,
                siret_signature
            );
            commands.push(Command::UpdateConventionSiretSignature {
                convention_id: convention.id,
                new_siret_signature: siret_signature.to_string(),
            });
            report.conventions_updated += 1;
        }

        let should_be_active = candidates
            .get(&(asp_id, structure.kind))
            .is_some_and(|c| c.is_active(ctx.as_of_date()));

        if convention.is_active != should_be_active {
            if should_be_active {
                commands.push(Command::ReactivateConvention { convention_id: convention.id });
                report.conventions_reactivated += 1;
            } else if convention.reactivated_at.is_some_and(|at| at >= guard_start) {
                // Reactivated recently by support; do not flip it right back
                // however the latest export looks.
            } else if !to_deactivate.contains(&convention.id) {
                to_deactivate.push(convention.id);
            }
        }
    }

    // Early each year most annexes for the new year are missing from ASP
    // data. Rather than deactivating everyone, wait for the data to catch
    // up: above the threshold, inside the guard window, the whole wave is a
    // no-op.
    let in_guard_window = ctx.as_of.month() <= ctx.settings.deactivation_guard_month_through;
    if to_deactivate.len() >= ctx.settings.deactivation_threshold && in_guard_window {
        tracing::error!(
            "too many conventions would be deactivated ({} is at or above threshold {}) thus none will be",
            to_deactivate.len(),
            ctx.settings.deactivation_threshold
        );
        report.deactivation_batch_aborted = true;
    } else if !to_deactivate.is_empty() {
        report.conventions_deactivated += to_deactivate.len();
        commands.push(Command::DeactivateConventions {
            convention_ids: to_deactivate,
            deactivated_at: ctx.as_of,
        });
    }

    Ok(commands)
}

/// Conventions which should be created, one per ASP structure without one.
pub fn plan_creations(
    state: &State,
    vue: &VueStructure,
    candidates: &HashMap<CandidateKey, ConventionCandidate>,
    ctx: &SyncContext,
    report: &mut SyncReport,
) -> Result<Vec<Command>, SyncError> {
    let mut commands = Vec::new();

    for structure in state.structures().filter(|s| {
        s.source == StructureSource::Asp && s.convention_id.is_none() && s.should_have_convention()
    }) {
        let Some(asp_id) = vue.asp_id_for_siret(&structure.siret) else {
            // Some inactive structures are absent from the latest export but
            // still in the referential because they have members or
            // applications. No convention can be built for those.
            continue;
        };
        let siret_signature = vue
            .siret_signature_for_asp_id(asp_id)
            .ok_or_else(|| SyncError::assertion(format!("asp_id={asp_id} lost its export row")))?;

        let candidate = candidates.get(&(asp_id, structure.kind));
        let is_active = candidate.is_some_and(|c| c.is_active(ctx.as_of_date()));

        let deactivated_at = if is_active {
            None
        } else {
            // The grace period of an inactive newcomer starts at its last
            // known annex end date.
            let candidate = candidate.ok_or_else(|| {
                SyncError::assertion(format!(
                    "structure id={} (asp_id={asp_id} kind={}) is inactive but has no candidate end date",
                    structure.id, structure.kind
                ))
            })?;
            Some(candidate.end_at.and_time(NaiveTime::MIN).and_utc())
        };

        ensure!(
            state.convention_by_key(asp_id, structure.kind).is_none(),
            "convention asp_id={asp_id} kind={} already exists",
            structure.kind
        );

        commands.push(Command::CreateConvention(NewConvention {
            asp_id,
            kind: structure.kind,
            siret_signature: siret_signature.to_string(),
            is_active,
            deactivated_at,
            structure_id: structure.id,
        }));
        report.conventions_created += 1;
    }

    Ok(commands)
}

/// Conventions nothing references anymore. Deleting one cascades its
/// financial annexes.
pub fn plan_deletions(state: &State, report: &mut SyncReport) -> Vec<Command> {
    let mut commands = Vec::new();
    for convention in state.conventions() {
        if state.structures_of_convention(convention.id).is_empty() {
            commands.push(Command::DeleteConvention { convention_id: convention.id });
            report.conventions_deleted += 1;
        }
    }
    commands
}

/// Global consistency of conventions, versus ASP structures but also versus
/// user-created antennas.
pub fn check_consistency(state: &State, report: &mut SyncReport) -> Result<(), SyncError> {
    for convention in state.conventions() {
        let linked = state.structures_of_convention(convention.id);
        let asp_count = linked
            .iter()
            .filter(|s| s.source == StructureSource::Asp)
            .count();
        if convention.is_active {
            ensure!(
                asp_count == 1,
                "active convention id={} has {} ASP structures instead of 1",
                convention.id,
                asp_count
            );
        } else {
            // Unfortunately some inactive conventions have lost their ASP
            // structure.
            ensure!(
                asp_count <= 1,
                "convention id={} has {} ASP structures",
                convention.id,
                asp_count
            );
            ensure!(
                convention.deactivated_at.is_some(),
                "inactive convention id={} has no grace period start date",
                convention.id
            );
        }
        for structure in linked {
            ensure!(
                structure.siren() == convention.siren_signature(),
                "structure id={} siren={} does not match convention id={} siren_signature={}",
                structure.id,
                structure.siren(),
                convention.id,
                convention.siren_signature()
            );
            ensure!(
                structure.kind == convention.kind,
                "structure id={} kind={} does not match convention id={} kind={}",
                structure.id,
                structure.kind,
                convention.id,
                convention.kind
            );
        }
    }

    let asp_without_convention = state
        .structures()
        .filter(|s| {
            s.source == StructureSource::Asp
                && s.should_have_convention()
                && s.convention_id.is_none()
        })
        .count();
    ensure!(
        asp_without_convention == 0,
        "{asp_without_convention} ASP structures have no convention"
    );

    report.user_created_without_convention = state
        .structures()
        .filter(|s| {
            s.source == StructureSource::UserCreated
                && s.should_have_convention()
                && s.convention_id.is_none()
        })
        .count();

    Ok(())
}

//! Financial annex reconciler.
//!
//! Annexes are fully owned by the sync: they are created, updated, relinked
//! and deleted here and nowhere else.

use crate::command::{Command, NewAnnex};
use crate::engine::SyncContext;
use crate::error::SyncError;
use crate::report::SyncReport;
use crate::state::State;
use crate::vue_af::{dedupe_by_number, AnnexRow};

/// Diff existing annexes against the deduplicated candidate rows.
pub fn plan(
    state: &State,
    rows: &[AnnexRow],
    ctx: &SyncContext,
    report: &mut SyncReport,
) -> Result<Vec<Command>, SyncError> {
    let by_number = dedupe_by_number(rows, ctx.as_of_date());
    let mut commands = Vec::new();

    for annex in state.annexes() {
        let Some(row) = by_number.get(annex.number.as_str()) else {
            commands.push(Command::DeleteAnnex { annex_id: annex.id });
            report.annexes_deleted += 1;
            continue;
        };

        let state_change = (row.state != annex.state).then_some(row.state);
        let start_change = (row.start_at != annex.start_at).then_some(row.start_at);
        let end_change = (row.end_at != annex.end_at).then_some(row.end_at);
        if state_change.is_some() || start_change.is_some() || end_change.is_some() {
            commands.push(Command::UpdateAnnex {
                annex_id: annex.id,
                state: state_change,
                start_at: start_change,
                end_at: end_change,
            });
            report.annexes_updated += 1;
        }

        let owner = state.convention(annex.convention_id).ok_or_else(|| {
            SyncError::assertion(format!(
                "financial annex id={} references missing convention id={}",
                annex.id, annex.convention_id
            ))
        })?;
        if owner.asp_id != row.asp_id {
            // The annex moved to another structure in ASP data, typically
            // after a merge. Follow it when the target convention exists; an
            // annex cannot exist without a valid convention.
            match state.convention_by_key(row.asp_id, row.kind) {
                Some(target) => {
                    tracing::info!(
                        "financial annex id={} number={} moves from convention id={} to id={}",
                        annex.id,
                        annex.number,
                        owner.id,
                        target.id
                    );
                    commands.push(Command::RelinkAnnex {
                        annex_id: annex.id,
                        convention_id: target.id,
                    });
                    report.annexes_relinked += 1;
                }
                None => {
                    commands.push(Command::DeleteAnnex { annex_id: annex.id });
                    report.annexes_deleted += 1;
                }
            }
        }
    }

    // Candidates without an existing annex. Creation requires a pre-existing
    // convention; an orphan annex has no business value and is dropped.
    let mut numbers: Vec<&str> = by_number.keys().copied().collect();
    numbers.sort_unstable();
    for number in numbers {
        let row = by_number[number];
        if state.annex_by_number(number).is_some() {
            continue;
        }
        match state.convention_by_key(row.asp_id, row.kind) {
            Some(convention) => {
                commands.push(Command::CreateAnnex(NewAnnex {
                    number: row.number.clone(),
                    state: row.state,
                    start_at: row.start_at,
                    end_at: row.end_at,
                    convention_id: convention.id,
                }));
                report.annexes_created += 1;
            }
            None => {
                report.annex_orphans_dropped += 1;
            }
        }
    }

    Ok(commands)
}

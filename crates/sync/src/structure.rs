//! Structure lifecycle manager.
//!
//! Creates structures for active candidate keys, converts wrong-source
//! records once the export confirms them, keeps siret/auth_email in step
//! with the export, and deletes what the deletion preconditions allow.

use std::collections::HashSet;

use chrono::Duration;

use tremplin_model::{department_from_postcode, siren_of, StructureKind, StructureSource};

use crate::command::{Command, NewStructure};
use crate::engine::SyncContext;
use crate::error::{ensure, SyncError};
use crate::geo::Geocoder;
use crate::notify::ActivationEmail;
use crate::report::SyncReport;
use crate::state::{could_structure_be_deleted, State};
use crate::vue_af::CandidateKey;
use crate::vue_structure::{StructureRow, VueStructure};

/// Build a structure from an export row.
///
/// The authentication email is never published as the public contact email.
/// Geocoding makes the structure visible in search results; a resolver miss
/// keeps the export address without coordinates.
pub fn build_structure(
    row: &StructureRow,
    kind: StructureKind,
    geocoder: &dyn Geocoder,
) -> Result<NewStructure, SyncError> {
    ensure!(
        !row.name.is_empty() && !row.name.chars().all(|c| c.is_ascii_digit()),
        "structure row siret={} has a numeric or empty name '{}'",
        row.siret,
        row.name
    );

    let phone = if row.phone.len() == 10 { row.phone.clone() } else { String::new() };

    let street_num = format!("{} {}", row.street_num, row.street_num_extra);
    let street_name = format!("{} {}", row.street_type, row.street_name);
    let mut address_line_1 = crate::loader::clean_string(&format!("{street_num} {street_name}"));
    let mut address_line_2 =
        crate::loader::clean_string(&format!("{} {} {}", row.extra1, row.extra2, row.extra3));
    // Avoid the confusing case where line 1 is empty and line 2 is not.
    if address_line_1.is_empty() {
        std::mem::swap(&mut address_line_1, &mut address_line_2);
    }

    let mut city = row.city.clone();
    let mut coords = None;
    if let Some(geocoded) = geocoder.geocode(&address_line_1, &row.post_code) {
        if let Some(resolved_line) = geocoded.address_line_1 {
            address_line_1 = resolved_line;
        }
        if let Some(resolved_city) = geocoded.city {
            city = resolved_city;
        }
        coords = Some(geocoded.coords);
    }

    Ok(NewStructure {
        siret: row.siret.clone(),
        kind,
        source: StructureSource::Asp,
        name: row.name.clone(),
        auth_email: row.auth_email.clone(),
        phone,
        address_line_1,
        address_line_2,
        department: department_from_postcode(&row.post_code),
        post_code: row.post_code.clone(),
        city,
        coords,
    })
}

/// Structures created by a user usually have at least one member, their
/// creator. Staff sometimes deletes users and leaves memberless antennas
/// behind; those cannot be joined in any way and are useless.
pub fn plan_orphan_user_created(state: &State, report: &mut SyncReport) -> Vec<Command> {
    let mut commands = Vec::new();
    for structure in state
        .structures()
        .filter(|s| s.source == StructureSource::UserCreated && !state.has_members(s.id))
    {
        if could_structure_be_deleted(state, structure) {
            tracing::info!(
                "structure id={} is user created and has no member thus will be deleted",
                structure.id
            );
            commands.push(Command::DeleteStructure { structure_id: structure.id });
            report.structures_deleted += 1;
        } else {
            report.fatal_error(format!(
                "structure id={} is user created and has no member but has data thus cannot be deleted",
                structure.id
            ));
        }
    }
    commands
}

/// Staff regularly creates structures manually when ASP data lags behind.
/// Normally the SIRET later appears in the export and the record is
/// converted to ASP source; when it never does, the record is given a grace
/// window before being considered invalid.
pub fn plan_staff_created(
    state: &State,
    ctx: &SyncContext,
    report: &mut SyncReport,
) -> Vec<Command> {
    let mut commands = Vec::new();

    // A staff-created structure that got manually attached to a convention
    // becomes a regular user-created antenna so the usual convention logic
    // applies to it.
    for structure in state.structures().filter(|s| {
        s.source == StructureSource::StaffCreated
            && s.should_have_convention()
            && s.convention_id.is_some()
    }) {
        tracing::info!(
            "converted staff created structure id={} to user created as it has a convention",
            structure.id
        );
        commands.push(Command::ConvertStructureSource {
            structure_id: structure.id,
            new_source: StructureSource::UserCreated,
            clear_convention: false,
        });
        report.structures_converted += 1;
    }

    let cutoff = ctx.as_of - Duration::days(ctx.settings.staff_grace_days);
    let unconfirmed = || {
        state.structures().filter(|s| {
            s.source == StructureSource::StaffCreated
                && s.should_have_convention()
                && s.convention_id.is_none()
        })
    };

    report.staff_created_recent += unconfirmed().filter(|s| s.created_at >= cutoff).count();

    for structure in unconfirmed().filter(|s| s.created_at < cutoff) {
        if could_structure_be_deleted(state, structure) {
            tracing::info!(
                "deleted unconfirmed structure id={} created by staff a while ago",
                structure.id
            );
            commands.push(Command::DeleteStructure { structure_id: structure.id });
            report.structures_deleted += 1;
        } else {
            report.fatal_error(format!(
                "please fix unconfirmed staff created structure id={} by either deleting it or \
                 attaching it to the correct convention",
                structure.id
            ));
        }
    }
    commands
}

/// Keep siret and auth_email of existing ASP structures in step with the
/// export. An empty export email never erases a stored one.
pub fn plan_siret_and_auth_email_updates(
    state: &State,
    vue: &VueStructure,
    report: &mut SyncReport,
) -> Result<Vec<Command>, SyncError> {
    let mut commands = Vec::new();

    for structure in state
        .structures()
        .filter(|s| s.source == StructureSource::Asp && s.convention_id.is_some())
    {
        ensure!(
            structure.should_have_convention(),
            "structure id={} kind={} holds a convention outside the convention regime",
            structure.id,
            structure.kind
        );
        let convention = state.convention_of(structure).ok_or_else(|| {
            SyncError::assertion(format!(
                "structure id={} references a missing convention",
                structure.id
            ))
        })?;
        let Some(row) = vue.row_for_asp_id(convention.asp_id) else {
            continue;
        };

        if !row.auth_email.is_empty() && structure.auth_email != row.auth_email {
            commands.push(Command::UpdateStructureAuthEmail {
                structure_id: structure.id,
                new_auth_email: row.auth_email.clone(),
            });
            report.structures_updated += 1;
        }

        if structure.siret != row.siret {
            ensure!(
                structure.siren() == siren_of(&row.siret),
                "structure id={} would change siren from {} to {}",
                structure.id,
                structure.siren(),
                siren_of(&row.siret)
            );
            if let Some(taken) = state.structure_by_unique_key(&row.siret, structure.kind) {
                // An ambiguous merge: two live records claim the same
                // (siret, kind). A human has to pick the survivor.
                return Err(SyncError::assertion(format!(
                    "structure id={} has changed siret from {} to {} but the new siret is already \
                     used by structure id={} (source={})",
                    structure.id, structure.siret, row.siret, taken.id, taken.source
                )));
            }
            tracing::info!(
                "structure id={} has changed siret from {} to {} (will be updated)",
                structure.id,
                structure.siret,
                row.siret
            );
            commands.push(Command::UpdateStructureSiret {
                structure_id: structure.id,
                new_siret: row.siret.clone(),
            });
            report.structures_updated += 1;
        }
    }

    Ok(commands)
}

/// Create structures for active candidate keys with no ASP record yet, and
/// fix the source of records the export finally confirmed.
pub fn plan_creations(
    state: &State,
    vue: &VueStructure,
    active_keys: &HashSet<CandidateKey>,
    report: &mut SyncReport,
    geocoder: &dyn Geocoder,
) -> Result<(Vec<Command>, Vec<ActivationEmail>), SyncError> {
    let mut commands = Vec::new();
    let mut emails = Vec::new();

    let mut keys: Vec<CandidateKey> = active_keys.iter().copied().collect();
    keys.sort_unstable();

    for (asp_id, kind) in keys {
        let Some(row) = vue.row_for_asp_id(asp_id) else {
            continue;
        };

        let family = state.structures_of_convention_key(asp_id, kind);
        if !family.is_empty() {
            // Structures with this key already exist; only check integrity.
            let mut asp_count = 0;
            for existing in family {
                ensure!(
                    existing.should_have_convention(),
                    "structure id={} kind={} holds a convention outside the convention regime",
                    existing.id,
                    existing.kind
                );
                if existing.source == StructureSource::Asp {
                    asp_count += 1;
                    // Siret drift has been fixed by the preceding phase.
                    ensure!(
                        existing.siret == row.siret,
                        "structure id={} siret={} does not match export row siret={}",
                        existing.id,
                        existing.siret,
                        row.siret
                    );
                } else {
                    ensure!(
                        existing.source == StructureSource::UserCreated,
                        "structure id={} under convention (asp_id={asp_id} kind={kind}) has \
                         unexpected source {}",
                        existing.id,
                        existing.source
                    );
                }
            }
            // Duplicates should have been deleted long ago.
            ensure!(
                asp_count == 1,
                "{asp_count} ASP structures share convention key (asp_id={asp_id} kind={kind})"
            );
            continue;
        }

        if let Some(existing) = state.structure_by_unique_key(&row.siret, kind) {
            if existing.source == StructureSource::Asp {
                // Exists with the wrong asp_id; the convention reconciler
                // fixes that drift on its own pass.
                continue;
            }
            ensure!(
                matches!(
                    existing.source,
                    StructureSource::UserCreated | StructureSource::StaffCreated
                ),
                "structure id={} siret={} kind={kind} has unexpected source {}",
                existing.id,
                existing.siret,
                existing.source
            );
            ensure!(
                existing.should_have_convention(),
                "structure id={} kind={} cannot be converted to ASP source",
                existing.id,
                existing.kind
            );
            tracing::info!(
                "structure id={} already exists with wrong source={} (source will be fixed to ASP)",
                existing.id,
                existing.source
            );
            commands.push(Command::ConvertStructureSource {
                structure_id: existing.id,
                new_source: StructureSource::Asp,
                clear_convention: true,
            });
            report.structures_converted += 1;
            continue;
        }

        ensure!(
            state.convention_by_key(asp_id, kind).is_none(),
            "convention (asp_id={asp_id} kind={kind}) exists without any structure for the key"
        );

        if row.auth_email.is_empty() {
            // Cannot bootstrap the invite flow without a contact email.
            tracing::info!(
                "structure siret={} kind={kind} will not be created as it has no email",
                row.siret
            );
            report.rows_without_auth_email += 1;
            continue;
        }

        let new = build_structure(row, kind, geocoder)?;
        tracing::info!(
            "structure will be created: {};{};{};{};{}",
            new.siret,
            new.kind,
            new.department,
            new.name,
            new.address_line_1
        );
        emails.push(ActivationEmail {
            to: new.auth_email.clone(),
            structure_name: new.name.clone(),
            kind: new.kind,
            siret: new.siret.clone(),
        });
        commands.push(Command::CreateStructure(new));
        report.structures_created += 1;
    }

    Ok((commands, emails))
}

/// Delete structures whose grace period has expired, when the deletion
/// preconditions allow it.
pub fn plan_grace_period_cleanup(
    state: &State,
    ctx: &SyncContext,
    report: &mut SyncReport,
) -> Vec<Command> {
    let mut commands = Vec::new();
    let grace_days = ctx.settings.convention_grace_days;
    let staff_cutoff = ctx.as_of - Duration::days(ctx.settings.staff_grace_days);

    for structure in state.structures() {
        let convention = state.convention_of(structure);
        if !structure.grace_period_has_expired(convention, ctx.as_of, grace_days) {
            continue;
        }
        // An employer's own antenna is expected to be absent from official
        // exports; never auto-delete it.
        if structure.source == StructureSource::UserCreated {
            report.structures_deletion_skipped += 1;
            continue;
        }
        // Leave humans time to act on freshly staff-created records.
        if structure.source == StructureSource::StaffCreated && structure.created_at >= staff_cutoff
        {
            report.structures_deletion_skipped += 1;
            continue;
        }
        if could_structure_be_deleted(state, structure) {
            tracing::info!(
                "structure id={} siret={} is past its grace period and will be deleted",
                structure.id,
                structure.siret
            );
            commands.push(Command::DeleteStructure { structure_id: structure.id });
            report.structures_deleted += 1;
        } else {
            report.fatal_error(format!(
                "structure id={} siret={} is past its grace period but cannot be deleted as it \
                 has data",
                structure.id, structure.siret
            ));
        }
    }
    commands
}

/// Signup must stay possible for every structure: either an auth email to
/// invite through, or at least one active member already inside.
pub fn check_signup_possible(state: &State, report: &mut SyncReport) {
    for structure in state
        .structures()
        .filter(|s| s.auth_email.is_empty() && !state.has_active_members(s.id))
    {
        report.fatal_error(format!(
            "signup is impossible for structure id={} siret={} kind={} source={}",
            structure.id, structure.siret, structure.kind, structure.source
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{Geocoded, NoGeocoder};
    use crate::vue_structure::test_row;

    #[test]
    fn build_assembles_address_lines() {
        let mut row = test_row(112, "21540323900019");
        row.street_num_extra = "B".to_string();
        row.extra1 = "ZONE ARTISANALE".to_string();
        let new = build_structure(&row, StructureKind::Aci, &NoGeocoder).unwrap();
        assert_eq!(new.address_line_1, "12 B RUE DES TANNEURS");
        assert_eq!(new.address_line_2, "ZONE ARTISANALE");
        assert_eq!(new.department, "54");
        assert_eq!(new.source, StructureSource::Asp);
        assert!(new.coords.is_none());
    }

    #[test]
    fn build_promotes_line_two_when_line_one_is_empty() {
        let mut row = test_row(112, "21540323900019");
        row.street_num = String::new();
        row.street_type = String::new();
        row.street_name = String::new();
        row.extra1 = "LIEU-DIT LE BREUIL".to_string();
        let new = build_structure(&row, StructureKind::Aci, &NoGeocoder).unwrap();
        assert_eq!(new.address_line_1, "LIEU-DIT LE BREUIL");
        assert_eq!(new.address_line_2, "");
    }

    #[test]
    fn build_drops_invalid_phone() {
        let mut row = test_row(112, "21540323900019");
        row.phone = "038300".to_string();
        let new = build_structure(&row, StructureKind::Aci, &NoGeocoder).unwrap();
        assert_eq!(new.phone, "");
    }

    #[test]
    fn build_rejects_numeric_name() {
        let mut row = test_row(112, "21540323900019");
        row.name = "123456".to_string();
        assert!(build_structure(&row, StructureKind::Aci, &NoGeocoder).is_err());
    }

    struct FixedGeocoder;

    impl Geocoder for FixedGeocoder {
        fn geocode(&self, _address: &str, _post_code: &str) -> Option<Geocoded> {
            Some(Geocoded {
                address_line_1: Some("12 bis rue des Tanneurs".to_string()),
                city: Some("Nancy".to_string()),
                coords: (48.6921, 6.1844),
            })
        }
    }

    #[test]
    fn build_prefers_geocoded_spelling() {
        let row = test_row(112, "21540323900019");
        let new = build_structure(&row, StructureKind::Aci, &FixedGeocoder).unwrap();
        assert_eq!(new.address_line_1, "12 bis rue des Tanneurs");
        assert_eq!(new.city, "Nancy");
        assert_eq!(new.coords, Some((48.6921, 6.1844)));
    }
}

//! End-to-end runs of the reconciliation engine against in-memory snapshots.

use std::collections::HashMap;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};

use tremplin_config::SyncSettings;
use tremplin_model::{
    AnnexState, Convention, DataFootprint, FinancialAnnex, Membership, Structure, StructureKind,
    StructureSource,
};
use tremplin_sync::vue_af::AnnexRow;
use tremplin_sync::vue_structure::StructureRow;
use tremplin_sync::{run, Command, NoGeocoder, State, SyncContext, SyncInput, SyncOutcome};

fn as_of() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2022, 10, 10, 0, 0, 0).unwrap()
}

fn ctx() -> SyncContext {
    SyncContext::new(SyncSettings::default(), as_of())
}

fn ctx_at(as_of: DateTime<Utc>) -> SyncContext {
    SyncContext::new(SyncSettings::default(), as_of)
}

fn structure(id: i64, siret: &str, kind: StructureKind, convention_id: Option<i64>) -> Structure {
    Structure {
        id,
        siret: siret.to_string(),
        kind,
        source: StructureSource::Asp,
        name: format!("Structure {id}"),
        auth_email: format!("contact{id}@example.com"),
        phone: "0383000000".to_string(),
        address_line_1: "12 rue des Tanneurs".to_string(),
        address_line_2: String::new(),
        post_code: "54000".to_string(),
        city: "Nancy".to_string(),
        department: "54".to_string(),
        coords: None,
        convention_id,
        created_at: as_of() - Duration::days(365),
    }
}

fn convention(id: i64, asp_id: i64, kind: StructureKind, siret_signature: &str) -> Convention {
    Convention {
        id,
        asp_id,
        kind,
        siret_signature: siret_signature.to_string(),
        is_active: true,
        deactivated_at: None,
        reactivated_by: None,
        reactivated_at: None,
        created_at: as_of() - Duration::days(365),
    }
}

fn structure_row(asp_id: i64, siret: &str) -> StructureRow {
    StructureRow {
        siret: siret.to_string(),
        siret_signature: siret.to_string(),
        asp_id,
        auth_email: format!("contact{asp_id}@example.com"),
        name: format!("STRUCTURE {asp_id}"),
        street_num: "12".to_string(),
        street_num_extra: String::new(),
        street_type: "RUE".to_string(),
        street_name: "DES TANNEURS".to_string(),
        extra1: String::new(),
        extra2: String::new(),
        extra3: String::new(),
        post_code: "54000".to_string(),
        city: "NANCY".to_string(),
        phone: "0383000000".to_string(),
    }
}

fn annex_row(number: &str, asp_id: i64, kind: StructureKind, state: AnnexState, end: NaiveDate) -> AnnexRow {
    AnnexRow {
        number: number.to_string(),
        kind,
        asp_id,
        start_at: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
        end_at: end,
        state,
    }
}

fn end_of_year() -> NaiveDate {
    NaiveDate::from_ymd_opt(2022, 12, 31).unwrap()
}

fn run_engine(state: &mut State, input: &SyncInput, ctx: &SyncContext) -> SyncOutcome {
    run(state, input, ctx, &NoGeocoder).expect("engine run failed")
}

#[test]
fn scenario_a_creates_convention_for_structure_without_one() {
    let mut state = State::new(
        vec![structure(1, "21540323900019", StructureKind::Aci, None)],
        vec![],
        vec![],
        vec![],
        HashMap::new(),
    );
    let input = SyncInput {
        structure_rows: vec![structure_row(112, "21540323900019")],
        annex_rows: vec![annex_row(
            "ACI054220013A0M0",
            112,
            StructureKind::Aci,
            AnnexState::Valid,
            end_of_year(),
        )],
    };

    let outcome = run_engine(&mut state, &input, &ctx());

    assert_eq!(outcome.report.conventions_created, 1);
    let convention = state.convention_by_key(112, StructureKind::Aci).expect("convention missing");
    assert!(convention.is_active);
    assert!(convention.deactivated_at.is_none());
    assert_eq!(convention.siret_signature, "21540323900019");
    assert_eq!(state.structure(1).unwrap().convention_id, Some(convention.id));
    // Exactly one ASP structure references it.
    assert_eq!(state.structures_of_convention(convention.id).len(), 1);
    // The annex followed.
    assert_eq!(state.annex_by_number("ACI054220013A0M0").unwrap().convention_id, convention.id);
    assert_eq!(outcome.report.fatal_errors(), 0);
}

#[test]
fn scenario_b_deactivates_when_candidate_disappears() {
    let mut state = State::new(
        vec![structure(1, "21540323900019", StructureKind::Aci, Some(1))],
        vec![convention(1, 112, StructureKind::Aci, "21540323900019")],
        vec![],
        vec![],
        HashMap::new(),
    );
    // The structure is still exported, its annexes are not.
    let input = SyncInput {
        structure_rows: vec![structure_row(112, "21540323900019")],
        annex_rows: vec![],
    };

    let outcome = run_engine(&mut state, &input, &ctx());

    assert_eq!(outcome.report.conventions_deactivated, 1);
    let convention = state.convention(1).unwrap();
    assert!(!convention.is_active);
    assert_eq!(convention.deactivated_at, Some(as_of()));
}

#[test]
fn scenario_c_updates_only_the_changed_annex_field() {
    let mut state = State::new(
        vec![structure(1, "21540323900019", StructureKind::Aci, Some(1))],
        vec![convention(1, 112, StructureKind::Aci, "21540323900019")],
        vec![FinancialAnnex {
            id: 1,
            number: "ACI054220013A0M0".to_string(),
            state: AnnexState::Provisional,
            start_at: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            end_at: end_of_year(),
            convention_id: 1,
        }],
        vec![],
        HashMap::new(),
    );
    let input = SyncInput {
        structure_rows: vec![structure_row(112, "21540323900019")],
        annex_rows: vec![annex_row(
            "ACI054220013A0M0",
            112,
            StructureKind::Aci,
            AnnexState::Valid,
            end_of_year(),
        )],
    };

    let outcome = run_engine(&mut state, &input, &ctx());

    assert_eq!(outcome.report.annexes_updated, 1);
    let update = outcome
        .commands
        .iter()
        .find_map(|c| match c {
            Command::UpdateAnnex { state, start_at, end_at, .. } => {
                Some((*state, *start_at, *end_at))
            }
            _ => None,
        })
        .expect("no annex update command");
    assert_eq!(update, (Some(AnnexState::Valid), None, None));
    assert_eq!(state.annex_by_number("ACI054220013A0M0").unwrap().state, AnnexState::Valid);
}

#[test]
fn rerunning_on_the_same_export_pair_is_a_no_op() {
    let mut state = State::new(
        vec![
            structure(1, "21540323900019", StructureKind::Aci, None),
            structure(2, "34950857200055", StructureKind::Ai, Some(1)),
        ],
        vec![convention(1, 768, StructureKind::Ai, "34950857200055")],
        vec![],
        vec![],
        HashMap::new(),
    );
    let input = SyncInput {
        structure_rows: vec![
            structure_row(112, "21540323900019"),
            structure_row(768, "34950857200055"),
        ],
        annex_rows: vec![
            annex_row("ACI054220013A0M0", 112, StructureKind::Aci, AnnexState::Valid, end_of_year()),
            annex_row("AI054220014A0M0", 768, StructureKind::Ai, AnnexState::Valid, end_of_year()),
            // Orphan candidate, silently dropped both times.
            annex_row("EI054220099A0M0", 999, StructureKind::Ei, AnnexState::Valid, end_of_year()),
        ],
    };

    let first = run_engine(&mut state, &input, &ctx());
    assert!(first.report.mutations() > 0);
    assert_eq!(first.report.annex_orphans_dropped, 1);

    let second = run_engine(&mut state, &input, &ctx());
    assert!(second.commands.is_empty(), "second run planned {:?}", second.commands);
    assert_eq!(second.report.mutations(), 0);
    assert!(second.activation_emails.is_empty());
    // The orphan is dropped again, still silently.
    assert_eq!(second.report.annex_orphans_dropped, 1);
    assert_eq!(second.report.fatal_errors(), 0);
}

fn breaker_fixture(count: i64) -> (State, SyncInput) {
    let mut structures = Vec::new();
    let mut conventions = Vec::new();
    let mut structure_rows = Vec::new();
    for i in 0..count {
        let siret = format!("{:09}{:05}", 100_000_000 + i, 18);
        structures.push(structure(i + 1, &siret, StructureKind::Aci, Some(i + 1)));
        conventions.push(convention(i + 1, 1000 + i, StructureKind::Aci, &siret));
        structure_rows.push(structure_row(1000 + i, &siret));
    }
    let state = State::new(structures, conventions, vec![], vec![], HashMap::new());
    (state, SyncInput { structure_rows, annex_rows: vec![] })
}

#[test]
fn deactivation_wave_is_aborted_early_in_the_year() {
    let (mut state, input) = breaker_fixture(200);
    let march = Utc.with_ymd_and_hms(2022, 3, 15, 0, 0, 0).unwrap();

    let outcome = run_engine(&mut state, &input, &ctx_at(march));

    assert!(outcome.report.deactivation_batch_aborted);
    assert_eq!(outcome.report.conventions_deactivated, 0);
    assert!(state.conventions().all(|c| c.is_active));
}

#[test]
fn deactivation_wave_proceeds_late_in_the_year() {
    let (mut state, input) = breaker_fixture(200);

    let outcome = run_engine(&mut state, &input, &ctx());

    assert!(!outcome.report.deactivation_batch_aborted);
    assert_eq!(outcome.report.conventions_deactivated, 200);
    assert!(state.conventions().all(|c| !c.is_active));
}

#[test]
fn small_deactivation_wave_proceeds_early_in_the_year() {
    let (mut state, input) = breaker_fixture(3);
    let march = Utc.with_ymd_and_hms(2022, 3, 15, 0, 0, 0).unwrap();

    let outcome = run_engine(&mut state, &input, &ctx_at(march));

    assert!(!outcome.report.deactivation_batch_aborted);
    assert_eq!(outcome.report.conventions_deactivated, 3);
}

#[test]
fn recent_manual_reactivation_is_protected() {
    let mut conv = convention(1, 112, StructureKind::Aci, "21540323900019");
    conv.reactivated_by = Some("support".to_string());
    conv.reactivated_at = Some(as_of() - Duration::days(10));
    let mut state = State::new(
        vec![structure(1, "21540323900019", StructureKind::Aci, Some(1))],
        vec![conv],
        vec![],
        vec![],
        HashMap::new(),
    );
    let input = SyncInput {
        structure_rows: vec![structure_row(112, "21540323900019")],
        annex_rows: vec![],
    };

    let outcome = run_engine(&mut state, &input, &ctx());

    assert_eq!(outcome.report.conventions_deactivated, 0);
    assert!(state.convention(1).unwrap().is_active);
}

#[test]
fn stale_manual_reactivation_is_not_protected() {
    let mut conv = convention(1, 112, StructureKind::Aci, "21540323900019");
    conv.reactivated_by = Some("support".to_string());
    conv.reactivated_at = Some(as_of() - Duration::days(91));
    let mut state = State::new(
        vec![structure(1, "21540323900019", StructureKind::Aci, Some(1))],
        vec![conv],
        vec![],
        vec![],
        HashMap::new(),
    );
    let input = SyncInput {
        structure_rows: vec![structure_row(112, "21540323900019")],
        annex_rows: vec![],
    };

    let outcome = run_engine(&mut state, &input, &ctx());

    assert_eq!(outcome.report.conventions_deactivated, 1);
    assert!(!state.convention(1).unwrap().is_active);
}

#[test]
fn asp_id_drift_is_fixed_then_resolved_on_the_second_pass() {
    // The convention still carries the old asp_id; the export moved the
    // siret to a new one, with an active annex under the new key.
    let mut conv = convention(1, 112, StructureKind::Aci, "21540323900019");
    conv.is_active = false;
    conv.deactivated_at = Some(as_of() - Duration::days(5));
    let mut state = State::new(
        vec![structure(1, "21540323900019", StructureKind::Aci, Some(1))],
        vec![conv],
        vec![],
        vec![],
        HashMap::new(),
    );
    let input = SyncInput {
        structure_rows: vec![structure_row(113, "21540323900019")],
        annex_rows: vec![annex_row(
            "ACI054220013A0M0",
            113,
            StructureKind::Aci,
            AnnexState::Valid,
            end_of_year(),
        )],
    };

    let outcome = run_engine(&mut state, &input, &ctx());

    let convention = state.convention(1).unwrap();
    assert_eq!(convention.asp_id, 113);
    // Pass one only rewrites the identifier; the reactivation lands on the
    // convergence pass.
    assert!(convention.is_active);
    assert_eq!(outcome.report.conventions_updated, 1);
    assert_eq!(outcome.report.conventions_reactivated, 1);
}

#[test]
fn new_structure_is_created_with_activation_email() {
    let mut state = State::new(vec![], vec![], vec![], vec![], HashMap::new());
    let input = SyncInput {
        structure_rows: vec![structure_row(112, "21540323900019")],
        annex_rows: vec![annex_row(
            "ACI054220013A0M0",
            112,
            StructureKind::Aci,
            AnnexState::Valid,
            end_of_year(),
        )],
    };

    let outcome = run_engine(&mut state, &input, &ctx());

    assert_eq!(outcome.report.structures_created, 1);
    assert_eq!(outcome.activation_emails.len(), 1);
    assert_eq!(outcome.activation_emails[0].to, "contact112@example.com");

    let created = state
        .structure_by_unique_key("21540323900019", StructureKind::Aci)
        .expect("structure not created");
    assert_eq!(created.source, StructureSource::Asp);
    assert_eq!(created.department, "54");
    assert_eq!(created.address_line_1, "12 RUE DES TANNEURS");
    // Its convention and annex followed in the same run.
    let convention = state.convention_of(created).expect("convention not created");
    assert!(convention.is_active);
    assert_eq!(state.annex_by_number("ACI054220013A0M0").unwrap().convention_id, convention.id);
}

#[test]
fn row_without_email_is_skipped_not_failed() {
    let mut state = State::new(vec![], vec![], vec![], vec![], HashMap::new());
    let mut row = structure_row(112, "21540323900019");
    row.auth_email = String::new();
    let input = SyncInput {
        structure_rows: vec![row],
        annex_rows: vec![annex_row(
            "ACI054220013A0M0",
            112,
            StructureKind::Aci,
            AnnexState::Valid,
            end_of_year(),
        )],
    };

    let outcome = run_engine(&mut state, &input, &ctx());

    assert_eq!(outcome.report.structures_created, 0);
    assert_eq!(outcome.report.rows_without_auth_email, 1);
    assert!(outcome.activation_emails.is_empty());
    assert_eq!(outcome.report.fatal_errors(), 0);
    // The annex candidate stays an orphan and is silently dropped.
    assert_eq!(outcome.report.annex_orphans_dropped, 1);
}

#[test]
fn wrong_source_structure_is_converted_and_relinked() {
    let mut existing = structure(1, "21540323900019", StructureKind::Aci, None);
    existing.source = StructureSource::StaffCreated;
    // Still inside the staff grace window, so the cleanup leaves it alone
    // and the export confirmation converts it instead.
    existing.created_at = as_of() - Duration::days(10);
    let mut state = State::new(vec![existing], vec![], vec![], vec![], HashMap::new());
    let input = SyncInput {
        structure_rows: vec![structure_row(112, "21540323900019")],
        annex_rows: vec![annex_row(
            "ACI054220013A0M0",
            112,
            StructureKind::Aci,
            AnnexState::Valid,
            end_of_year(),
        )],
    };

    let outcome = run_engine(&mut state, &input, &ctx());

    let converted = state.structure(1).unwrap();
    assert_eq!(converted.source, StructureSource::Asp);
    let convention = state.convention_by_key(112, StructureKind::Aci).expect("no convention");
    assert_eq!(converted.convention_id, Some(convention.id));
    assert_eq!(outcome.report.structures_converted, 1);
    assert_eq!(outcome.report.structures_created, 0);
    assert!(outcome.activation_emails.is_empty());
}

#[test]
fn past_grace_structure_and_its_convention_are_removed() {
    let mut conv = convention(1, 112, StructureKind::Aci, "21540323900019");
    conv.is_active = false;
    conv.deactivated_at = Some(as_of() - Duration::days(40));
    let mut state = State::new(
        vec![structure(1, "21540323900019", StructureKind::Aci, Some(1))],
        vec![conv],
        vec![FinancialAnnex {
            id: 1,
            number: "ACI054210013A0M0".to_string(),
            state: AnnexState::Archived,
            start_at: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap(),
            end_at: NaiveDate::from_ymd_opt(2021, 12, 31).unwrap(),
            convention_id: 1,
        }],
        vec![],
        HashMap::new(),
    );
    // Gone from both exports.
    let input = SyncInput { structure_rows: vec![], annex_rows: vec![] };

    let outcome = run_engine(&mut state, &input, &ctx());

    assert_eq!(outcome.report.structures_deleted, 1);
    assert_eq!(outcome.report.conventions_deleted, 1);
    assert!(state.structures().next().is_none());
    assert!(state.conventions().next().is_none());
    assert!(state.annexes().next().is_none());
}

#[test]
fn past_grace_structure_with_data_is_a_fatal_error() {
    let mut conv = convention(1, 112, StructureKind::Aci, "21540323900019");
    conv.is_active = false;
    conv.deactivated_at = Some(as_of() - Duration::days(40));
    let mut footprints = HashMap::new();
    footprints.insert(1, DataFootprint { advanced_job_application_count: 3, ..Default::default() });
    let mut state = State::new(
        vec![structure(1, "21540323900019", StructureKind::Aci, Some(1))],
        vec![conv],
        vec![],
        vec![],
        footprints,
    );
    let input = SyncInput { structure_rows: vec![], annex_rows: vec![] };

    let outcome = run_engine(&mut state, &input, &ctx());

    assert_eq!(outcome.report.structures_deleted, 0);
    assert_eq!(outcome.report.fatal_errors(), 1);
    assert!(state.structure(1).is_some());
}

#[test]
fn memberless_user_created_structure_is_cleaned_up() {
    let mut orphan = structure(1, "21540323900019", StructureKind::Aci, None);
    orphan.source = StructureSource::UserCreated;
    let mut kept = structure(2, "34950857200055", StructureKind::Ai, None);
    kept.source = StructureSource::UserCreated;
    let mut state = State::new(
        vec![orphan, kept],
        vec![],
        vec![],
        vec![Membership { structure_id: 2, user: "claire".to_string(), is_active: true }],
        HashMap::new(),
    );
    let input = SyncInput { structure_rows: vec![], annex_rows: vec![] };

    let outcome = run_engine(&mut state, &input, &ctx());

    assert!(state.structure(1).is_none());
    assert!(state.structure(2).is_some());
    assert_eq!(outcome.report.structures_deleted, 1);
}

#[test]
fn structure_without_email_or_active_member_is_reported() {
    let mut stranded = structure(1, "21540323900019", StructureKind::Geiq, None);
    stranded.source = StructureSource::Geiq;
    stranded.auth_email = String::new();
    let mut state = State::new(
        vec![stranded],
        vec![],
        vec![],
        vec![Membership { structure_id: 1, user: "paul".to_string(), is_active: false }],
        HashMap::new(),
    );
    let input = SyncInput { structure_rows: vec![], annex_rows: vec![] };

    let outcome = run_engine(&mut state, &input, &ctx());

    assert_eq!(outcome.report.fatal_errors(), 1);
    assert!(outcome.report.fatal[0].contains("signup is impossible"));
}

#[test]
fn siret_drift_collision_aborts_the_run() {
    let mut state = State::new(
        vec![
            structure(1, "21540323900019", StructureKind::Aci, Some(1)),
            structure(2, "21540323900027", StructureKind::Aci, None),
        ],
        vec![convention(1, 112, StructureKind::Aci, "21540323900019")],
        vec![],
        vec![],
        HashMap::new(),
    );
    // The export moved structure 1 onto structure 2's siret.
    let input = SyncInput {
        structure_rows: vec![structure_row(112, "21540323900027")],
        annex_rows: vec![],
    };

    let err = run(&mut state, &input, &ctx(), &NoGeocoder).unwrap_err();
    assert!(err.to_string().contains("already used"));
}

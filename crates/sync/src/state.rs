use std::collections::{BTreeMap, HashMap};

use tremplin_model::{
    AnnexId, AspId, Convention, ConventionId, DataFootprint, FinancialAnnex, Membership,
    Structure, StructureId, StructureKind, StructureSource,
};

use crate::command::Command;
use crate::error::{ensure, SyncError};

/// In-memory snapshot of the referential, as loaded from the store at the
/// start of a run.
///
/// The engine mutates it exclusively through [`State::apply`], which is the
/// in-memory mirror of the store's writer: the same command log drives both,
/// so dry runs, tests and wet runs share one code path.
#[derive(Debug, Default, Clone)]
pub struct State {
    structures: BTreeMap<StructureId, Structure>,
    conventions: BTreeMap<ConventionId, Convention>,
    annexes: BTreeMap<AnnexId, FinancialAnnex>,
    memberships: Vec<Membership>,
    footprints: HashMap<StructureId, DataFootprint>,
    next_structure_id: StructureId,
    next_convention_id: ConventionId,
    next_annex_id: AnnexId,
}

impl State {
    pub fn new(
        structures: Vec<Structure>,
        conventions: Vec<Convention>,
        annexes: Vec<FinancialAnnex>,
        memberships: Vec<Membership>,
        footprints: HashMap<StructureId, DataFootprint>,
    ) -> Self {
        let structures: BTreeMap<_, _> = structures.into_iter().map(|s| (s.id, s)).collect();
        let conventions: BTreeMap<_, _> = conventions.into_iter().map(|c| (c.id, c)).collect();
        let annexes: BTreeMap<_, _> = annexes.into_iter().map(|a| (a.id, a)).collect();
        let next_structure_id = structures.keys().max().copied().unwrap_or(0) + 1;
        let next_convention_id = conventions.keys().max().copied().unwrap_or(0) + 1;
        let next_annex_id = annexes.keys().max().copied().unwrap_or(0) + 1;
        Self {
            structures,
            conventions,
            annexes,
            memberships,
            footprints,
            next_structure_id,
            next_convention_id,
            next_annex_id,
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Iteration order is by id, so every plan is deterministic.
    pub fn structures(&self) -> impl Iterator<Item = &Structure> {
        self.structures.values()
    }

    pub fn conventions(&self) -> impl Iterator<Item = &Convention> {
        self.conventions.values()
    }

    pub fn annexes(&self) -> impl Iterator<Item = &FinancialAnnex> {
        self.annexes.values()
    }

    pub fn structure(&self, id: StructureId) -> Option<&Structure> {
        self.structures.get(&id)
    }

    pub fn convention(&self, id: ConventionId) -> Option<&Convention> {
        self.conventions.get(&id)
    }

    pub fn convention_of(&self, structure: &Structure) -> Option<&Convention> {
        structure.convention_id.and_then(|id| self.conventions.get(&id))
    }

    pub fn convention_by_key(&self, asp_id: AspId, kind: StructureKind) -> Option<&Convention> {
        self.conventions
            .values()
            .find(|c| c.asp_id == asp_id && c.kind == kind)
    }

    pub fn structure_by_unique_key(
        &self,
        siret: &str,
        kind: StructureKind,
    ) -> Option<&Structure> {
        self.structures
            .values()
            .find(|s| s.siret == siret && s.kind == kind)
    }

    pub fn structures_of_convention(&self, convention_id: ConventionId) -> Vec<&Structure> {
        self.structures
            .values()
            .filter(|s| s.convention_id == Some(convention_id))
            .collect()
    }

    /// Structures whose convention carries the given (asp_id, kind) key.
    pub fn structures_of_convention_key(
        &self,
        asp_id: AspId,
        kind: StructureKind,
    ) -> Vec<&Structure> {
        match self.convention_by_key(asp_id, kind) {
            Some(convention) => self.structures_of_convention(convention.id),
            None => Vec::new(),
        }
    }

    pub fn annex_by_number(&self, number: &str) -> Option<&FinancialAnnex> {
        self.annexes.values().find(|a| a.number == number)
    }

    pub fn has_members(&self, structure_id: StructureId) -> bool {
        self.memberships.iter().any(|m| m.structure_id == structure_id)
    }

    pub fn has_active_members(&self, structure_id: StructureId) -> bool {
        self.memberships
            .iter()
            .any(|m| m.structure_id == structure_id && m.is_active)
    }

    pub fn footprint(&self, structure_id: StructureId) -> DataFootprint {
        self.footprints.get(&structure_id).copied().unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Command application
    // -----------------------------------------------------------------------

    /// Apply one command. Precondition violations are assertions: they mean
    /// the planning phase produced a command contradicting the snapshot it
    /// was derived from.
    pub fn apply(&mut self, command: &Command, now: chrono::DateTime<chrono::Utc>) -> Result<(), SyncError> {
        match command {
            Command::CreateStructure(new) => {
                ensure!(
                    self.structure_by_unique_key(&new.siret, new.kind).is_none(),
                    "structure siret={} kind={} already exists",
                    new.siret,
                    new.kind
                );
                let id = self.next_structure_id;
                self.next_structure_id += 1;
                self.structures.insert(
                    id,
                    Structure {
                        id,
                        siret: new.siret.clone(),
                        kind: new.kind,
                        source: new.source,
                        name: new.name.clone(),
                        auth_email: new.auth_email.clone(),
                        phone: new.phone.clone(),
                        address_line_1: new.address_line_1.clone(),
                        address_line_2: new.address_line_2.clone(),
                        post_code: new.post_code.clone(),
                        city: new.city.clone(),
                        department: new.department.clone(),
                        coords: new.coords,
                        convention_id: None,
                        created_at: now,
                    },
                );
            }
            Command::UpdateStructureSiret { structure_id, new_siret } => {
                let structure = self.structure_mut(*structure_id)?;
                ensure!(
                    structure.siret != *new_siret,
                    "structure id={structure_id} siret update is a no-op"
                );
                structure.siret = new_siret.clone();
            }
            Command::UpdateStructureAuthEmail { structure_id, new_auth_email } => {
                let structure = self.structure_mut(*structure_id)?;
                ensure!(
                    structure.auth_email != *new_auth_email,
                    "structure id={structure_id} auth_email update is a no-op"
                );
                structure.auth_email = new_auth_email.clone();
            }
            Command::ConvertStructureSource { structure_id, new_source, clear_convention } => {
                let structure = self.structure_mut(*structure_id)?;
                structure.source = *new_source;
                if *clear_convention {
                    structure.convention_id = None;
                }
            }
            Command::DeleteStructure { structure_id } => {
                ensure!(
                    self.structures.remove(structure_id).is_some(),
                    "structure id={structure_id} does not exist"
                );
                self.memberships.retain(|m| m.structure_id != *structure_id);
                self.footprints.remove(structure_id);
            }
            Command::CreateConvention(new) => {
                ensure!(
                    self.convention_by_key(new.asp_id, new.kind).is_none(),
                    "convention asp_id={} kind={} already exists",
                    new.asp_id,
                    new.kind
                );
                ensure!(
                    !new.is_active || new.deactivated_at.is_none(),
                    "active convention asp_id={} carries a deactivation date",
                    new.asp_id
                );
                let id = self.next_convention_id;
                self.next_convention_id += 1;
                self.conventions.insert(
                    id,
                    Convention {
                        id,
                        asp_id: new.asp_id,
                        kind: new.kind,
                        siret_signature: new.siret_signature.clone(),
                        is_active: new.is_active,
                        deactivated_at: new.deactivated_at,
                        reactivated_by: None,
                        reactivated_at: None,
                        created_at: now,
                    },
                );
                let structure = self.structure_mut(new.structure_id)?;
                ensure!(
                    structure.convention_id.is_none(),
                    "structure id={} already has a convention",
                    new.structure_id
                );
                structure.convention_id = Some(id);
            }
            Command::UpdateConventionAspId { convention_id, new_asp_id } => {
                let kind = self.existing_convention(*convention_id)?.kind;
                ensure!(
                    self.convention_by_key(*new_asp_id, kind).is_none(),
                    "convention asp_id={new_asp_id} kind={kind} already exists"
                );
                self.convention_mut(*convention_id)?.asp_id = *new_asp_id;
            }
            Command::UpdateConventionSiretSignature { convention_id, new_siret_signature } => {
                self.convention_mut(*convention_id)?.siret_signature =
                    new_siret_signature.clone();
            }
            Command::ReactivateConvention { convention_id } => {
                let convention = self.convention_mut(*convention_id)?;
                convention.is_active = true;
            }
            Command::DeactivateConventions { convention_ids, deactivated_at } => {
                for id in convention_ids {
                    let convention = self.convention_mut(*id)?;
                    convention.is_active = false;
                    // Start the grace period now.
                    convention.deactivated_at = Some(*deactivated_at);
                }
            }
            Command::DeleteConvention { convention_id } => {
                ensure!(
                    self.structures_of_convention(*convention_id).is_empty(),
                    "convention id={convention_id} still has structures"
                );
                ensure!(
                    self.conventions.remove(convention_id).is_some(),
                    "convention id={convention_id} does not exist"
                );
                // Cascade, as the store's foreign key does.
                self.annexes.retain(|_, a| a.convention_id != *convention_id);
            }
            Command::CreateAnnex(new) => {
                ensure!(
                    self.annex_by_number(&new.number).is_none(),
                    "financial annex number={} already exists",
                    new.number
                );
                ensure!(
                    self.conventions.contains_key(&new.convention_id),
                    "financial annex number={} references missing convention id={}",
                    new.number,
                    new.convention_id
                );
                let id = self.next_annex_id;
                self.next_annex_id += 1;
                self.annexes.insert(
                    id,
                    FinancialAnnex {
                        id,
                        number: new.number.clone(),
                        state: new.state,
                        start_at: new.start_at,
                        end_at: new.end_at,
                        convention_id: new.convention_id,
                    },
                );
            }
            Command::UpdateAnnex { annex_id, state, start_at, end_at } => {
                let annex = self.annex_mut(*annex_id)?;
                if let Some(state) = state {
                    annex.state = *state;
                }
                if let Some(start_at) = start_at {
                    annex.start_at = *start_at;
                }
                if let Some(end_at) = end_at {
                    annex.end_at = *end_at;
                }
            }
            Command::RelinkAnnex { annex_id, convention_id } => {
                ensure!(
                    self.conventions.contains_key(convention_id),
                    "cannot relink annex id={annex_id} to missing convention id={convention_id}"
                );
                self.annex_mut(*annex_id)?.convention_id = *convention_id;
            }
            Command::DeleteAnnex { annex_id } => {
                ensure!(
                    self.annexes.remove(annex_id).is_some(),
                    "financial annex id={annex_id} does not exist"
                );
            }
        }
        Ok(())
    }

    fn structure_mut(&mut self, id: StructureId) -> Result<&mut Structure, SyncError> {
        self.structures
            .get_mut(&id)
            .ok_or_else(|| SyncError::assertion(format!("structure id={id} does not exist")))
    }

    fn existing_convention(&self, id: ConventionId) -> Result<&Convention, SyncError> {
        self.conventions
            .get(&id)
            .ok_or_else(|| SyncError::assertion(format!("convention id={id} does not exist")))
    }

    fn convention_mut(&mut self, id: ConventionId) -> Result<&mut Convention, SyncError> {
        self.conventions
            .get_mut(&id)
            .ok_or_else(|| SyncError::assertion(format!("convention id={id} does not exist")))
    }

    fn annex_mut(&mut self, id: AnnexId) -> Result<&mut FinancialAnnex, SyncError> {
        self.annexes
            .get_mut(&id)
            .ok_or_else(|| SyncError::assertion(format!("financial annex id={id} does not exist")))
    }
}

/// Whether a structure may be deleted by the sync.
///
/// False as soon as it holds business data: evaluations, job applications
/// that advanced past "new", or eligibility diagnoses tied to an issued
/// approval. An ASP structure can additionally only go once all its antennas
/// are gone.
pub fn could_structure_be_deleted(state: &State, structure: &Structure) -> bool {
    let footprint = state.footprint(structure.id);
    if footprint.evaluation_count > 0 {
        return false;
    }
    if footprint.advanced_job_application_count > 0 {
        return false;
    }
    if footprint.diagnosis_with_approval_count > 0 {
        return false;
    }
    if structure.source == StructureSource::Asp {
        if let Some(convention_id) = structure.convention_id {
            return state.structures_of_convention(convention_id).len() == 1;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{NewAnnex, NewConvention, NewStructure};
    use chrono::{NaiveDate, TimeZone, Utc};
    use tremplin_model::AnnexState;

    fn now() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2022, 10, 10, 0, 0, 0).unwrap()
    }

    fn structure(id: StructureId, siret: &str, convention_id: Option<ConventionId>) -> Structure {
        Structure {
            id,
            siret: siret.to_string(),
            kind: StructureKind::Aci,
            source: StructureSource::Asp,
            name: format!("Structure {id}"),
            auth_email: "contact@example.com".to_string(),
            phone: String::new(),
            address_line_1: String::new(),
            address_line_2: String::new(),
            post_code: "54000".to_string(),
            city: "Nancy".to_string(),
            department: "54".to_string(),
            coords: None,
            convention_id,
            created_at: now(),
        }
    }

    fn convention(id: ConventionId, asp_id: AspId) -> Convention {
        Convention {
            id,
            asp_id,
            kind: StructureKind::Aci,
            siret_signature: "21540323900019".to_string(),
            is_active: true,
            deactivated_at: None,
            reactivated_by: None,
            reactivated_at: None,
            created_at: now(),
        }
    }

    fn annex(id: AnnexId, number: &str, convention_id: ConventionId) -> FinancialAnnex {
        FinancialAnnex {
            id,
            number: number.to_string(),
            state: AnnexState::Valid,
            start_at: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
            end_at: NaiveDate::from_ymd_opt(2022, 12, 31).unwrap(),
            convention_id,
        }
    }

    #[test]
    fn create_convention_links_structure() {
        let mut state = State::new(
            vec![structure(1, "21540323900019", None)],
            vec![],
            vec![],
            vec![],
            HashMap::new(),
        );
        state
            .apply(
                &Command::CreateConvention(NewConvention {
                    asp_id: 112,
                    kind: StructureKind::Aci,
                    siret_signature: "21540323900019".to_string(),
                    is_active: true,
                    deactivated_at: None,
                    structure_id: 1,
                }),
                now(),
            )
            .unwrap();
        let convention = state.convention_by_key(112, StructureKind::Aci).unwrap();
        assert!(convention.is_active);
        assert_eq!(state.structure(1).unwrap().convention_id, Some(convention.id));
    }

    #[test]
    fn duplicate_convention_key_is_an_assertion() {
        let mut state = State::new(
            vec![structure(1, "21540323900019", None)],
            vec![convention(1, 112)],
            vec![],
            vec![],
            HashMap::new(),
        );
        let err = state
            .apply(
                &Command::CreateConvention(NewConvention {
                    asp_id: 112,
                    kind: StructureKind::Aci,
                    siret_signature: "21540323900019".to_string(),
                    is_active: true,
                    deactivated_at: None,
                    structure_id: 1,
                }),
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, SyncError::Assertion(_)));
    }

    #[test]
    fn delete_convention_cascades_annexes() {
        let mut state = State::new(
            vec![],
            vec![convention(1, 112)],
            vec![annex(1, "ACI054220013A0M0", 1)],
            vec![],
            HashMap::new(),
        );
        state
            .apply(&Command::DeleteConvention { convention_id: 1 }, now())
            .unwrap();
        assert!(state.conventions().next().is_none());
        assert!(state.annexes().next().is_none());
    }

    #[test]
    fn delete_convention_with_structures_is_an_assertion() {
        let mut state = State::new(
            vec![structure(1, "21540323900019", Some(1))],
            vec![convention(1, 112)],
            vec![],
            vec![],
            HashMap::new(),
        );
        assert!(state
            .apply(&Command::DeleteConvention { convention_id: 1 }, now())
            .is_err());
    }

    #[test]
    fn created_ids_are_sequential() {
        let mut state = State::new(
            vec![structure(7, "21540323900019", None)],
            vec![convention(3, 112)],
            vec![],
            vec![],
            HashMap::new(),
        );
        state
            .apply(
                &Command::CreateAnnex(NewAnnex {
                    number: "ACI054220013A0M0".to_string(),
                    state: AnnexState::Valid,
                    start_at: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
                    end_at: NaiveDate::from_ymd_opt(2022, 12, 31).unwrap(),
                    convention_id: 3,
                }),
                now(),
            )
            .unwrap();
        assert_eq!(state.annex_by_number("ACI054220013A0M0").unwrap().id, 1);
        state
            .apply(
                &Command::CreateStructure(NewStructure {
                    siret: "34950857200055".to_string(),
                    kind: StructureKind::Ai,
                    source: StructureSource::Asp,
                    name: "Nouvelle structure".to_string(),
                    auth_email: "new@example.com".to_string(),
                    phone: String::new(),
                    address_line_1: String::new(),
                    address_line_2: String::new(),
                    post_code: "54000".to_string(),
                    city: "Nancy".to_string(),
                    department: "54".to_string(),
                    coords: None,
                }),
                now(),
            )
            .unwrap();
        assert!(state.structure(8).is_some());
    }

    #[test]
    fn deletability_follows_footprint_and_siblings() {
        let mut footprints = HashMap::new();
        footprints.insert(
            1,
            DataFootprint { advanced_job_application_count: 2, ..Default::default() },
        );
        let state = State::new(
            vec![
                structure(1, "21540323900019", Some(1)),
                structure(2, "21540323900027", Some(1)),
                structure(3, "34950857200055", Some(2)),
            ],
            vec![convention(1, 112), convention(2, 768)],
            vec![],
            vec![],
            footprints,
        );
        // Blocked by data.
        assert!(!could_structure_be_deleted(&state, state.structure(1).unwrap()));
        // ASP structure with a sibling under the same convention.
        let mut sibling = state.structure(2).unwrap().clone();
        sibling.source = StructureSource::Asp;
        assert!(!could_structure_be_deleted(&state, &sibling));
        // Last structure under its convention.
        assert!(could_structure_be_deleted(&state, state.structure(3).unwrap()));
    }
}

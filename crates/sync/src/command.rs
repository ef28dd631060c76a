use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

use tremplin_model::{
    AnnexId, AnnexState, AspId, ConventionId, StructureId, StructureKind, StructureSource,
};

/// One decision of the reconciliation engine.
///
/// The engine computes commands from immutable snapshots, then applies them
/// — to the in-memory snapshot always, to the store only on a wet run. This
/// keeps the diff logic testable without a live store.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    CreateStructure(NewStructure),
    UpdateStructureSiret {
        structure_id: StructureId,
        new_siret: String,
    },
    UpdateStructureAuthEmail {
        structure_id: StructureId,
        new_auth_email: String,
    },
    /// Used both ways: staff-created → user-created once a convention was
    /// attached manually, and wrong-source → ASP once the export confirms
    /// the (siret, kind) pair. The latter clears the convention so the next
    /// convention pass can relink it properly.
    ConvertStructureSource {
        structure_id: StructureId,
        new_source: StructureSource,
        clear_convention: bool,
    },
    DeleteStructure {
        structure_id: StructureId,
    },
    /// Creation links the given structure in the same step: a zero-structure
    /// convention must never be visible to later phases.
    CreateConvention(NewConvention),
    UpdateConventionAspId {
        convention_id: ConventionId,
        new_asp_id: AspId,
    },
    UpdateConventionSiretSignature {
        convention_id: ConventionId,
        new_siret_signature: String,
    },
    ReactivateConvention {
        convention_id: ConventionId,
    },
    /// One batched write for the whole deactivation wave, stamping the grace
    /// period start.
    DeactivateConventions {
        convention_ids: Vec<ConventionId>,
        deactivated_at: DateTime<Utc>,
    },
    /// Cascades the convention's financial annexes.
    DeleteConvention {
        convention_id: ConventionId,
    },
    CreateAnnex(NewAnnex),
    /// Only fields that actually changed are set.
    UpdateAnnex {
        annex_id: AnnexId,
        state: Option<AnnexState>,
        start_at: Option<NaiveDate>,
        end_at: Option<NaiveDate>,
    },
    RelinkAnnex {
        annex_id: AnnexId,
        convention_id: ConventionId,
    },
    DeleteAnnex {
        annex_id: AnnexId,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewStructure {
    pub siret: String,
    pub kind: StructureKind,
    pub source: StructureSource,
    pub name: String,
    pub auth_email: String,
    pub phone: String,
    pub address_line_1: String,
    pub address_line_2: String,
    pub post_code: String,
    pub city: String,
    pub department: String,
    pub coords: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewConvention {
    pub asp_id: AspId,
    pub kind: StructureKind,
    pub siret_signature: String,
    pub is_active: bool,
    pub deactivated_at: Option<DateTime<Utc>>,
    /// The ASP structure to link on creation.
    pub structure_id: StructureId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewAnnex {
    pub number: String,
    pub state: AnnexState,
    pub start_at: NaiveDate,
    pub end_at: NaiveDate,
    pub convention_id: ConventionId,
}

impl Command {
    /// Short human description for the run log.
    pub fn describe(&self) -> String {
        match self {
            Self::CreateStructure(new) => {
                format!("create structure siret={} kind={}", new.siret, new.kind)
            }
            Self::UpdateStructureSiret { structure_id, new_siret } => {
                format!("update structure id={structure_id} siret={new_siret}")
            }
            Self::UpdateStructureAuthEmail { structure_id, .. } => {
                format!("update structure id={structure_id} auth_email")
            }
            Self::ConvertStructureSource { structure_id, new_source, .. } => {
                format!("convert structure id={structure_id} to source={new_source}")
            }
            Self::DeleteStructure { structure_id } => {
                format!("delete structure id={structure_id}")
            }
            Self::CreateConvention(new) => {
                format!("create convention asp_id={} kind={}", new.asp_id, new.kind)
            }
            Self::UpdateConventionAspId { convention_id, new_asp_id } => {
                format!("update convention id={convention_id} asp_id={new_asp_id}")
            }
            Self::UpdateConventionSiretSignature { convention_id, .. } => {
                format!("update convention id={convention_id} siret_signature")
            }
            Self::ReactivateConvention { convention_id } => {
                format!("reactivate convention id={convention_id}")
            }
            Self::DeactivateConventions { convention_ids, .. } => {
                format!("deactivate {} convention(s)", convention_ids.len())
            }
            Self::DeleteConvention { convention_id } => {
                format!("delete convention id={convention_id}")
            }
            Self::CreateAnnex(new) => format!("create financial annex number={}", new.number),
            Self::UpdateAnnex { annex_id, .. } => format!("update financial annex id={annex_id}"),
            Self::RelinkAnnex { annex_id, convention_id } => {
                format!("relink financial annex id={annex_id} to convention id={convention_id}")
            }
            Self::DeleteAnnex { annex_id } => format!("delete financial annex id={annex_id}"),
        }
    }
}

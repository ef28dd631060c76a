use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::kinds::StructureKind;
use crate::{siren_of, AspId, ConventionId};

/// Internal abstraction of one (possibly several merged) real-world subsidy
/// authorization(s) for an (asp_id, kind) pair.
///
/// `is_active` would ideally be derived, but ASP data is routinely weeks or
/// months late for some departments, so staff can manually reactivate a
/// convention and the field has to be stored. It is written only by the sync
/// engine and by staff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Convention {
    pub id: ConventionId,
    /// External identifier in ASP data, intended immutable. Unique together
    /// with `kind`: one SIRET holding both an EI and an ACI shares a single
    /// asp_id on the ASP side, hence two conventions here.
    pub asp_id: AspId,
    pub kind: StructureKind,
    /// "SIRET à la signature". Changes legitimately across exports, unlike
    /// the asp_id which is not supposed to.
    pub siret_signature: String,
    pub is_active: bool,
    /// Grace period starts here. Set whenever `is_active` is false.
    pub deactivated_at: Option<DateTime<Utc>>,
    /// Manual staff reactivation marker. Protects the convention from being
    /// flipped right back by the next sync run.
    pub reactivated_by: Option<String>,
    pub reactivated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Convention {
    pub fn siren_signature(&self) -> &str {
        siren_of(&self.siret_signature)
    }

    /// Natural key in ASP data.
    pub fn key(&self) -> (AspId, StructureKind) {
        (self.asp_id, self.kind)
    }
}

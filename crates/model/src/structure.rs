use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::convention::Convention;
use crate::kinds::{StructureKind, StructureSource};
use crate::{siren_of, ConventionId, StructureId};

/// A subsidized-employment organization.
///
/// Structures carry two different SIRET numbers in ASP data: the "SIRET
/// actualisé" stored here (changes whenever the structure moves) and the
/// "SIRET à la signature" stored on the convention (almost never changes).
/// Both are kept up to date by the weekly sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Structure {
    pub id: StructureId,
    pub siret: String,
    pub kind: StructureKind,
    pub source: StructureSource,
    pub name: String,
    /// Contact email from the export; required for the secure signup flow of
    /// a structure without members. May be empty.
    pub auth_email: String,
    pub phone: String,
    pub address_line_1: String,
    pub address_line_2: String,
    pub post_code: String,
    pub city: String,
    pub department: String,
    /// Set when geocoding succeeded; drives search visibility.
    pub coords: Option<(f64, f64)>,
    pub convention_id: Option<ConventionId>,
    pub created_at: DateTime<Utc>,
}

impl Structure {
    pub fn siren(&self) -> &str {
        siren_of(&self.siret)
    }

    /// Unique together with `siret`.
    pub fn unique_key(&self) -> (&str, StructureKind) {
        (&self.siret, self.kind)
    }

    pub fn should_have_convention(&self) -> bool {
        self.kind.has_convention()
    }

    /// Whether the structure is currently active.
    ///
    /// Kinds outside the convention regime are always active. Staff-created
    /// structures are active until the sync eventually converts them to ASP
    /// source. Everything else follows its convention.
    pub fn is_active(&self, convention: Option<&Convention>) -> bool {
        if !self.should_have_convention() {
            return true;
        }
        if self.source == StructureSource::StaffCreated {
            return true;
        }
        convention.is_some_and(|c| c.is_active)
    }

    /// End of the partial-access window after deactivation. `None` while the
    /// structure is active. A conventioned structure that lost its convention
    /// entirely is considered immediately past its grace period.
    pub fn grace_period_end(
        &self,
        convention: Option<&Convention>,
        as_of: DateTime<Utc>,
        grace_days: i64,
    ) -> Option<DateTime<Utc>> {
        if self.is_active(convention) {
            return None;
        }
        let deactivated_at = convention.and_then(|c| c.deactivated_at);
        match deactivated_at {
            Some(start) => Some(start + Duration::days(grace_days)),
            None => Some(as_of - Duration::days(1)),
        }
    }

    pub fn grace_period_has_expired(
        &self,
        convention: Option<&Convention>,
        as_of: DateTime<Utc>,
        grace_days: i64,
    ) -> bool {
        match self.grace_period_end(convention, as_of, grace_days) {
            Some(end) => as_of > end,
            None => false,
        }
    }

    pub fn address_on_one_line(&self) -> String {
        let mut line = self.address_line_1.clone();
        if !self.address_line_2.is_empty() {
            line.push_str(", ");
            line.push_str(&self.address_line_2);
        }
        line.push_str(", ");
        line.push_str(&self.post_code);
        line.push(' ');
        line.push_str(&self.city);
        line
    }
}

// ---------------------------------------------------------------------------
// Collaborator data read by the sync engine
// ---------------------------------------------------------------------------

/// A user's membership in a structure. Read-only for the sync engine: it
/// only needs to know whether members exist and whether any is active.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Membership {
    pub structure_id: StructureId,
    pub user: String,
    pub is_active: bool,
}

/// Per-structure counts of attached business data, used by the deletability
/// predicate. Owned by other subsystems; the sync engine only reads them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFootprint {
    pub evaluation_count: u32,
    /// Job applications in any state other than "new".
    pub advanced_job_application_count: u32,
    /// Eligibility diagnoses tied to an issued approval.
    pub diagnosis_with_approval_count: u32,
}

impl DataFootprint {
    pub fn is_empty(&self) -> bool {
        self.evaluation_count == 0
            && self.advanced_job_application_count == 0
            && self.diagnosis_with_approval_count == 0
    }
}

// ---------------------------------------------------------------------------
// Address helpers
// ---------------------------------------------------------------------------

/// Extract the department from a postal code, when possible.
///
/// Corsican post codes split into 2A/2B; overseas departments use three
/// digits.
pub fn department_from_postcode(post_code: &str) -> String {
    if post_code.is_empty() {
        return String::new();
    }
    if post_code.starts_with("20") {
        return if ["200", "201", "207"].iter().any(|p| post_code.starts_with(p)) {
            "2A".to_string()
        } else if ["202", "204", "206"].iter().any(|p| post_code.starts_with(p)) {
            "2B".to_string()
        } else {
            String::new()
        };
    }
    if post_code.starts_with("97") || post_code.starts_with("98") {
        return post_code.chars().take(3).collect();
    }
    post_code.chars().take(2).collect()
}

//! `tremplin-model` — persisted domain records of the SIAE referential.
//!
//! Pure types crate: no IO, no store access. Activity and grace-period
//! derivations take an explicit `as_of` instant so callers stay
//! deterministic under a pinned clock.

pub mod annex;
pub mod convention;
pub mod kinds;
pub mod structure;

pub use annex::{is_valid_annex_number, AnnexState, FinancialAnnex};
pub use convention::Convention;
pub use kinds::{StructureKind, StructureSource};
pub use structure::{department_from_postcode, DataFootprint, Membership, Structure};

/// Row identifiers, assigned by the store.
pub type StructureId = i64;
pub type ConventionId = i64;
pub type AnnexId = i64;

/// External identifier of a structure in ASP data ("ID Structure").
/// Supposed to be immutable; the sync engine copes when it is not.
pub type AspId = i64;

/// A well-formed SIRET is exactly 14 ASCII digits.
pub fn is_valid_siret(siret: &str) -> bool {
    siret.len() == 14 && siret.bytes().all(|b| b.is_ascii_digit())
}

/// The SIREN is the first 9 digits of a SIRET.
pub fn siren_of(siret: &str) -> &str {
    &siret[..9]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn siret_validation() {
        assert!(is_valid_siret("21540323900019"));
        assert!(!is_valid_siret("2154032390001"));
        assert!(!is_valid_siret("2154032390001X"));
        assert!(!is_valid_siret(""));
    }

    #[test]
    fn siren_is_first_nine_digits() {
        assert_eq!(siren_of("21540323900019"), "215403239");
    }
}

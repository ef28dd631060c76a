use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Structure kind
// ---------------------------------------------------------------------------

/// Kind of a structure ("mesure" in ASP terms).
///
/// The first five kinds are subject to the convention / financial annex
/// regime; the others are tracked from separate exports and carry no
/// convention logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StructureKind {
    Aci,
    Ai,
    Ei,
    Eiti,
    Etti,
    Ea,
    Eatt,
    Geiq,
    Opcs,
}

/// Kinds subject to the convention regime.
pub const CONVENTIONED_KINDS: [StructureKind; 5] = [
    StructureKind::Aci,
    StructureKind::Ai,
    StructureKind::Ei,
    StructureKind::Eiti,
    StructureKind::Etti,
];

impl StructureKind {
    pub fn has_convention(self) -> bool {
        CONVENTIONED_KINDS.contains(&self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aci => "ACI",
            Self::Ai => "AI",
            Self::Ei => "EI",
            Self::Eiti => "EITI",
            Self::Etti => "ETTI",
            Self::Ea => "EA",
            Self::Eatt => "EATT",
            Self::Geiq => "GEIQ",
            Self::Opcs => "OPCS",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ACI" => Some(Self::Aci),
            "AI" => Some(Self::Ai),
            "EI" => Some(Self::Ei),
            "EITI" => Some(Self::Eiti),
            "ETTI" => Some(Self::Etti),
            "EA" => Some(Self::Ea),
            "EATT" => Some(Self::Eatt),
            "GEIQ" => Some(Self::Geiq),
            "OPCS" => Some(Self::Opcs),
            _ => None,
        }
    }
}

impl std::fmt::Display for StructureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Structure source
// ---------------------------------------------------------------------------

/// Where a structure record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StructureSource {
    /// ASP fluxIAE export, owned by the sync engine.
    Asp,
    /// GEIQ export.
    Geiq,
    /// EA + EATT export.
    EaEatt,
    /// Antenna created by an employer. Never auto-deleted.
    UserCreated,
    /// Created by staff while waiting for ASP data to catch up.
    StaffCreated,
}

impl StructureSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asp => "ASP",
            Self::Geiq => "GEIQ",
            Self::EaEatt => "EA_EATT",
            Self::UserCreated => "USER_CREATED",
            Self::StaffCreated => "STAFF_CREATED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ASP" => Some(Self::Asp),
            "GEIQ" => Some(Self::Geiq),
            "EA_EATT" => Some(Self::EaEatt),
            "USER_CREATED" => Some(Self::UserCreated),
            "STAFF_CREATED" => Some(Self::StaffCreated),
            _ => None,
        }
    }
}

impl std::fmt::Display for StructureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conventioned_kinds() {
        assert!(StructureKind::Aci.has_convention());
        assert!(StructureKind::Etti.has_convention());
        assert!(!StructureKind::Geiq.has_convention());
        assert!(!StructureKind::Ea.has_convention());
    }

    #[test]
    fn kind_round_trip() {
        for kind in CONVENTIONED_KINDS {
            assert_eq!(StructureKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(StructureKind::parse("XXX"), None);
    }

    #[test]
    fn source_round_trip() {
        assert_eq!(
            StructureSource::parse("STAFF_CREATED"),
            Some(StructureSource::StaffCreated)
        );
        assert_eq!(StructureSource::parse(""), None);
    }
}

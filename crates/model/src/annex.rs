use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::{AnnexId, ConventionId};

// ---------------------------------------------------------------------------
// Annex state
// ---------------------------------------------------------------------------

/// State of a financial annex in ASP data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnnexState {
    #[serde(rename = "VALIDE")]
    Valid,
    #[serde(rename = "PROVISOIRE")]
    Provisional,
    #[serde(rename = "HISTORISE")]
    Archived,
    #[serde(rename = "ANNULE")]
    Cancelled,
    #[serde(rename = "SAISI")]
    Entered,
    #[serde(rename = "BROUILLON")]
    Draft,
    #[serde(rename = "CLOTURE")]
    Closed,
    #[serde(rename = "REJETE")]
    Rejected,
}

impl AnnexState {
    /// Only valid and provisional annexes count toward convention activity.
    pub fn is_active(self) -> bool {
        matches!(self, Self::Valid | Self::Provisional)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Valid => "VALIDE",
            Self::Provisional => "PROVISOIRE",
            Self::Archived => "HISTORISE",
            Self::Cancelled => "ANNULE",
            Self::Entered => "SAISI",
            Self::Draft => "BROUILLON",
            Self::Closed => "CLOTURE",
            Self::Rejected => "REJETE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "VALIDE" => Some(Self::Valid),
            "PROVISOIRE" => Some(Self::Provisional),
            "HISTORISE" => Some(Self::Archived),
            "ANNULE" => Some(Self::Cancelled),
            "SAISI" => Some(Self::Entered),
            "BROUILLON" => Some(Self::Draft),
            "CLOTURE" => Some(Self::Closed),
            "REJETE" => Some(Self::Rejected),
            _ => None,
        }
    }
}

impl std::fmt::Display for AnnexState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Financial annex
// ---------------------------------------------------------------------------

/// A time-boxed subsidy allocation attached to a convention.
///
/// An annex number is structured as e.g. `ACI051170013A0M1`:
/// - `ACI` is the measure (structure kind),
/// - `051` the department (sometimes two digits and a letter),
/// - `17` the last two digits of the vintage year,
/// - `0013` the sequence number,
/// - `A0` the amendment number, `M1` the modification number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialAnnex {
    pub id: AnnexId,
    /// Globally unique.
    pub number: String,
    pub state: AnnexState,
    pub start_at: NaiveDate,
    pub end_at: NaiveDate,
    /// An annex never exists without a valid convention; it is cascade
    /// deleted with it.
    pub convention_id: ConventionId,
}

impl FinancialAnnex {
    /// Everything before the amendment/modification suffix.
    pub fn number_prefix(&self) -> &str {
        &self.number[..self.number.len().saturating_sub(4)]
    }

    /// The `A<n>M<n>` suffix.
    pub fn number_suffix(&self) -> &str {
        &self.number[self.number.len().saturating_sub(4)..]
    }

    /// Active = active state and an end date not yet past.
    pub fn is_active(&self, as_of: NaiveDate) -> bool {
        self.state.is_active() && self.end_at >= as_of
    }
}

/// Loose shape check for an annex number: measure prefix, digits and an
/// `A<n>M<n>` suffix. The sync engine only requires uniqueness; this guards
/// against obviously truncated export rows.
pub fn is_valid_annex_number(number: &str) -> bool {
    if number.len() < 10 || !number.is_ascii() {
        return false;
    }
    let suffix = &number[number.len() - 4..];
    let bytes = suffix.as_bytes();
    bytes[0] == b'A'
        && bytes[1].is_ascii_digit()
        && bytes[2] == b'M'
        && bytes[3].is_ascii_digit()
        && number.chars().take(2).all(|c| c.is_ascii_uppercase())
}

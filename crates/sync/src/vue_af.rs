use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use serde::Serialize;

use tremplin_model::{AnnexState, AspId, StructureKind};

/// One row of the "Vue AF" export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnnexRow {
    /// Globally unique structured number, e.g. `ACI051170013A0M1`.
    pub number: String,
    pub kind: StructureKind,
    pub asp_id: AspId,
    pub start_at: NaiveDate,
    pub end_at: NaiveDate,
    pub state: AnnexState,
}

impl AnnexRow {
    pub fn has_active_state(&self) -> bool {
        self.state.is_active()
    }

    /// Active = active state and an end date not yet past at `as_of`.
    pub fn is_active(&self, as_of: NaiveDate) -> bool {
        self.has_active_state() && self.end_at >= as_of
    }

    pub fn key(&self) -> CandidateKey {
        (self.asp_id, self.kind)
    }
}

/// Natural key of a convention in ASP data.
pub type CandidateKey = (AspId, StructureKind);

/// What the latest export says about one (asp_id, kind) pair.
///
/// `is_active` is always derived from these two fields at evaluation time,
/// never cached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConventionCandidate {
    pub has_active_state: bool,
    pub end_at: NaiveDate,
}

impl ConventionCandidate {
    pub fn is_active(&self, as_of: NaiveDate) -> bool {
        self.has_active_state && self.end_at >= as_of
    }
}

/// Group annex rows by (asp_id, kind) and keep one canonical candidate per
/// key: prefer a row active at `as_of`, then the latest end date.
pub fn resolve_candidates(
    rows: &[AnnexRow],
    as_of: NaiveDate,
) -> HashMap<CandidateKey, ConventionCandidate> {
    let mut candidates: HashMap<CandidateKey, ConventionCandidate> = HashMap::new();
    for row in rows {
        let candidate = ConventionCandidate {
            has_active_state: row.has_active_state(),
            end_at: row.end_at,
        };
        candidates
            .entry(row.key())
            .and_modify(|best| {
                let row_wins = match (candidate.is_active(as_of), best.is_active(as_of)) {
                    (true, false) => true,
                    (false, true) => false,
                    _ => candidate.end_at > best.end_at,
                };
                if row_wins {
                    *best = candidate;
                }
            })
            .or_insert(candidate);
    }
    candidates
}

/// The "should exist" key set: keys whose canonical candidate is active.
pub fn active_keys(
    candidates: &HashMap<CandidateKey, ConventionCandidate>,
    as_of: NaiveDate,
) -> HashSet<CandidateKey> {
    candidates
        .iter()
        .filter(|(_, c)| c.is_active(as_of))
        .map(|(&key, _)| key)
        .collect()
}

/// Collapse duplicate annex numbers to the most relevant row.
///
/// The same number can appear on rows of two merged structures, or on minor
/// revisions that did not bump the modification suffix. Order by
/// (is_active desc, has_active_state desc, end_at desc) and keep the first
/// row per number.
pub fn dedupe_by_number<'a>(
    rows: &'a [AnnexRow],
    as_of: NaiveDate,
) -> HashMap<&'a str, &'a AnnexRow> {
    let mut sorted: Vec<&AnnexRow> = rows.iter().collect();
    sorted.sort_by_key(|row| {
        (
            std::cmp::Reverse(row.is_active(as_of)),
            std::cmp::Reverse(row.has_active_state()),
            std::cmp::Reverse(row.end_at),
        )
    });

    let mut by_number: HashMap<&str, &AnnexRow> = HashMap::new();
    for row in sorted {
        by_number.entry(row.number.as_str()).or_insert(row);
    }
    by_number
}

#[cfg(test)]
pub(crate) fn test_annex_row(
    number: &str,
    asp_id: AspId,
    kind: StructureKind,
    state: AnnexState,
    end_at: NaiveDate,
) -> AnnexRow {
    AnnexRow {
        number: number.to_string(),
        kind,
        asp_id,
        start_at: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
        end_at,
        state,
    }
}

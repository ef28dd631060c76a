use std::collections::HashMap;

use serde::Serialize;

use tremplin_model::AspId;

/// One row of the "Vue Structure" export. Ephemeral, rebuilt every run.
///
/// Carries most structure data except the kind, which only exists in the
/// Vue AF export (a single ASP structure can hold several kinds, one
/// convention each).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureRow {
    /// "SIRET actualisé" — current SIRET, changes when the structure moves.
    pub siret: String,
    /// "SIRET à la signature" — SIRET at convention signature time.
    pub siret_signature: String,
    pub asp_id: AspId,
    pub auth_email: String,
    pub name: String,
    pub street_num: String,
    pub street_num_extra: String,
    pub street_type: String,
    pub street_name: String,
    pub extra1: String,
    pub extra2: String,
    pub extra3: String,
    pub post_code: String,
    pub city: String,
    pub phone: String,
}

/// Lookup index over the latest Vue Structure export, keyed by current SIRET
/// and by asp_id. Pure function of the export; consumed by every downstream
/// phase.
#[derive(Debug, Default)]
pub struct VueStructure {
    rows: Vec<StructureRow>,
    by_siret: HashMap<String, usize>,
    by_asp_id: HashMap<AspId, usize>,
}

impl VueStructure {
    /// A SIRET or asp_id appearing twice keeps the last row seen, matching
    /// the export convention that later rows supersede earlier ones.
    pub fn from_rows(rows: Vec<StructureRow>) -> Self {
        let mut by_siret = HashMap::with_capacity(rows.len());
        let mut by_asp_id = HashMap::with_capacity(rows.len());
        for (i, row) in rows.iter().enumerate() {
            by_siret.insert(row.siret.clone(), i);
            by_asp_id.insert(row.asp_id, i);
        }
        Self { rows, by_siret, by_asp_id }
    }

    pub fn row_for_siret(&self, siret: &str) -> Option<&StructureRow> {
        self.by_siret.get(siret).map(|&i| &self.rows[i])
    }

    pub fn row_for_asp_id(&self, asp_id: AspId) -> Option<&StructureRow> {
        self.by_asp_id.get(&asp_id).map(|&i| &self.rows[i])
    }

    pub fn asp_id_for_siret(&self, siret: &str) -> Option<AspId> {
        self.row_for_siret(siret).map(|row| row.asp_id)
    }

    pub fn siret_signature_for_asp_id(&self, asp_id: AspId) -> Option<&str> {
        self.row_for_asp_id(asp_id).map(|row| row.siret_signature.as_str())
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
pub(crate) fn test_row(asp_id: AspId, siret: &str) -> StructureRow {
    StructureRow {
        siret: siret.to_string(),
        siret_signature: siret.to_string(),
        asp_id,
        auth_email: format!("contact{asp_id}@example.com"),
        name: format!("Structure {asp_id}"),
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

//! "bytes → ordered sequence of typed rows" for the two fluxIAE exports.
//!
//! The files are pipe-delimited with dd/mm/yyyy dates. Rows whose measure
//! code is outside the convention regime (FDI and friends) are filtered out
//! here, not treated as errors.

use chrono::NaiveDate;

use tremplin_model::{is_valid_annex_number, is_valid_siret, AnnexState, StructureKind};

use crate::error::SyncError;
use crate::vue_af::AnnexRow;
use crate::vue_structure::StructureRow;

const VUE_STRUCTURE: &str = "vue_structure";
const VUE_AF: &str = "vue_af";

const DATE_FORMAT: &str = "%d/%m/%Y";

/// Drop leading/trailing whitespace and merge consecutive spaces.
pub fn clean_string(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

struct Header {
    file: &'static str,
    columns: Vec<String>,
}

impl Header {
    fn index_of(&self, name: &'static str) -> Result<usize, SyncError> {
        self.columns
            .iter()
            .position(|c| c == name)
            .ok_or(SyncError::MissingColumn { file: self.file, column: name })
    }
}

fn reader_for(data: &str) -> csv::Reader<&[u8]> {
    csv::ReaderBuilder::new()
        .delimiter(b'|')
        .has_headers(true)
        .from_reader(data.as_bytes())
}

fn read_header(
    file: &'static str,
    reader: &mut csv::Reader<&[u8]>,
) -> Result<Header, SyncError> {
    let columns = reader
        .headers()
        .map_err(|e| SyncError::Csv { file, message: e.to_string() })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    Ok(Header { file, columns })
}

/// Load "Vue Structure" rows.
pub fn load_structure_rows(data: &str) -> Result<Vec<StructureRow>, SyncError> {
    let mut reader = reader_for(data);
    let header = read_header(VUE_STRUCTURE, &mut reader)?;

    let siret = header.index_of("structure_siret_actualise")?;
    let siret_signature = header.index_of("structure_siret_signature")?;
    let asp_id = header.index_of("structure_id_siae")?;
    let auth_email = header.index_of("structure_adresse_mail_corresp_technique")?;
    let name = header.index_of("structure_denomination")?;
    let street_num = header.index_of("structure_adresse_admin_numero")?;
    let street_num_extra = header.index_of("structure_adresse_admin_cplt_numero")?;
    let street_type = header.index_of("structure_adresse_admin_type_voie")?;
    let street_name = header.index_of("structure_adresse_admin_nom_voie")?;
    let extra1 = header.index_of("structure_adresse_admin_cplt_1")?;
    let extra2 = header.index_of("structure_adresse_admin_cplt_2")?;
    let extra3 = header.index_of("structure_adresse_admin_cplt_3")?;
    let post_code = header.index_of("structure_adresse_admin_code_postal")?;
    let city = header.index_of("structure_adresse_admin_commune")?;
    let phone = header.index_of("structure_telephone")?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| SyncError::Csv { file: VUE_STRUCTURE, message: e.to_string() })?;
        let field = |i: usize| clean_string(record.get(i).unwrap_or(""));

        let siret_value = field(siret);
        if !is_valid_siret(&siret_value) {
            return Err(SyncError::FieldParse {
                file: VUE_STRUCTURE,
                record: siret_value.clone(),
                field: "structure_siret_actualise",
                value: siret_value,
            });
        }
        let siret_signature_value = field(siret_signature);
        if !is_valid_siret(&siret_signature_value) {
            return Err(SyncError::FieldParse {
                file: VUE_STRUCTURE,
                record: siret_value.clone(),
                field: "structure_siret_signature",
                value: siret_signature_value,
            });
        }

        let asp_id_value = field(asp_id);
        let asp_id_parsed = asp_id_value.parse().map_err(|_| SyncError::FieldParse {
            file: VUE_STRUCTURE,
            record: siret_value.clone(),
            field: "structure_id_siae",
            value: asp_id_value,
        })?;

        rows.push(StructureRow {
            siret: siret_value,
            siret_signature: siret_signature_value,
            asp_id: asp_id_parsed,
            auth_email: field(auth_email),
            name: field(name),
            street_num: field(street_num),
            street_num_extra: field(street_num_extra),
            street_type: field(street_type),
            street_name: field(street_name),
            extra1: field(extra1),
            extra2: field(extra2),
            extra3: field(extra3),
            post_code: field(post_code),
            city: field(city),
            phone: field(phone),
        });
    }
    Ok(rows)
}

/// Load "Vue AF" rows. Measure codes look like `ACI_DC`; rows for measures
/// outside the convention regime are skipped.
pub fn load_annex_rows(data: &str) -> Result<Vec<AnnexRow>, SyncError> {
    let mut reader = reader_for(data);
    let header = read_header(VUE_AF, &mut reader)?;

    let number = header.index_of("af_numero_annexe_financiere")?;
    let measure = header.index_of("af_mesure_dispositif_code")?;
    let asp_id = header.index_of("af_id_structure")?;
    let start_at = header.index_of("af_date_debut_effet")?;
    let end_at = header.index_of("af_date_fin_effet")?;
    let state = header.index_of("af_etat_annexe_financiere_code")?;

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| SyncError::Csv { file: VUE_AF, message: e.to_string() })?;
        let field = |i: usize| clean_string(record.get(i).unwrap_or(""));

        let number_value = field(number);

        let measure_value = field(measure);
        let kind_code = measure_value.strip_suffix("_DC").unwrap_or(&measure_value);
        let Some(kind) = StructureKind::parse(kind_code) else {
            continue;
        };
        if !kind.has_convention() {
            continue;
        }

        if !is_valid_annex_number(&number_value) {
            return Err(SyncError::FieldParse {
                file: VUE_AF,
                record: number_value.clone(),
                field: "af_numero_annexe_financiere",
                value: number_value,
            });
        }

        let parse_date = |field_name: &'static str, value: String| {
            NaiveDate::parse_from_str(&value, DATE_FORMAT).map_err(|_| SyncError::FieldParse {
                file: VUE_AF,
                record: number_value.clone(),
                field: field_name,
                value,
            })
        };

        let asp_id_value = field(asp_id);
        let asp_id_parsed = asp_id_value.parse().map_err(|_| SyncError::FieldParse {
            file: VUE_AF,
            record: number_value.clone(),
            field: "af_id_structure",
            value: asp_id_value,
        })?;

        let state_value = field(state);
        let state_parsed = AnnexState::parse(&state_value).ok_or_else(|| SyncError::FieldParse {
            file: VUE_AF,
            record: number_value.clone(),
            field: "af_etat_annexe_financiere_code",
            value: state_value,
        })?;

        let start_parsed = parse_date("af_date_debut_effet", field(start_at))?;
        let end_parsed = parse_date("af_date_fin_effet", field(end_at))?;

        rows.push(AnnexRow {
            kind,
            asp_id: asp_id_parsed,
            start_at: start_parsed,
            end_at: end_parsed,
            state: state_parsed,
            number: number_value,
        });
    }
    Ok(rows)
}

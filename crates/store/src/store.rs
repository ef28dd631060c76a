use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use tremplin_model::{
    AnnexState, Convention, DataFootprint, FinancialAnnex, Membership, Structure, StructureId,
    StructureKind, StructureSource,
};
use tremplin_sync::{Command, State};

use crate::schema::SCHEMA;

const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug)]
pub enum StoreError {
    Sqlite(rusqlite::Error),
    /// A stored value no model variant accepts.
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sqlite(e) => write!(f, "sqlite error: {e}"),
            Self::Corrupt(msg) => write!(f, "corrupt store: {msg}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Sqlite(e)
    }
}

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        conn.pragma_update(None, "foreign_keys", "ON")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self { conn })
    }

    /// Escape hatch for collaborator subsystems and tests.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    // -----------------------------------------------------------------------
    // Snapshot load
    // -----------------------------------------------------------------------

    pub fn load_state(&self) -> Result<State, StoreError> {
        Ok(State::new(
            self.load_structures()?,
            self.load_conventions()?,
            self.load_annexes()?,
            self.load_memberships()?,
            self.load_footprints()?,
        ))
    }

    fn load_structures(&self) -> Result<Vec<Structure>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, siret, kind, source, name, auth_email, phone, address_line_1, \
             address_line_2, post_code, city, department, latitude, longitude, convention_id, \
             created_at FROM structures ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?,
                row.get::<_, String>(9)?,
                row.get::<_, String>(10)?,
                row.get::<_, String>(11)?,
                row.get::<_, Option<f64>>(12)?,
                row.get::<_, Option<f64>>(13)?,
                row.get::<_, Option<i64>>(14)?,
                row.get::<_, String>(15)?,
            ))
        })?;

        let mut structures = Vec::new();
        for row in rows {
            let (
                id,
                siret,
                kind,
                source,
                name,
                auth_email,
                phone,
                address_line_1,
                address_line_2,
                post_code,
                city,
                department,
                latitude,
                longitude,
                convention_id,
                created_at,
            ) = row?;
            structures.push(Structure {
                id,
                siret,
                kind: parse_kind(&kind)?,
                source: StructureSource::parse(&source)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown source '{source}'")))?,
                name,
                auth_email,
                phone,
                address_line_1,
                address_line_2,
                post_code,
                city,
                department,
                coords: match (latitude, longitude) {
                    (Some(lat), Some(lon)) => Some((lat, lon)),
                    _ => None,
                },
                convention_id,
                created_at: parse_datetime(&created_at)?,
            });
        }
        Ok(structures)
    }

    fn load_conventions(&self) -> Result<Vec<Convention>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, asp_id, kind, siret_signature, is_active, deactivated_at, \
             reactivated_by, reactivated_at, created_at FROM conventions ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, bool>(4)?,
                row.get::<_, Option<String>>(5)?,
                row.get::<_, Option<String>>(6)?,
                row.get::<_, Option<String>>(7)?,
                row.get::<_, String>(8)?,
            ))
        })?;

        let mut conventions = Vec::new();
        for row in rows {
            let (id, asp_id, kind, siret_signature, is_active, deactivated_at, reactivated_by, reactivated_at, created_at) = row?;
            conventions.push(Convention {
                id,
                asp_id,
                kind: parse_kind(&kind)?,
                siret_signature,
                is_active,
                deactivated_at: deactivated_at.as_deref().map(parse_datetime).transpose()?,
                reactivated_by,
                reactivated_at: reactivated_at.as_deref().map(parse_datetime).transpose()?,
                created_at: parse_datetime(&created_at)?,
            });
        }
        Ok(conventions)
    }

    fn load_annexes(&self) -> Result<Vec<FinancialAnnex>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, number, state, start_at, end_at, convention_id \
             FROM financial_annexes ORDER BY id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, i64>(5)?,
            ))
        })?;

        let mut annexes = Vec::new();
        for row in rows {
            let (id, number, state, start_at, end_at, convention_id) = row?;
            annexes.push(FinancialAnnex {
                id,
                number,
                state: AnnexState::parse(&state)
                    .ok_or_else(|| StoreError::Corrupt(format!("unknown annex state '{state}'")))?,
                start_at: parse_date(&start_at)?,
                end_at: parse_date(&end_at)?,
                convention_id,
            });
        }
        Ok(annexes)
    }

    fn load_memberships(&self) -> Result<Vec<Membership>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT structure_id, user_name, is_active FROM memberships ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok(Membership {
                structure_id: row.get(0)?,
                user: row.get(1)?,
                is_active: row.get(2)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(StoreError::from)
    }

    fn load_footprints(&self) -> Result<HashMap<StructureId, DataFootprint>, StoreError> {
        let mut footprints: HashMap<StructureId, DataFootprint> = HashMap::new();

        let mut stmt = self
            .conn
            .prepare("SELECT structure_id, COUNT(*) FROM evaluations GROUP BY structure_id")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, u32>(1)?)))?;
        for row in rows {
            let (id, count) = row?;
            footprints.entry(id).or_default().evaluation_count = count;
        }

        let mut stmt = self.conn.prepare(
            "SELECT structure_id, COUNT(*) FROM job_applications WHERE state != 'new' \
             GROUP BY structure_id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, u32>(1)?)))?;
        for row in rows {
            let (id, count) = row?;
            footprints.entry(id).or_default().advanced_job_application_count = count;
        }

        let mut stmt = self.conn.prepare(
            "SELECT structure_id, COUNT(*) FROM eligibility_diagnoses WHERE has_approval = 1 \
             GROUP BY structure_id",
        )?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, u32>(1)?)))?;
        for row in rows {
            let (id, count) = row?;
            footprints.entry(id).or_default().diagnosis_with_approval_count = count;
        }

        Ok(footprints)
    }

    // -----------------------------------------------------------------------
    // Command replay
    // -----------------------------------------------------------------------

    /// Replay a command log produced by the engine.
    ///
    /// Ids are assigned with the same max+1 rule the in-memory snapshot
    /// uses, so commands referencing entities created earlier in the log
    /// resolve identically on both sides.
    pub fn apply_all(
        &mut self,
        commands: &[Command],
        now: DateTime<Utc>,
    ) -> Result<usize, StoreError> {
        let mut next_structure_id = self.next_id("structures")?;
        let mut next_convention_id = self.next_id("conventions")?;
        let mut next_annex_id = self.next_id("financial_annexes")?;

        for command in commands {
            let tx = self.conn.transaction()?;
            match command {
                Command::CreateStructure(new) => {
                    let id = next_structure_id;
                    next_structure_id += 1;
                    tx.execute(
                        "INSERT INTO structures (id, siret, kind, source, name, auth_email, \
                         phone, address_line_1, address_line_2, post_code, city, department, \
                         latitude, longitude, convention_id, created_at) \
                         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, \
                         NULL, ?15)",
                        params![
                            id,
                            new.siret,
                            new.kind.as_str(),
                            new.source.as_str(),
                            new.name,
                            new.auth_email,
                            new.phone,
                            new.address_line_1,
                            new.address_line_2,
                            new.post_code,
                            new.city,
                            new.department,
                            new.coords.map(|c| c.0),
                            new.coords.map(|c| c.1),
                            now.to_rfc3339(),
                        ],
                    )?;
                }
                Command::UpdateStructureSiret { structure_id, new_siret } => {
                    tx.execute(
                        "UPDATE structures SET siret = ?2 WHERE id = ?1",
                        params![structure_id, new_siret],
                    )?;
                }
                Command::UpdateStructureAuthEmail { structure_id, new_auth_email } => {
                    tx.execute(
                        "UPDATE structures SET auth_email = ?2 WHERE id = ?1",
                        params![structure_id, new_auth_email],
                    )?;
                }
                Command::ConvertStructureSource { structure_id, new_source, clear_convention } => {
                    if *clear_convention {
                        tx.execute(
                            "UPDATE structures SET source = ?2, convention_id = NULL WHERE id = ?1",
                            params![structure_id, new_source.as_str()],
                        )?;
                    } else {
                        tx.execute(
                            "UPDATE structures SET source = ?2 WHERE id = ?1",
                            params![structure_id, new_source.as_str()],
                        )?;
                    }
                }
                Command::DeleteStructure { structure_id } => {
                    tx.execute("DELETE FROM structures WHERE id = ?1", params![structure_id])?;
                }
                Command::CreateConvention(new) => {
                    let id = next_convention_id;
                    next_convention_id += 1;
                    // Creation and structure link are one transaction: a
                    // zero-structure convention must never become visible.
                    tx.execute(
                        "INSERT INTO conventions (id, asp_id, kind, siret_signature, is_active, \
                         deactivated_at, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                        params![
                            id,
                            new.asp_id,
                            new.kind.as_str(),
                            new.siret_signature,
                            new.is_active,
                            new.deactivated_at.map(|d| d.to_rfc3339()),
                            now.to_rfc3339(),
                        ],
                    )?;
                    tx.execute(
                        "UPDATE structures SET convention_id = ?2 WHERE id = ?1",
                        params![new.structure_id, id],
                    )?;
                }
                Command::UpdateConventionAspId { convention_id, new_asp_id } => {
                    tx.execute(
                        "UPDATE conventions SET asp_id = ?2 WHERE id = ?1",
                        params![convention_id, new_asp_id],
                    )?;
                }
                Command::UpdateConventionSiretSignature { convention_id, new_siret_signature } => {
                    tx.execute(
                        "UPDATE conventions SET siret_signature = ?2 WHERE id = ?1",
                        params![convention_id, new_siret_signature],
                    )?;
                }
                Command::ReactivateConvention { convention_id } => {
                    tx.execute(
                        "UPDATE conventions SET is_active = 1 WHERE id = ?1",
                        params![convention_id],
                    )?;
                }
                Command::DeactivateConventions { convention_ids, deactivated_at } => {
                    let mut stmt = tx.prepare(
                        "UPDATE conventions SET is_active = 0, deactivated_at = ?2 WHERE id = ?1",
                    )?;
                    for id in convention_ids {
                        stmt.execute(params![id, deactivated_at.to_rfc3339()])?;
                    }
                    drop(stmt);
                }
                Command::DeleteConvention { convention_id } => {
                    // The foreign key cascades the financial annexes.
                    tx.execute("DELETE FROM conventions WHERE id = ?1", params![convention_id])?;
                }
                Command::CreateAnnex(new) => {
                    let id = next_annex_id;
                    next_annex_id += 1;
                    tx.execute(
                        "INSERT INTO financial_annexes (id, number, state, start_at, end_at, \
                         convention_id) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        params![
                            id,
                            new.number,
                            new.state.as_str(),
                            new.start_at.format(DATE_FORMAT).to_string(),
                            new.end_at.format(DATE_FORMAT).to_string(),
                            new.convention_id,
                        ],
                    )?;
                }
                Command::UpdateAnnex { annex_id, state, start_at, end_at } => {
                    if let Some(state) = state {
                        tx.execute(
                            "UPDATE financial_annexes SET state = ?2 WHERE id = ?1",
                            params![annex_id, state.as_str()],
                        )?;
                    }
                    if let Some(start_at) = start_at {
                        tx.execute(
                            "UPDATE financial_annexes SET start_at = ?2 WHERE id = ?1",
                            params![annex_id, start_at.format(DATE_FORMAT).to_string()],
                        )?;
                    }
                    if let Some(end_at) = end_at {
                        tx.execute(
                            "UPDATE financial_annexes SET end_at = ?2 WHERE id = ?1",
                            params![annex_id, end_at.format(DATE_FORMAT).to_string()],
                        )?;
                    }
                }
                Command::RelinkAnnex { annex_id, convention_id } => {
                    tx.execute(
                        "UPDATE financial_annexes SET convention_id = ?2 WHERE id = ?1",
                        params![annex_id, convention_id],
                    )?;
                }
                Command::DeleteAnnex { annex_id } => {
                    tx.execute("DELETE FROM financial_annexes WHERE id = ?1", params![annex_id])?;
                }
            }
            tx.commit()?;
        }

        tracing::info!("applied {} command(s) to the store", commands.len());
        Ok(commands.len())
    }

    fn next_id(&self, table: &str) -> Result<i64, StoreError> {
        let max: Option<i64> = self
            .conn
            .query_row(&format!("SELECT MAX(id) FROM {table}"), [], |row| row.get(0))
            .optional()?
            .flatten();
        Ok(max.unwrap_or(0) + 1)
    }

    // -----------------------------------------------------------------------
    // Seeding (collaborator subsystems + tests)
    // -----------------------------------------------------------------------

    pub fn insert_structure(&self, structure: &Structure) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO structures (id, siret, kind, source, name, auth_email, phone, \
             address_line_1, address_line_2, post_code, city, department, latitude, longitude, \
             convention_id, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                structure.id,
                structure.siret,
                structure.kind.as_str(),
                structure.source.as_str(),
                structure.name,
                structure.auth_email,
                structure.phone,
                structure.address_line_1,
                structure.address_line_2,
                structure.post_code,
                structure.city,
                structure.department,
                structure.coords.map(|c| c.0),
                structure.coords.map(|c| c.1),
                structure.convention_id,
                structure.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_convention(&self, convention: &Convention) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO conventions (id, asp_id, kind, siret_signature, is_active, \
             deactivated_at, reactivated_by, reactivated_at, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                convention.id,
                convention.asp_id,
                convention.kind.as_str(),
                convention.siret_signature,
                convention.is_active,
                convention.deactivated_at.map(|d| d.to_rfc3339()),
                convention.reactivated_by,
                convention.reactivated_at.map(|d| d.to_rfc3339()),
                convention.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn insert_annex(&self, annex: &FinancialAnnex) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO financial_annexes (id, number, state, start_at, end_at, convention_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                annex.id,
                annex.number,
                annex.state.as_str(),
                annex.start_at.format(DATE_FORMAT).to_string(),
                annex.end_at.format(DATE_FORMAT).to_string(),
                annex.convention_id,
            ],
        )?;
        Ok(())
    }

    pub fn insert_membership(&self, membership: &Membership) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT INTO memberships (structure_id, user_name, is_active) VALUES (?1, ?2, ?3)",
            params![membership.structure_id, membership.user, membership.is_active],
        )?;
        Ok(())
    }
}

fn parse_kind(s: &str) -> Result<StructureKind, StoreError> {
    StructureKind::parse(s).ok_or_else(|| StoreError::Corrupt(format!("unknown kind '{s}'")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| StoreError::Corrupt(format!("bad timestamp '{s}'")))
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|_| StoreError::Corrupt(format!("bad date '{s}'")))
}

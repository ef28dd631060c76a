/// Referential schema.
///
/// `memberships`, `evaluations`, `job_applications` and
/// `eligibility_diagnoses` belong to other subsystems; the sync only reads
/// them (deletability predicate, signup audit) and cascades them away with
/// their structure.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conventions (
    id INTEGER PRIMARY KEY,
    asp_id INTEGER NOT NULL,
    kind TEXT NOT NULL,
    siret_signature TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    deactivated_at TEXT,
    reactivated_by TEXT,
    reactivated_at TEXT,
    created_at TEXT NOT NULL,
    UNIQUE (asp_id, kind)
);

CREATE TABLE IF NOT EXISTS structures (
    id INTEGER PRIMARY KEY,
    siret TEXT NOT NULL,
    kind TEXT NOT NULL,
    source TEXT NOT NULL,
    name TEXT NOT NULL,
    auth_email TEXT NOT NULL DEFAULT '',
    phone TEXT NOT NULL DEFAULT '',
    address_line_1 TEXT NOT NULL DEFAULT '',
    address_line_2 TEXT NOT NULL DEFAULT '',
    post_code TEXT NOT NULL DEFAULT '',
    city TEXT NOT NULL DEFAULT '',
    department TEXT NOT NULL DEFAULT '',
    latitude REAL,
    longitude REAL,
    convention_id INTEGER REFERENCES conventions(id),
    created_at TEXT NOT NULL,
    UNIQUE (siret, kind)
);

CREATE TABLE IF NOT EXISTS financial_annexes (
    id INTEGER PRIMARY KEY,
    number TEXT NOT NULL UNIQUE,
    state TEXT NOT NULL,
    start_at TEXT NOT NULL,
    end_at TEXT NOT NULL,
    convention_id INTEGER NOT NULL REFERENCES conventions(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS memberships (
    id INTEGER PRIMARY KEY,
    structure_id INTEGER NOT NULL REFERENCES structures(id) ON DELETE CASCADE,
    user_name TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS evaluations (
    id INTEGER PRIMARY KEY,
    structure_id INTEGER NOT NULL REFERENCES structures(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS job_applications (
    id INTEGER PRIMARY KEY,
    structure_id INTEGER NOT NULL REFERENCES structures(id) ON DELETE CASCADE,
    state TEXT NOT NULL DEFAULT 'new'
);

CREATE TABLE IF NOT EXISTS eligibility_diagnoses (
    id INTEGER PRIMARY KEY,
    structure_id INTEGER NOT NULL REFERENCES structures(id) ON DELETE CASCADE,
    has_approval INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_structures_convention ON structures(convention_id);
CREATE INDEX IF NOT EXISTS idx_annexes_convention ON financial_annexes(convention_id);
"#;

//! SQL schema definitions.

/// Complete schema for the v1 database.
pub const SCHEMA_V1: &str = r#"
-- ============================================================
-- Students & Locations
-- ============================================================

CREATE TABLE IF NOT EXISTS students (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    national_id TEXT NOT NULL,
    full_name TEXT NOT NULL,
    name_on_id TEXT NOT NULL DEFAULT '',
    email TEXT NOT NULL,
    phone TEXT,
    email_verified INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_students_national_id ON students(national_id);
CREATE UNIQUE INDEX IF NOT EXISTS ux_students_email ON students(email);

CREATE TABLE IF NOT EXISTS locations (
    student_id INTEGER PRIMARY KEY REFERENCES students(id) ON DELETE CASCADE,
    province_id INTEGER,
    district_id INTEGER,
    sub_district_id INTEGER,
    street TEXT NOT NULL DEFAULT '',
    updated_at INTEGER NOT NULL
);

-- ============================================================
-- Training catalog (read by enrollment, written by catalog CRUD)
-- ============================================================

CREATE TABLE IF NOT EXISTS trainings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    enrollment_opens_at INTEGER,
    enrollment_closes_at INTEGER,
    created_at INTEGER NOT NULL
);

-- ============================================================
-- Enrollments
-- ============================================================

CREATE TABLE IF NOT EXISTS enrollments (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id INTEGER NOT NULL REFERENCES students(id),
    training_id INTEGER NOT NULL REFERENCES trainings(id),
    enrolled_at INTEGER NOT NULL,
    UNIQUE (student_id, training_id)
);

CREATE INDEX IF NOT EXISTS idx_enrollments_training ON enrollments(training_id);

-- ============================================================
-- Verification tokens (digest only, never plaintext)
-- ============================================================

CREATE TABLE IF NOT EXISTS verification_tokens (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    digest BLOB NOT NULL UNIQUE,
    student_id INTEGER NOT NULL REFERENCES students(id),
    email TEXT NOT NULL,
    purpose TEXT NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    consumed INTEGER NOT NULL DEFAULT 0,
    superseded INTEGER NOT NULL DEFAULT 0,
    consumed_at INTEGER,
    created_ip TEXT,
    consumed_ip TEXT
);

CREATE INDEX IF NOT EXISTS idx_tokens_owner ON verification_tokens(student_id, purpose, consumed);
CREATE INDEX IF NOT EXISTS idx_tokens_expires ON verification_tokens(expires_at);
"#;

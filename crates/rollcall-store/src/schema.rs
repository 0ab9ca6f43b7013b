//! SQL schema for the identity gallery.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per identity. Re-enrollment overwrites the row in place.
CREATE TABLE IF NOT EXISTS identities (
    identity_id   TEXT PRIMARY KEY,
    display_name  TEXT NOT NULL,
    dimension     INTEGER NOT NULL,
    embedding     BLOB NOT NULL,    -- little-endian f32 x dimension
    enrolled_at   TEXT NOT NULL,    -- RFC 3339 UTC; kept across re-enrollment
    updated_at    TEXT NOT NULL     -- RFC 3339 UTC
);

PRAGMA user_version = 1;
";

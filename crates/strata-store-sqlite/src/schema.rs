//! SQL schema for the Strata catalog.
//!
//! Executed once at connection startup. User tables are created on demand by
//! the materializer and never appear here.

/// Catalog DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS strata_tables (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    owner            TEXT,
    name             TEXT NOT NULL UNIQUE,
    table_name       TEXT NOT NULL UNIQUE,   -- physical name; immutable
    display_name     TEXT NOT NULL,
    description      TEXT,
    icon             TEXT NOT NULL DEFAULT 'table',
    is_active        INTEGER NOT NULL DEFAULT 1,
    has_timestamps   INTEGER NOT NULL DEFAULT 1,
    has_soft_deletes INTEGER NOT NULL DEFAULT 0,
    api_enabled      INTEGER NOT NULL DEFAULT 1,
    settings         TEXT NOT NULL DEFAULT '{}',
    rules            TEXT NOT NULL DEFAULT '{}',
    schema_version   INTEGER NOT NULL DEFAULT 1,
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS strata_columns (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    table_id      INTEGER NOT NULL REFERENCES strata_tables(id),
    name          TEXT NOT NULL,
    display_name  TEXT NOT NULL,
    description   TEXT,
    column_type   TEXT NOT NULL,            -- logical type, see ColumnType
    required      INTEGER NOT NULL DEFAULT 0,
    is_unique     INTEGER NOT NULL DEFAULT 0,
    indexed       INTEGER NOT NULL DEFAULT 0,
    searchable    INTEGER NOT NULL DEFAULT 1,
    filterable    INTEGER NOT NULL DEFAULT 1,
    sortable      INTEGER NOT NULL DEFAULT 1,
    hidden        INTEGER NOT NULL DEFAULT 0,
    options       TEXT NOT NULL DEFAULT '[]',
    default_value TEXT,                     -- JSON or NULL
    position      INTEGER NOT NULL,
    UNIQUE (table_id, name)
);

-- Both endpoints must exist; a table row cannot be deleted while an edge
-- still references it.
CREATE TABLE IF NOT EXISTS strata_relationships (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    name            TEXT NOT NULL,
    kind            TEXT NOT NULL,          -- 'belongs_to' | 'has_many' | 'has_one'
    source_table_id INTEGER NOT NULL REFERENCES strata_tables(id),
    target_table_id INTEGER NOT NULL REFERENCES strata_tables(id),
    foreign_key     TEXT NOT NULL,
    created_at      TEXT NOT NULL,
    UNIQUE (source_table_id, name)
);

CREATE TABLE IF NOT EXISTS strata_api_keys (
    id           INTEGER PRIMARY KEY AUTOINCREMENT,
    name         TEXT NOT NULL,
    owner        TEXT,
    kind         TEXT NOT NULL,             -- 'secret' | 'public'
    hint         TEXT NOT NULL,
    token_hash   TEXT NOT NULL UNIQUE,      -- hex SHA-256 of the token
    abilities    TEXT NOT NULL DEFAULT '[\"*\"]',
    tables       TEXT NOT NULL DEFAULT '[]',
    rate_limit   INTEGER NOT NULL DEFAULT 60,
    is_active    INTEGER NOT NULL DEFAULT 1,
    expires_at   TEXT,
    last_used_at TEXT,
    created_at   TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS strata_settings (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,               -- JSON
    updated_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS strata_columns_table_idx    ON strata_columns(table_id);
CREATE INDEX IF NOT EXISTS strata_relationships_src_idx ON strata_relationships(source_table_id);
CREATE INDEX IF NOT EXISTS strata_relationships_dst_idx ON strata_relationships(target_table_id);

PRAGMA user_version = 1;
";

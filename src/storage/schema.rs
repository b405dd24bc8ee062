//! Database schema definitions
//!
//! `vectors` and `contents` are the two halves of the index, joined on `doc_id`.
//! `pages` and `metadata` persist the last ingested document between runs.

/// Database schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Metadata key holding the schema version
pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Metadata key holding the serialized session
pub const SESSION_KEY: &str = "session";

/// SQL for creating the vector store table
pub const CREATE_VECTORS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS vectors (
    doc_id TEXT PRIMARY KEY,
    embedding BLOB NOT NULL,
    dimension INTEGER NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    created_at TEXT NOT NULL
);
"#;

/// SQL for creating the content store table
pub const CREATE_CONTENTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS contents (
    doc_id TEXT PRIMARY KEY,
    origin TEXT NOT NULL,
    content TEXT NOT NULL
);
"#;

/// SQL for creating the session pages table
pub const CREATE_PAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS pages (
    page_index INTEGER PRIMARY KEY,
    text TEXT NOT NULL
);
"#;

/// SQL for creating the metadata table
pub const CREATE_METADATA_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

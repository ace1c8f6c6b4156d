//! SQL schema definitions.

/// Version 1 schema: messages (pre-threading), friends, identity.
pub const SCHEMA_V1: &str = r#"
CREATE TABLE IF NOT EXISTS messages (
    message_id TEXT PRIMARY KEY,
    body TEXT NOT NULL,
    pseudonym TEXT,
    trust REAL NOT NULL,
    likes INTEGER NOT NULL DEFAULT 0,
    liked INTEGER NOT NULL DEFAULT 0,
    composed_at INTEGER NOT NULL,
    received_at INTEGER NOT NULL DEFAULT 0,
    read INTEGER NOT NULL DEFAULT 0,
    hop_count INTEGER NOT NULL DEFAULT 0,
    min_contacts_for_hop INTEGER NOT NULL DEFAULT 0,
    expiration INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_messages_composed_at ON messages(composed_at);

CREATE TABLE IF NOT EXISTS friends (
    public_id BLOB PRIMARY KEY,
    nickname TEXT,
    added_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS identity (
    key_type TEXT PRIMARY KEY CHECK (key_type IN ('public', 'private')),
    key_bytes BLOB NOT NULL
);
"#;

/// Version 2 migration: location string and reply threading on messages.
pub const MIGRATION_V2: &str = r#"
ALTER TABLE messages ADD COLUMN latlong TEXT;
ALTER TABLE messages ADD COLUMN parent_id TEXT;
ALTER TABLE messages ADD COLUMN bigparent_id TEXT;
"#;

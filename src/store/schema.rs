//! Persisted schema surface exposed to operators.
//!
//! Timestamps are stored as RFC 3339 text; UUIDs as text. The touches
//! table is append-only by convention (no UPDATE or DELETE path in the
//! store API).

/// Full schema, applied idempotently on every open.
pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS contacts (
    id              TEXT PRIMARY KEY,
    business_name   TEXT NOT NULL,
    normalized_name TEXT NOT NULL,
    phone           TEXT,
    email           TEXT,
    website         TEXT,
    source          TEXT NOT NULL,
    niche           TEXT NOT NULL,
    geography       TEXT NOT NULL,
    status          TEXT NOT NULL,
    engagement_score INTEGER NOT NULL DEFAULT 0,
    strategy_hint   TEXT,
    ghost_count     INTEGER NOT NULL DEFAULT 0,
    consent_logged  INTEGER NOT NULL DEFAULT 0,
    next_touch_at   TEXT,
    last_contacted_at TEXT,
    created_at      TEXT NOT NULL,
    version         INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_contacts_status ON contacts(status);
CREATE INDEX IF NOT EXISTS idx_contacts_phone ON contacts(phone);
CREATE INDEX IF NOT EXISTS idx_contacts_email ON contacts(email);
CREATE INDEX IF NOT EXISTS idx_contacts_normalized ON contacts(normalized_name);

CREATE TABLE IF NOT EXISTS touches (
    id                TEXT PRIMARY KEY,
    contact_id        TEXT NOT NULL REFERENCES contacts(id),
    channel           TEXT NOT NULL,
    outcome           TEXT NOT NULL,
    provider_response TEXT NOT NULL DEFAULT 'null',
    created_at        TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_touches_contact ON touches(contact_id);
CREATE INDEX IF NOT EXISTS idx_touches_created ON touches(created_at);
CREATE INDEX IF NOT EXISTS idx_touches_channel ON touches(channel, created_at);

CREATE TABLE IF NOT EXISTS pipeline_state (
    key        TEXT PRIMARY KEY,
    value      TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS heartbeats (
    id         TEXT PRIMARY KEY,
    tick_index INTEGER NOT NULL,
    mode       TEXT NOT NULL,
    note       TEXT NOT NULL,
    created_at TEXT NOT NULL
);
";

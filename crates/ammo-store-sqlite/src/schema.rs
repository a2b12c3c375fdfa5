//! SQL schema for the distributor ledger.
//!
//! Executed once at connection startup. Timestamps are stored as integer
//! milliseconds since the epoch so that expiration checks are plain integer
//! comparisons.

/// Full schema DDL; idempotent thanks to `IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

CREATE TABLE IF NOT EXISTS postal (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid        TEXT    NOT NULL,
    auid        TEXT,
    topic       TEXT    NOT NULL,
    provider    TEXT    NOT NULL,
    payload     BLOB,
    priority    INTEGER NOT NULL,
    created     INTEGER NOT NULL,
    modified    INTEGER NOT NULL,
    expiration  INTEGER NOT NULL,
    disposition INTEGER NOT NULL,   -- DisposalTotalState code
    channel     TEXT,               -- channel filter
    notice      TEXT    NOT NULL DEFAULT '{}'
);

CREATE TABLE IF NOT EXISTS retrieval (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid             TEXT    NOT NULL,
    auid             TEXT,
    topic            TEXT    NOT NULL,
    provider         TEXT    NOT NULL,
    payload          BLOB,
    priority         INTEGER NOT NULL,
    created          INTEGER NOT NULL,
    modified         INTEGER NOT NULL,
    expiration       INTEGER NOT NULL,
    disposition      INTEGER NOT NULL,
    channel          TEXT,
    notice           TEXT    NOT NULL DEFAULT '{}',
    projection       TEXT,
    selection        TEXT,
    args             TEXT,
    ordering         TEXT,
    row_limit        INTEGER,
    continuity_type  INTEGER NOT NULL DEFAULT 1,   -- 1 once | 2 temporal | 3 quantity
    continuity_value INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS subscribe (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid        TEXT    NOT NULL,
    auid        TEXT,
    topic       TEXT    NOT NULL,
    provider    TEXT    NOT NULL,
    payload     BLOB,
    priority    INTEGER NOT NULL,
    created     INTEGER NOT NULL,
    modified    INTEGER NOT NULL,
    expiration  INTEGER NOT NULL,
    disposition INTEGER NOT NULL,
    channel     TEXT,
    notice      TEXT    NOT NULL DEFAULT '{}',
    selection   TEXT
);

-- One row per (request, channel); `type` selects the parent table.
CREATE TABLE IF NOT EXISTS disposal (
    id      INTEGER PRIMARY KEY AUTOINCREMENT,
    type    INTEGER NOT NULL,   -- 1 postal | 2 retrieval | 3 subscribe
    parent  INTEGER NOT NULL,
    channel TEXT    NOT NULL,
    state   INTEGER NOT NULL,   -- DisposalState code
    UNIQUE (type, parent, channel)
);

CREATE TABLE IF NOT EXISTS channel (
    id    INTEGER PRIMARY KEY AUTOINCREMENT,
    name  TEXT    NOT NULL UNIQUE,
    state INTEGER NOT NULL      -- 1 active | 2 inactive | 3 busy
);

CREATE INDEX IF NOT EXISTS postal_key_idx    ON postal(topic, provider);
CREATE INDEX IF NOT EXISTS postal_uuid_idx   ON postal(uuid);
CREATE INDEX IF NOT EXISTS retrieval_key_idx ON retrieval(uuid, topic, provider);
CREATE INDEX IF NOT EXISTS subscribe_key_idx ON subscribe(topic, provider);
CREATE INDEX IF NOT EXISTS disposal_chan_idx ON disposal(channel, state);

CREATE TRIGGER IF NOT EXISTS postal_cascade AFTER DELETE ON postal BEGIN
    DELETE FROM disposal WHERE type = 1 AND parent = OLD.id;
END;

CREATE TRIGGER IF NOT EXISTS retrieval_cascade AFTER DELETE ON retrieval BEGIN
    DELETE FROM disposal WHERE type = 2 AND parent = OLD.id;
END;

CREATE TRIGGER IF NOT EXISTS subscribe_cascade AFTER DELETE ON subscribe BEGIN
    DELETE FROM disposal WHERE type = 3 AND parent = OLD.id;
END;

PRAGMA user_version = 1;
";

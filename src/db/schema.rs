/// Schema for every table the client persists.
pub const SCHEMA: &str = r#"
-- Small key-value records (settings, recent scans)
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Last known good value per logical query
CREATE TABLE IF NOT EXISTS snapshots (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    stored_at TEXT NOT NULL
);

-- Mutations waiting for the backend to become reachable.
-- AUTOINCREMENT keeps ids monotonic even after the tail is deleted.
CREATE TABLE IF NOT EXISTS pending_actions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    action TEXT NOT NULL,
    payload TEXT NOT NULL,
    target TEXT,
    enqueued_at TEXT NOT NULL,
    attempts INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_pending_actions_target
    ON pending_actions(action, target);

-- Present while some process is replaying the queue
CREATE TABLE IF NOT EXISTS queue_claim (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    holder TEXT NOT NULL,
    expires_at TEXT NOT NULL
);

-- Captured HTTP responses, partitioned by versioned cache name
CREATE TABLE IF NOT EXISTS resource_cache (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    cache_name TEXT NOT NULL,
    url_hash TEXT NOT NULL,
    url TEXT NOT NULL,
    status INTEGER NOT NULL,
    content_type TEXT,
    body BLOB NOT NULL,
    stored_at TEXT NOT NULL,
    UNIQUE (cache_name, url_hash)
);

CREATE INDEX IF NOT EXISTS idx_resource_cache_order
    ON resource_cache(cache_name, seq);
"#;

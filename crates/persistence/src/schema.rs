//! Database schema definitions

/// SQL to create all tables
/// NOTE: values are opaque JSON text; `expires_at` is unix milliseconds
pub const CREATE_TABLES: &str = r#"
-- Transient market data (instrument lists, per-instrument series)
CREATE TABLE IF NOT EXISTS cache_entries (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    created_at INTEGER DEFAULT (strftime('%s', 'now'))
);

-- ========== INDEXES ==========

CREATE INDEX IF NOT EXISTS idx_cache_expiry ON cache_entries(expires_at)
"#;

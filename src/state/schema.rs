pub const CREATE_TABLES: &str = "
CREATE TABLE IF NOT EXISTS harvest_state (
    id TEXT PRIMARY KEY,
    status TEXT NOT NULL DEFAULT 'pending',
    last_attempt TEXT NOT NULL,
    resolved_commit TEXT,
    repository TEXT,
    error_kind TEXT,
    error_detail TEXT
);

CREATE INDEX IF NOT EXISTS idx_harvest_state_status ON harvest_state(status);
";

//! SQL DDL for the usage database.
//! WAL mode + busy timeout applied at connection time.

/// Bumped whenever `CREATE_TABLES` changes shape.
pub const SCHEMA_VERSION: u32 = 1;

/// Idempotent table and index creation.
pub const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS embedding_models (
    name TEXT PRIMARY KEY,
    dimensions INTEGER NOT NULL,
    max_tokens INTEGER NOT NULL,
    active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    last_used_at TEXT,
    usage_count INTEGER NOT NULL DEFAULT 0,
    avg_latency_ms REAL NOT NULL DEFAULT 0.0
);

CREATE TABLE IF NOT EXISTS usage_log (
    id TEXT PRIMARY KEY,
    principal TEXT NOT NULL,
    session_id TEXT NOT NULL,
    operation TEXT NOT NULL,
    model TEXT,
    input_length INTEGER,
    batch_size INTEGER,
    execution_ms INTEGER,
    tokens_processed INTEGER,
    success INTEGER NOT NULL,
    error_message TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS performance_metrics (
    model TEXT NOT NULL,
    metric_date TEXT NOT NULL,
    total_calls INTEGER NOT NULL,
    successful_calls INTEGER NOT NULL,
    failed_calls INTEGER NOT NULL,
    avg_latency_ms REAL,
    min_latency_ms REAL,
    max_latency_ms REAL,
    p95_latency_ms REAL,
    p99_latency_ms REAL,
    total_tokens INTEGER NOT NULL,
    distinct_callers INTEGER NOT NULL,
    PRIMARY KEY (model, metric_date)
);

CREATE INDEX IF NOT EXISTS idx_usage_created ON usage_log(created_at);
CREATE INDEX IF NOT EXISTS idx_usage_principal ON usage_log(principal, created_at);
CREATE INDEX IF NOT EXISTS idx_usage_model ON usage_log(model, created_at);
CREATE INDEX IF NOT EXISTS idx_metrics_date ON performance_metrics(metric_date);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);
";

/// Connection pragmas.
pub const PRAGMAS: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA busy_timeout = 5000;
PRAGMA synchronous = NORMAL;
";

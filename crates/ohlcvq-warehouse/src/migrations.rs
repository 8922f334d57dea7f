use ::duckdb::{params, Connection};

/// Table holding per-instrument fetch configuration.
pub const PARAMS_TABLE: &str = "sda_ohlcvq_params";
/// Time-series table holding OHLCV bars.
pub const BARS_TABLE: &str = "sda_ohlcvq";
/// Table holding collected diagnostic records.
pub const LOGS_TABLE: &str = "logs";

struct Migration {
    version: &'static str,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: "0001_ohlcvq_tables",
        sql: r#"
CREATE TABLE IF NOT EXISTS sda_ohlcvq_params (
    instrument TEXT NOT NULL,
    unit TEXT NOT NULL DEFAULT 'MINUTE',
    api_key TEXT NOT NULL,
    "limit" BIGINT NOT NULL DEFAULT 1000 CHECK ("limit" > 0),
    PRIMARY KEY(instrument, unit)
);

CREATE TABLE IF NOT EXISTS sda_ohlcvq (
    "timestamp" TIMESTAMP NOT NULL,
    instrument TEXT NOT NULL,
    unit TEXT NOT NULL,
    open DOUBLE NOT NULL,
    high DOUBLE NOT NULL,
    low DOUBLE NOT NULL,
    close DOUBLE NOT NULL,
    volume DOUBLE NOT NULL CHECK (volume <> 0),
    quote_volume DOUBLE NOT NULL CHECK (quote_volume <> 0),
    CHECK (high >= low),
    PRIMARY KEY("timestamp", instrument, unit)
);
"#,
    },
    Migration {
        version: "0002_logs",
        sql: r#"
CREATE SEQUENCE IF NOT EXISTS logs_id_seq START 1;

CREATE TABLE IF NOT EXISTS logs (
    id BIGINT PRIMARY KEY DEFAULT nextval('logs_id_seq'),
    occurred_at TIMESTAMP NOT NULL,
    service_name TEXT NOT NULL,
    log_level TEXT NOT NULL,
    message TEXT NOT NULL,
    stack_trace TEXT,
    request_id TEXT NOT NULL,
    meta_info TEXT NOT NULL,
    tags TEXT NOT NULL
);
"#,
    },
    Migration {
        version: "0003_log_indexes",
        sql: r#"
CREATE INDEX IF NOT EXISTS idx_logs_service_name ON logs(service_name);
"#,
    },
];

pub fn apply_migrations(connection: &Connection) -> Result<(), ::duckdb::Error> {
    connection.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version TEXT PRIMARY KEY,
    applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
);
"#,
    )?;

    for migration in MIGRATIONS {
        let applied_count: i64 = connection.query_row(
            "SELECT COUNT(*) FROM schema_migrations WHERE version = ?",
            params![migration.version],
            |row| row.get(0),
        )?;

        if applied_count == 0 {
            tracing::debug!(version = migration.version, "applying warehouse migration");
            connection.execute_batch(migration.sql)?;
            connection.execute(
                "INSERT INTO schema_migrations (version) VALUES (?)",
                params![migration.version],
            )?;
        }
    }

    Ok(())
}

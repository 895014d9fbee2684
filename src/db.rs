// ==========================================
// 养殖台账系统 - SQLite 连接配置与表结构
// ==========================================
// 目标:
// - 所有 Connection::open 走同一套 PRAGMA 配置
// - 统一 busy_timeout，并发写入等待而不是直接报 SQLITE_BUSY
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout (毫秒)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前版本写入并期望的表结构版本
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 为连接应用统一 PRAGMA
///
/// foreign_keys 与 busy_timeout 均为连接级设置
pub fn configure_sqlite_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch("PRAGMA foreign_keys = ON;")?;
    conn.busy_timeout(Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS))?;
    Ok(())
}

/// 打开 SQLite 连接并应用统一配置
pub fn open_sqlite_connection(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(db_path)?;
    configure_sqlite_connection(&conn)?;
    Ok(conn)
}

/// 读取 schema_version (表不存在时返回 None)
pub fn read_schema_version(conn: &Connection) -> rusqlite::Result<Option<i64>> {
    let has_table: bool = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version' LIMIT 1",
            [],
            |_row| Ok(true),
        )
        .optional()?
        .unwrap_or(false);

    if !has_table {
        return Ok(None);
    }

    let v: Option<i64> =
        conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

// ==========================================
// 表结构
// ==========================================
// 四张核心表之间不设外键: 各实体独立归属，跨实体一致性由引擎维护
// CHECK 约束是存栏量与头数不变量在存储层的最后防线
const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL DEFAULT 'global',
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

CREATE TABLE IF NOT EXISTS barn (
    barn_id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    max_capacity INTEGER NOT NULL CHECK (max_capacity >= 0),
    current_occupancy INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL,
    revision INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK (current_occupancy >= 0 AND current_occupancy <= max_capacity)
);

CREATE TABLE IF NOT EXISTS batch (
    batch_id TEXT PRIMARY KEY,
    barn_id TEXT NOT NULL,
    breed TEXT NOT NULL,
    initial_head_count INTEGER NOT NULL,
    current_head_count INTEGER NOT NULL CHECK (current_head_count >= 0),
    avg_weight_kg REAL NOT NULL,
    status TEXT NOT NULL,
    revision INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_batch_barn ON batch(barn_id, status);

CREATE TABLE IF NOT EXISTS intake_record (
    intake_id TEXT PRIMARY KEY,
    batch_id TEXT NOT NULL,
    barn_id TEXT NOT NULL,
    supplier_name TEXT NOT NULL,
    breed TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    avg_weight_kg REAL NOT NULL,
    import_date TEXT NOT NULL,
    revision INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_intake_batch ON intake_record(batch_id);

CREATE TABLE IF NOT EXISTS movement_record (
    movement_id TEXT PRIMARY KEY,
    batch_id TEXT NOT NULL,
    barn_id TEXT NOT NULL,
    movement_type TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    avg_weight_kg REAL NOT NULL,
    unit_price REAL NOT NULL,
    total_weight_kg REAL NOT NULL,
    total_amount REAL NOT NULL,
    counterparty_name TEXT NOT NULL,
    notes TEXT,
    status TEXT NOT NULL,
    resulting_head_count INTEGER,
    revision INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    completed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_movement_batch ON movement_record(batch_id);

CREATE TABLE IF NOT EXISTS action_log (
    action_id TEXT PRIMARY KEY,
    action_type TEXT NOT NULL,
    action_ts TEXT NOT NULL,
    actor TEXT NOT NULL,
    entity_id TEXT,
    barn_id TEXT,
    payload_json TEXT,
    detail TEXT
);
CREATE INDEX IF NOT EXISTS idx_action_log_ts ON action_log(action_ts);
"#;

/// 创建缺失的表并写入表结构版本 (幂等)
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    let current = read_schema_version(conn)?;
    match current {
        Some(v) if v > CURRENT_SCHEMA_VERSION => {
            tracing::warn!(
                db_version = v,
                expected = CURRENT_SCHEMA_VERSION,
                "database schema is newer than this build"
            );
        }
        Some(v) if v == CURRENT_SCHEMA_VERSION => {}
        _ => {
            conn.execute(
                "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
                [CURRENT_SCHEMA_VERSION],
            )?;
        }
    }
    Ok(())
}

/// 打开数据库文件、应用配置并确保表结构存在
pub fn open_and_migrate(db_path: &str) -> rusqlite::Result<Connection> {
    let conn = open_sqlite_connection(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        configure_sqlite_connection(&conn).unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(read_schema_version(&conn).unwrap(), Some(CURRENT_SCHEMA_VERSION));
    }

    #[test]
    fn test_schema_rejects_overfull_barn() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        let err = conn.execute(
            "INSERT INTO barn (barn_id, name, max_capacity, current_occupancy, status, created_at, updated_at)
             VALUES ('b', 'B', 10, 11, 'ACTIVE', 'x', 'x')",
            [],
        );
        assert!(err.is_err());
    }
}

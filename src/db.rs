// ==========================================
// 批量导入管道 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为（外键、busy_timeout）
// - 统一建表入口 init_schema，记录 schema_version
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout（毫秒）
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// 说明：
/// - foreign_keys 需要“每个连接”单独开启
/// - busy_timeout 需要“每个连接”单独配置
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

/// 读取 schema_version（若表不存在则返回 None）
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

    let v: Option<i64> = conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))?;
    Ok(v)
}

/// 建表（幂等）并写入当前 schema_version
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version     INTEGER PRIMARY KEY,
    applied_at  TEXT NOT NULL DEFAULT (datetime('now'))
);

-- ===== 配置 =====
CREATE TABLE IF NOT EXISTS config_kv (
    scope_id    TEXT NOT NULL DEFAULT 'global',
    key         TEXT NOT NULL,
    value       TEXT NOT NULL,
    updated_at  TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

-- ===== 上传会话 =====
CREATE TABLE IF NOT EXISTS upload_session (
    id                  TEXT PRIMARY KEY,
    entity_type         TEXT NOT NULL,
    original_file_name  TEXT NOT NULL,
    format              TEXT NOT NULL,
    state               TEXT NOT NULL,
    detected_row_count  INTEGER NOT NULL,
    valid_row_count     INTEGER NOT NULL DEFAULT 0,
    invalid_row_count   INTEGER NOT NULL DEFAULT 0,
    imported_row_count  INTEGER NOT NULL DEFAULT 0,
    errors_json         TEXT NOT NULL DEFAULT '[]',
    warnings_json       TEXT NOT NULL DEFAULT '[]',
    metadata_json       TEXT NOT NULL DEFAULT '{}',
    created_at          TEXT NOT NULL,
    updated_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_upload_session_created ON upload_session (created_at);
CREATE INDEX IF NOT EXISTS idx_upload_session_state ON upload_session (state);

-- 行级数据：原始值 / 校验结论 / 导入结果
CREATE TABLE IF NOT EXISTS upload_row (
    session_id      TEXT NOT NULL REFERENCES upload_session (id),
    row_index       INTEGER NOT NULL,
    line            INTEGER NOT NULL,
    raw_json        TEXT NOT NULL,
    verdict         TEXT,
    parsed_json     TEXT,
    import_status   TEXT,
    entity_ids_json TEXT,
    PRIMARY KEY (session_id, row_index)
);

-- ===== 参照数据 =====
CREATE TABLE IF NOT EXISTS clients (
    id      TEXT PRIMARY KEY,
    ruc     TEXT NOT NULL UNIQUE,
    name    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS categories (
    id      TEXT PRIMARY KEY,
    code    TEXT NOT NULL UNIQUE,
    name    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS projects (
    id          TEXT PRIMARY KEY,
    code        TEXT NOT NULL UNIQUE,
    name        TEXT NOT NULL,
    client_id   TEXT REFERENCES clients (id),
    start_date  TEXT,
    end_date    TEXT,
    budget      TEXT,
    status      TEXT NOT NULL DEFAULT 'planificado',
    description TEXT,
    source_session_id TEXT
);

-- ===== 业务记录 =====
CREATE TABLE IF NOT EXISTS advances (
    id                          TEXT PRIMARY KEY,
    client_id                   TEXT NOT NULL REFERENCES clients (id),
    project_id                  TEXT REFERENCES projects (id),
    amount                      TEXT NOT NULL,
    payment_method              TEXT NOT NULL,
    received_date               TEXT NOT NULL,
    estimated_application_date  TEXT,
    reference                   TEXT,
    notes                       TEXT,
    source_session_id           TEXT
);

CREATE TABLE IF NOT EXISTS expenses (
    id                  TEXT PRIMARY KEY,
    supplier_ruc        TEXT NOT NULL,
    supplier_name       TEXT NOT NULL,
    invoice_number      TEXT NOT NULL,
    issue_date          TEXT NOT NULL,
    category_id         TEXT NOT NULL REFERENCES categories (id),
    project_id          TEXT REFERENCES projects (id),
    subtotal            TEXT NOT NULL,
    tax_amount          TEXT NOT NULL,
    amount              TEXT NOT NULL,
    payment_method      TEXT NOT NULL,
    due_date            TEXT,
    description         TEXT,
    source_session_id   TEXT,
    UNIQUE (supplier_ruc, invoice_number)
);

CREATE TABLE IF NOT EXISTS payables (
    id          TEXT PRIMARY KEY,
    expense_id  TEXT NOT NULL REFERENCES expenses (id),
    amount      TEXT NOT NULL,
    due_date    TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pendiente'
);

CREATE TABLE IF NOT EXISTS sales (
    id                  TEXT PRIMARY KEY,
    client_id           TEXT NOT NULL REFERENCES clients (id),
    project_id          TEXT REFERENCES projects (id),
    invoice_number      TEXT NOT NULL UNIQUE,
    issue_date          TEXT NOT NULL,
    subtotal            TEXT NOT NULL,
    tax_amount          TEXT NOT NULL,
    amount              TEXT NOT NULL,
    payment_method      TEXT NOT NULL,
    due_date            TEXT,
    description         TEXT,
    source_session_id   TEXT
);

CREATE TABLE IF NOT EXISTS receivables (
    id          TEXT PRIMARY KEY,
    sale_id     TEXT NOT NULL REFERENCES sales (id),
    amount      TEXT NOT NULL,
    due_date    TEXT NOT NULL,
    status      TEXT NOT NULL DEFAULT 'pendiente'
);
"#;

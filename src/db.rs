// ==========================================
// 锻造生产追溯系统 - SQLite 连接初始化与建表
// ==========================================
// 目标:
// - 统一所有 Connection::open 的 PRAGMA 行为 (外键 + busy_timeout)
// - ensure_schema 幂等建表, 记录 schema_version
// - 所有业务表带 tenant_id / deleted / deleted_at, 只做软删除
// ==========================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use std::time::Duration;

/// 默认 busy_timeout (毫秒)
pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// 当前代码所期望的 schema_version
pub const CURRENT_SCHEMA_VERSION: i64 = 1;

/// 配置 SQLite 连接的统一 PRAGMA
///
/// foreign_keys 与 busy_timeout 都需要每个连接单独设置
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

/// 读取 schema_version (表不存在返回 None)
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

/// 幂等建表
pub fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_version (version) VALUES (?1)",
        [CURRENT_SCHEMA_VERSION],
    )?;
    tracing::debug!(version = CURRENT_SCHEMA_VERSION, "数据库 schema 已就绪");
    Ok(())
}

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS config_scope (
    scope_id TEXT PRIMARY KEY,
    scope_type TEXT NOT NULL,
    scope_key TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(scope_type, scope_key)
);

INSERT OR IGNORE INTO config_scope (scope_id, scope_type, scope_key)
VALUES ('global', 'GLOBAL', 'global');

CREATE TABLE IF NOT EXISTS config_kv (
    scope_id TEXT NOT NULL REFERENCES config_scope(scope_id) ON DELETE CASCADE,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (scope_id, key)
);

-- ===== 工艺模板 =====
CREATE TABLE IF NOT EXISTS workflow_template (
    id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    is_default INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS workflow_step (
    id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    template_id TEXT NOT NULL REFERENCES workflow_template(id),
    operation_type TEXT NOT NULL,
    step_name TEXT NOT NULL,
    parent_step_id TEXT,
    tree_level INTEGER NOT NULL,
    is_optional INTEGER NOT NULL DEFAULT 0,
    is_parallel INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_workflow_step_template ON workflow_step(template_id);

-- ===== 流程实例 =====
CREATE TABLE IF NOT EXISTS item_workflow (
    id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    workflow_identifier TEXT NOT NULL,
    item_id TEXT NOT NULL,
    workflow_template_id TEXT NOT NULL REFERENCES workflow_template(id),
    workflow_status TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    UNIQUE(tenant_id, workflow_identifier)
);

CREATE TABLE IF NOT EXISTS item_workflow_step (
    id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    item_workflow_id TEXT NOT NULL REFERENCES item_workflow(id),
    workflow_step_id TEXT NOT NULL REFERENCES workflow_step(id),
    parent_item_workflow_step_id TEXT,
    tree_level INTEGER NOT NULL,
    operation_type TEXT NOT NULL,
    is_optional INTEGER NOT NULL DEFAULT 0,
    step_status TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    operation_reference_id TEXT,
    operation_outcome_json TEXT,
    related_entity_ids_json TEXT NOT NULL DEFAULT '[]',
    initial_pieces_count INTEGER NOT NULL DEFAULT 0,
    pieces_available_for_next INTEGER NOT NULL DEFAULT 0,
    consumed_pieces_count INTEGER NOT NULL DEFAULT 0,
    rejected_pieces_count INTEGER NOT NULL DEFAULT 0,
    rework_pieces_count INTEGER NOT NULL DEFAULT 0,
    pieces_utilization_percentage REAL NOT NULL DEFAULT 0,
    notes TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_item_workflow_step_workflow ON item_workflow_step(item_workflow_id);

-- ===== 工序批次与件数账户 =====
CREATE TABLE IF NOT EXISTS stage_batch (
    id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    batch_number TEXT NOT NULL,
    operation_type TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at TEXT NOT NULL,
    completed_at TEXT,
    created_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    UNIQUE(tenant_id, operation_type, batch_number)
);

CREATE TABLE IF NOT EXISTS processed_item_batch (
    id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    stage_batch_id TEXT NOT NULL REFERENCES stage_batch(id),
    operation_type TEXT NOT NULL,
    item_workflow_id TEXT NOT NULL REFERENCES item_workflow(id),
    item_workflow_step_id TEXT NOT NULL REFERENCES item_workflow_step(id),
    status TEXT NOT NULL,
    initial_pieces_count INTEGER NOT NULL CHECK (initial_pieces_count >= 0),
    available_pieces_count INTEGER NOT NULL CHECK (available_pieces_count >= 0),
    consumed_pieces_count INTEGER NOT NULL CHECK (consumed_pieces_count >= 0),
    rejected_pieces_count INTEGER NOT NULL CHECK (rejected_pieces_count >= 0),
    rework_pieces_count INTEGER NOT NULL CHECK (rework_pieces_count >= 0),
    started_at TEXT NOT NULL,
    completed_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    reported_rework_pieces_count INTEGER NOT NULL DEFAULT 0 CHECK (reported_rework_pieces_count >= 0),
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    CHECK (consumed_pieces_count + available_pieces_count + rejected_pieces_count + rework_pieces_count
           = initial_pieces_count)
);
CREATE INDEX IF NOT EXISTS idx_processed_item_batch_stage ON processed_item_batch(stage_batch_id);
CREATE INDEX IF NOT EXISTS idx_processed_item_batch_step ON processed_item_batch(item_workflow_step_id);

CREATE TABLE IF NOT EXISTS piece_consumption (
    id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    consuming_entity_id TEXT NOT NULL REFERENCES processed_item_batch(id),
    consuming_operation_type TEXT NOT NULL,
    previous_operation_entity_id TEXT NOT NULL REFERENCES processed_item_batch(id),
    previous_operation_type TEXT NOT NULL,
    consumed_pieces_count INTEGER NOT NULL CHECK (consumed_pieces_count > 0),
    pool TEXT NOT NULL,
    created_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_piece_consumption_source ON piece_consumption(previous_operation_entity_id);
CREATE INDEX IF NOT EXISTS idx_piece_consumption_consumer ON piece_consumption(consuming_entity_id);

CREATE TABLE IF NOT EXISTS daily_machining_batch (
    id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    machining_entity_id TEXT NOT NULL REFERENCES processed_item_batch(id),
    operation_date TEXT NOT NULL,
    completed_pieces_count INTEGER NOT NULL,
    actual_completed_pieces_count INTEGER NOT NULL,
    rejected_pieces_count INTEGER NOT NULL DEFAULT 0,
    rework_pieces_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS inspection_distribution (
    id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    inspection_entity_id TEXT NOT NULL REFERENCES processed_item_batch(id),
    daily_machining_batch_id TEXT NOT NULL REFERENCES daily_machining_batch(id),
    rejected_pieces_count INTEGER NOT NULL,
    rework_pieces_count INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    UNIQUE(inspection_entity_id, daily_machining_batch_id)
);

-- ===== 订单 =====
CREATE TABLE IF NOT EXISTS customer_order (
    id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    po_number TEXT NOT NULL,
    order_date TEXT NOT NULL,
    expected_processing_days INTEGER,
    user_defined_eta_days INTEGER,
    status TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS order_item (
    id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    order_id TEXT NOT NULL REFERENCES customer_order(id),
    item_id TEXT NOT NULL,
    quantity INTEGER NOT NULL,
    unit_price REAL NOT NULL,
    material_cost_per_unit REAL,
    work_type TEXT NOT NULL,
    created_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT
);

CREATE TABLE IF NOT EXISTS order_item_workflow (
    id TEXT PRIMARY KEY,
    tenant_id INTEGER NOT NULL,
    order_item_id TEXT NOT NULL REFERENCES order_item(id),
    item_workflow_id TEXT NOT NULL REFERENCES item_workflow(id),
    created_at TEXT NOT NULL,
    deleted INTEGER NOT NULL DEFAULT 0,
    deleted_at TEXT,
    UNIQUE(order_item_id, item_workflow_id)
);
CREATE INDEX IF NOT EXISTS idx_order_item_workflow_wf ON order_item_workflow(item_workflow_id);
"#;

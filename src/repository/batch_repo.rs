// ==========================================
// 锻造生产追溯系统 - 工序批次与件数账户仓储
// ==========================================
// 表: stage_batch / processed_item_batch / piece_consumption
//     daily_machining_batch / inspection_distribution
// 红线: 件数只由引擎层 PieceLedger 计算, 本层原样读写
// ==========================================

use crate::domain::batch::{
    DailyMachiningBatch, InspectionDistribution, PieceConsumption, PieceCountSnapshot,
    ProcessedItemBatch, StageBatch,
};
use crate::domain::types::{BatchStatus, OperationType, PiecePool};
use crate::repository::codec::{fmt_date, fmt_opt_ts, fmt_ts, get_count, parse_date, parse_enum, parse_opt_ts, parse_ts};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::sync::{Arc, Mutex};

const ACCOUNT_COLUMNS: &str = r#"
    id, tenant_id, stage_batch_id, operation_type, item_workflow_id, item_workflow_step_id,
    status, initial_pieces_count, available_pieces_count, consumed_pieces_count,
    rejected_pieces_count, rework_pieces_count, started_at, completed_at, created_at, updated_at,
    reported_rework_pieces_count
"#;

// ==========================================
// StageBatch
// ==========================================

pub fn insert_stage_batch_tx(conn: &Connection, batch: &StageBatch) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO stage_batch (id, tenant_id, batch_number, operation_type, status, started_at, completed_at, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        "#,
        params![
            batch.id,
            batch.tenant_id,
            batch.batch_number,
            batch.operation_type.as_str(),
            batch.status.as_str(),
            fmt_ts(batch.started_at),
            fmt_opt_ts(batch.completed_at),
            fmt_ts(batch.created_at),
        ],
    )?;
    Ok(())
}

pub fn update_stage_batch_tx(conn: &Connection, batch: &StageBatch) -> RepositoryResult<()> {
    conn.execute(
        r#"
        UPDATE stage_batch SET status = ?3, completed_at = ?4
        WHERE tenant_id = ?1 AND id = ?2 AND deleted = 0
        "#,
        params![
            batch.tenant_id,
            batch.id,
            batch.status.as_str(),
            fmt_opt_ts(batch.completed_at),
        ],
    )?;
    Ok(())
}

pub fn find_stage_batch_tx(conn: &Connection, tenant_id: i64, id: &str) -> RepositoryResult<Option<StageBatch>> {
    let batch = conn
        .query_row(
            r#"
            SELECT id, tenant_id, batch_number, operation_type, status, started_at, completed_at, created_at
            FROM stage_batch
            WHERE tenant_id = ?1 AND id = ?2 AND deleted = 0
            "#,
            params![tenant_id, id],
            |row| {
                Ok(StageBatch {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    batch_number: row.get(2)?,
                    operation_type: parse_enum(3, &row.get::<_, String>(3)?, OperationType::parse)?,
                    status: parse_enum(4, &row.get::<_, String>(4)?, BatchStatus::parse)?,
                    started_at: parse_ts(5, &row.get::<_, String>(5)?)?,
                    completed_at: parse_opt_ts(6, row.get(6)?)?,
                    created_at: parse_ts(7, &row.get::<_, String>(7)?)?,
                })
            },
        )
        .optional()?;
    Ok(batch)
}

pub fn get_stage_batch_tx(conn: &Connection, tenant_id: i64, id: &str) -> RepositoryResult<StageBatch> {
    find_stage_batch_tx(conn, tenant_id, id)?.ok_or_else(|| RepositoryError::NotFound {
        entity: "StageBatch".to_string(),
        id: id.to_string(),
    })
}

// ==========================================
// ProcessedItemBatch (件数账户)
// ==========================================

pub fn insert_account_tx(conn: &Connection, account: &ProcessedItemBatch) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO processed_item_batch (
            id, tenant_id, stage_batch_id, operation_type, item_workflow_id, item_workflow_step_id,
            status, initial_pieces_count, available_pieces_count, consumed_pieces_count,
            rejected_pieces_count, rework_pieces_count, started_at, completed_at, created_at, updated_at,
            reported_rework_pieces_count
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
        "#,
        params![
            account.id,
            account.tenant_id,
            account.stage_batch_id,
            account.operation_type.as_str(),
            account.item_workflow_id,
            account.item_workflow_step_id,
            account.status.as_str(),
            account.initial_pieces_count,
            account.available_pieces_count,
            account.consumed_pieces_count,
            account.rejected_pieces_count,
            account.rework_pieces_count,
            fmt_ts(account.started_at),
            fmt_opt_ts(account.completed_at),
            fmt_ts(account.created_at),
            fmt_ts(account.updated_at),
            account.reported_rework_pieces_count,
        ],
    )?;
    Ok(())
}

/// 回写账户件数与状态
pub fn update_account_tx(conn: &Connection, account: &ProcessedItemBatch) -> RepositoryResult<()> {
    let affected = conn.execute(
        r#"
        UPDATE processed_item_batch
        SET status = ?3, initial_pieces_count = ?4, available_pieces_count = ?5,
            consumed_pieces_count = ?6, rejected_pieces_count = ?7, rework_pieces_count = ?8,
            completed_at = ?9, updated_at = ?10, reported_rework_pieces_count = ?11
        WHERE tenant_id = ?1 AND id = ?2 AND deleted = 0
        "#,
        params![
            account.tenant_id,
            account.id,
            account.status.as_str(),
            account.initial_pieces_count,
            account.available_pieces_count,
            account.consumed_pieces_count,
            account.rejected_pieces_count,
            account.rework_pieces_count,
            fmt_opt_ts(account.completed_at),
            fmt_ts(account.updated_at),
            account.reported_rework_pieces_count,
        ],
    )?;
    if affected == 0 {
        return Err(RepositoryError::NotFound {
            entity: "ProcessedItemBatch".to_string(),
            id: account.id.clone(),
        });
    }
    Ok(())
}

pub fn find_account_tx(conn: &Connection, tenant_id: i64, id: &str) -> RepositoryResult<Option<ProcessedItemBatch>> {
    let sql = format!(
        "SELECT {} FROM processed_item_batch WHERE tenant_id = ?1 AND id = ?2 AND deleted = 0",
        ACCOUNT_COLUMNS
    );
    Ok(conn.query_row(&sql, params![tenant_id, id], map_account_row).optional()?)
}

pub fn find_accounts_by_stage_batch_tx(
    conn: &Connection,
    tenant_id: i64,
    stage_batch_id: &str,
) -> RepositoryResult<Vec<ProcessedItemBatch>> {
    let sql = format!(
        "SELECT {} FROM processed_item_batch WHERE tenant_id = ?1 AND stage_batch_id = ?2 AND deleted = 0 \
         ORDER BY created_at ASC, id ASC",
        ACCOUNT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![tenant_id, stage_batch_id], map_account_row)?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(rows)
}

pub fn find_accounts_by_step_tx(
    conn: &Connection,
    tenant_id: i64,
    item_workflow_step_id: &str,
) -> RepositoryResult<Vec<ProcessedItemBatch>> {
    let sql = format!(
        "SELECT {} FROM processed_item_batch WHERE tenant_id = ?1 AND item_workflow_step_id = ?2 AND deleted = 0 \
         ORDER BY created_at ASC, id ASC",
        ACCOUNT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![tenant_id, item_workflow_step_id], map_account_row)?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(rows)
}

fn map_account_row(row: &rusqlite::Row<'_>) -> SqliteResult<ProcessedItemBatch> {
    Ok(ProcessedItemBatch {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        stage_batch_id: row.get(2)?,
        operation_type: parse_enum(3, &row.get::<_, String>(3)?, OperationType::parse)?,
        item_workflow_id: row.get(4)?,
        item_workflow_step_id: row.get(5)?,
        status: parse_enum(6, &row.get::<_, String>(6)?, BatchStatus::parse)?,
        initial_pieces_count: get_count(row, 7)?,
        available_pieces_count: get_count(row, 8)?,
        consumed_pieces_count: get_count(row, 9)?,
        rejected_pieces_count: get_count(row, 10)?,
        rework_pieces_count: get_count(row, 11)?,
        started_at: parse_ts(12, &row.get::<_, String>(12)?)?,
        completed_at: parse_opt_ts(13, row.get(13)?)?,
        created_at: parse_ts(14, &row.get::<_, String>(14)?)?,
        updated_at: parse_ts(15, &row.get::<_, String>(15)?)?,
        reported_rework_pieces_count: get_count(row, 16)?,
    })
}

// ==========================================
// PieceConsumption (领用记录)
// ==========================================

pub fn insert_consumption_tx(conn: &Connection, record: &PieceConsumption) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO piece_consumption (
            id, tenant_id, consuming_entity_id, consuming_operation_type,
            previous_operation_entity_id, previous_operation_type,
            consumed_pieces_count, pool, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            record.id,
            record.tenant_id,
            record.consuming_entity_id,
            record.consuming_operation_type.as_str(),
            record.previous_operation_entity_id,
            record.previous_operation_type.as_str(),
            record.consumed_pieces_count,
            record.pool.as_str(),
            fmt_ts(record.created_at),
        ],
    )?;
    Ok(())
}

/// 某上游账户被领用的全部记录
pub fn find_consumptions_by_source_tx(
    conn: &Connection,
    tenant_id: i64,
    source_entity_id: &str,
) -> RepositoryResult<Vec<PieceConsumption>> {
    find_consumptions(conn, tenant_id, "previous_operation_entity_id", source_entity_id)
}

/// 某下游账户的全部领用记录
pub fn find_consumptions_by_consumer_tx(
    conn: &Connection,
    tenant_id: i64,
    consuming_entity_id: &str,
) -> RepositoryResult<Vec<PieceConsumption>> {
    find_consumptions(conn, tenant_id, "consuming_entity_id", consuming_entity_id)
}

fn find_consumptions(
    conn: &Connection,
    tenant_id: i64,
    column: &str,
    entity_id: &str,
) -> RepositoryResult<Vec<PieceConsumption>> {
    let sql = format!(
        r#"
        SELECT id, tenant_id, consuming_entity_id, consuming_operation_type,
               previous_operation_entity_id, previous_operation_type,
               consumed_pieces_count, pool, created_at
        FROM piece_consumption
        WHERE tenant_id = ?1 AND {} = ?2 AND deleted = 0
        ORDER BY created_at ASC, id ASC
        "#,
        column
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![tenant_id, entity_id], |row| {
            Ok(PieceConsumption {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                consuming_entity_id: row.get(2)?,
                consuming_operation_type: parse_enum(3, &row.get::<_, String>(3)?, OperationType::parse)?,
                previous_operation_entity_id: row.get(4)?,
                previous_operation_type: parse_enum(5, &row.get::<_, String>(5)?, OperationType::parse)?,
                consumed_pieces_count: get_count(row, 6)?,
                pool: parse_enum(7, &row.get::<_, String>(7)?, PiecePool::parse)?,
                created_at: parse_ts(8, &row.get::<_, String>(8)?)?,
            })
        })?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(rows)
}

// ==========================================
// DailyMachiningBatch (日子批)
// ==========================================

pub fn insert_daily_tx(conn: &Connection, daily: &DailyMachiningBatch) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO daily_machining_batch (
            id, tenant_id, machining_entity_id, operation_date, completed_pieces_count,
            actual_completed_pieces_count, rejected_pieces_count, rework_pieces_count, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            daily.id,
            daily.tenant_id,
            daily.machining_entity_id,
            fmt_date(daily.operation_date),
            daily.completed_pieces_count,
            daily.actual_completed_pieces_count,
            daily.rejected_pieces_count,
            daily.rework_pieces_count,
            fmt_ts(daily.created_at),
        ],
    )?;
    Ok(())
}

pub fn update_daily_tx(conn: &Connection, daily: &DailyMachiningBatch) -> RepositoryResult<()> {
    conn.execute(
        r#"
        UPDATE daily_machining_batch
        SET actual_completed_pieces_count = ?3, rejected_pieces_count = ?4, rework_pieces_count = ?5
        WHERE tenant_id = ?1 AND id = ?2 AND deleted = 0
        "#,
        params![
            daily.tenant_id,
            daily.id,
            daily.actual_completed_pieces_count,
            daily.rejected_pieces_count,
            daily.rework_pieces_count,
        ],
    )?;
    Ok(())
}

pub fn find_daily_by_machining_tx(
    conn: &Connection,
    tenant_id: i64,
    machining_entity_id: &str,
) -> RepositoryResult<Vec<DailyMachiningBatch>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, tenant_id, machining_entity_id, operation_date, completed_pieces_count,
               actual_completed_pieces_count, rejected_pieces_count, rework_pieces_count, created_at
        FROM daily_machining_batch
        WHERE tenant_id = ?1 AND machining_entity_id = ?2 AND deleted = 0
        ORDER BY operation_date ASC, id ASC
        "#,
    )?;
    let rows = stmt
        .query_map(params![tenant_id, machining_entity_id], |row| {
            Ok(DailyMachiningBatch {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                machining_entity_id: row.get(2)?,
                operation_date: parse_date(3, &row.get::<_, String>(3)?)?,
                completed_pieces_count: get_count(row, 4)?,
                actual_completed_pieces_count: get_count(row, 5)?,
                rejected_pieces_count: get_count(row, 6)?,
                rework_pieces_count: get_count(row, 7)?,
                created_at: parse_ts(8, &row.get::<_, String>(8)?)?,
            })
        })?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(rows)
}

// ==========================================
// InspectionDistribution (质检分摊)
// ==========================================

pub fn insert_distribution_tx(conn: &Connection, record: &InspectionDistribution) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO inspection_distribution (
            id, tenant_id, inspection_entity_id, daily_machining_batch_id,
            rejected_pieces_count, rework_pieces_count, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
        params![
            record.id,
            record.tenant_id,
            record.inspection_entity_id,
            record.daily_machining_batch_id,
            record.rejected_pieces_count,
            record.rework_pieces_count,
            fmt_ts(record.created_at),
        ],
    )?;
    Ok(())
}

pub fn find_distributions_by_inspection_tx(
    conn: &Connection,
    tenant_id: i64,
    inspection_entity_id: &str,
) -> RepositoryResult<Vec<InspectionDistribution>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, tenant_id, inspection_entity_id, daily_machining_batch_id,
               rejected_pieces_count, rework_pieces_count, created_at
        FROM inspection_distribution
        WHERE tenant_id = ?1 AND inspection_entity_id = ?2 AND deleted = 0
        ORDER BY daily_machining_batch_id ASC
        "#,
    )?;
    let rows = stmt
        .query_map(params![tenant_id, inspection_entity_id], |row| {
            Ok(InspectionDistribution {
                id: row.get(0)?,
                tenant_id: row.get(1)?,
                inspection_entity_id: row.get(2)?,
                daily_machining_batch_id: row.get(3)?,
                rejected_pieces_count: get_count(row, 4)?,
                rework_pieces_count: get_count(row, 5)?,
                created_at: parse_ts(6, &row.get::<_, String>(6)?)?,
            })
        })?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(rows)
}

// ==========================================
// BatchRepository - 件数快照查询 (报表/库存只读)
// ==========================================
pub struct BatchRepository {
    conn: Arc<Mutex<Connection>>,
}

impl BatchRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_account(&self, tenant_id: i64, id: &str) -> RepositoryResult<Option<ProcessedItemBatch>> {
        let conn = self.get_conn()?;
        find_account_tx(&conn, tenant_id, id)
    }

    pub fn find_consumptions_by_source(
        &self,
        tenant_id: i64,
        source_entity_id: &str,
    ) -> RepositoryResult<Vec<PieceConsumption>> {
        let conn = self.get_conn()?;
        find_consumptions_by_source_tx(&conn, tenant_id, source_entity_id)
    }

    pub fn find_daily_batches(
        &self,
        tenant_id: i64,
        machining_entity_id: &str,
    ) -> RepositoryResult<Vec<DailyMachiningBatch>> {
        let conn = self.get_conn()?;
        find_daily_by_machining_tx(&conn, tenant_id, machining_entity_id)
    }

    /// 单个账户快照
    pub fn find_snapshot(&self, tenant_id: i64, entity_id: &str) -> RepositoryResult<Option<PieceCountSnapshot>> {
        let conn = self.get_conn()?;
        let Some(account) = find_account_tx(&conn, tenant_id, entity_id)? else {
            return Ok(None);
        };
        let batch = get_stage_batch_tx(&conn, tenant_id, &account.stage_batch_id)?;
        Ok(Some(account.snapshot(&batch.batch_number)))
    }

    /// 工序批次下全部账户快照
    pub fn find_snapshots_by_stage_batch(
        &self,
        tenant_id: i64,
        stage_batch_id: &str,
    ) -> RepositoryResult<Vec<PieceCountSnapshot>> {
        let conn = self.get_conn()?;
        let batch = get_stage_batch_tx(&conn, tenant_id, stage_batch_id)?;
        let accounts = find_accounts_by_stage_batch_tx(&conn, tenant_id, stage_batch_id)?;
        Ok(accounts.iter().map(|a| a.snapshot(&batch.batch_number)).collect())
    }

    /// 某工序仍有可用件数的已完工账户 (库存看板)
    pub fn list_available_snapshots(
        &self,
        tenant_id: i64,
        operation_type: OperationType,
    ) -> RepositoryResult<Vec<PieceCountSnapshot>> {
        let conn = self.get_conn()?;
        let sql = format!(
            "SELECT {}, sb.batch_number FROM processed_item_batch p \
             JOIN stage_batch sb ON sb.id = p.stage_batch_id \
             WHERE p.tenant_id = ?1 AND p.operation_type = ?2 AND p.status = ?3 \
               AND p.available_pieces_count > 0 AND p.deleted = 0 \
             ORDER BY p.completed_at ASC, p.id ASC",
            ACCOUNT_COLUMNS
                .split(',')
                .map(|c| format!("p.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                params![tenant_id, operation_type.as_str(), BatchStatus::Completed.as_str()],
                |row| {
                    let account = map_account_row(row)?;
                    let batch_number: String = row.get(17)?;
                    Ok(account.snapshot(&batch_number))
                },
            )?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(rows)
    }
}

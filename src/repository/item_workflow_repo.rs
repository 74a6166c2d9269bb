// ==========================================
// 锻造生产追溯系统 - 流程实例仓储
// ==========================================
// 表: item_workflow / item_workflow_step
// 说明: 步骤只软删除, 追溯历史不丢失
// ==========================================

use crate::domain::types::{OperationType, StepStatus, WorkflowStatus};
use crate::domain::workflow::{ItemWorkflow, ItemWorkflowStep, OperationOutcome};
use crate::repository::codec::{fmt_opt_ts, fmt_ts, get_count, parse_enum, parse_json, parse_opt_ts, parse_ts};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const STEP_COLUMNS: &str = r#"
    id, item_workflow_id, workflow_step_id, parent_item_workflow_step_id, tree_level,
    operation_type, is_optional, step_status, started_at, completed_at,
    operation_reference_id, operation_outcome_json, related_entity_ids_json,
    initial_pieces_count, pieces_available_for_next, consumed_pieces_count,
    rejected_pieces_count, rework_pieces_count, pieces_utilization_percentage,
    notes, created_at, updated_at
"#;

// ==========================================
// 事务内函数
// ==========================================

/// 写入流程实例及全部步骤
pub fn insert_workflow_tx(conn: &Connection, workflow: &ItemWorkflow) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO item_workflow (
            id, tenant_id, workflow_identifier, item_id, workflow_template_id,
            workflow_status, started_at, completed_at, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            workflow.id,
            workflow.tenant_id,
            workflow.workflow_identifier,
            workflow.item_id,
            workflow.workflow_template_id,
            workflow.workflow_status.as_str(),
            fmt_opt_ts(workflow.started_at),
            fmt_opt_ts(workflow.completed_at),
            fmt_ts(workflow.created_at),
            fmt_ts(workflow.updated_at),
        ],
    )?;

    for step in &workflow.steps {
        insert_step_tx(conn, workflow.tenant_id, step)?;
    }
    Ok(())
}

fn insert_step_tx(conn: &Connection, tenant_id: i64, step: &ItemWorkflowStep) -> RepositoryResult<()> {
    let outcome_json = step
        .operation_outcome
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?;
    conn.execute(
        r#"
        INSERT INTO item_workflow_step (
            id, tenant_id, item_workflow_id, workflow_step_id, parent_item_workflow_step_id,
            tree_level, operation_type, is_optional, step_status, started_at, completed_at,
            operation_reference_id, operation_outcome_json, related_entity_ids_json,
            initial_pieces_count, pieces_available_for_next, consumed_pieces_count,
            rejected_pieces_count, rework_pieces_count, pieces_utilization_percentage,
            notes, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)
        "#,
        params![
            step.id,
            tenant_id,
            step.item_workflow_id,
            step.workflow_step_id,
            step.parent_item_workflow_step_id,
            step.tree_level,
            step.operation_type.as_str(),
            step.is_optional,
            step.step_status.as_str(),
            fmt_opt_ts(step.started_at),
            fmt_opt_ts(step.completed_at),
            step.operation_reference_id,
            outcome_json,
            serde_json::to_string(&step.related_entity_ids)?,
            step.initial_pieces_count,
            step.pieces_available_for_next,
            step.consumed_pieces_count,
            step.rejected_pieces_count,
            step.rework_pieces_count,
            step.pieces_utilization_percentage,
            step.notes,
            fmt_ts(step.created_at),
            fmt_ts(step.updated_at),
        ],
    )?;
    Ok(())
}

/// 回写流程头及全部步骤的可变字段
pub fn update_workflow_tx(conn: &Connection, workflow: &ItemWorkflow) -> RepositoryResult<()> {
    let affected = conn.execute(
        r#"
        UPDATE item_workflow
        SET workflow_status = ?3, started_at = ?4, completed_at = ?5, updated_at = ?6
        WHERE tenant_id = ?1 AND id = ?2 AND deleted = 0
        "#,
        params![
            workflow.tenant_id,
            workflow.id,
            workflow.workflow_status.as_str(),
            fmt_opt_ts(workflow.started_at),
            fmt_opt_ts(workflow.completed_at),
            fmt_ts(workflow.updated_at),
        ],
    )?;
    if affected == 0 {
        return Err(RepositoryError::NotFound {
            entity: "ItemWorkflow".to_string(),
            id: workflow.id.clone(),
        });
    }

    let mut stmt = conn.prepare(
        r#"
        UPDATE item_workflow_step
        SET step_status = ?3, started_at = ?4, completed_at = ?5,
            operation_reference_id = ?6, operation_outcome_json = ?7, related_entity_ids_json = ?8,
            initial_pieces_count = ?9, pieces_available_for_next = ?10, consumed_pieces_count = ?11,
            rejected_pieces_count = ?12, rework_pieces_count = ?13, pieces_utilization_percentage = ?14,
            notes = ?15, updated_at = ?16
        WHERE tenant_id = ?1 AND id = ?2 AND deleted = 0
        "#,
    )?;
    for step in &workflow.steps {
        let outcome_json = step
            .operation_outcome
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        stmt.execute(params![
            workflow.tenant_id,
            step.id,
            step.step_status.as_str(),
            fmt_opt_ts(step.started_at),
            fmt_opt_ts(step.completed_at),
            step.operation_reference_id,
            outcome_json,
            serde_json::to_string(&step.related_entity_ids)?,
            step.initial_pieces_count,
            step.pieces_available_for_next,
            step.consumed_pieces_count,
            step.rejected_pieces_count,
            step.rework_pieces_count,
            step.pieces_utilization_percentage,
            step.notes,
            fmt_ts(step.updated_at),
        ])?;
    }
    Ok(())
}

/// 按租户 + ID 加载流程实例 (含全部步骤)
pub fn find_workflow_tx(
    conn: &Connection,
    tenant_id: i64,
    item_workflow_id: &str,
) -> RepositoryResult<Option<ItemWorkflow>> {
    let header = conn
        .query_row(
            r#"
            SELECT id, tenant_id, workflow_identifier, item_id, workflow_template_id,
                   workflow_status, started_at, completed_at, created_at, updated_at
            FROM item_workflow
            WHERE tenant_id = ?1 AND id = ?2 AND deleted = 0
            "#,
            params![tenant_id, item_workflow_id],
            |row| {
                Ok(ItemWorkflow {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    workflow_identifier: row.get(2)?,
                    item_id: row.get(3)?,
                    workflow_template_id: row.get(4)?,
                    workflow_status: parse_enum(5, &row.get::<_, String>(5)?, WorkflowStatus::parse)?,
                    started_at: parse_opt_ts(6, row.get(6)?)?,
                    completed_at: parse_opt_ts(7, row.get(7)?)?,
                    steps: Vec::new(),
                    created_at: parse_ts(8, &row.get::<_, String>(8)?)?,
                    updated_at: parse_ts(9, &row.get::<_, String>(9)?)?,
                })
            },
        )
        .optional()?;

    let Some(mut workflow) = header else {
        return Ok(None);
    };

    let sql = format!(
        "SELECT {} FROM item_workflow_step WHERE tenant_id = ?1 AND item_workflow_id = ?2 AND deleted = 0 \
         ORDER BY tree_level ASC, created_at ASC, id ASC",
        STEP_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    workflow.steps = stmt
        .query_map(params![tenant_id, item_workflow_id], map_step_row)?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(Some(workflow))
}

/// 加载流程实例, 不存在即 NotFound
pub fn get_workflow_tx(conn: &Connection, tenant_id: i64, item_workflow_id: &str) -> RepositoryResult<ItemWorkflow> {
    find_workflow_tx(conn, tenant_id, item_workflow_id)?.ok_or_else(|| RepositoryError::NotFound {
        entity: "ItemWorkflow".to_string(),
        id: item_workflow_id.to_string(),
    })
}

fn map_step_row(row: &rusqlite::Row<'_>) -> SqliteResult<ItemWorkflowStep> {
    let outcome_json: Option<String> = row.get(11)?;
    let operation_outcome: Option<OperationOutcome> = outcome_json
        .map(|raw| parse_json(11, &raw))
        .transpose()?;
    let related_json: String = row.get(12)?;

    Ok(ItemWorkflowStep {
        id: row.get(0)?,
        item_workflow_id: row.get(1)?,
        workflow_step_id: row.get(2)?,
        parent_item_workflow_step_id: row.get(3)?,
        tree_level: row.get(4)?,
        operation_type: parse_enum(5, &row.get::<_, String>(5)?, OperationType::parse)?,
        is_optional: row.get(6)?,
        step_status: parse_enum(7, &row.get::<_, String>(7)?, StepStatus::parse)?,
        started_at: parse_opt_ts(8, row.get(8)?)?,
        completed_at: parse_opt_ts(9, row.get(9)?)?,
        operation_reference_id: row.get(10)?,
        operation_outcome,
        related_entity_ids: parse_json(12, &related_json)?,
        initial_pieces_count: get_count(row, 13)?,
        pieces_available_for_next: get_count(row, 14)?,
        consumed_pieces_count: get_count(row, 15)?,
        rejected_pieces_count: get_count(row, 16)?,
        rework_pieces_count: get_count(row, 17)?,
        pieces_utilization_percentage: row.get(18)?,
        notes: row.get(19)?,
        created_at: parse_ts(20, &row.get::<_, String>(20)?)?,
        updated_at: parse_ts(21, &row.get::<_, String>(21)?)?,
    })
}

/// 批量查询流程状态 (缺失/软删除的ID不出现在结果中)
pub fn find_statuses_tx(
    conn: &Connection,
    tenant_id: i64,
    item_workflow_ids: &[String],
) -> RepositoryResult<HashMap<String, WorkflowStatus>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT workflow_status FROM item_workflow
        WHERE tenant_id = ?1 AND id = ?2 AND deleted = 0
        "#,
    )?;
    let mut statuses = HashMap::with_capacity(item_workflow_ids.len());
    for id in item_workflow_ids {
        let raw: Option<String> = stmt
            .query_row(params![tenant_id, id], |row| row.get(0))
            .optional()?;
        if let Some(raw) = raw {
            let status = WorkflowStatus::parse(&raw).map_err(|e| RepositoryError::CorruptData {
                field: "item_workflow.workflow_status".to_string(),
                message: e.to_string(),
            })?;
            statuses.insert(id.clone(), status);
        }
    }
    Ok(statuses)
}

// ==========================================
// ItemWorkflowRepository - 流程实例仓储 (只读查询)
// ==========================================
pub struct ItemWorkflowRepository {
    conn: Arc<Mutex<Connection>>,
}

impl ItemWorkflowRepository {
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

    pub fn find_by_id(&self, tenant_id: i64, item_workflow_id: &str) -> RepositoryResult<Option<ItemWorkflow>> {
        let conn = self.get_conn()?;
        find_workflow_tx(&conn, tenant_id, item_workflow_id)
    }

    /// 按追溯号查询
    pub fn find_by_identifier(
        &self,
        tenant_id: i64,
        workflow_identifier: &str,
    ) -> RepositoryResult<Option<ItemWorkflow>> {
        let conn = self.get_conn()?;
        let id: Option<String> = conn
            .query_row(
                r#"
                SELECT id FROM item_workflow
                WHERE tenant_id = ?1 AND workflow_identifier = ?2 AND deleted = 0
                "#,
                params![tenant_id, workflow_identifier],
                |row| row.get(0),
            )
            .optional()?;
        match id {
            Some(id) => find_workflow_tx(&conn, tenant_id, &id),
            None => Ok(None),
        }
    }

    /// 零件下全部流程实例ID (创建先后)
    pub fn list_ids_by_item(&self, tenant_id: i64, item_id: &str) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT id FROM item_workflow
            WHERE tenant_id = ?1 AND item_id = ?2 AND deleted = 0
            ORDER BY created_at ASC, id ASC
            "#,
        )?;
        let ids = stmt
            .query_map(params![tenant_id, item_id], |row| row.get::<_, String>(0))?
            .collect::<SqliteResult<Vec<_>>>()?;
        Ok(ids)
    }
}

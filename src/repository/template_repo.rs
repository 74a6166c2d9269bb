// ==========================================
// 锻造生产追溯系统 - 工艺模板仓储
// ==========================================
// 红线: Repository 不含业务逻辑 (树结构校验由 TemplateResolver 负责)
// 表: workflow_template / workflow_step
// ==========================================

use crate::domain::template::{WorkflowStep, WorkflowTemplate};
use crate::domain::types::OperationType;
use crate::repository::codec::{fmt_ts, parse_enum, parse_ts};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::sync::{Arc, Mutex};

// ==========================================
// 事务内函数 (调用方持有连接/事务)
// ==========================================

/// 写入模板及其全部节点
pub fn insert_template_tx(conn: &Connection, template: &WorkflowTemplate) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO workflow_template (id, tenant_id, name, description, is_default, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        "#,
        params![
            template.id,
            template.tenant_id,
            template.name,
            template.description,
            template.is_default,
            fmt_ts(template.created_at),
        ],
    )?;
    for step in &template.steps {
        insert_step_tx(conn, template.tenant_id, step)?;
    }
    Ok(())
}

pub fn insert_step_tx(conn: &Connection, tenant_id: i64, step: &WorkflowStep) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO workflow_step (
            id, tenant_id, template_id, operation_type, step_name,
            parent_step_id, tree_level, is_optional, is_parallel, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        "#,
        params![
            step.id,
            tenant_id,
            step.template_id,
            step.operation_type.as_str(),
            step.step_name,
            step.parent_step_id,
            step.tree_level,
            step.is_optional,
            step.is_parallel,
            fmt_ts(step.created_at),
        ],
    )?;
    Ok(())
}

/// 按租户 + ID 查询模板 (含节点, 不含软删除)
pub fn find_template_tx(
    conn: &Connection,
    tenant_id: i64,
    template_id: &str,
) -> RepositoryResult<Option<WorkflowTemplate>> {
    let header = conn
        .query_row(
            r#"
            SELECT id, tenant_id, name, description, is_default, created_at
            FROM workflow_template
            WHERE tenant_id = ?1 AND id = ?2 AND deleted = 0
            "#,
            params![tenant_id, template_id],
            |row| {
                Ok(WorkflowTemplate {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    name: row.get(2)?,
                    description: row.get(3)?,
                    is_default: row.get(4)?,
                    steps: Vec::new(),
                    created_at: parse_ts(5, &row.get::<_, String>(5)?)?,
                })
            },
        )
        .optional()?;

    let Some(mut template) = header else {
        return Ok(None);
    };
    template.steps = find_steps_tx(conn, tenant_id, template_id)?;
    Ok(Some(template))
}

fn find_steps_tx(conn: &Connection, tenant_id: i64, template_id: &str) -> RepositoryResult<Vec<WorkflowStep>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id, template_id, operation_type, step_name, parent_step_id,
               tree_level, is_optional, is_parallel, created_at
        FROM workflow_step
        WHERE tenant_id = ?1 AND template_id = ?2 AND deleted = 0
        ORDER BY tree_level ASC, created_at ASC, id ASC
        "#,
    )?;
    let steps = stmt
        .query_map(params![tenant_id, template_id], map_step_row)?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(steps)
}

fn map_step_row(row: &rusqlite::Row<'_>) -> SqliteResult<WorkflowStep> {
    Ok(WorkflowStep {
        id: row.get(0)?,
        template_id: row.get(1)?,
        operation_type: parse_enum(2, &row.get::<_, String>(2)?, OperationType::parse)?,
        step_name: row.get(3)?,
        parent_step_id: row.get(4)?,
        tree_level: row.get(5)?,
        is_optional: row.get(6)?,
        is_parallel: row.get(7)?,
        created_at: parse_ts(8, &row.get::<_, String>(8)?)?,
    })
}

/// 模板是否已被流程实例引用
pub fn template_in_use_tx(conn: &Connection, tenant_id: i64, template_id: &str) -> RepositoryResult<bool> {
    let count: i64 = conn.query_row(
        r#"
        SELECT COUNT(*) FROM item_workflow
        WHERE tenant_id = ?1 AND workflow_template_id = ?2 AND deleted = 0
        "#,
        params![tenant_id, template_id],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// 软删除模板及其节点
pub fn soft_delete_template_tx(
    conn: &Connection,
    tenant_id: i64,
    template_id: &str,
    deleted_at: &str,
) -> RepositoryResult<()> {
    let affected = conn.execute(
        r#"
        UPDATE workflow_template SET deleted = 1, deleted_at = ?3
        WHERE tenant_id = ?1 AND id = ?2 AND deleted = 0
        "#,
        params![tenant_id, template_id, deleted_at],
    )?;
    if affected == 0 {
        return Err(RepositoryError::NotFound {
            entity: "WorkflowTemplate".to_string(),
            id: template_id.to_string(),
        });
    }
    conn.execute(
        r#"
        UPDATE workflow_step SET deleted = 1, deleted_at = ?3
        WHERE tenant_id = ?1 AND template_id = ?2 AND deleted = 0
        "#,
        params![tenant_id, template_id, deleted_at],
    )?;
    Ok(())
}

// ==========================================
// TemplateRepository - 工艺模板仓储 (只读查询)
// ==========================================
pub struct TemplateRepository {
    conn: Arc<Mutex<Connection>>,
}

impl TemplateRepository {
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

    pub fn find_by_id(&self, tenant_id: i64, template_id: &str) -> RepositoryResult<Option<WorkflowTemplate>> {
        let conn = self.get_conn()?;
        find_template_tx(&conn, tenant_id, template_id)
    }

    /// 租户下全部模板 (默认模板在前)
    pub fn list_by_tenant(&self, tenant_id: i64) -> RepositoryResult<Vec<WorkflowTemplate>> {
        let conn = self.get_conn()?;
        let ids: Vec<String> = {
            let mut stmt = conn.prepare(
                r#"
                SELECT id FROM workflow_template
                WHERE tenant_id = ?1 AND deleted = 0
                ORDER BY is_default DESC, name ASC
                "#,
            )?;
            let rows = stmt
                .query_map(params![tenant_id], |row| row.get::<_, String>(0))?
                .collect::<SqliteResult<Vec<_>>>()?;
            rows
        };

        let mut templates = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(t) = find_template_tx(&conn, tenant_id, &id)? {
                templates.push(t);
            }
        }
        Ok(templates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::configure_sqlite_connection(&conn).unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        conn
    }

    fn template(tenant_id: i64) -> WorkflowTemplate {
        let ts = NaiveDate::from_ymd_opt(2025, 1, 2).unwrap().and_hms_opt(3, 4, 5).unwrap();
        let step = |id: &str, op: OperationType, parent: Option<&str>, level: u32| WorkflowStep {
            id: id.to_string(),
            template_id: "tpl".to_string(),
            operation_type: op,
            step_name: op.as_str().to_string(),
            parent_step_id: parent.map(|p| p.to_string()),
            tree_level: level,
            is_optional: level == 1,
            is_parallel: false,
            created_at: ts,
        };
        WorkflowTemplate {
            id: "tpl".to_string(),
            tenant_id,
            name: "齿轮坯".to_string(),
            description: Some("锻造 + 热处理".to_string()),
            is_default: true,
            steps: vec![
                step("f", OperationType::Forging, None, 0),
                step("h", OperationType::HeatTreatment, Some("f"), 1),
            ],
            created_at: ts,
        }
    }

    #[test]
    fn test_insert_and_find_template() {
        let conn = conn();
        insert_template_tx(&conn, &template(1)).unwrap();

        let found = find_template_tx(&conn, 1, "tpl").unwrap().unwrap();
        assert_eq!(found.name, "齿轮坯");
        assert_eq!(found.steps.len(), 2);
        assert_eq!(found.steps[1].parent_step_id.as_deref(), Some("f"));
        assert!(found.steps[1].is_optional);
    }

    #[test]
    fn test_find_is_tenant_scoped() {
        let conn = conn();
        insert_template_tx(&conn, &template(1)).unwrap();
        assert!(find_template_tx(&conn, 2, "tpl").unwrap().is_none());
    }

    #[test]
    fn test_soft_delete_hides_template() {
        let conn = conn();
        insert_template_tx(&conn, &template(1)).unwrap();
        soft_delete_template_tx(&conn, 1, "tpl", "2025-01-03 00:00:00").unwrap();
        assert!(find_template_tx(&conn, 1, "tpl").unwrap().is_none());
        assert!(soft_delete_template_tx(&conn, 1, "tpl", "2025-01-03 00:00:00").is_err());

        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM workflow_step WHERE template_id = 'tpl'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 2);
    }
}

// ==========================================
// 仓储单元测试公共夹具
// ==========================================
// 外键约束开启: 账户/订单关联都需要先落库模板与流程实例
// ==========================================

use crate::domain::template::{WorkflowStep, WorkflowTemplate};
use crate::domain::tenant::TenantContext;
use crate::domain::types::OperationType;
use crate::domain::workflow::ItemWorkflow;
use crate::engine::instantiator::WorkflowInstantiator;
use crate::engine::template_resolver::TemplateResolver;
use crate::repository::item_workflow_repo::insert_workflow_tx;
use crate::repository::template_repo::{find_template_tx, insert_template_tx};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;

pub fn conn() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
    crate::db::configure_sqlite_connection(&conn).unwrap();
    crate::db::ensure_schema(&conn).unwrap();
    conn
}

pub fn ts(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

/// 锻造 → 热处理 → 机加工 → 质检
pub fn store_template(conn: &Connection, tenant_id: i64, template_id: &str) {
    if find_template_tx(conn, tenant_id, template_id).unwrap().is_some() {
        return;
    }
    let step = |suffix: &str, op: OperationType, parent: Option<&str>, level: u32| WorkflowStep {
        id: format!("{}-{}", template_id, suffix),
        template_id: template_id.to_string(),
        operation_type: op,
        step_name: op.as_str().to_string(),
        parent_step_id: parent.map(|p| format!("{}-{}", template_id, p)),
        tree_level: level,
        is_optional: false,
        is_parallel: false,
        created_at: ts(1, 0),
    };
    let template = WorkflowTemplate {
        id: template_id.to_string(),
        tenant_id,
        name: "法兰盘".to_string(),
        description: None,
        is_default: false,
        steps: vec![
            step("forge", OperationType::Forging, None, 0),
            step("heat", OperationType::HeatTreatment, Some("forge"), 1),
            step("machining", OperationType::Machining, Some("heat"), 2),
            step("quality", OperationType::Quality, Some("machining"), 3),
        ],
        created_at: ts(1, 0),
    };
    insert_template_tx(conn, &template).unwrap();
}

/// 落库一条新批系 (模板按需创建)
pub fn store_lineage(conn: &Connection, tenant_id: i64, item_id: &str) -> ItemWorkflow {
    store_template(conn, tenant_id, "tpl-repo");
    let template = find_template_tx(conn, tenant_id, "tpl-repo").unwrap().unwrap();
    let resolved = TemplateResolver::new().resolve(&template).unwrap();
    let workflow = WorkflowInstantiator::new()
        .instantiate(&TenantContext::new(tenant_id), item_id, &resolved, ts(1, 1))
        .unwrap();
    insert_workflow_tx(conn, &workflow).unwrap();
    workflow
}

pub fn step_id(workflow: &ItemWorkflow, op: OperationType) -> String {
    workflow
        .steps
        .iter()
        .find(|s| s.operation_type == op)
        .map(|s| s.id.clone())
        .unwrap()
}

// ==========================================
// 集成测试辅助函数
// ==========================================
// 临时库 + 全套 API + 线性工艺模板 + 常用建批/完工操作
// ==========================================

#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use forge_workflow_ledger::api::{
    ApiResult, CompleteOperationBatchRequest, CompletedOperationBatch, CreateOperationBatchRequest,
    CreatedOperationBatch, InventoryApi, ItemOutcomeInput, OperationApi, OrderApi, ProcessedItemInput,
    WorkflowApi,
};
use forge_workflow_ledger::config::ConfigManager;
use forge_workflow_ledger::db;
use forge_workflow_ledger::domain::template::{WorkflowStep, WorkflowTemplate};
use forge_workflow_ledger::domain::tenant::TenantContext;
use forge_workflow_ledger::domain::types::OperationType;
use forge_workflow_ledger::domain::workflow::ItemWorkflow;
use forge_workflow_ledger::engine::piece_ledger::ConsumptionRequest;
use forge_workflow_ledger::engine::step_machine::CompletionRequest;
use rusqlite::Connection;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use uuid::Uuid;

pub const TENANT_ID: i64 = 1001;

/// 创建临时测试数据库 (已建表)
pub fn create_test_db() -> Result<(NamedTempFile, String), Box<dyn Error>> {
    let temp_file = NamedTempFile::new()?;
    let db_path = temp_file
        .path()
        .to_str()
        .ok_or("临时文件路径不是合法 UTF-8")?
        .to_string();

    let conn = db::open_sqlite_connection(&db_path)?;
    db::ensure_schema(&conn)?;

    Ok((temp_file, db_path))
}

/// 打开一个独立连接 (并发测试每个线程各持一个)
pub fn open_shared_conn(db_path: &str) -> Arc<Mutex<Connection>> {
    let conn = db::open_sqlite_connection(db_path).expect("打开测试库失败");
    Arc::new(Mutex::new(conn))
}

/// 2025-03-{day} {hour}:00:00
pub fn ts(day: u32, hour: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, day)
        .unwrap()
        .and_hms_opt(hour, 0, 0)
        .unwrap()
}

pub fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
}

// ==========================================
// 模板构造
// ==========================================

pub fn template_step(
    template_id: &str,
    suffix: &str,
    operation_type: OperationType,
    parent: Option<&str>,
    tree_level: u32,
    is_optional: bool,
) -> WorkflowStep {
    WorkflowStep {
        id: format!("{}-{}", template_id, suffix),
        template_id: template_id.to_string(),
        operation_type,
        step_name: suffix.to_string(),
        parent_step_id: parent.map(|p| format!("{}-{}", template_id, p)),
        tree_level,
        is_optional,
        is_parallel: false,
        created_at: ts(1, 0),
    }
}

pub fn empty_template(tenant_id: i64, template_id: &str) -> WorkflowTemplate {
    WorkflowTemplate {
        id: template_id.to_string(),
        tenant_id,
        name: format!("模板 {}", template_id),
        description: None,
        is_default: false,
        steps: Vec::new(),
        created_at: ts(1, 0),
    }
}

/// 锻造 → 热处理 → 机加工 → 质检 → 发运
pub fn linear_template(tenant_id: i64, template_id: &str) -> WorkflowTemplate {
    let mut template = empty_template(tenant_id, template_id);
    template.steps = vec![
        template_step(template_id, "forge", OperationType::Forging, None, 0, false),
        template_step(template_id, "heat", OperationType::HeatTreatment, Some("forge"), 1, false),
        template_step(template_id, "machining", OperationType::Machining, Some("heat"), 2, false),
        template_step(template_id, "quality", OperationType::Quality, Some("machining"), 3, false),
        template_step(template_id, "dispatch", OperationType::Dispatch, Some("quality"), 4, false),
    ];
    template
}

/// 按工序类型取流程步骤ID (模板中每种工序只出现一次时使用)
pub fn step_of(workflow: &ItemWorkflow, operation_type: OperationType) -> String {
    workflow
        .steps
        .iter()
        .find(|s| s.operation_type == operation_type)
        .map(|s| s.id.clone())
        .expect("流程中不存在该工序步骤")
}

pub fn unique_batch_number(operation_type: OperationType) -> String {
    format!(
        "{}-{}",
        operation_type.as_str(),
        &Uuid::new_v4().simple().to_string()[..8]
    )
}

// ==========================================
// 测试环境
// ==========================================

pub struct TestEnv {
    _temp_file: NamedTempFile,
    pub db_path: String,
    pub conn: Arc<Mutex<Connection>>,
    pub ctx: TenantContext,
    pub workflow_api: WorkflowApi,
    pub operation_api: OperationApi,
    pub inventory_api: InventoryApi,
    pub order_api: OrderApi,
}

impl TestEnv {
    pub fn new() -> Self {
        let (temp_file, db_path) = create_test_db().expect("创建测试库失败");
        let conn = open_shared_conn(&db_path);
        Self {
            _temp_file: temp_file,
            workflow_api: WorkflowApi::new(conn.clone()),
            operation_api: OperationApi::new(conn.clone()),
            inventory_api: InventoryApi::new(conn.clone()),
            order_api: OrderApi::new(conn.clone()),
            ctx: TenantContext::new(TENANT_ID).with_actor("tester"),
            db_path,
            conn,
        }
    }

    pub fn set_config(&self, key: &str, value: &str) {
        ConfigManager::from_connection(self.conn.clone())
            .expect("创建配置管理器失败")
            .set_global_config_value(key, value)
            .expect("写入配置失败");
    }

    /// 登记线性模板并实例化一条批系
    pub fn linear_lineage(&self, template_id: &str, item_id: &str) -> ItemWorkflow {
        if self.workflow_api.get_template(&self.ctx, template_id).is_err() {
            self.workflow_api
                .register_template(&self.ctx, &linear_template(TENANT_ID, template_id))
                .expect("登记模板失败");
        }
        self.workflow_api
            .instantiate_workflow(&self.ctx, item_id, template_id)
            .expect("实例化流程失败")
    }

    pub fn reload(&self, workflow: &ItemWorkflow) -> ItemWorkflow {
        self.workflow_api
            .get_item_workflow(&self.ctx, &workflow.id)
            .expect("读取流程失败")
    }

    /// 建批 (单批系)
    pub fn start_batch(
        &self,
        operation_type: OperationType,
        workflow: &ItemWorkflow,
        consumptions: Vec<ConsumptionRequest>,
        started_at: NaiveDateTime,
    ) -> ApiResult<CreatedOperationBatch> {
        let request = CreateOperationBatchRequest {
            operation_type,
            batch_number: unique_batch_number(operation_type),
            started_at: Some(started_at),
            items: vec![ProcessedItemInput {
                item_workflow_id: workflow.id.clone(),
                item_workflow_step_id: step_of(workflow, operation_type),
                planned_pieces: None,
                consumptions,
            }],
        };
        self.operation_api.create_operation_batch(&self.ctx, &request)
    }

    pub fn start_forge(
        &self,
        workflow: &ItemWorkflow,
        planned: u32,
        started_at: NaiveDateTime,
    ) -> ApiResult<CreatedOperationBatch> {
        let request = CreateOperationBatchRequest {
            operation_type: OperationType::Forging,
            batch_number: unique_batch_number(OperationType::Forging),
            started_at: Some(started_at),
            items: vec![ProcessedItemInput {
                item_workflow_id: workflow.id.clone(),
                item_workflow_step_id: step_of(workflow, OperationType::Forging),
                planned_pieces: Some(planned),
                consumptions: Vec::new(),
            }],
        };
        self.operation_api.create_operation_batch(&self.ctx, &request)
    }

    /// 完工单账户批次
    pub fn finish_batch(
        &self,
        created: &CreatedOperationBatch,
        completed_at: NaiveDateTime,
        produced: Option<u32>,
        rejected: u32,
        rework: u32,
    ) -> ApiResult<CompletedOperationBatch> {
        let request = CompleteOperationBatchRequest {
            stage_batch_id: created.stage_batch.id.clone(),
            completed_at,
            items: vec![ItemOutcomeInput {
                processed_item_id: created.accounts[0].id.clone(),
                produced_pieces: produced,
                rejected_pieces: rejected,
                rework_pieces: rework,
                distribution: None,
            }],
        };
        self.operation_api.complete_operation_batch(&self.ctx, &request)
    }

    /// 锻造建批并完工, 返回锻造账户ID
    pub fn forge_and_finish(
        &self,
        workflow: &ItemWorkflow,
        produced: u32,
        rejected: u32,
        day: u32,
    ) -> String {
        let created = self
            .start_forge(workflow, produced, ts(day, 6))
            .expect("锻造建批失败");
        self.finish_batch(&created, ts(day, 7), Some(produced), rejected, 0)
            .expect("锻造完工失败");
        created.accounts[0].id.clone()
    }

    /// 下游工序领用上游全部可用件数并完工 (零报废)
    pub fn pass_through(
        &self,
        operation_type: OperationType,
        workflow: &ItemWorkflow,
        source_entity_id: &str,
        started_at: NaiveDateTime,
        completed_at: NaiveDateTime,
    ) -> String {
        let available = self
            .operation_api
            .get_account(&self.ctx, source_entity_id)
            .expect("读取来源账户失败")
            .available_pieces_count;
        let created = self
            .start_batch(
                operation_type,
                workflow,
                vec![ConsumptionRequest::available(source_entity_id, available)],
                started_at,
            )
            .expect("建批失败");
        self.finish_batch(&created, completed_at, None, 0, 0)
            .expect("完工失败");
        created.accounts[0].id.clone()
    }

    /// 把线性批系从锻造一路做到流程完工
    pub fn run_linear_to_completion(&self, workflow: &ItemWorkflow, pieces: u32, day: u32) {
        let forge = self.forge_and_finish(workflow, pieces, 0, day);
        let heat = self.pass_through(OperationType::HeatTreatment, workflow, &forge, ts(day, 8), ts(day, 9));
        let machining = self.pass_through(OperationType::Machining, workflow, &heat, ts(day, 10), ts(day, 11));
        let quality = self.pass_through(OperationType::Quality, workflow, &machining, ts(day, 12), ts(day, 13));
        self.pass_through(OperationType::Dispatch, workflow, &quality, ts(day, 14), ts(day, 15));

        let step_completions: BTreeMap<String, NaiveDateTime> = OperationType::ALL
            .iter()
            .map(|op| (step_of(workflow, *op), ts(day, 16)))
            .collect();
        let request = CompletionRequest {
            completed_at: ts(day, 17),
            step_completions,
            require_workflow_completion: true,
        };
        self.operation_api
            .complete_steps(&self.ctx, &workflow.id, &request)
            .expect("流程完工失败");
    }
}

// ==========================================
// 锻造生产追溯系统 - 工序批次 API
// ==========================================
// 职责: 工序批次建批/完工、日机加工报工、质检分摊、返工回池、步骤完工
// 红线: 每个操作一个 IMMEDIATE 写事务:
//       加载来源账户与流程 → 账本/状态机校验 → 写回账户、领用记录、步骤投影
// 约束: 来源账户必须属于同一批系 (ItemWorkflow)
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::{lock_conn, order_api, read_config, with_write_tx};
use crate::domain::batch::{
    DailyMachiningBatch, InspectionDistribution, PieceConsumption, ProcessedItemBatch, StageBatch,
};
use crate::domain::tenant::TenantContext;
use crate::domain::types::{BatchStatus, OperationType};
use crate::domain::workflow::ItemWorkflow;
use crate::engine::error::LedgerError;
use crate::engine::events::{OptionalEventPublisher, WorkflowEvent, WorkflowEventType};
use crate::engine::piece_ledger::{AccountOutcome, ConsumptionRequest, PieceLedger};
use crate::engine::rework_distribution::{
    DistributionEntry, DistributionRequest, DistributionResult, ReworkDistributor,
};
use crate::engine::step_machine::{CompletionRequest, CompletionResult, StepStateMachine};
use crate::repository::batch_repo;
use crate::repository::codec::now_ts;
use crate::repository::item_workflow_repo;
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{info, instrument, warn};
use uuid::Uuid;

// ==========================================
// 请求/响应类型
// ==========================================

/// 批次中的一个批系
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedItemInput {
    pub item_workflow_id: String,
    pub item_workflow_step_id: String,
    /// 锻造计划件数 (其余工序由领用合计决定)
    #[serde(default)]
    pub planned_pieces: Option<u32>,
    #[serde(default)]
    pub consumptions: Vec<ConsumptionRequest>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOperationBatchRequest {
    pub operation_type: OperationType,
    pub batch_number: String,
    /// 为空时取当前时间
    #[serde(default)]
    pub started_at: Option<NaiveDateTime>,
    pub items: Vec<ProcessedItemInput>,
}

#[derive(Debug, Clone)]
pub struct CreatedOperationBatch {
    pub stage_batch: StageBatch,
    pub accounts: Vec<ProcessedItemBatch>,
    pub consumptions: Vec<PieceConsumption>,
}

/// 单个账户的完工结果
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemOutcomeInput {
    pub processed_item_id: String,
    #[serde(default)]
    pub produced_pieces: Option<u32>,
    #[serde(default)]
    pub rejected_pieces: u32,
    #[serde(default)]
    pub rework_pieces: u32,
    /// 质检显式分摊; 为空按日子批实际完成件数自动分摊
    #[serde(default)]
    pub distribution: Option<Vec<DistributionEntry>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteOperationBatchRequest {
    pub stage_batch_id: String,
    pub completed_at: NaiveDateTime,
    /// 未列出的账户按零报废零返工完工
    #[serde(default)]
    pub items: Vec<ItemOutcomeInput>,
}

#[derive(Debug, Clone)]
pub struct CompletedOperationBatch {
    pub stage_batch: StageBatch,
    pub accounts: Vec<ProcessedItemBatch>,
    pub distributions: Vec<InspectionDistribution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyMachiningInput {
    pub machining_entity_id: String,
    pub operation_date: NaiveDate,
    pub completed_pieces: u32,
}

// ==========================================
// OperationApi
// ==========================================
pub struct OperationApi {
    conn: Arc<Mutex<Connection>>,
    publisher: OptionalEventPublisher,
}

impl OperationApi {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            conn,
            publisher: OptionalEventPublisher::none(),
        }
    }

    pub fn with_publisher(conn: Arc<Mutex<Connection>>, publisher: OptionalEventPublisher) -> Self {
        Self { conn, publisher }
    }

    // ==========================================
    // 建批
    // ==========================================

    /// 创建工序批次: 为每个批系开户、领用上游件数并激活对应步骤
    #[instrument(skip(self, request), fields(tenant_id = ctx.tenant_id, operation_type = %request.operation_type))]
    pub fn create_operation_batch(
        &self,
        ctx: &TenantContext,
        request: &CreateOperationBatchRequest,
    ) -> ApiResult<CreatedOperationBatch> {
        Self::validate_create_request(request)?;
        let now = now_ts();
        let started_at = request.started_at.unwrap_or(now);
        let op = request.operation_type;

        let (created, events) = with_write_tx(&self.conn, |tx| {
            let config = read_config(tx)?;
            let ledger = PieceLedger::new(config.rework_returns_to_pool);
            let machine = StepStateMachine::new(config.require_upstream_activation);

            let stage_batch = StageBatch {
                id: Uuid::new_v4().to_string(),
                tenant_id: ctx.tenant_id,
                batch_number: request.batch_number.trim().to_string(),
                operation_type: op,
                status: BatchStatus::InProgress,
                started_at,
                completed_at: None,
                created_at: now,
            };
            batch_repo::insert_stage_batch_tx(tx, &stage_batch)?;

            let mut workflows: BTreeMap<String, ItemWorkflow> = BTreeMap::new();
            let mut sources: HashMap<String, ProcessedItemBatch> = HashMap::new();
            let mut touched: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            let mut accounts = Vec::with_capacity(request.items.len());
            let mut consumptions = Vec::new();
            let mut events = Vec::new();

            for item in &request.items {
                let workflow = match workflows.entry(item.item_workflow_id.clone()) {
                    Entry::Occupied(e) => e.into_mut(),
                    Entry::Vacant(e) => e.insert(item_workflow_repo::get_workflow_tx(
                        tx,
                        ctx.tenant_id,
                        &item.item_workflow_id,
                    )?),
                };
                let step = workflow
                    .find_step(&item.item_workflow_step_id)
                    .ok_or_else(|| ApiError::not_found("ItemWorkflowStep", &item.item_workflow_step_id))?;
                if step.operation_type != op {
                    return Err(ApiError::ValidationError(format!(
                        "步骤 {} 为 {} 工序, 不能关联 {} 批次",
                        step.id, step.operation_type, op
                    )));
                }

                for req in &item.consumptions {
                    if !sources.contains_key(&req.source_entity_id) {
                        let source = batch_repo::find_account_tx(tx, ctx.tenant_id, &req.source_entity_id)?
                            .ok_or_else(|| ApiError::not_found("ProcessedItemBatch", &req.source_entity_id))?;
                        sources.insert(source.id.clone(), source);
                    }
                    if let Some(source) = sources.get(&req.source_entity_id) {
                        if source.item_workflow_id != item.item_workflow_id {
                            return Err(ApiError::ValidationError(format!(
                                "来源账户 {} 属于批系 {}, 不能被批系 {} 领用",
                                source.id, source.item_workflow_id, item.item_workflow_id
                            )));
                        }
                    }
                }

                let planned = if op.is_producing() {
                    match item.planned_pieces {
                        Some(p) if p > 0 => p,
                        _ => {
                            return Err(ApiError::ValidationError(
                                "锻造批系必须给出大于 0 的计划件数".to_string(),
                            ))
                        }
                    }
                } else {
                    0
                };

                let mut account = ledger.open_account(
                    ctx,
                    &stage_batch.id,
                    op,
                    &item.item_workflow_id,
                    &item.item_workflow_step_id,
                    planned,
                    started_at,
                );
                let plan = ledger.consume(ctx, &account.id, op, &mut sources, &item.consumptions, now)?;
                if !op.is_producing() {
                    account.initial_pieces_count = plan.total_pieces;
                    account.available_pieces_count = plan.total_pieces;
                }

                let link = machine.link_operation(workflow, &item.item_workflow_step_id, &account.id, started_at)?;
                if link.step_activated {
                    events.push(WorkflowEvent::step(
                        ctx.tenant_id,
                        &workflow.id,
                        WorkflowEventType::StepActivated,
                        &item.item_workflow_step_id,
                        Some(account.id.clone()),
                        now,
                    ));
                }
                if link.workflow_started {
                    events.push(WorkflowEvent::workflow(
                        ctx.tenant_id,
                        &workflow.id,
                        WorkflowEventType::WorkflowStarted,
                        now,
                    ));
                }

                batch_repo::insert_account_tx(tx, &account)?;
                for record in &plan.records {
                    batch_repo::insert_consumption_tx(tx, record)?;
                }

                let steps = touched.entry(item.item_workflow_id.clone()).or_default();
                steps.insert(item.item_workflow_step_id.clone());
                for record in &plan.records {
                    if let Some(source) = sources.get(&record.previous_operation_entity_id) {
                        steps.insert(source.item_workflow_step_id.clone());
                        events.push(WorkflowEvent::step(
                            ctx.tenant_id,
                            &source.item_workflow_id,
                            WorkflowEventType::PiecesChanged,
                            &source.item_workflow_step_id,
                            Some(source.id.clone()),
                            now,
                        ));
                    }
                }

                accounts.push(account);
                consumptions.extend(plan.records);
            }

            for source in sources.values() {
                batch_repo::update_account_tx(tx, source)?;
            }
            for (workflow_id, step_ids) in &touched {
                if let Some(workflow) = workflows.get_mut(workflow_id) {
                    refresh_steps_tx(tx, ctx, &ledger, workflow, step_ids, now)?;
                }
            }
            for workflow in workflows.values() {
                item_workflow_repo::update_workflow_tx(tx, workflow)?;
            }
            let started: Vec<&str> = events
                .iter()
                .filter(|e| e.event_type == WorkflowEventType::WorkflowStarted)
                .map(|e| e.item_workflow_id.as_str())
                .collect();
            for workflow_id in started {
                order_api::sync_orders_for_workflow_tx(tx, ctx, workflow_id, now)?;
            }

            Ok((
                CreatedOperationBatch {
                    stage_batch,
                    accounts,
                    consumptions,
                },
                events,
            ))
        })?;

        info!(
            tenant_id = ctx.tenant_id,
            actor = ctx.actor_or_system(),
            stage_batch_id = %created.stage_batch.id,
            batch_number = %created.stage_batch.batch_number,
            accounts = created.accounts.len(),
            consumptions = created.consumptions.len(),
            "工序批次已创建"
        );
        self.publisher.publish_all(&events);
        Ok(created)
    }

    fn validate_create_request(request: &CreateOperationBatchRequest) -> ApiResult<()> {
        if request.batch_number.trim().is_empty() {
            return Err(ApiError::InvalidInput("批次号不能为空".to_string()));
        }
        if request.items.is_empty() {
            return Err(ApiError::InvalidInput("批次至少包含一个批系".to_string()));
        }
        let mut seen = HashSet::new();
        for item in &request.items {
            if !seen.insert((item.item_workflow_id.as_str(), item.item_workflow_step_id.as_str())) {
                return Err(ApiError::InvalidInput(format!(
                    "批系步骤重复: {}/{}",
                    item.item_workflow_id, item.item_workflow_step_id
                )));
            }
        }
        Ok(())
    }

    // ==========================================
    // 完工
    // ==========================================

    /// 完工工序批次: 应用各账户结果, 质检批同时把报废/返工分摊到日子批
    #[instrument(skip(self, request), fields(tenant_id = ctx.tenant_id, stage_batch_id = %request.stage_batch_id))]
    pub fn complete_operation_batch(
        &self,
        ctx: &TenantContext,
        request: &CompleteOperationBatchRequest,
    ) -> ApiResult<CompletedOperationBatch> {
        let now = now_ts();
        let completed_at = request.completed_at;

        let mut inputs: HashMap<&str, &ItemOutcomeInput> = HashMap::new();
        for input in &request.items {
            if inputs.insert(input.processed_item_id.as_str(), input).is_some() {
                return Err(ApiError::InvalidInput(format!(
                    "账户结果重复: {}",
                    input.processed_item_id
                )));
            }
        }

        let (completed, events) = with_write_tx(&self.conn, |tx| {
            let config = read_config(tx)?;
            let ledger = PieceLedger::new(config.rework_returns_to_pool);

            let mut stage_batch = batch_repo::get_stage_batch_tx(tx, ctx.tenant_id, &request.stage_batch_id)?;
            if stage_batch.status == BatchStatus::Completed {
                return Err(LedgerError::InvalidTransition {
                    entity: "StageBatch".to_string(),
                    id: stage_batch.id.clone(),
                    from: stage_batch.status.to_string(),
                    to: BatchStatus::Completed.to_string(),
                    reason: "批次已完工".to_string(),
                }
                .into());
            }
            if completed_at < stage_batch.started_at {
                return Err(LedgerError::InvalidCompletionTime {
                    entity: "StageBatch".to_string(),
                    id: stage_batch.id.clone(),
                    completed_at: completed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                    reference: "started_at".to_string(),
                    reference_at: stage_batch.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                }
                .into());
            }

            let mut accounts = batch_repo::find_accounts_by_stage_batch_tx(tx, ctx.tenant_id, &stage_batch.id)?;
            for id in inputs.keys() {
                if !accounts.iter().any(|a| a.id == *id) {
                    return Err(ApiError::not_found("ProcessedItemBatch", id));
                }
            }

            let mut distributions = Vec::new();
            let mut touched: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
            let mut events = Vec::with_capacity(accounts.len());

            for account in accounts.iter_mut() {
                let input = inputs.get(account.id.as_str()).copied();
                let outcome = input
                    .map(|i| AccountOutcome {
                        produced_pieces: i.produced_pieces,
                        rejected_pieces: i.rejected_pieces,
                        rework_pieces: i.rework_pieces,
                    })
                    .unwrap_or_default();
                ledger.complete_account(account, &outcome, completed_at)?;
                batch_repo::update_account_tx(tx, account)?;

                let explicit = input.and_then(|i| i.distribution.clone());
                let removed = outcome.rejected_pieces + outcome.rework_pieces;
                if account.operation_type == OperationType::Quality && (removed > 0 || explicit.is_some()) {
                    let request = DistributionRequest {
                        inspection_entity_id: account.id.clone(),
                        total_rejected: outcome.rejected_pieces,
                        total_rework: outcome.rework_pieces,
                        explicit,
                    };
                    let result = distribute_tx(tx, ctx, &request, completed_at)?;
                    distributions.extend(result.records);
                }

                touched
                    .entry(account.item_workflow_id.clone())
                    .or_default()
                    .insert(account.item_workflow_step_id.clone());
                events.push(WorkflowEvent::step(
                    ctx.tenant_id,
                    &account.item_workflow_id,
                    WorkflowEventType::PiecesChanged,
                    &account.item_workflow_step_id,
                    Some(account.id.clone()),
                    now,
                ));
            }

            stage_batch.status = BatchStatus::Completed;
            stage_batch.completed_at = Some(completed_at);
            batch_repo::update_stage_batch_tx(tx, &stage_batch)?;

            for (workflow_id, step_ids) in &touched {
                let mut workflow = item_workflow_repo::get_workflow_tx(tx, ctx.tenant_id, workflow_id)?;
                refresh_steps_tx(tx, ctx, &ledger, &mut workflow, step_ids, now)?;
                item_workflow_repo::update_workflow_tx(tx, &workflow)?;
            }

            Ok((
                CompletedOperationBatch {
                    stage_batch,
                    accounts,
                    distributions,
                },
                events,
            ))
        })?;

        info!(
            tenant_id = ctx.tenant_id,
            actor = ctx.actor_or_system(),
            stage_batch_id = %completed.stage_batch.id,
            accounts = completed.accounts.len(),
            distributions = completed.distributions.len(),
            "工序批次已完工"
        );
        self.publisher.publish_all(&events);
        Ok(completed)
    }

    // ==========================================
    // 日机加工报工
    // ==========================================

    /// 登记机加工账户的日子批
    pub fn record_daily_machining(
        &self,
        ctx: &TenantContext,
        input: &DailyMachiningInput,
    ) -> ApiResult<DailyMachiningBatch> {
        if input.completed_pieces == 0 {
            return Err(ApiError::InvalidInput("日报工完成件数必须大于 0".to_string()));
        }
        let now = now_ts();

        let daily = with_write_tx(&self.conn, |tx| {
            let account = batch_repo::find_account_tx(tx, ctx.tenant_id, &input.machining_entity_id)?
                .ok_or_else(|| ApiError::not_found("ProcessedItemBatch", &input.machining_entity_id))?;
            if account.operation_type != OperationType::Machining {
                return Err(ApiError::ValidationError(format!(
                    "账户 {} 为 {} 工序, 不能登记日机加工",
                    account.id, account.operation_type
                )));
            }
            if account.status != BatchStatus::InProgress {
                return Err(ApiError::InvalidTransition(format!(
                    "机加工账户 {} 已完工, 不能再登记日子批",
                    account.id
                )));
            }

            let existing = batch_repo::find_daily_by_machining_tx(tx, ctx.tenant_id, &account.id)?;
            if existing.iter().any(|d| d.operation_date == input.operation_date) {
                return Err(ApiError::ValidationError(format!(
                    "机加工账户 {} 在 {} 已有日子批",
                    account.id, input.operation_date
                )));
            }
            let reported: u64 = existing.iter().map(|d| d.completed_pieces_count as u64).sum();
            let remaining = (account.initial_pieces_count as u64).saturating_sub(reported);
            if input.completed_pieces as u64 > remaining {
                return Err(ApiError::InsufficientPieces {
                    entity_id: account.id.clone(),
                    requested: input.completed_pieces as u64,
                    available: remaining as u32,
                });
            }

            let daily = DailyMachiningBatch {
                id: Uuid::new_v4().to_string(),
                tenant_id: ctx.tenant_id,
                machining_entity_id: account.id.clone(),
                operation_date: input.operation_date,
                completed_pieces_count: input.completed_pieces,
                actual_completed_pieces_count: input.completed_pieces,
                rejected_pieces_count: 0,
                rework_pieces_count: 0,
                created_at: now,
            };
            batch_repo::insert_daily_tx(tx, &daily)?;

            let mut workflow = item_workflow_repo::get_workflow_tx(tx, ctx.tenant_id, &account.item_workflow_id)?;
            let step = workflow
                .find_step_mut(&account.item_workflow_step_id)
                .ok_or_else(|| ApiError::not_found("ItemWorkflowStep", &account.item_workflow_step_id))?;
            if !step.related_entity_ids.contains(&daily.id) {
                step.related_entity_ids.push(daily.id.clone());
            }
            step.updated_at = now;
            workflow.updated_at = now;
            item_workflow_repo::update_workflow_tx(tx, &workflow)?;

            Ok(daily)
        })?;

        info!(
            tenant_id = ctx.tenant_id,
            machining_entity_id = %daily.machining_entity_id,
            daily_machining_batch_id = %daily.id,
            operation_date = %daily.operation_date,
            completed_pieces = daily.completed_pieces_count,
            "日机加工已登记"
        );
        Ok(daily)
    }

    // ==========================================
    // 质检分摊
    // ==========================================

    /// 对已完工质检账户执行 (或重放) 报废/返工分摊
    ///
    /// 合计必须与账户报出的报废/返工一致; 已分摊过的质检账户只接受相同结果
    pub fn distribute_inspection(
        &self,
        ctx: &TenantContext,
        request: &DistributionRequest,
    ) -> ApiResult<DistributionResult> {
        let now = now_ts();
        let result = with_write_tx(&self.conn, |tx| {
            let account = batch_repo::find_account_tx(tx, ctx.tenant_id, &request.inspection_entity_id)?
                .ok_or_else(|| ApiError::not_found("ProcessedItemBatch", &request.inspection_entity_id))?;
            if account.operation_type != OperationType::Quality {
                return Err(ApiError::ValidationError(format!(
                    "账户 {} 为 {} 工序, 不是质检账户",
                    account.id, account.operation_type
                )));
            }
            if !account.is_completed() {
                return Err(ApiError::InvalidTransition(format!(
                    "质检账户 {} 尚未完工, 不能分摊",
                    account.id
                )));
            }
            ReworkDistributor::new().check_reported_totals(
                request,
                account.rejected_pieces_count,
                account.reported_rework_pieces_count,
            )?;
            distribute_tx(tx, ctx, request, now)
        })?;
        Ok(result)
    }

    // ==========================================
    // 返工回池
    // ==========================================

    /// 把账户返工桶中的件数放回可用池
    pub fn return_rework(
        &self,
        ctx: &TenantContext,
        entity_id: &str,
        pieces: u32,
    ) -> ApiResult<ProcessedItemBatch> {
        let now = now_ts();
        let account = with_write_tx(&self.conn, |tx| {
            let config = read_config(tx)?;
            let ledger = PieceLedger::new(config.rework_returns_to_pool);
            let mut account = batch_repo::find_account_tx(tx, ctx.tenant_id, entity_id)?
                .ok_or_else(|| ApiError::not_found("ProcessedItemBatch", entity_id))?;
            ledger.return_rework(&mut account, pieces, now)?;
            batch_repo::update_account_tx(tx, &account)?;

            let mut workflow = item_workflow_repo::get_workflow_tx(tx, ctx.tenant_id, &account.item_workflow_id)?;
            let step_ids = BTreeSet::from([account.item_workflow_step_id.clone()]);
            refresh_steps_tx(tx, ctx, &ledger, &mut workflow, &step_ids, now)?;
            item_workflow_repo::update_workflow_tx(tx, &workflow)?;
            Ok(account)
        })?;

        self.publisher.publish_all(&[WorkflowEvent::step(
            ctx.tenant_id,
            &account.item_workflow_id,
            WorkflowEventType::PiecesChanged,
            &account.item_workflow_step_id,
            Some(account.id.clone()),
            now,
        )]);
        Ok(account)
    }

    // ==========================================
    // 步骤/流程完工
    // ==========================================

    /// 完工一组步骤; 全部必经末端完工时流程随之完工
    #[instrument(skip(self, request), fields(tenant_id = ctx.tenant_id, item_workflow_id = %item_workflow_id))]
    pub fn complete_steps(
        &self,
        ctx: &TenantContext,
        item_workflow_id: &str,
        request: &CompletionRequest,
    ) -> ApiResult<CompletionResult> {
        if request.step_completions.is_empty() && !request.require_workflow_completion {
            return Err(ApiError::InvalidInput("未指定要完工的步骤".to_string()));
        }
        let now = now_ts();

        let result = with_write_tx(&self.conn, |tx| {
            let config = read_config(tx)?;
            let machine = StepStateMachine::new(config.require_upstream_activation);
            let mut workflow = item_workflow_repo::get_workflow_tx(tx, ctx.tenant_id, item_workflow_id)?;

            let mut batch_completions: HashMap<String, Option<NaiveDateTime>> = HashMap::new();
            for step_id in request.step_completions.keys() {
                let accounts = batch_repo::find_accounts_by_step_tx(tx, ctx.tenant_id, step_id)?;
                let latest = if accounts.is_empty() || accounts.iter().any(|a| !a.is_completed()) {
                    None
                } else {
                    accounts.iter().filter_map(|a| a.completed_at).max()
                };
                batch_completions.insert(step_id.clone(), latest);
            }

            let result = machine.complete(&mut workflow, request, &batch_completions, now)?;
            item_workflow_repo::update_workflow_tx(tx, &workflow)?;
            if result.workflow_completed {
                order_api::sync_orders_for_workflow_tx(tx, ctx, &workflow.id, now)?;
            }
            Ok(result)
        })?;

        let mut events: Vec<WorkflowEvent> = result
            .completed_step_ids
            .iter()
            .map(|step_id| {
                WorkflowEvent::step(
                    ctx.tenant_id,
                    item_workflow_id,
                    WorkflowEventType::StepCompleted,
                    step_id,
                    None,
                    now,
                )
            })
            .collect();
        if result.workflow_completed {
            events.push(WorkflowEvent::workflow(
                ctx.tenant_id,
                item_workflow_id,
                WorkflowEventType::WorkflowCompleted,
                now,
            ));
        }
        self.publisher.publish_all(&events);
        Ok(result)
    }

    /// 完工流程 (可同时完工剩余步骤); 仍有必经末端未完工时整体拒绝
    pub fn complete_workflow(
        &self,
        ctx: &TenantContext,
        item_workflow_id: &str,
        completed_at: NaiveDateTime,
        step_completions: BTreeMap<String, NaiveDateTime>,
    ) -> ApiResult<CompletionResult> {
        let request = CompletionRequest {
            completed_at,
            step_completions,
            require_workflow_completion: true,
        };
        self.complete_steps(ctx, item_workflow_id, &request)
    }

    // ==========================================
    // 查询
    // ==========================================

    /// 账户当前件数 (直接读库)
    pub fn get_account(&self, ctx: &TenantContext, entity_id: &str) -> ApiResult<ProcessedItemBatch> {
        let conn = lock_conn(&self.conn)?;
        batch_repo::find_account_tx(&conn, ctx.tenant_id, entity_id)?
            .ok_or_else(|| ApiError::not_found("ProcessedItemBatch", entity_id))
    }
}

// ==========================================
// 事务内辅助
// ==========================================

/// 由关联账户重新汇总步骤件数与工序结果
fn refresh_steps_tx(
    tx: &Connection,
    ctx: &TenantContext,
    ledger: &PieceLedger,
    workflow: &mut ItemWorkflow,
    step_ids: &BTreeSet<String>,
    now: NaiveDateTime,
) -> ApiResult<()> {
    let mut stage_batches: HashMap<String, StageBatch> = HashMap::new();
    for step_id in step_ids {
        let accounts = batch_repo::find_accounts_by_step_tx(tx, ctx.tenant_id, step_id)?;
        for account in &accounts {
            if !stage_batches.contains_key(&account.stage_batch_id) {
                let batch = batch_repo::get_stage_batch_tx(tx, ctx.tenant_id, &account.stage_batch_id)?;
                stage_batches.insert(batch.id.clone(), batch);
            }
        }

        let step = workflow
            .find_step_mut(step_id)
            .ok_or_else(|| ApiError::not_found("ItemWorkflowStep", step_id))?;
        let refs: Vec<&ProcessedItemBatch> = accounts.iter().collect();
        ledger.project_step_counts(step, &refs);
        step.operation_outcome = if accounts.is_empty() {
            None
        } else {
            let pairs: Vec<(&ProcessedItemBatch, &StageBatch)> = accounts
                .iter()
                .filter_map(|a| stage_batches.get(&a.stage_batch_id).map(|b| (a, b)))
                .collect();
            ledger.describe_outcome(step.operation_type, &pairs)
        };
        step.updated_at = now;
        if !step.piece_invariant_holds() {
            warn!(
                item_workflow_id = %workflow.id,
                step_id = %step_id,
                "步骤件数投影不守恒"
            );
        }
    }
    workflow.updated_at = now;
    Ok(())
}

/// 把质检结果分摊到其领用机加工账户下的日子批
fn distribute_tx(
    tx: &Connection,
    ctx: &TenantContext,
    request: &DistributionRequest,
    now: NaiveDateTime,
) -> ApiResult<DistributionResult> {
    let inputs = batch_repo::find_consumptions_by_consumer_tx(tx, ctx.tenant_id, &request.inspection_entity_id)?;
    let mut machining_ids = BTreeSet::new();
    for record in &inputs {
        if record.previous_operation_type == OperationType::Machining {
            machining_ids.insert(record.previous_operation_entity_id.clone());
        }
    }

    let mut sub_batches = Vec::new();
    for machining_id in &machining_ids {
        sub_batches.extend(batch_repo::find_daily_by_machining_tx(tx, ctx.tenant_id, machining_id)?);
    }
    if sub_batches.is_empty() {
        if request.explicit.is_some() {
            return Err(ApiError::ValidationError(format!(
                "质检账户 {} 领用的机加工账户没有日子批, 无法显式分摊",
                request.inspection_entity_id
            )));
        }
        return Ok(DistributionResult {
            records: Vec::new(),
            newly_applied: false,
        });
    }

    let existing = batch_repo::find_distributions_by_inspection_tx(tx, ctx.tenant_id, &request.inspection_entity_id)?;
    let result = ReworkDistributor::new().distribute(ctx, request, &mut sub_batches, &existing, now)?;
    if result.newly_applied {
        let changed: HashSet<&str> = result
            .records
            .iter()
            .map(|r| r.daily_machining_batch_id.as_str())
            .collect();
        for sub in sub_batches.iter().filter(|s| changed.contains(s.id.as_str())) {
            batch_repo::update_daily_tx(tx, sub)?;
        }
        for record in &result.records {
            batch_repo::insert_distribution_tx(tx, record)?;
        }
    }
    Ok(result)
}

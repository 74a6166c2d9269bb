// ==========================================
// 锻造生产追溯系统 - 件数守恒账本
// ==========================================
// 件数只能通过显式事件产生或消失:
//   产出(锻造) / 报废 / 返工移出 / 返工回池 / 下游领用
// ==========================================
// 守恒式 (每个账户, 任意时刻):
//   consumed + available + rejected + rework == initial
// 领用规则:
// - 同一请求内对同一来源的多条领用先合计再校验
// - 合计超过来源可领用件数 → InsufficientPieces, 不做任何扣减
// - 未完工来源的可领用件数为 0
// ==========================================
// 并发: 本模块为纯函数, 调用方必须在同一写事务内
//       读取来源账户 → 调用本模块 → 写回, 杜绝先查后改竞态
// ==========================================

use crate::domain::batch::{PieceConsumption, ProcessedItemBatch, StageBatch};
use crate::domain::tenant::TenantContext;
use crate::domain::types::{BatchStatus, OperationType, PiecePool};
use crate::domain::workflow::{BatchOutcome, ForgingOutcome, ItemWorkflowStep, OperationOutcome};
use crate::engine::error::{LedgerError, LedgerResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};
use uuid::Uuid;

// ==========================================
// 请求类型
// ==========================================

/// 领用请求 (下游批次 → 某个上游账户)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumptionRequest {
    pub source_entity_id: String,
    pub pieces: u32,
    #[serde(default)]
    pub pool: PiecePool,
}

impl ConsumptionRequest {
    pub fn available(source_entity_id: impl Into<String>, pieces: u32) -> Self {
        Self {
            source_entity_id: source_entity_id.into(),
            pieces,
            pool: PiecePool::Available,
        }
    }

    pub fn rework(source_entity_id: impl Into<String>, pieces: u32) -> Self {
        Self {
            source_entity_id: source_entity_id.into(),
            pieces,
            pool: PiecePool::Rework,
        }
    }
}

/// 完工结果 (账户级)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AccountOutcome {
    /// 实际产出件数 (仅锻造必填; 其余工序须为空或等于领入件数)
    pub produced_pieces: Option<u32>,
    pub rejected_pieces: u32,
    pub rework_pieces: u32,
}

/// 领用执行结果
#[derive(Debug, Clone, PartialEq)]
pub struct ConsumptionPlan {
    pub records: Vec<PieceConsumption>,
    pub total_pieces: u32,
}

// ==========================================
// PieceLedger
// ==========================================
pub struct PieceLedger {
    rework_returns_to_pool: bool,
}

impl PieceLedger {
    pub fn new(rework_returns_to_pool: bool) -> Self {
        Self {
            rework_returns_to_pool,
        }
    }

    // ==========================================
    // 开户
    // ==========================================

    /// 为新批次中的某批系开立账户
    ///
    /// - 锻造: initial = 计划件数 (完工时以实际产出为准)
    /// - 其余工序: initial = 本次领用合计
    pub fn open_account(
        &self,
        ctx: &TenantContext,
        stage_batch_id: &str,
        operation_type: OperationType,
        item_workflow_id: &str,
        item_workflow_step_id: &str,
        initial_pieces: u32,
        started_at: NaiveDateTime,
    ) -> ProcessedItemBatch {
        ProcessedItemBatch {
            id: Uuid::new_v4().to_string(),
            tenant_id: ctx.tenant_id,
            stage_batch_id: stage_batch_id.to_string(),
            operation_type,
            item_workflow_id: item_workflow_id.to_string(),
            item_workflow_step_id: item_workflow_step_id.to_string(),
            status: BatchStatus::InProgress,
            initial_pieces_count: initial_pieces,
            available_pieces_count: initial_pieces,
            consumed_pieces_count: 0,
            rejected_pieces_count: 0,
            rework_pieces_count: 0,
            reported_rework_pieces_count: 0,
            started_at,
            completed_at: None,
            created_at: started_at,
            updated_at: started_at,
        }
    }

    // ==========================================
    // 领用
    // ==========================================

    /// 校验并执行领用 (先全部校验, 后统一扣减)
    ///
    /// # 参数
    /// - `consumer_entity_id` / `consumer_operation_type`: 下游账户
    /// - `sources`: 已在写事务内加载的上游账户 (按 entity_id 索引)
    /// - `requests`: 领用请求
    pub fn consume(
        &self,
        ctx: &TenantContext,
        consumer_entity_id: &str,
        consumer_operation_type: OperationType,
        sources: &mut HashMap<String, ProcessedItemBatch>,
        requests: &[ConsumptionRequest],
        now: NaiveDateTime,
    ) -> LedgerResult<ConsumptionPlan> {
        if consumer_operation_type.is_producing() {
            if requests.is_empty() {
                return Ok(ConsumptionPlan {
                    records: Vec::new(),
                    total_pieces: 0,
                });
            }
            return Err(LedgerError::Validation(format!(
                "{} 直接产出新件, 不能领用上游件数",
                consumer_operation_type
            )));
        }
        if requests.is_empty() {
            return Err(LedgerError::Validation(format!(
                "{} 批次必须至少领用一个上游批次",
                consumer_operation_type
            )));
        }

        // 1. 按 (来源, 件池) 合计
        let mut totals: BTreeMap<(String, PiecePool), u64> = BTreeMap::new();
        for request in requests {
            if request.pieces == 0 {
                return Err(LedgerError::Validation(format!(
                    "领用件数必须大于 0: source={}",
                    request.source_entity_id
                )));
            }
            *totals
                .entry((request.source_entity_id.clone(), request.pool))
                .or_insert(0) += request.pieces as u64;
        }

        // 2. 全量校验
        for ((source_id, pool), requested) in &totals {
            let source = sources
                .get(source_id)
                .filter(|s| s.tenant_id == ctx.tenant_id)
                .ok_or_else(|| LedgerError::not_found("ProcessedItemBatch", source_id))?;

            self.check_stage_order(source, consumer_operation_type, *pool)?;

            let drawable = source.drawable(*pool);
            if *requested > drawable as u64 {
                warn!(
                    tenant_id = ctx.tenant_id,
                    source_entity_id = %source_id,
                    pool = pool.as_str(),
                    requested = *requested,
                    available = drawable,
                    source_status = %source.status,
                    "领用件数超过来源可用件数"
                );
                return Err(LedgerError::InsufficientPieces {
                    entity_id: source_id.clone(),
                    requested: *requested,
                    available: drawable,
                });
            }
        }

        let total: u64 = totals.values().sum();
        let total_pieces = u32::try_from(total).map_err(|_| {
            LedgerError::Validation(format!("领用合计件数溢出: {}", total))
        })?;

        // 3. 扣减 + 生成领用记录
        let mut records = Vec::with_capacity(totals.len());
        for ((source_id, pool), pieces) in totals {
            let pieces = pieces as u32;
            let source = sources
                .get_mut(&source_id)
                .ok_or_else(|| LedgerError::not_found("ProcessedItemBatch", &source_id))?;
            match pool {
                PiecePool::Available => source.available_pieces_count -= pieces,
                PiecePool::Rework => source.rework_pieces_count -= pieces,
            }
            source.consumed_pieces_count += pieces;
            source.updated_at = now;

            debug!(
                source_entity_id = %source_id,
                consumer_entity_id = %consumer_entity_id,
                pieces,
                pool = pool.as_str(),
                remaining = source.drawable(pool),
                "上游件数已扣减"
            );

            records.push(PieceConsumption {
                id: Uuid::new_v4().to_string(),
                tenant_id: ctx.tenant_id,
                consuming_entity_id: consumer_entity_id.to_string(),
                consuming_operation_type: consumer_operation_type,
                previous_operation_entity_id: source_id.clone(),
                previous_operation_type: source.operation_type,
                consumed_pieces_count: pieces,
                pool,
                created_at: now,
            });
        }

        info!(
            tenant_id = ctx.tenant_id,
            consumer_entity_id = %consumer_entity_id,
            sources = records.len(),
            total_pieces,
            "领用完成"
        );

        Ok(ConsumptionPlan {
            records,
            total_pieces,
        })
    }

    /// 工序先后: 正常领用只能来自更早工序; 返工件可回流到任意非锻造工序
    fn check_stage_order(
        &self,
        source: &ProcessedItemBatch,
        consumer: OperationType,
        pool: PiecePool,
    ) -> LedgerResult<()> {
        let allowed = match pool {
            PiecePool::Available => stage_rank(source.operation_type) < stage_rank(consumer),
            PiecePool::Rework => !consumer.is_producing(),
        };
        if allowed {
            Ok(())
        } else {
            Err(LedgerError::Validation(format!(
                "{} 不能从 {} 的 {} 件池领用",
                consumer,
                source.operation_type,
                pool.as_str()
            )))
        }
    }

    // ==========================================
    // 完工
    // ==========================================

    /// 应用完工结果
    ///
    /// available = initial - rejected - rework (返工留池时不扣返工)
    pub fn complete_account(
        &self,
        account: &mut ProcessedItemBatch,
        outcome: &AccountOutcome,
        completed_at: NaiveDateTime,
    ) -> LedgerResult<()> {
        if account.status != BatchStatus::InProgress {
            return Err(LedgerError::InvalidTransition {
                entity: "ProcessedItemBatch".to_string(),
                id: account.id.clone(),
                from: account.status.to_string(),
                to: BatchStatus::Completed.to_string(),
                reason: "账户已完工".to_string(),
            });
        }
        if completed_at < account.started_at {
            return Err(LedgerError::InvalidCompletionTime {
                entity: "ProcessedItemBatch".to_string(),
                id: account.id.clone(),
                completed_at: completed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
                reference: "started_at".to_string(),
                reference_at: account.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            });
        }

        let produced = if account.operation_type.is_producing() {
            outcome.produced_pieces.ok_or_else(|| {
                LedgerError::Validation(format!("锻造账户 {} 完工必须给出实际产出件数", account.id))
            })?
        } else {
            match outcome.produced_pieces {
                Some(p) if p != account.initial_pieces_count => {
                    return Err(LedgerError::Validation(format!(
                        "账户 {} 领入 {} 件, 不能报产出 {} 件",
                        account.id, account.initial_pieces_count, p
                    )))
                }
                _ => account.initial_pieces_count,
            }
        };

        let removed = outcome.rejected_pieces as u64 + outcome.rework_pieces as u64;
        if removed > produced as u64 {
            return Err(LedgerError::Validation(format!(
                "账户 {} 报废 {} + 返工 {} 超过件数 {}",
                account.id, outcome.rejected_pieces, outcome.rework_pieces, produced
            )));
        }

        let rework_out = if self.rework_returns_to_pool {
            0
        } else {
            outcome.rework_pieces
        };

        account.initial_pieces_count = produced;
        account.rejected_pieces_count = outcome.rejected_pieces;
        account.rework_pieces_count = rework_out;
        account.reported_rework_pieces_count = outcome.rework_pieces;
        account.available_pieces_count = produced - outcome.rejected_pieces - rework_out;
        account.status = BatchStatus::Completed;
        account.completed_at = Some(completed_at);
        account.updated_at = completed_at;

        info!(
            entity_id = %account.id,
            operation_type = %account.operation_type,
            produced,
            rejected = outcome.rejected_pieces,
            rework = outcome.rework_pieces,
            available = account.available_pieces_count,
            "账户完工"
        );
        Ok(())
    }

    /// 返工件回池 (显式回池事件, 可用件数唯一的增加途径之一)
    pub fn return_rework(
        &self,
        account: &mut ProcessedItemBatch,
        pieces: u32,
        now: NaiveDateTime,
    ) -> LedgerResult<()> {
        if pieces == 0 {
            return Err(LedgerError::Validation("回池件数必须大于 0".to_string()));
        }
        if pieces > account.rework_pieces_count {
            return Err(LedgerError::InsufficientPieces {
                entity_id: account.id.clone(),
                requested: pieces as u64,
                available: account.rework_pieces_count,
            });
        }
        account.rework_pieces_count -= pieces;
        account.available_pieces_count += pieces;
        account.updated_at = now;
        info!(entity_id = %account.id, pieces, "返工件回池");
        Ok(())
    }

    // ==========================================
    // 步骤投影
    // ==========================================

    /// 由关联账户汇总步骤件数
    pub fn project_step_counts(&self, step: &mut ItemWorkflowStep, accounts: &[&ProcessedItemBatch]) {
        step.initial_pieces_count = accounts.iter().map(|a| a.initial_pieces_count).sum();
        step.pieces_available_for_next = accounts.iter().map(|a| a.available_pieces_count).sum();
        step.consumed_pieces_count = accounts.iter().map(|a| a.consumed_pieces_count).sum();
        step.rejected_pieces_count = accounts.iter().map(|a| a.rejected_pieces_count).sum();
        step.rework_pieces_count = accounts.iter().map(|a| a.rework_pieces_count).sum();
        step.pieces_utilization_percentage =
            percentage(step.consumed_pieces_count as u64, step.initial_pieces_count as u64);
    }

    /// 生成步骤的工序结果摘要
    ///
    /// # 参数
    /// - `accounts`: 步骤关联账户及其所属批次 (关联顺序)
    pub fn describe_outcome(
        &self,
        operation_type: OperationType,
        accounts: &[(&ProcessedItemBatch, &StageBatch)],
    ) -> Option<OperationOutcome> {
        if operation_type.is_producing() {
            let (account, batch) = accounts.first()?;
            return Some(OperationOutcome::Forging(ForgingOutcome {
                forge_id: account.id.clone(),
                forge_traceability_number: batch.batch_number.clone(),
                actual_forge_count: account.initial_pieces_count,
                rejected_forge_pieces_count: account.rejected_pieces_count,
                available_forge_pieces_count_for_heat: account.available_pieces_count,
                started_at: Some(account.started_at),
                completed_at: account.completed_at,
            }));
        }

        let list = accounts
            .iter()
            .map(|(account, batch)| BatchOutcome {
                entity_id: account.id.clone(),
                entity_type: account.entity_type(),
                batch_number: batch.batch_number.clone(),
                initial_pieces_count: account.initial_pieces_count,
                rejected_pieces_count: account.rejected_pieces_count,
                rework_pieces_count: account.rework_pieces_count,
                pieces_available_for_next: account.available_pieces_count,
                started_at: Some(account.started_at),
                completed_at: account.completed_at,
            })
            .collect();
        Some(OperationOutcome::Batch(list))
    }
}

impl Default for PieceLedger {
    fn default() -> Self {
        Self::new(false)
    }
}

/// 工序在流水线上的先后位次
pub fn stage_rank(op: OperationType) -> usize {
    OperationType::ALL
        .iter()
        .position(|o| *o == op)
        .unwrap_or(usize::MAX)
}

/// 百分比: total 为 0 时定义为 0, 不做舍入
pub fn percentage(part: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    part as f64 / total as f64 * 100.0
}

/// 守恒校验: 账户守恒式成立, 且领用记录合计等于账户已领用件数
pub fn verify_conservation(account: &ProcessedItemBatch, outgoing: &[PieceConsumption]) -> bool {
    let recorded: u64 = outgoing
        .iter()
        .filter(|c| c.previous_operation_entity_id == account.id)
        .map(|c| c.consumed_pieces_count as u64)
        .sum();
    account.is_conserved() && recorded == account.consumed_pieces_count as u64
}

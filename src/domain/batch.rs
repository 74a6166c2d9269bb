// ==========================================
// 锻造生产追溯系统 - 工序批次与件数账户
// ==========================================
// StageBatch: 物理批次 (一炉热处理、一个发运批...)
// ProcessedItemBatch: 批次内某批系的件数账户 (锻造批内即为 Forge)
// PieceConsumption: 下游领用记录, 是扣减上游可用件数的唯一合法途径
// ==========================================
// 守恒式 (每个账户):
//   consumed + available + rejected + rework == initial
// ==========================================

use crate::domain::types::{BatchStatus, OperationEntityType, OperationType, PiecePool};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// StageBatch - 工序批次
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageBatch {
    pub id: String,
    pub tenant_id: i64,
    pub batch_number: String,
    pub operation_type: OperationType,
    pub status: BatchStatus,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
}

// ==========================================
// ProcessedItemBatch - 批系件数账户
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessedItemBatch {
    pub id: String,
    pub tenant_id: i64,
    pub stage_batch_id: String,
    pub operation_type: OperationType,
    pub item_workflow_id: String,
    pub item_workflow_step_id: String,
    pub status: BatchStatus,

    // ===== 账户件数 =====
    pub initial_pieces_count: u32,   // 领入件数 / 锻造产出件数
    pub available_pieces_count: u32, // 可供下游领用
    pub consumed_pieces_count: u32,  // 已被下游领用
    pub rejected_pieces_count: u32,  // 报废
    pub rework_pieces_count: u32,    // 返工移出 (尚未被返工批次领用)
    pub reported_rework_pieces_count: u32, // 完工时报出的返工件数 (不随返工领用/回池变化)

    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ProcessedItemBatch {
    pub fn entity_type(&self) -> OperationEntityType {
        self.operation_type.entity_type()
    }

    pub fn is_completed(&self) -> bool {
        self.status == BatchStatus::Completed
    }

    /// 守恒式是否成立
    pub fn is_conserved(&self) -> bool {
        self.consumed_pieces_count as u64
            + self.available_pieces_count as u64
            + self.rejected_pieces_count as u64
            + self.rework_pieces_count as u64
            == self.initial_pieces_count as u64
    }

    /// 指定件池当前可领用件数 (未完工账户不可领用)
    pub fn drawable(&self, pool: PiecePool) -> u32 {
        if !self.is_completed() {
            return 0;
        }
        match pool {
            PiecePool::Available => self.available_pieces_count,
            PiecePool::Rework => self.rework_pieces_count,
        }
    }

    pub fn snapshot(&self, batch_number: &str) -> PieceCountSnapshot {
        let entity_type = self.entity_type();
        PieceCountSnapshot {
            entity_id: self.id.clone(),
            entity_type,
            counter_name: entity_type.available_counter_name().to_string(),
            batch_number: batch_number.to_string(),
            status: self.status,
            initial: self.initial_pieces_count,
            available: self.available_pieces_count,
            consumed: self.consumed_pieces_count,
            rejected: self.rejected_pieces_count,
            rework: self.rework_pieces_count,
        }
    }
}

// ==========================================
// PieceConsumption - 领用记录
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieceConsumption {
    pub id: String,
    pub tenant_id: i64,
    pub consuming_entity_id: String,
    pub consuming_operation_type: OperationType,
    pub previous_operation_entity_id: String,
    pub previous_operation_type: OperationType,
    pub consumed_pieces_count: u32,
    pub pool: PiecePool,
    pub created_at: NaiveDateTime,
}

// ==========================================
// DailyMachiningBatch - 日机加工子批
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyMachiningBatch {
    pub id: String,
    pub tenant_id: i64,
    pub machining_entity_id: String,         // 所属机加工账户
    pub operation_date: NaiveDate,
    pub completed_pieces_count: u32,         // 当日报工完成件数
    pub actual_completed_pieces_count: u32,  // 质检分摊修正后的实际完成件数
    pub rejected_pieces_count: u32,          // 质检分摊的报废
    pub rework_pieces_count: u32,            // 质检分摊的返工
    pub created_at: NaiveDateTime,
}

// ==========================================
// InspectionDistribution - 质检报废/返工分摊记录
// ==========================================
// 对应 DailyMachiningBatchInspectionDistribution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InspectionDistribution {
    pub id: String,
    pub tenant_id: i64,
    pub inspection_entity_id: String,
    pub daily_machining_batch_id: String,
    pub rejected_pieces_count: u32,
    pub rework_pieces_count: u32,
    pub created_at: NaiveDateTime,
}

// ==========================================
// PieceCountSnapshot - 件数快照 (报表/库存只读投影)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PieceCountSnapshot {
    pub entity_id: String,
    pub entity_type: OperationEntityType,
    pub counter_name: String,
    pub batch_number: String,
    pub status: BatchStatus,
    pub initial: u32,
    pub available: u32,
    pub consumed: u32,
    pub rejected: u32,
    pub rework: u32,
}

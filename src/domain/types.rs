// ==========================================
// 锻造生产追溯系统 - 领域类型定义
// ==========================================
// 序列化格式: SCREAMING_SNAKE_CASE (与数据库一致)
// 字符串解析一律返回 Result, 由调用方决定回退策略
// ==========================================

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// 枚举解析错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("无法解析 {kind}: {value:?}")]
pub struct ParseEnumError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ==========================================
// 工序类型 (Operation Type)
// ==========================================
// 锻造 → 热处理 → 机加工 → 质检 → 发运
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    Forging,       // 锻造
    HeatTreatment, // 热处理
    Machining,     // 机加工
    Quality,       // 质检
    Dispatch,      // 发运
}

impl OperationType {
    pub const ALL: [OperationType; 5] = [
        OperationType::Forging,
        OperationType::HeatTreatment,
        OperationType::Machining,
        OperationType::Quality,
        OperationType::Dispatch,
    ];

    /// 转换为数据库存储的字符串 (同时作为兄弟节点排序的次级键)
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Forging => "FORGING",
            OperationType::HeatTreatment => "HEAT_TREATMENT",
            OperationType::Machining => "MACHINING",
            OperationType::Quality => "QUALITY",
            OperationType::Dispatch => "DISPATCH",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s.trim().to_uppercase().as_str() {
            "FORGING" => Ok(OperationType::Forging),
            "HEAT_TREATMENT" => Ok(OperationType::HeatTreatment),
            "MACHINING" => Ok(OperationType::Machining),
            "QUALITY" => Ok(OperationType::Quality),
            "DISPATCH" => Ok(OperationType::Dispatch),
            _ => Err(ParseEnumError::new("OperationType", s)),
        }
    }

    /// 是否为直接产出新件的工序 (锻造不消耗上游件数)
    pub fn is_producing(&self) -> bool {
        matches!(self, OperationType::Forging)
    }

    /// 对应的操作实体类型
    pub fn entity_type(&self) -> OperationEntityType {
        match self {
            OperationType::Forging => OperationEntityType::Forge,
            OperationType::HeatTreatment => OperationEntityType::HeatTreatmentBatch,
            OperationType::Machining => OperationEntityType::MachiningBatch,
            OperationType::Quality => OperationEntityType::InspectionBatch,
            OperationType::Dispatch => OperationEntityType::DispatchBatch,
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 操作实体类型 (Operation Entity Type)
// ==========================================
// 用途: operationOutcomeData 的判别键, 件数快照的实体标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationEntityType {
    Forge,
    HeatTreatmentBatch,
    MachiningBatch,
    InspectionBatch,
    DispatchBatch,
}

impl OperationEntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationEntityType::Forge => "FORGE",
            OperationEntityType::HeatTreatmentBatch => "HEAT_TREATMENT_BATCH",
            OperationEntityType::MachiningBatch => "MACHINING_BATCH",
            OperationEntityType::InspectionBatch => "INSPECTION_BATCH",
            OperationEntityType::DispatchBatch => "DISPATCH_BATCH",
        }
    }

    /// 各工序实体上"可供下游领用件数"计数器的业务名称
    pub fn available_counter_name(&self) -> &'static str {
        match self {
            OperationEntityType::Forge => "availableForgePiecesCountForHeat",
            OperationEntityType::HeatTreatmentBatch => "availableMachiningBatchPiecesCount",
            OperationEntityType::MachiningBatch => "availableInspectionBatchPiecesCount",
            OperationEntityType::InspectionBatch => "availableDispatchPiecesCount",
            OperationEntityType::DispatchBatch => "dispatchedPiecesCount",
        }
    }
}

impl fmt::Display for OperationEntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 工序步骤状态 (Step Status)
// ==========================================
// 合法迁移: PENDING → IN_PROGRESS → COMPLETED, 不可回退
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,    // 待开始
    InProgress, // 进行中
    Completed,  // 已完成
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::InProgress => "IN_PROGRESS",
            StepStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s.trim().to_uppercase().as_str() {
            "PENDING" => Ok(StepStatus::Pending),
            "IN_PROGRESS" => Ok(StepStatus::InProgress),
            "COMPLETED" => Ok(StepStatus::Completed),
            _ => Err(ParseEnumError::new("StepStatus", s)),
        }
    }

    pub fn can_transition_to(&self, next: StepStatus) -> bool {
        matches!(
            (self, next),
            (StepStatus::Pending, StepStatus::InProgress)
                | (StepStatus::InProgress, StepStatus::Completed)
        )
    }

    /// 是否已被激活过 (进行中或已完成)
    pub fn is_activated(&self) -> bool {
        !matches!(self, StepStatus::Pending)
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 工艺流程状态 (Workflow Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowStatus {
    NotStarted, // 未开始
    InProgress, // 进行中
    Completed,  // 已完成
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::NotStarted => "NOT_STARTED",
            WorkflowStatus::InProgress => "IN_PROGRESS",
            WorkflowStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s.trim().to_uppercase().as_str() {
            "NOT_STARTED" => Ok(WorkflowStatus::NotStarted),
            "IN_PROGRESS" => Ok(WorkflowStatus::InProgress),
            "COMPLETED" => Ok(WorkflowStatus::Completed),
            _ => Err(ParseEnumError::new("WorkflowStatus", s)),
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 批次状态 (Batch Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    InProgress, // 加工中 (件数不可被下游领用)
    Completed,  // 已完工
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::InProgress => "IN_PROGRESS",
            BatchStatus::Completed => "COMPLETED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s.trim().to_uppercase().as_str() {
            "IN_PROGRESS" => Ok(BatchStatus::InProgress),
            "COMPLETED" => Ok(BatchStatus::Completed),
            _ => Err(ParseEnumError::new("BatchStatus", s)),
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 件池 (Piece Pool)
// ==========================================
// AVAILABLE: 正常可领用件数; REWORK: 返工移出件数 (可被返工批次重新领用)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PiecePool {
    Available,
    Rework,
}

impl PiecePool {
    pub fn as_str(&self) -> &'static str {
        match self {
            PiecePool::Available => "AVAILABLE",
            PiecePool::Rework => "REWORK",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s.trim().to_uppercase().as_str() {
            "AVAILABLE" => Ok(PiecePool::Available),
            "REWORK" => Ok(PiecePool::Rework),
            _ => Err(ParseEnumError::new("PiecePool", s)),
        }
    }
}

impl Default for PiecePool {
    fn default() -> Self {
        PiecePool::Available
    }
}

// ==========================================
// 订单状态 (Order Status)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Received,   // 已接单
    InProgress, // 生产中
    Completed,  // 已完成
    Cancelled,  // 已取消
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Received => "RECEIVED",
            OrderStatus::InProgress => "IN_PROGRESS",
            OrderStatus::Completed => "COMPLETED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s.trim().to_uppercase().as_str() {
            "RECEIVED" => Ok(OrderStatus::Received),
            "IN_PROGRESS" => Ok(OrderStatus::InProgress),
            "COMPLETED" => Ok(OrderStatus::Completed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            _ => Err(ParseEnumError::new("OrderStatus", s)),
        }
    }

    /// 终态: 已完成 / 已取消
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ==========================================
// 加工类型 (Work Type)
// ==========================================
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkType {
    JobWorkOnly,  // 来料加工
    WithMaterial, // 包工包料
}

impl WorkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkType::JobWorkOnly => "JOB_WORK_ONLY",
            WorkType::WithMaterial => "WITH_MATERIAL",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ParseEnumError> {
        match s.trim().to_uppercase().as_str() {
            "JOB_WORK_ONLY" => Ok(WorkType::JobWorkOnly),
            "WITH_MATERIAL" => Ok(WorkType::WithMaterial),
            _ => Err(ParseEnumError::new("WorkType", s)),
        }
    }
}

impl fmt::Display for WorkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

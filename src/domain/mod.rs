// ==========================================
// 锻造生产追溯系统 - 领域模型层
// ==========================================
// 职责: 定义领域实体、类型
// 红线: 不含数据访问逻辑,不含引擎逻辑
// ==========================================

pub mod batch;
pub mod order;
pub mod template;
pub mod tenant;
pub mod types;
pub mod workflow;

// 重导出核心类型
pub use batch::{
    DailyMachiningBatch, InspectionDistribution, PieceConsumption, PieceCountSnapshot,
    ProcessedItemBatch, StageBatch,
};
pub use order::{Order, OrderItem, OrderItemProgress, OrderItemWorkflow, OrderProgressView};
pub use template::{WorkflowStep, WorkflowTemplate};
pub use tenant::TenantContext;
pub use types::{
    BatchStatus, OperationEntityType, OperationType, OrderStatus, ParseEnumError, PiecePool,
    StepStatus, WorkType, WorkflowStatus,
};
pub use workflow::{
    BatchOutcome, ForgingOutcome, ItemWorkflow, ItemWorkflowStep, OperationOutcome,
    StepTreeNode, WorkflowStatusView,
};

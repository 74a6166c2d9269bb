// ==========================================
// 锻造生产追溯系统 - 引擎层
// ==========================================
// 职责: 工艺树状态机与件数守恒规则, 不拼 SQL
// 红线: 引擎函数只接收已加载的实体与显式参数, 不读取全局状态
//       所有拒绝都以 LedgerError 返回并给出原因
// ==========================================

pub mod error;
pub mod events;
pub mod instantiator;
pub mod order_rollup;
pub mod ordering;
pub mod piece_ledger;
pub mod rework_distribution;
pub mod step_machine;
pub mod template_resolver;

pub use error::{LedgerError, LedgerResult};
pub use events::{
    NoOpEventPublisher, OptionalEventPublisher, WorkflowEvent, WorkflowEventPublisher,
    WorkflowEventType,
};
pub use instantiator::WorkflowInstantiator;
pub use order_rollup::OrderRollup;
pub use ordering::{build_step_tree, compare_siblings, ordered_steps, sort_siblings};
pub use piece_ledger::{AccountOutcome, ConsumptionPlan, ConsumptionRequest, PieceLedger};
pub use rework_distribution::{
    DistributionEntry, DistributionRequest, DistributionResult, ReworkDistributor,
};
pub use step_machine::{CompletionRequest, CompletionResult, LinkResult, StepStateMachine};
pub use template_resolver::{ResolvedTemplate, TemplateResolver};

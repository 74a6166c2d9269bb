// ==========================================
// 锻造生产追溯系统 - 数据仓储层
// ==========================================
// 红线: Repository 不含业务逻辑
// ==========================================
// 职责: 提供数据访问接口, 屏蔽数据库细节
// 约束: 所有查询使用参数化, 全部按 tenant_id 过滤并排除软删除行
// 约定: *_tx 函数接收调用方持有的连接/事务, 供 API 层在同一写事务内组合
// ==========================================

pub mod batch_repo;
pub mod codec;
pub mod error;
pub mod item_workflow_repo;
pub mod order_repo;
pub mod template_repo;

#[cfg(test)]
pub(crate) mod test_fixtures;

// 重导出核心仓储
pub use batch_repo::BatchRepository;
pub use error::{RepositoryError, RepositoryResult};
pub use item_workflow_repo::ItemWorkflowRepository;
pub use order_repo::OrderRepository;
pub use template_repo::TemplateRepository;

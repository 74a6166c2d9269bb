// ==========================================
// 锻造生产追溯系统 - API层
// ==========================================
// 职责: 业务编排, 为调用方 (工序服务/前端命令) 提供统一入口
// 红线: 所有修改件数或状态的操作在单个 IMMEDIATE 写事务内完成
//       读取 → 引擎校验 → 写回, 任一步失败整体回滚
// 事件: 事务提交后再发布, 发布失败不影响账本
// ==========================================

pub mod error;
pub mod inventory_api;
pub mod operation_api;
pub mod order_api;
pub mod workflow_api;

pub use error::{ApiError, ApiResult};
pub use inventory_api::InventoryApi;
pub use operation_api::{
    CompleteOperationBatchRequest, CompletedOperationBatch, CreateOperationBatchRequest,
    CreatedOperationBatch, DailyMachiningInput, ItemOutcomeInput, OperationApi,
    ProcessedItemInput,
};
pub use order_api::{NewOrder, NewOrderItem, OrderApi};
pub use workflow_api::WorkflowApi;

use crate::config::{load_ledger_config, LedgerConfig};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::sync::{Mutex, MutexGuard};

pub(crate) fn lock_conn(conn: &Mutex<Connection>) -> ApiResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|e| ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", e)))
}

/// 在 IMMEDIATE 写事务内执行 `f`, 成功则提交
///
/// IMMEDIATE 在事务开始时即取得写锁, 多进程/多连接并发领用同一来源时
/// 后到者等待 busy_timeout, 不会出现读到旧件数后再写入的情况
pub(crate) fn with_write_tx<T, F>(conn: &Mutex<Connection>, f: F) -> ApiResult<T>
where
    F: FnOnce(&Transaction<'_>) -> ApiResult<T>,
{
    let mut guard = lock_conn(conn)?;
    let tx = guard
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|e| ApiError::DatabaseTransactionError(format!("开启写事务失败: {}", e)))?;
    let value = f(&tx)?;
    tx.commit()
        .map_err(|e| ApiError::DatabaseTransactionError(format!("提交写事务失败: {}", e)))?;
    Ok(value)
}

/// 在事务内读取租户无关的账本配置
pub(crate) fn read_config(conn: &Connection) -> ApiResult<LedgerConfig> {
    load_ledger_config(conn).map_err(|e| ApiError::ConfigError(e.to_string()))
}

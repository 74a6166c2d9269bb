// ==========================================
// 锻造生产追溯系统 - 引擎层错误类型
// ==========================================
// 所有账本变更操作全有或全无: 任一校验失败即整体拒绝
// 账本内部不做自动重试, 由调用方修正请求后重试
// ==========================================

use thiserror::Error;

/// 账本 / 状态机错误
#[derive(Error, Debug, Clone, PartialEq)]
pub enum LedgerError {
    /// 模板树结构非法 (无根/多根/层级错误/环)
    #[error("工艺模板非法: template_id={template_id}, {reason}")]
    InvalidTemplate { template_id: String, reason: String },

    /// 非法状态迁移
    #[error("非法状态迁移: {entity}(id={id}) from={from} to={to}: {reason}")]
    InvalidTransition {
        entity: String,
        id: String,
        from: String,
        to: String,
        reason: String,
    },

    /// 完工时间先后关系违反
    #[error("完工时间非法: {entity}(id={id}) completed_at={completed_at} 早于 {reference}={reference_at}")]
    InvalidCompletionTime {
        entity: String,
        id: String,
        completed_at: String,
        reference: String,
        reference_at: String,
    },

    /// 领用件数超过可用件数
    #[error("可用件数不足: entity_id={entity_id}, requested={requested}, available={available}")]
    InsufficientPieces {
        entity_id: String,
        requested: u64,
        available: u32,
    },

    /// 报废/返工分摊合计与质检结果不一致
    #[error("分摊对账不平: inspection_id={inspection_id}, expected={expected}, distributed={distributed}")]
    ReconciliationMismatch {
        inspection_id: String,
        expected: u64,
        distributed: u64,
    },

    /// 请求数据校验失败
    #[error("数据校验失败: {0}")]
    Validation(String),

    /// 实体不存在 (或属于其它租户)
    #[error("记录未找到: {entity} with id={id}")]
    NotFound { entity: String, id: String },
}

impl LedgerError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        LedgerError::NotFound {
            entity: entity.to_string(),
            id: id.to_string(),
        }
    }

    pub fn invalid_template(template_id: &str, reason: impl Into<String>) -> Self {
        LedgerError::InvalidTemplate {
            template_id: template_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result 类型别名
pub type LedgerResult<T> = Result<T, LedgerError>;

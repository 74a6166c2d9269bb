// ==========================================
// 锻造生产追溯系统 - API层错误类型
// ==========================================
// 职责: 把引擎层/仓储层错误转换为调用方可区分的类型化错误
// 说明: 账本错误原样保留分类 (模板/迁移/时间/件数/对账),
//       由调用方 (各工序服务) 决定面向用户的提示
// ==========================================

use crate::engine::error::LedgerError;
use crate::repository::error::RepositoryError;
use thiserror::Error;

/// API层错误类型
#[derive(Error, Debug)]
pub enum ApiError {
    // ==========================================
    // 账本错误
    // ==========================================
    #[error("工艺模板非法: {0}")]
    InvalidTemplate(String),

    #[error("非法状态迁移: {0}")]
    InvalidTransition(String),

    #[error("完工时间非法: {0}")]
    InvalidCompletionTime(String),

    #[error("可用件数不足: entity_id={entity_id}, requested={requested}, available={available}")]
    InsufficientPieces {
        entity_id: String,
        requested: u64,
        available: u32,
    },

    #[error("分摊对账不平: inspection_id={inspection_id}, expected={expected}, distributed={distributed}")]
    ReconciliationMismatch {
        inspection_id: String,
        expected: u64,
        distributed: u64,
    },

    // ==========================================
    // 业务规则错误
    // ==========================================
    #[error("无效输入: {0}")]
    InvalidInput(String),

    #[error("资源未找到: {0}")]
    NotFound(String),

    #[error("业务规则违反: {0}")]
    BusinessRuleViolation(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    // ==========================================
    // 数据访问错误
    // ==========================================
    #[error("数据库错误: {0}")]
    DatabaseError(String),

    #[error("数据库连接失败: {0}")]
    DatabaseConnectionError(String),

    #[error("数据库事务失败: {0}")]
    DatabaseTransactionError(String),

    #[error("配置读取失败: {0}")]
    ConfigError(String),

    // ==========================================
    // 通用错误
    // ==========================================
    #[error("内部错误: {0}")]
    InternalError(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ApiError {
    pub fn not_found(entity: &str, id: &str) -> Self {
        ApiError::NotFound(format!("{}(id={})不存在", entity, id))
    }
}

// ==========================================
// 从 LedgerError 转换
// ==========================================
impl From<LedgerError> for ApiError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::InvalidTemplate { .. } => ApiError::InvalidTemplate(err.to_string()),
            LedgerError::InvalidTransition { .. } => ApiError::InvalidTransition(err.to_string()),
            LedgerError::InvalidCompletionTime { .. } => {
                ApiError::InvalidCompletionTime(err.to_string())
            }
            LedgerError::InsufficientPieces {
                entity_id,
                requested,
                available,
            } => ApiError::InsufficientPieces {
                entity_id,
                requested,
                available,
            },
            LedgerError::ReconciliationMismatch {
                inspection_id,
                expected,
                distributed,
            } => ApiError::ReconciliationMismatch {
                inspection_id,
                expected,
                distributed,
            },
            LedgerError::Validation(msg) => ApiError::ValidationError(msg),
            LedgerError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
        }
    }
}

// ==========================================
// 从 RepositoryError 转换
// ==========================================
impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { entity, id } => {
                ApiError::NotFound(format!("{}(id={})不存在", entity, id))
            }
            RepositoryError::DatabaseConnectionError(msg) => ApiError::DatabaseConnectionError(msg),
            RepositoryError::DatabaseTransactionError(msg) => {
                ApiError::DatabaseTransactionError(msg)
            }
            RepositoryError::LockError(msg) => {
                ApiError::DatabaseConnectionError(format!("数据库锁获取失败: {}", msg))
            }
            RepositoryError::DatabaseQueryError(msg) => ApiError::DatabaseError(msg),
            RepositoryError::UniqueConstraintViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("唯一约束违反: {}", msg))
            }
            RepositoryError::ForeignKeyViolation(msg) => {
                ApiError::BusinessRuleViolation(format!("外键约束违反: {}", msg))
            }
            RepositoryError::BusinessRuleViolation(msg) => ApiError::BusinessRuleViolation(msg),
            RepositoryError::ValidationError(msg) => ApiError::ValidationError(msg),
            RepositoryError::CorruptData { field, message } => {
                ApiError::InternalError(format!("数据损坏 field={}: {}", field, message))
            }
            RepositoryError::InternalError(msg) => ApiError::InternalError(msg),
            RepositoryError::Other(err) => ApiError::Other(err),
        }
    }
}

impl From<rusqlite::Error> for ApiError {
    fn from(err: rusqlite::Error) -> Self {
        ApiError::from(RepositoryError::from(err))
    }
}

/// Result 类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ledger_taxonomy_is_preserved() {
        let err: ApiError = LedgerError::InsufficientPieces {
            entity_id: "forge-1".to_string(),
            requested: 61,
            available: 60,
        }
        .into();
        assert!(matches!(err, ApiError::InsufficientPieces { requested: 61, .. }));

        let err: ApiError = LedgerError::invalid_template("tpl", "缺少根节点").into();
        match err {
            ApiError::InvalidTemplate(msg) => assert!(msg.contains("tpl")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_repository_not_found_maps_to_not_found() {
        let err: ApiError = RepositoryError::NotFound {
            entity: "ItemWorkflow".to_string(),
            id: "wf-1".to_string(),
        }
        .into();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}

// ==========================================
// 锻造生产追溯系统 - 租户上下文
// ==========================================
// 每次账本操作显式传入, 不读取任何线程局部/全局状态
// ==========================================

use serde::{Deserialize, Serialize};

/// 请求级租户上下文
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantContext {
    pub tenant_id: i64,        // 租户ID
    pub actor: Option<String>, // 操作人 (仅用于日志)
}

impl TenantContext {
    pub fn new(tenant_id: i64) -> Self {
        Self {
            tenant_id,
            actor: None,
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// 日志中使用的操作人
    pub fn actor_or_system(&self) -> &str {
        self.actor.as_deref().unwrap_or("system")
    }
}

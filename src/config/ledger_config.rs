// ==========================================
// 锻造生产追溯系统 - 账本运行参数
// ==========================================
// 由 ConfigManager 从 config_kv 读取, 显式传入引擎
// ==========================================

use serde::{Deserialize, Serialize};

/// 账本 / 状态机 / 订单汇总运行参数
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// 返工件是否留在可用池 (false: 移入返工桶, 仅返工批次可领用)
    pub rework_returns_to_pool: bool,
    /// 激活步骤前要求所有非可选祖先已激活
    pub require_upstream_activation: bool,
    /// 订单既无人工交期也无估算天数时的默认加工天数
    pub default_expected_processing_days: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            rework_returns_to_pool: false,
            require_upstream_activation: true,
            default_expected_processing_days: 14,
        }
    }
}

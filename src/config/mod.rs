// ==========================================
// 锻造生产追溯系统 - 配置层
// ==========================================
// 职责: 系统配置管理
// 存储: config_kv 表
// ==========================================

pub mod config_manager;
pub mod ledger_config;

pub use config_manager::{config_keys, load_ledger_config, ConfigManager};
pub use ledger_config::LedgerConfig;

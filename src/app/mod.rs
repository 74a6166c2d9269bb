// ==========================================
// 锻造生产追溯系统 - 应用层
// ==========================================
// 职责: 组装共享连接与各 API 实例, 供宿主进程 (服务/命令行) 持有
// ==========================================

pub mod state;

// 重导出
pub use state::{get_default_db_path, AppState};

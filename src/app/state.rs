// ==========================================
// 锻造生产追溯系统 - 应用状态
// ==========================================
// 职责: 管理应用级别的共享连接和API实例
// ==========================================

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::api::{InventoryApi, OperationApi, OrderApi, WorkflowApi};
use crate::config::config_manager::ConfigManager;
use crate::engine::events::{OptionalEventPublisher, WorkflowEventPublisher};

/// 应用状态
///
/// 所有 API 共享同一个连接; 写操作各自开启 IMMEDIATE 事务
pub struct AppState {
    /// 数据库路径
    pub db_path: String,

    /// 工艺模板与批系流程API
    pub workflow_api: Arc<WorkflowApi>,

    /// 工序批次API
    pub operation_api: Arc<OperationApi>,

    /// 件数库存查询API
    pub inventory_api: Arc<InventoryApi>,

    /// 订单API
    pub order_api: Arc<OrderApi>,

    /// 配置管理
    pub config_manager: Arc<ConfigManager>,
}

impl AppState {
    /// 打开数据库、补齐表结构并创建全部 API 实例
    pub fn new(db_path: String) -> Result<Self, String> {
        Self::with_publisher(db_path, None)
    }

    /// 同 `new`, 并为工序批次API挂接流程事件发布者
    pub fn with_publisher(
        db_path: String,
        publisher: Option<Arc<dyn WorkflowEventPublisher>>,
    ) -> Result<Self, String> {
        tracing::info!("初始化AppState，数据库路径: {}", db_path);

        let conn = crate::db::open_sqlite_connection(&db_path)
            .map_err(|e| format!("无法打开数据库: {}", e))?;
        crate::db::ensure_schema(&conn).map_err(|e| format!("数据库表结构初始化失败: {}", e))?;
        let conn = Arc::new(Mutex::new(conn));

        let config_manager = ConfigManager::from_connection(conn.clone())
            .map_err(|e| format!("无法初始化ConfigManager: {}", e))?;

        let publisher = match publisher {
            Some(p) => OptionalEventPublisher::with_publisher(p),
            None => OptionalEventPublisher::none(),
        };

        tracing::info!("AppState初始化完成");
        Ok(Self {
            db_path,
            workflow_api: Arc::new(WorkflowApi::new(conn.clone())),
            operation_api: Arc::new(OperationApi::with_publisher(conn.clone(), publisher)),
            inventory_api: Arc::new(InventoryApi::new(conn.clone())),
            order_api: Arc::new(OrderApi::new(conn)),
            config_manager: Arc::new(config_manager),
        })
    }
}

/// 默认数据库路径
///
/// 优先读取环境变量 FORGE_LEDGER_DB_PATH, 否则放在用户数据目录下
pub fn get_default_db_path() -> String {
    use std::path::PathBuf;

    if let Ok(path) = std::env::var("FORGE_LEDGER_DB_PATH") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return trimmed.to_string();
        }
    }

    let mut path = PathBuf::from("./forge_ledger.db");

    if let Some(data_dir) = dirs::data_dir() {
        #[cfg(debug_assertions)]
        {
            path = data_dir.join("forge-ledger-dev");
        }

        #[cfg(not(debug_assertions))]
        {
            path = data_dir.join("forge-ledger");
        }

        std::fs::create_dir_all(&path).ok();
        path = path.join("forge_ledger.db");
    }

    path.to_string_lossy().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_get_default_db_path_is_not_empty() {
        let path = get_default_db_path();
        assert!(path.ends_with(".db"));
    }

    #[test]
    fn test_app_state_initializes_schema() {
        let file = NamedTempFile::new().unwrap();
        let db_path = file.path().to_string_lossy().to_string();
        let state = AppState::new(db_path.clone()).unwrap();
        assert_eq!(state.db_path, db_path);
        assert!(state.config_manager.ledger_config().is_ok());
    }
}

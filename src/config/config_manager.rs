// ==========================================
// 锻造生产追溯系统 - 配置管理器
// ==========================================
// 职责: 配置加载、查询、覆写
// 存储: config_kv 表 (key-value + scope)
// 说明: 引擎不直接读配置; API 层在每次请求开始时取 LedgerConfig 显式传入
// ==========================================

use crate::config::ledger_config::LedgerConfig;
use crate::db::open_sqlite_connection;
use rusqlite::{params, Connection};
use serde_json::json;
use std::collections::BTreeMap;
use std::error::Error;
use std::sync::{Arc, Mutex};

// ==========================================
// ConfigManager - 配置管理器
// ==========================================
pub struct ConfigManager {
    conn: Arc<Mutex<Connection>>,
}

impl ConfigManager {
    /// 创建新的 ConfigManager 实例
    ///
    /// # 参数
    /// - db_path: 数据库文件路径
    pub fn new(db_path: &str) -> Result<Self, Box<dyn Error>> {
        let conn = open_sqlite_connection(db_path)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 从已有连接创建 ConfigManager
    ///
    /// 会对传入连接再次应用统一 PRAGMA (幂等)
    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Result<Self, Box<dyn Error>> {
        {
            let conn_guard = conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
            crate::db::configure_sqlite_connection(&conn_guard)?;
        }

        Ok(Self { conn })
    }

    /// 从 config_kv 表读取配置值 (scope_id='global')
    fn get_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        read_global_value(&conn, key)
    }

    /// 读取 global scope 的配置值
    pub fn get_global_config_value(&self, key: &str) -> Result<Option<String>, Box<dyn Error>> {
        self.get_config_value(key)
    }

    /// 写入 global scope 的配置值 (UPSERT)
    pub fn set_global_config_value(&self, key: &str, value: &str) -> Result<(), Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;
        conn.execute(
            "INSERT INTO config_kv (scope_id, key, value, updated_at)
             VALUES ('global', ?1, ?2, datetime('now'))
             ON CONFLICT(scope_id, key) DO UPDATE SET value = ?2, updated_at = datetime('now')",
            params![key, value],
        )?;
        tracing::info!(config_key = %key, value = %value, "配置已更新");
        Ok(())
    }

    fn get_config_or_default(&self, key: &str, default: &str) -> Result<String, Box<dyn Error>> {
        Ok(self.get_config_value(key)?.unwrap_or_else(|| default.to_string()))
    }

    // ===== 账本配置 =====

    pub fn get_rework_returns_to_pool(&self) -> Result<bool, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::REWORK_RETURNS_TO_POOL, "false")?;
        Ok(parse_bool(config_keys::REWORK_RETURNS_TO_POOL, &value, false))
    }

    pub fn get_require_upstream_activation(&self) -> Result<bool, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::REQUIRE_UPSTREAM_ACTIVATION, "true")?;
        Ok(parse_bool(config_keys::REQUIRE_UPSTREAM_ACTIVATION, &value, true))
    }

    pub fn get_default_expected_processing_days(&self) -> Result<u32, Box<dyn Error>> {
        let value = self.get_config_or_default(config_keys::DEFAULT_EXPECTED_PROCESSING_DAYS, "14")?;
        Ok(value.trim().parse::<u32>().unwrap_or_else(|_| {
            tracing::warn!(
                config_key = config_keys::DEFAULT_EXPECTED_PROCESSING_DAYS,
                raw_value = %value,
                "默认加工天数配置格式错误, 使用 14"
            );
            14
        }))
    }

    /// 账本运行参数
    pub fn ledger_config(&self) -> Result<LedgerConfig, Box<dyn Error>> {
        Ok(LedgerConfig {
            rework_returns_to_pool: self.get_rework_returns_to_pool()?,
            require_upstream_activation: self.get_require_upstream_activation()?,
            default_expected_processing_days: self.get_default_expected_processing_days()?,
        })
    }

    /// 获取所有 global 配置的快照 (JSON)
    pub fn get_config_snapshot(&self) -> Result<String, Box<dyn Error>> {
        let conn = self.conn.lock().map_err(|e| format!("锁获取失败: {}", e))?;

        let mut stmt = conn.prepare(
            "SELECT key, value FROM config_kv WHERE scope_id = 'global' ORDER BY key",
        )?;

        let mut config_map: BTreeMap<String, String> = BTreeMap::new();
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        for row in rows {
            let (key, value) = row?;
            config_map.insert(key, value);
        }

        Ok(serde_json::to_string(&json!(config_map))?)
    }
}

/// 在调用方已持有的连接 (或事务) 上读取账本运行参数
pub fn load_ledger_config(conn: &Connection) -> Result<LedgerConfig, Box<dyn Error>> {
    let defaults = LedgerConfig::default();
    let rework_returns_to_pool = match read_global_value(conn, config_keys::REWORK_RETURNS_TO_POOL)? {
        Some(v) => parse_bool(config_keys::REWORK_RETURNS_TO_POOL, &v, defaults.rework_returns_to_pool),
        None => defaults.rework_returns_to_pool,
    };
    let require_upstream_activation =
        match read_global_value(conn, config_keys::REQUIRE_UPSTREAM_ACTIVATION)? {
            Some(v) => parse_bool(
                config_keys::REQUIRE_UPSTREAM_ACTIVATION,
                &v,
                defaults.require_upstream_activation,
            ),
            None => defaults.require_upstream_activation,
        };
    let default_expected_processing_days =
        match read_global_value(conn, config_keys::DEFAULT_EXPECTED_PROCESSING_DAYS)? {
            Some(v) => v
                .trim()
                .parse::<u32>()
                .unwrap_or(defaults.default_expected_processing_days),
            None => defaults.default_expected_processing_days,
        };

    Ok(LedgerConfig {
        rework_returns_to_pool,
        require_upstream_activation,
        default_expected_processing_days,
    })
}

fn read_global_value(conn: &Connection, key: &str) -> Result<Option<String>, Box<dyn Error>> {
    let result = conn.query_row(
        "SELECT value FROM config_kv WHERE scope_id = 'global' AND key = ?1",
        params![key],
        |row| row.get::<_, String>(0),
    );

    match result {
        Ok(value) => Ok(Some(value)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(Box::new(e)),
    }
}

fn parse_bool(key: &str, raw: &str, default: bool) -> bool {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => true,
        "false" | "0" | "no" => false,
        _ => {
            tracing::warn!(config_key = %key, raw_value = %raw, default, "布尔配置格式错误, 使用默认值");
            default
        }
    }
}

// ==========================================
// 配置键常量
// ==========================================
pub mod config_keys {
    // 账本
    pub const REWORK_RETURNS_TO_POOL: &str = "ledger/rework_returns_to_pool";

    // 状态机
    pub const REQUIRE_UPSTREAM_ACTIVATION: &str = "workflow/require_upstream_activation";

    // 订单
    pub const DEFAULT_EXPECTED_PROCESSING_DAYS: &str = "order/default_expected_processing_days";
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConfigManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::ensure_schema(&conn).unwrap();
        ConfigManager::from_connection(Arc::new(Mutex::new(conn))).unwrap()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = manager().ledger_config().unwrap();
        assert_eq!(config, LedgerConfig::default());
    }

    #[test]
    fn test_overrides_are_read() {
        let m = manager();
        m.set_global_config_value(config_keys::REWORK_RETURNS_TO_POOL, "true").unwrap();
        m.set_global_config_value(config_keys::DEFAULT_EXPECTED_PROCESSING_DAYS, "21").unwrap();
        let config = m.ledger_config().unwrap();
        assert!(config.rework_returns_to_pool);
        assert!(config.require_upstream_activation);
        assert_eq!(config.default_expected_processing_days, 21);

        let snapshot: serde_json::Value = serde_json::from_str(&m.get_config_snapshot().unwrap()).unwrap();
        assert_eq!(snapshot["ledger/rework_returns_to_pool"], "true");
    }

    #[test]
    fn test_malformed_value_falls_back() {
        let m = manager();
        m.set_global_config_value(config_keys::REQUIRE_UPSTREAM_ACTIVATION, "maybe").unwrap();
        assert!(m.get_require_upstream_activation().unwrap());
    }
}

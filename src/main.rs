// ==========================================
// 锻造生产追溯系统 - 主入口
// ==========================================
// 职责: 初始化日志与数据库, 输出当前表结构版本与账本配置
// 用法: forge-ledger [--json]
//       数据库路径取 FORGE_LEDGER_DB_PATH, 未设置时使用用户数据目录
// ==========================================

use anyhow::{anyhow, Context, Result};
use forge_workflow_ledger::app::{get_default_db_path, AppState};
use forge_workflow_ledger::{db, logging};

fn main() -> Result<()> {
    let json = std::env::args().skip(1).any(|a| a == "--json");
    if json {
        logging::init_json();
    } else {
        logging::init();
    }

    tracing::info!("==================================================");
    tracing::info!("{}", forge_workflow_ledger::APP_NAME);
    tracing::info!("系统版本: {}", forge_workflow_ledger::VERSION);
    tracing::info!("==================================================");

    let db_path = get_default_db_path();
    tracing::info!("使用数据库: {}", db_path);

    let state = AppState::new(db_path.clone()).map_err(|e| anyhow!(e))?;

    let conn = db::open_sqlite_connection(&db_path).context("无法打开数据库")?;
    let version = db::read_schema_version(&conn).context("读取表结构版本失败")?;
    tracing::info!(schema_version = ?version, "数据库表结构就绪");

    let snapshot = state
        .config_manager
        .get_config_snapshot()
        .map_err(|e| anyhow!("读取配置快照失败: {}", e))?;
    tracing::info!(config = %snapshot, "账本配置");

    Ok(())
}

// ==========================================
// 锻造生产追溯系统 - 订单仓储
// ==========================================
// 表: customer_order / order_item / order_item_workflow
// 进度/交期/超期不落库, 由 OrderRollup 读时计算
// ==========================================

use crate::domain::order::{Order, OrderItem, OrderItemWorkflow};
use crate::domain::types::{OrderStatus, WorkType};
use crate::repository::codec::{fmt_date, fmt_ts, get_count, get_opt_count, parse_date, parse_enum, parse_ts};
use crate::repository::error::{RepositoryError, RepositoryResult};
use rusqlite::{params, Connection, OptionalExtension, Result as SqliteResult};
use std::sync::{Arc, Mutex};

// ==========================================
// 事务内函数
// ==========================================

/// 写入订单及订单行 (含已有关联)
pub fn insert_order_tx(conn: &Connection, order: &Order) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO customer_order (
            id, tenant_id, po_number, order_date, expected_processing_days,
            user_defined_eta_days, status, created_at, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
        "#,
        params![
            order.id,
            order.tenant_id,
            order.po_number,
            fmt_date(order.order_date),
            order.expected_processing_days,
            order.user_defined_eta_days,
            order.status.as_str(),
            fmt_ts(order.created_at),
            fmt_ts(order.updated_at),
        ],
    )?;

    for item in &order.items {
        conn.execute(
            r#"
            INSERT INTO order_item (
                id, tenant_id, order_id, item_id, quantity, unit_price,
                material_cost_per_unit, work_type, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
            params![
                item.id,
                order.tenant_id,
                order.id,
                item.item_id,
                item.quantity,
                item.unit_price,
                item.material_cost_per_unit,
                item.work_type.as_str(),
                fmt_ts(order.created_at),
            ],
        )?;
        for link in &item.workflows {
            insert_order_item_workflow_tx(conn, order.tenant_id, link)?;
        }
    }
    Ok(())
}

pub fn insert_order_item_workflow_tx(
    conn: &Connection,
    tenant_id: i64,
    link: &OrderItemWorkflow,
) -> RepositoryResult<()> {
    conn.execute(
        r#"
        INSERT INTO order_item_workflow (id, tenant_id, order_item_id, item_workflow_id, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
        params![
            link.id,
            tenant_id,
            link.order_item_id,
            link.item_workflow_id,
            fmt_ts(link.created_at),
        ],
    )?;
    Ok(())
}

pub fn update_order_status_tx(
    conn: &Connection,
    tenant_id: i64,
    order_id: &str,
    status: OrderStatus,
    updated_at: &str,
) -> RepositoryResult<()> {
    let affected = conn.execute(
        r#"
        UPDATE customer_order SET status = ?3, updated_at = ?4
        WHERE tenant_id = ?1 AND id = ?2 AND deleted = 0
        "#,
        params![tenant_id, order_id, status.as_str(), updated_at],
    )?;
    if affected == 0 {
        return Err(RepositoryError::NotFound {
            entity: "Order".to_string(),
            id: order_id.to_string(),
        });
    }
    Ok(())
}

/// 加载订单 (含订单行与关联)
pub fn find_order_tx(conn: &Connection, tenant_id: i64, order_id: &str) -> RepositoryResult<Option<Order>> {
    let header = conn
        .query_row(
            r#"
            SELECT id, tenant_id, po_number, order_date, expected_processing_days,
                   user_defined_eta_days, status, created_at, updated_at
            FROM customer_order
            WHERE tenant_id = ?1 AND id = ?2 AND deleted = 0
            "#,
            params![tenant_id, order_id],
            |row| {
                Ok(Order {
                    id: row.get(0)?,
                    tenant_id: row.get(1)?,
                    po_number: row.get(2)?,
                    order_date: parse_date(3, &row.get::<_, String>(3)?)?,
                    expected_processing_days: get_opt_count(row, 4)?,
                    user_defined_eta_days: get_opt_count(row, 5)?,
                    status: parse_enum(6, &row.get::<_, String>(6)?, OrderStatus::parse)?,
                    items: Vec::new(),
                    created_at: parse_ts(7, &row.get::<_, String>(7)?)?,
                    updated_at: parse_ts(8, &row.get::<_, String>(8)?)?,
                })
            },
        )
        .optional()?;

    let Some(mut order) = header else {
        return Ok(None);
    };

    let mut item_stmt = conn.prepare(
        r#"
        SELECT id, order_id, item_id, quantity, unit_price, material_cost_per_unit, work_type
        FROM order_item
        WHERE tenant_id = ?1 AND order_id = ?2 AND deleted = 0
        ORDER BY created_at ASC, id ASC
        "#,
    )?;
    let mut items = item_stmt
        .query_map(params![tenant_id, order_id], |row| {
            Ok(OrderItem {
                id: row.get(0)?,
                order_id: row.get(1)?,
                item_id: row.get(2)?,
                quantity: get_count(row, 3)?,
                unit_price: row.get(4)?,
                material_cost_per_unit: row.get(5)?,
                work_type: parse_enum(6, &row.get::<_, String>(6)?, WorkType::parse)?,
                workflows: Vec::new(),
            })
        })?
        .collect::<SqliteResult<Vec<_>>>()?;

    let mut link_stmt = conn.prepare(
        r#"
        SELECT id, order_item_id, item_workflow_id, created_at
        FROM order_item_workflow
        WHERE tenant_id = ?1 AND order_item_id = ?2 AND deleted = 0
        ORDER BY created_at ASC, id ASC
        "#,
    )?;
    for item in items.iter_mut() {
        item.workflows = link_stmt
            .query_map(params![tenant_id, item.id], |row| {
                Ok(OrderItemWorkflow {
                    id: row.get(0)?,
                    order_item_id: row.get(1)?,
                    item_workflow_id: row.get(2)?,
                    created_at: parse_ts(3, &row.get::<_, String>(3)?)?,
                })
            })?
            .collect::<SqliteResult<Vec<_>>>()?;
    }

    order.items = items;
    Ok(Some(order))
}

/// 关联了某流程实例的订单ID
pub fn find_order_ids_by_workflow_tx(
    conn: &Connection,
    tenant_id: i64,
    item_workflow_id: &str,
) -> RepositoryResult<Vec<String>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT DISTINCT oi.order_id
        FROM order_item_workflow oiw
        JOIN order_item oi ON oi.id = oiw.order_item_id
        WHERE oiw.tenant_id = ?1 AND oiw.item_workflow_id = ?2
          AND oiw.deleted = 0 AND oi.deleted = 0
        ORDER BY oi.order_id ASC
        "#,
    )?;
    let ids = stmt
        .query_map(params![tenant_id, item_workflow_id], |row| row.get::<_, String>(0))?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(ids)
}

/// 租户下未删除订单ID (下单日倒序)
pub fn list_order_ids_tx(conn: &Connection, tenant_id: i64) -> RepositoryResult<Vec<String>> {
    let mut stmt = conn.prepare(
        r#"
        SELECT id FROM customer_order
        WHERE tenant_id = ?1 AND deleted = 0
        ORDER BY order_date DESC, id ASC
        "#,
    )?;
    let ids = stmt
        .query_map(params![tenant_id], |row| row.get::<_, String>(0))?
        .collect::<SqliteResult<Vec<_>>>()?;
    Ok(ids)
}

// ==========================================
// OrderRepository - 订单仓储 (只读查询)
// ==========================================
pub struct OrderRepository {
    conn: Arc<Mutex<Connection>>,
}

impl OrderRepository {
    pub fn new(db_path: &str) -> RepositoryResult<Self> {
        let conn = crate::db::open_sqlite_connection(db_path)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn from_connection(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    fn get_conn(&self) -> RepositoryResult<std::sync::MutexGuard<Connection>> {
        self.conn
            .lock()
            .map_err(|e| RepositoryError::LockError(e.to_string()))
    }

    pub fn find_by_id(&self, tenant_id: i64, order_id: &str) -> RepositoryResult<Option<Order>> {
        let conn = self.get_conn()?;
        find_order_tx(&conn, tenant_id, order_id)
    }

    /// 租户下未删除订单ID (下单日倒序)
    pub fn list_ids_by_tenant(&self, tenant_id: i64) -> RepositoryResult<Vec<String>> {
        let conn = self.get_conn()?;
        list_order_ids_tx(&conn, tenant_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::test_fixtures::{conn, store_lineage, ts};
    use chrono::NaiveDate;

    fn order(id: &str, day: u32, links: Vec<(&str, &str)>) -> Order {
        let item_id = format!("{}-item", id);
        Order {
            id: id.to_string(),
            tenant_id: 1,
            po_number: format!("PO-{}", id),
            order_date: NaiveDate::from_ymd_opt(2025, 3, day).unwrap(),
            expected_processing_days: Some(20),
            user_defined_eta_days: None,
            status: OrderStatus::Received,
            items: vec![OrderItem {
                id: item_id.clone(),
                order_id: id.to_string(),
                item_id: "ITEM-O1".to_string(),
                quantity: 40,
                unit_price: 8.5,
                material_cost_per_unit: Some(2.0),
                work_type: WorkType::WithMaterial,
                workflows: links
                    .into_iter()
                    .map(|(link_id, workflow_id)| OrderItemWorkflow {
                        id: link_id.to_string(),
                        order_item_id: item_id.clone(),
                        item_workflow_id: workflow_id.to_string(),
                        created_at: ts(day, 1),
                    })
                    .collect(),
            }],
            created_at: ts(day, 0),
            updated_at: ts(day, 0),
        }
    }

    #[test]
    fn test_insert_and_find_order_with_links() {
        let conn = conn();
        let wf = store_lineage(&conn, 1, "ITEM-O1");
        insert_order_tx(&conn, &order("o-1", 2, vec![("l-1", wf.id.as_str())])).unwrap();

        let found = find_order_tx(&conn, 1, "o-1").unwrap().unwrap();
        assert_eq!(found.po_number, "PO-o-1");
        assert_eq!(found.expected_processing_days, Some(20));
        assert_eq!(found.user_defined_eta_days, None);
        assert_eq!(found.items.len(), 1);
        assert_eq!(found.items[0].work_type, WorkType::WithMaterial);
        assert_eq!(found.items[0].material_cost_per_unit, Some(2.0));
        assert_eq!(found.workflow_links().count(), 1);

        assert!(find_order_tx(&conn, 2, "o-1").unwrap().is_none());
    }

    #[test]
    fn test_link_is_unique_per_item_and_workflow() {
        let conn = conn();
        let wf = store_lineage(&conn, 1, "ITEM-O1");
        insert_order_tx(&conn, &order("o-1", 2, Vec::new())).unwrap();

        let link = OrderItemWorkflow {
            id: "l-1".to_string(),
            order_item_id: "o-1-item".to_string(),
            item_workflow_id: wf.id.clone(),
            created_at: ts(3, 0),
        };
        insert_order_item_workflow_tx(&conn, 1, &link).unwrap();
        assert!(insert_order_item_workflow_tx(&conn, 1, &OrderItemWorkflow { id: "l-2".to_string(), ..link }).is_err());

        assert_eq!(find_order_ids_by_workflow_tx(&conn, 1, &wf.id).unwrap(), vec!["o-1".to_string()]);
        assert!(find_order_ids_by_workflow_tx(&conn, 2, &wf.id).unwrap().is_empty());
    }

    #[test]
    fn test_update_status() {
        let conn = conn();
        insert_order_tx(&conn, &order("o-1", 2, Vec::new())).unwrap();
        update_order_status_tx(&conn, 1, "o-1", OrderStatus::Cancelled, "2025-03-04 10:00:00").unwrap();

        let found = find_order_tx(&conn, 1, "o-1").unwrap().unwrap();
        assert_eq!(found.status, OrderStatus::Cancelled);
        assert_eq!(found.updated_at, ts(4, 10));

        assert!(matches!(
            update_order_status_tx(&conn, 2, "o-1", OrderStatus::Completed, "2025-03-04 10:00:00"),
            Err(RepositoryError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_orders_newest_first() {
        let conn = conn();
        insert_order_tx(&conn, &order("o-early", 2, Vec::new())).unwrap();
        insert_order_tx(&conn, &order("o-late", 9, Vec::new())).unwrap();

        let repo = OrderRepository::from_connection(Arc::new(Mutex::new(conn)));
        assert_eq!(
            repo.list_ids_by_tenant(1).unwrap(),
            vec!["o-late".to_string(), "o-early".to_string()]
        );
        assert!(repo.list_ids_by_tenant(2).unwrap().is_empty());
        assert!(repo.find_by_id(1, "o-early").unwrap().is_some());
    }
}

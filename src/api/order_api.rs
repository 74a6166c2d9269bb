// ==========================================
// 锻造生产追溯系统 - 订单 API
// ==========================================
// 职责: 订单录入、订单行关联批系、进度/交期/超期查询、取消
// 说明: 订单状态由关联流程推导, 流程开始/完工时在同一写事务内回写;
//       终态 (完成/取消) 不被推导覆盖
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::{lock_conn, read_config, with_write_tx};
use crate::domain::order::{Order, OrderItem, OrderItemWorkflow, OrderProgressView};
use crate::domain::tenant::TenantContext;
use crate::domain::types::{OrderStatus, WorkType, WorkflowStatus};
use crate::engine::order_rollup::OrderRollup;
use crate::repository::codec::{fmt_ts, now_ts};
use crate::repository::{item_workflow_repo, order_repo};
use chrono::{NaiveDate, NaiveDateTime};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};
use uuid::Uuid;

// ==========================================
// 请求类型
// ==========================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub item_id: String,
    pub quantity: u32,
    pub unit_price: f64,
    #[serde(default)]
    pub material_cost_per_unit: Option<f64>,
    pub work_type: WorkType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrder {
    pub po_number: String,
    pub order_date: NaiveDate,
    #[serde(default)]
    pub expected_processing_days: Option<u32>,
    #[serde(default)]
    pub user_defined_eta_days: Option<u32>,
    pub items: Vec<NewOrderItem>,
}

// ==========================================
// OrderApi
// ==========================================
pub struct OrderApi {
    conn: Arc<Mutex<Connection>>,
}

impl OrderApi {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }

    /// 录入订单
    pub fn create_order(&self, ctx: &TenantContext, input: &NewOrder) -> ApiResult<Order> {
        Self::validate_new_order(input)?;
        let now = now_ts();
        let order_id = Uuid::new_v4().to_string();

        let order = Order {
            id: order_id.clone(),
            tenant_id: ctx.tenant_id,
            po_number: input.po_number.trim().to_string(),
            order_date: input.order_date,
            expected_processing_days: input.expected_processing_days,
            user_defined_eta_days: input.user_defined_eta_days,
            status: OrderStatus::Received,
            items: input
                .items
                .iter()
                .map(|i| OrderItem {
                    id: Uuid::new_v4().to_string(),
                    order_id: order_id.clone(),
                    item_id: i.item_id.trim().to_string(),
                    quantity: i.quantity,
                    unit_price: i.unit_price,
                    material_cost_per_unit: i.material_cost_per_unit,
                    work_type: i.work_type,
                    workflows: Vec::new(),
                })
                .collect(),
            created_at: now,
            updated_at: now,
        };

        with_write_tx(&self.conn, |tx| {
            order_repo::insert_order_tx(tx, &order)?;
            Ok(())
        })?;

        info!(
            tenant_id = ctx.tenant_id,
            actor = ctx.actor_or_system(),
            order_id = %order.id,
            po_number = %order.po_number,
            items = order.items.len(),
            "订单已录入"
        );
        Ok(order)
    }

    fn validate_new_order(input: &NewOrder) -> ApiResult<()> {
        if input.po_number.trim().is_empty() {
            return Err(ApiError::InvalidInput("采购单号不能为空".to_string()));
        }
        if input.items.is_empty() {
            return Err(ApiError::InvalidInput("订单至少包含一个订单行".to_string()));
        }
        for item in &input.items {
            if item.item_id.trim().is_empty() {
                return Err(ApiError::InvalidInput("订单行零件ID不能为空".to_string()));
            }
            if item.quantity == 0 {
                return Err(ApiError::InvalidInput(format!(
                    "订单行 {} 数量必须大于 0",
                    item.item_id
                )));
            }
            if !item.unit_price.is_finite() || item.unit_price < 0.0 {
                return Err(ApiError::InvalidInput(format!(
                    "订单行 {} 单价非法: {}",
                    item.item_id, item.unit_price
                )));
            }
        }
        Ok(())
    }

    /// 订单行关联批系 (一个订单行可关联多个批系)
    pub fn link_workflow(
        &self,
        ctx: &TenantContext,
        order_id: &str,
        order_item_id: &str,
        item_workflow_id: &str,
    ) -> ApiResult<OrderItemWorkflow> {
        let now = now_ts();
        let link = with_write_tx(&self.conn, |tx| {
            let order = order_repo::find_order_tx(tx, ctx.tenant_id, order_id)?
                .ok_or_else(|| ApiError::not_found("Order", order_id))?;
            if order.status.is_terminal() {
                return Err(ApiError::InvalidTransition(format!(
                    "订单 {} 已处于 {} 状态, 不能再关联批系",
                    order.id, order.status
                )));
            }
            let item = order
                .items
                .iter()
                .find(|i| i.id == order_item_id)
                .ok_or_else(|| ApiError::not_found("OrderItem", order_item_id))?;
            if item.workflows.iter().any(|w| w.item_workflow_id == item_workflow_id) {
                return Err(ApiError::BusinessRuleViolation(format!(
                    "批系 {} 已关联到订单行 {}",
                    item_workflow_id, order_item_id
                )));
            }
            // 批系必须属于本租户
            item_workflow_repo::get_workflow_tx(tx, ctx.tenant_id, item_workflow_id)?;

            let link = OrderItemWorkflow {
                id: Uuid::new_v4().to_string(),
                order_item_id: order_item_id.to_string(),
                item_workflow_id: item_workflow_id.to_string(),
                created_at: now,
            };
            order_repo::insert_order_item_workflow_tx(tx, ctx.tenant_id, &link)?;
            sync_order_status_tx(tx, ctx, order_id, now)?;
            Ok(link)
        })?;

        info!(
            tenant_id = ctx.tenant_id,
            order_id = %order_id,
            order_item_id = %order_item_id,
            item_workflow_id = %item_workflow_id,
            "订单行已关联批系"
        );
        Ok(link)
    }

    pub fn get_order(&self, ctx: &TenantContext, order_id: &str) -> ApiResult<Order> {
        let conn = lock_conn(&self.conn)?;
        order_repo::find_order_tx(&conn, ctx.tenant_id, order_id)?
            .ok_or_else(|| ApiError::not_found("Order", order_id))
    }

    /// 订单进度视图 (进度/交期/超期读时计算)
    pub fn get_order_progress(
        &self,
        ctx: &TenantContext,
        order_id: &str,
        today: NaiveDate,
    ) -> ApiResult<OrderProgressView> {
        let conn = lock_conn(&self.conn)?;
        let rollup = OrderRollup::new(read_config(&conn)?.default_expected_processing_days);
        let order = order_repo::find_order_tx(&conn, ctx.tenant_id, order_id)?
            .ok_or_else(|| ApiError::not_found("Order", order_id))?;
        let statuses = load_statuses(&conn, ctx, &order)?;
        Ok(rollup.build_view(&order, &statuses, today))
    }

    /// 租户下全部订单进度 (下单日倒序)
    pub fn list_order_progress(
        &self,
        ctx: &TenantContext,
        today: NaiveDate,
    ) -> ApiResult<Vec<OrderProgressView>> {
        let conn = lock_conn(&self.conn)?;
        let rollup = OrderRollup::new(read_config(&conn)?.default_expected_processing_days);
        let ids = order_repo::list_order_ids_tx(&conn, ctx.tenant_id)?;
        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(order) = order_repo::find_order_tx(&conn, ctx.tenant_id, &id)? {
                let statuses = load_statuses(&conn, ctx, &order)?;
                views.push(rollup.build_view(&order, &statuses, today));
            }
        }
        Ok(views)
    }

    /// 超期订单
    pub fn list_overdue_orders(
        &self,
        ctx: &TenantContext,
        today: NaiveDate,
    ) -> ApiResult<Vec<OrderProgressView>> {
        Ok(self
            .list_order_progress(ctx, today)?
            .into_iter()
            .filter(|v| v.is_overdue)
            .collect())
    }

    /// 取消订单 (已完成订单不可取消; 重复取消为空操作)
    pub fn cancel_order(&self, ctx: &TenantContext, order_id: &str) -> ApiResult<Order> {
        let now = now_ts();
        let order = with_write_tx(&self.conn, |tx| {
            let mut order = order_repo::find_order_tx(tx, ctx.tenant_id, order_id)?
                .ok_or_else(|| ApiError::not_found("Order", order_id))?;
            match order.status {
                OrderStatus::Cancelled => return Ok(order),
                OrderStatus::Completed => {
                    return Err(ApiError::InvalidTransition(format!(
                        "订单 {} 已完成, 不能取消",
                        order.id
                    )))
                }
                _ => {}
            }
            order_repo::update_order_status_tx(tx, ctx.tenant_id, order_id, OrderStatus::Cancelled, &fmt_ts(now))?;
            order.status = OrderStatus::Cancelled;
            order.updated_at = now;
            Ok(order)
        })?;

        info!(
            tenant_id = ctx.tenant_id,
            actor = ctx.actor_or_system(),
            order_id = %order.id,
            "订单已取消"
        );
        Ok(order)
    }

    /// 按关联流程重新推导订单状态
    pub fn refresh_order_status(&self, ctx: &TenantContext, order_id: &str) -> ApiResult<OrderStatus> {
        let now = now_ts();
        with_write_tx(&self.conn, |tx| sync_order_status_tx(tx, ctx, order_id, now))
    }
}

// ==========================================
// 事务内辅助
// ==========================================

fn load_statuses(
    conn: &Connection,
    ctx: &TenantContext,
    order: &Order,
) -> ApiResult<HashMap<String, WorkflowStatus>> {
    let ids: Vec<String> = order.workflow_links().map(|l| l.item_workflow_id.clone()).collect();
    Ok(item_workflow_repo::find_statuses_tx(conn, ctx.tenant_id, &ids)?)
}

fn sync_order_status_tx(
    tx: &Connection,
    ctx: &TenantContext,
    order_id: &str,
    now: NaiveDateTime,
) -> ApiResult<OrderStatus> {
    let order = order_repo::find_order_tx(tx, ctx.tenant_id, order_id)?
        .ok_or_else(|| ApiError::not_found("Order", order_id))?;
    let statuses = load_statuses(tx, ctx, &order)?;
    let derived = OrderRollup::default().derive_status(&order, &statuses);
    if derived != order.status {
        order_repo::update_order_status_tx(tx, ctx.tenant_id, order_id, derived, &fmt_ts(now))?;
        debug!(
            order_id = %order_id,
            from = %order.status,
            to = %derived,
            "订单状态已随批系推导更新"
        );
    }
    Ok(derived)
}

/// 批系状态变化后回写其关联订单的推导状态
pub(crate) fn sync_orders_for_workflow_tx(
    tx: &Connection,
    ctx: &TenantContext,
    item_workflow_id: &str,
    now: NaiveDateTime,
) -> ApiResult<()> {
    for order_id in order_repo::find_order_ids_by_workflow_tx(tx, ctx.tenant_id, item_workflow_id)? {
        sync_order_status_tx(tx, ctx, &order_id, now)?;
    }
    Ok(())
}

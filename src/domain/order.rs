// ==========================================
// 锻造生产追溯系统 - 订单领域模型
// ==========================================
// Order → OrderItem → OrderItemWorkflow → ItemWorkflow
// 进度 / 预计完工 / 超期 均为读时计算, 不落库
// ==========================================

use crate::domain::types::{OrderStatus, WorkType, WorkflowStatus};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

// ==========================================
// Order - 客户订单
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub tenant_id: i64,
    pub po_number: String,                      // 客户采购单号
    pub order_date: NaiveDate,
    pub expected_processing_days: Option<u32>,  // 系统估算加工天数
    pub user_defined_eta_days: Option<u32>,     // 人工指定交期天数 (优先)
    pub status: OrderStatus,
    pub items: Vec<OrderItem>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Order {
    /// 全部关联流程
    pub fn workflow_links(&self) -> impl Iterator<Item = &OrderItemWorkflow> {
        self.items.iter().flat_map(|i| i.workflows.iter())
    }
}

// ==========================================
// OrderItem - 订单行
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub item_id: String,
    pub quantity: u32,
    pub unit_price: f64,
    pub material_cost_per_unit: Option<f64>,
    pub work_type: WorkType,
    pub workflows: Vec<OrderItemWorkflow>,
}

impl OrderItem {
    pub fn total_price(&self) -> f64 {
        self.quantity as f64 * self.unit_price
    }
}

// ==========================================
// OrderItemWorkflow - 订单行与流程实例关联
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItemWorkflow {
    pub id: String,
    pub order_item_id: String,
    pub item_workflow_id: String,
    pub created_at: NaiveDateTime,
}

// ==========================================
// 订单进度视图 (读时计算)
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderProgressView {
    pub order_id: String,
    pub po_number: String,
    pub status: OrderStatus,
    pub total_workflows: usize,
    pub completed_workflows: usize,
    pub progress_percentage: f64,
    pub eta_days: u32,
    pub expected_completion_date: NaiveDate,
    pub is_overdue: bool,
    pub total_value: f64,
    pub items: Vec<OrderItemProgress>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderItemProgress {
    pub order_item_id: String,
    pub item_id: String,
    pub workflow_statuses: Vec<(String, WorkflowStatus)>,
    pub progress_percentage: f64,
}

// ==========================================
// 锻造生产追溯系统 - 订单进度汇总
// ==========================================
// 纯汇总, 无独立状态; 每次读取时由子流程状态重新计算
// ==========================================
// 进度 = 已完工关联流程数 / 关联流程总数 * 100 (无关联为 0)
// 交期天数 = 人工交期天数 ?? 估算加工天数 ?? 默认天数
// 预计完工日 = 下单日 + 交期天数
// 超期 = 预计完工日 < 今天 且 订单未终结
// ==========================================

use crate::domain::order::{Order, OrderItemProgress, OrderProgressView};
use crate::domain::types::{OrderStatus, WorkflowStatus};
use crate::engine::piece_ledger::percentage;
use chrono::{Duration, NaiveDate};
use std::collections::HashMap;

pub struct OrderRollup {
    default_expected_processing_days: u32,
}

impl OrderRollup {
    pub fn new(default_expected_processing_days: u32) -> Self {
        Self {
            default_expected_processing_days,
        }
    }

    /// 订单进度 (百分比)
    ///
    /// `statuses`: item_workflow_id → 流程状态; 缺失的流程按未完工计
    pub fn progress(&self, order: &Order, statuses: &HashMap<String, WorkflowStatus>) -> f64 {
        let (completed, total) = count_completed(order.workflow_links().map(|l| &l.item_workflow_id), statuses);
        percentage(completed as u64, total as u64)
    }

    pub fn calculate_expected_eta(&self, order: &Order) -> u32 {
        order
            .user_defined_eta_days
            .or(order.expected_processing_days)
            .unwrap_or(self.default_expected_processing_days)
    }

    pub fn expected_completion_date(&self, order: &Order) -> NaiveDate {
        order.order_date + Duration::days(self.calculate_expected_eta(order) as i64)
    }

    pub fn is_overdue(&self, order: &Order, today: NaiveDate) -> bool {
        self.expected_completion_date(order) < today && !order.status.is_terminal()
    }

    pub fn total_value(&self, order: &Order) -> f64 {
        order.items.iter().map(|i| i.total_price()).sum()
    }

    /// 由关联流程状态推导订单状态
    ///
    /// - 终态 (COMPLETED / CANCELLED) 不被覆盖
    /// - 全部关联流程完工 → COMPLETED
    /// - 任一流程已开始 → IN_PROGRESS
    pub fn derive_status(&self, order: &Order, statuses: &HashMap<String, WorkflowStatus>) -> OrderStatus {
        if order.status.is_terminal() {
            return order.status;
        }
        let (completed, total) = count_completed(order.workflow_links().map(|l| &l.item_workflow_id), statuses);
        if total > 0 && completed == total {
            return OrderStatus::Completed;
        }
        let started = order.workflow_links().any(|l| {
            matches!(
                statuses.get(&l.item_workflow_id),
                Some(WorkflowStatus::InProgress) | Some(WorkflowStatus::Completed)
            )
        });
        if started {
            OrderStatus::InProgress
        } else {
            order.status
        }
    }

    /// 组装订单进度视图
    pub fn build_view(
        &self,
        order: &Order,
        statuses: &HashMap<String, WorkflowStatus>,
        today: NaiveDate,
    ) -> OrderProgressView {
        let items = order
            .items
            .iter()
            .map(|item| {
                let workflow_statuses: Vec<(String, WorkflowStatus)> = item
                    .workflows
                    .iter()
                    .map(|w| {
                        let status = statuses
                            .get(&w.item_workflow_id)
                            .copied()
                            .unwrap_or(WorkflowStatus::NotStarted);
                        (w.item_workflow_id.clone(), status)
                    })
                    .collect();
                let (completed, total) =
                    count_completed(item.workflows.iter().map(|w| &w.item_workflow_id), statuses);
                OrderItemProgress {
                    order_item_id: item.id.clone(),
                    item_id: item.item_id.clone(),
                    workflow_statuses,
                    progress_percentage: percentage(completed as u64, total as u64),
                }
            })
            .collect();

        let (completed_workflows, total_workflows) =
            count_completed(order.workflow_links().map(|l| &l.item_workflow_id), statuses);

        OrderProgressView {
            order_id: order.id.clone(),
            po_number: order.po_number.clone(),
            status: order.status,
            total_workflows,
            completed_workflows,
            progress_percentage: percentage(completed_workflows as u64, total_workflows as u64),
            eta_days: self.calculate_expected_eta(order),
            expected_completion_date: self.expected_completion_date(order),
            is_overdue: self.is_overdue(order, today),
            total_value: self.total_value(order),
            items,
        }
    }
}

impl Default for OrderRollup {
    fn default() -> Self {
        Self::new(14)
    }
}

fn count_completed<'a>(
    ids: impl Iterator<Item = &'a String>,
    statuses: &HashMap<String, WorkflowStatus>,
) -> (usize, usize) {
    let mut total = 0;
    let mut completed = 0;
    for id in ids {
        total += 1;
        if statuses.get(id) == Some(&WorkflowStatus::Completed) {
            completed += 1;
        }
    }
    (completed, total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::order::{OrderItem, OrderItemWorkflow};
    use crate::domain::types::WorkType;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn order(links: &[&str]) -> Order {
        let ts = d(2025, 3, 1).and_hms_opt(8, 0, 0).unwrap();
        Order {
            id: "o1".to_string(),
            tenant_id: 1,
            po_number: "PO-001".to_string(),
            order_date: d(2025, 3, 1),
            expected_processing_days: Some(20),
            user_defined_eta_days: None,
            status: OrderStatus::Received,
            items: vec![OrderItem {
                id: "oi1".to_string(),
                order_id: "o1".to_string(),
                item_id: "flange".to_string(),
                quantity: 100,
                unit_price: 12.5,
                material_cost_per_unit: None,
                work_type: WorkType::WithMaterial,
                workflows: links
                    .iter()
                    .map(|id| OrderItemWorkflow {
                        id: format!("oiw-{}", id),
                        order_item_id: "oi1".to_string(),
                        item_workflow_id: id.to_string(),
                        created_at: ts,
                    })
                    .collect(),
            }],
            created_at: ts,
            updated_at: ts,
        }
    }

    #[test]
    fn test_progress_without_links_is_zero() {
        let rollup = OrderRollup::default();
        assert_eq!(rollup.progress(&order(&[]), &HashMap::new()), 0.0);
    }

    #[test]
    fn test_progress_counts_completed_joins() {
        let rollup = OrderRollup::default();
        let statuses = HashMap::from([
            ("w1".to_string(), WorkflowStatus::Completed),
            ("w2".to_string(), WorkflowStatus::InProgress),
            ("w3".to_string(), WorkflowStatus::Completed),
            ("w4".to_string(), WorkflowStatus::NotStarted),
        ]);
        assert_eq!(rollup.progress(&order(&["w1", "w2", "w3", "w4"]), &statuses), 50.0);
    }

    #[test]
    fn test_user_defined_eta_takes_precedence() {
        let rollup = OrderRollup::default();
        let mut o = order(&[]);
        assert_eq!(rollup.calculate_expected_eta(&o), 20);
        o.user_defined_eta_days = Some(10);
        assert_eq!(rollup.calculate_expected_eta(&o), 10);
        assert_eq!(rollup.expected_completion_date(&o), d(2025, 3, 11));
        o.user_defined_eta_days = None;
        o.expected_processing_days = None;
        assert_eq!(rollup.calculate_expected_eta(&o), 14);
    }

    #[test]
    fn test_overdue_excludes_terminal_orders() {
        let rollup = OrderRollup::default();
        let mut o = order(&[]);
        // 预计完工 2025-03-21
        assert!(!rollup.is_overdue(&o, d(2025, 3, 21)));
        assert!(rollup.is_overdue(&o, d(2025, 3, 22)));
        o.status = OrderStatus::Cancelled;
        assert!(!rollup.is_overdue(&o, d(2025, 3, 22)));
    }

    #[test]
    fn test_derived_status_follows_workflows() {
        let rollup = OrderRollup::default();
        let o = order(&["w1", "w2"]);
        let mut statuses = HashMap::from([
            ("w1".to_string(), WorkflowStatus::NotStarted),
            ("w2".to_string(), WorkflowStatus::NotStarted),
        ]);
        assert_eq!(rollup.derive_status(&o, &statuses), OrderStatus::Received);
        statuses.insert("w1".to_string(), WorkflowStatus::InProgress);
        assert_eq!(rollup.derive_status(&o, &statuses), OrderStatus::InProgress);
        statuses.insert("w1".to_string(), WorkflowStatus::Completed);
        statuses.insert("w2".to_string(), WorkflowStatus::Completed);
        assert_eq!(rollup.derive_status(&o, &statuses), OrderStatus::Completed);

        let mut cancelled = o.clone();
        cancelled.status = OrderStatus::Cancelled;
        assert_eq!(rollup.derive_status(&cancelled, &statuses), OrderStatus::Cancelled);
    }

    #[test]
    fn test_view_totals() {
        let rollup = OrderRollup::default();
        let statuses = HashMap::from([("w1".to_string(), WorkflowStatus::Completed)]);
        let view = rollup.build_view(&order(&["w1", "w2"]), &statuses, d(2025, 3, 5));
        assert_eq!(view.total_workflows, 2);
        assert_eq!(view.completed_workflows, 1);
        assert_eq!(view.progress_percentage, 50.0);
        assert_eq!(view.total_value, 1250.0);
        assert!(!view.is_overdue);
        assert_eq!(view.items[0].workflow_statuses[1].1, WorkflowStatus::NotStarted);
    }
}

// ==========================================
// 锻造生产追溯系统 - 兄弟节点排序与步骤树
// ==========================================
// 排序键 (确定性, 与输入顺序无关):
//   1. tree_level 升序
//   2. operation_type 名称字典序
//   3. created_at 升序
//   4. 模板节点 id 字典序 (仅在前三键全部相同时生效;
//      实例步骤取所属模板节点 id, 不受随机 UUID 影响)
// ==========================================

use crate::domain::template::WorkflowStep;
use crate::domain::types::OperationType;
use crate::domain::workflow::{ItemWorkflow, ItemWorkflowStep, StepTreeNode};
use chrono::NaiveDateTime;
use std::cmp::Ordering;

/// 可参与兄弟排序的树节点
pub trait SiblingKey {
    fn tree_level(&self) -> u32;
    fn operation_type(&self) -> OperationType;
    fn created_at(&self) -> NaiveDateTime;
    fn node_id(&self) -> &str;
}

impl SiblingKey for WorkflowStep {
    fn tree_level(&self) -> u32 {
        self.tree_level
    }
    fn operation_type(&self) -> OperationType {
        self.operation_type
    }
    fn created_at(&self) -> NaiveDateTime {
        self.created_at
    }
    fn node_id(&self) -> &str {
        &self.id
    }
}

impl SiblingKey for ItemWorkflowStep {
    fn tree_level(&self) -> u32 {
        self.tree_level
    }
    fn operation_type(&self) -> OperationType {
        self.operation_type
    }
    fn created_at(&self) -> NaiveDateTime {
        self.created_at
    }
    fn node_id(&self) -> &str {
        &self.workflow_step_id
    }
}

/// 兄弟节点比较
pub fn compare_siblings<T: SiblingKey + ?Sized>(a: &T, b: &T) -> Ordering {
    a.tree_level()
        .cmp(&b.tree_level())
        .then_with(|| a.operation_type().as_str().cmp(b.operation_type().as_str()))
        .then_with(|| a.created_at().cmp(&b.created_at()))
        .then_with(|| a.node_id().cmp(b.node_id()))
}

/// 对兄弟节点原地排序
pub fn sort_siblings<T: SiblingKey>(nodes: &mut [T]) {
    nodes.sort_by(|a, b| compare_siblings(a, b));
}

/// 对兄弟节点引用排序
pub fn sort_sibling_refs<T: SiblingKey>(nodes: &mut [&T]) {
    nodes.sort_by(|a, b| compare_siblings(*a, *b));
}

/// 流程步骤的确定性前序遍历 (根 → 按序子树)
pub fn ordered_steps(workflow: &ItemWorkflow) -> Vec<&ItemWorkflowStep> {
    let mut out = Vec::with_capacity(workflow.steps.len());
    let mut roots: Vec<&ItemWorkflowStep> = workflow
        .steps
        .iter()
        .filter(|s| s.parent_item_workflow_step_id.is_none())
        .collect();
    sort_sibling_refs(&mut roots);
    for root in roots {
        collect_preorder(workflow, root, &mut out);
    }
    out
}

fn collect_preorder<'a>(
    workflow: &'a ItemWorkflow,
    step: &'a ItemWorkflowStep,
    out: &mut Vec<&'a ItemWorkflowStep>,
) {
    out.push(step);
    let mut children: Vec<&ItemWorkflowStep> = workflow.children_of(&step.id).collect();
    sort_sibling_refs(&mut children);
    for child in children {
        collect_preorder(workflow, child, out);
    }
}

/// 构建有序步骤树 (getStepTree)
pub fn build_step_tree(workflow: &ItemWorkflow) -> Vec<StepTreeNode> {
    let mut roots: Vec<&ItemWorkflowStep> = workflow
        .steps
        .iter()
        .filter(|s| s.parent_item_workflow_step_id.is_none())
        .collect();
    sort_sibling_refs(&mut roots);
    roots.into_iter().map(|r| build_node(workflow, r)).collect()
}

fn build_node(workflow: &ItemWorkflow, step: &ItemWorkflowStep) -> StepTreeNode {
    let mut children: Vec<&ItemWorkflowStep> = workflow.children_of(&step.id).collect();
    sort_sibling_refs(&mut children);

    StepTreeNode {
        step_id: step.id.clone(),
        operation_type: step.operation_type,
        step_status: step.step_status,
        tree_level: step.tree_level,
        is_optional: step.is_optional,
        started_at: step.started_at,
        completed_at: step.completed_at,
        operation_reference_id: step.operation_reference_id.clone(),
        initial_pieces_count: step.initial_pieces_count,
        pieces_available_for_next: step.pieces_available_for_next,
        consumed_pieces_count: step.consumed_pieces_count,
        rejected_pieces_count: step.rejected_pieces_count,
        rework_pieces_count: step.rework_pieces_count,
        pieces_utilization_percentage: step.pieces_utilization_percentage,
        children: children.into_iter().map(|c| build_node(workflow, c)).collect(),
    }
}

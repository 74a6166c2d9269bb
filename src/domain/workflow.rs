// ==========================================
// 锻造生产追溯系统 - 工艺流程实例领域模型
// ==========================================
// ItemWorkflow: 一个生产批系 (lineage) 的完整追溯链
// ItemWorkflowStep: 模板节点在该批系上的实例, 记录件数与关联的工序实体
// ==========================================
// 件数不变量:
//   0 ≤ consumed ≤ initial
//   available = initial - consumed - rejected - rework
// ==========================================

use crate::domain::types::{OperationEntityType, OperationType, StepStatus, WorkflowStatus};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// ItemWorkflow - 工艺流程实例
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemWorkflow {
    pub id: String,
    pub tenant_id: i64,
    pub workflow_identifier: String,        // 外部追溯号 (租户内唯一)
    pub item_id: String,                    // 零件ID
    pub workflow_template_id: String,       // 来源模板
    pub workflow_status: WorkflowStatus,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub steps: Vec<ItemWorkflowStep>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ItemWorkflow {
    pub fn find_step(&self, step_id: &str) -> Option<&ItemWorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    pub fn find_step_mut(&mut self, step_id: &str) -> Option<&mut ItemWorkflowStep> {
        self.steps.iter_mut().find(|s| s.id == step_id)
    }

    /// 直接子节点
    pub fn children_of<'a>(&'a self, step_id: &'a str) -> impl Iterator<Item = &'a ItemWorkflowStep> + 'a {
        self.steps
            .iter()
            .filter(move |s| s.parent_item_workflow_step_id.as_deref() == Some(step_id))
    }

    pub fn is_leaf(&self, step_id: &str) -> bool {
        self.children_of(step_id).next().is_none()
    }

    pub fn root_step(&self) -> Option<&ItemWorkflowStep> {
        self.steps
            .iter()
            .find(|s| s.parent_item_workflow_step_id.is_none())
    }

    /// 按工序实体ID查找关联步骤 (主实体或 related_entity_ids)
    pub fn step_for_entity(&self, entity_id: &str) -> Option<&ItemWorkflowStep> {
        self.steps.iter().find(|s| s.references_entity(entity_id))
    }

    pub fn is_completed(&self) -> bool {
        self.workflow_status == WorkflowStatus::Completed
    }
}

// ==========================================
// ItemWorkflowStep - 工序步骤实例
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemWorkflowStep {
    pub id: String,
    pub item_workflow_id: String,
    pub workflow_step_id: String,                     // 模板节点
    pub parent_item_workflow_step_id: Option<String>, // 镜像模板父节点
    pub tree_level: u32,
    pub operation_type: OperationType,
    pub is_optional: bool,
    pub step_status: StepStatus,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub operation_reference_id: Option<String>,       // 主工序实体ID
    pub operation_outcome: Option<OperationOutcome>,  // 工序结果摘要
    pub related_entity_ids: Vec<String>,              // 同一步骤下的其它实体 (如多个日机加工批)

    // ===== 件数 =====
    pub initial_pieces_count: u32,
    pub pieces_available_for_next: u32,
    pub consumed_pieces_count: u32,
    pub rejected_pieces_count: u32,
    pub rework_pieces_count: u32,
    /// 件数利用率, 百分制 0..=100 (consumed / initial * 100, 非 0..1 小数);
    /// initial 为 0 时取 0
    pub pieces_utilization_percentage: f64,

    pub notes: Option<String>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl ItemWorkflowStep {
    /// 是否关联了指定工序实体
    pub fn references_entity(&self, entity_id: &str) -> bool {
        self.operation_reference_id.as_deref() == Some(entity_id)
            || self.related_entity_ids.iter().any(|id| id == entity_id)
    }

    /// 所有关联的工序实体ID (主实体在前)
    pub fn linked_entity_ids(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.related_entity_ids.len() + 1);
        if let Some(primary) = &self.operation_reference_id {
            ids.push(primary.clone());
        }
        for id in &self.related_entity_ids {
            if !ids.contains(id) {
                ids.push(id.clone());
            }
        }
        ids
    }

    /// 件数不变量校验
    pub fn piece_invariant_holds(&self) -> bool {
        let removed = self.consumed_pieces_count as u64
            + self.rejected_pieces_count as u64
            + self.rework_pieces_count as u64;
        self.consumed_pieces_count <= self.initial_pieces_count
            && removed + self.pieces_available_for_next as u64 == self.initial_pieces_count as u64
    }

    pub fn has_piece_counts(&self) -> bool {
        self.initial_pieces_count > 0
            || self.pieces_available_for_next > 0
            || self.consumed_pieces_count > 0
            || self.rejected_pieces_count > 0
            || self.rework_pieces_count > 0
    }
}

// ==========================================
// OperationOutcome - 工序结果摘要 (标签联合)
// ==========================================
// 判别键 operationEntityType: FORGE → 锻造结果; BATCH → 批次结果列表
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "operationEntityType", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationOutcome {
    #[serde(rename = "FORGE")]
    Forging(ForgingOutcome),
    Batch(Vec<BatchOutcome>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgingOutcome {
    pub forge_id: String,
    pub forge_traceability_number: String,
    pub actual_forge_count: u32,
    pub rejected_forge_pieces_count: u32,
    pub available_forge_pieces_count_for_heat: u32,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutcome {
    pub entity_id: String,
    pub entity_type: OperationEntityType,
    pub batch_number: String,
    pub initial_pieces_count: u32,
    pub rejected_pieces_count: u32,
    pub rework_pieces_count: u32,
    pub pieces_available_for_next: u32,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

impl OperationOutcome {
    pub fn entity_ids(&self) -> Vec<&str> {
        match self {
            OperationOutcome::Forging(f) => vec![f.forge_id.as_str()],
            OperationOutcome::Batch(list) => list.iter().map(|b| b.entity_id.as_str()).collect(),
        }
    }
}

// ==========================================
// 对外视图 (订单管理 / 追溯展示)
// ==========================================

/// 流程状态摘要
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStatusView {
    pub item_workflow_id: String,
    pub workflow_identifier: String,
    pub status: WorkflowStatus,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
}

impl From<&ItemWorkflow> for WorkflowStatusView {
    fn from(wf: &ItemWorkflow) -> Self {
        Self {
            item_workflow_id: wf.id.clone(),
            workflow_identifier: wf.workflow_identifier.clone(),
            status: wf.workflow_status,
            started_at: wf.started_at,
            completed_at: wf.completed_at,
        }
    }
}

/// 有序步骤树节点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepTreeNode {
    pub step_id: String,
    pub operation_type: OperationType,
    pub step_status: StepStatus,
    pub tree_level: u32,
    pub is_optional: bool,
    pub started_at: Option<NaiveDateTime>,
    pub completed_at: Option<NaiveDateTime>,
    pub operation_reference_id: Option<String>,
    pub initial_pieces_count: u32,
    pub pieces_available_for_next: u32,
    pub consumed_pieces_count: u32,
    pub rejected_pieces_count: u32,
    pub rework_pieces_count: u32,
    pub pieces_utilization_percentage: f64, // 百分制 0..=100
    pub children: Vec<StepTreeNode>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 1)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    #[test]
    fn test_outcome_serializes_with_entity_type_tag() {
        let outcome = OperationOutcome::Forging(ForgingOutcome {
            forge_id: "f1".to_string(),
            forge_traceability_number: "FT-001".to_string(),
            actual_forge_count: 100,
            rejected_forge_pieces_count: 5,
            available_forge_pieces_count_for_heat: 95,
            started_at: Some(ts()),
            completed_at: None,
        });

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["operationEntityType"], "FORGE");
        assert_eq!(json["data"]["actualForgeCount"], 100);

        let back: OperationOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn test_batch_outcome_tag() {
        let outcome = OperationOutcome::Batch(vec![]);
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["operationEntityType"], "BATCH");
    }
}

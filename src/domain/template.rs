// ==========================================
// 锻造生产追溯系统 - 工艺模板领域模型
// ==========================================
// 模板是一棵工序树: 根节点必须为 FORGING, tree_level = parent.tree_level + 1
// 模板一旦被在制流程引用即不可修改 (新版本 = 新模板)
// ==========================================

use crate::domain::types::OperationType;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

// ==========================================
// WorkflowTemplate - 工艺模板
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,                  // 模板ID
    pub tenant_id: i64,              // 所属租户
    pub name: String,                // 模板名称
    pub description: Option<String>, // 描述
    pub is_default: bool,            // 是否为租户默认模板
    pub steps: Vec<WorkflowStep>,    // 工序节点 (扁平存储, parent_step_id 表达树形)
    pub created_at: NaiveDateTime,
}

impl WorkflowTemplate {
    pub fn find_step(&self, step_id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

// ==========================================
// WorkflowStep - 模板工序节点
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,                     // 节点ID
    pub template_id: String,            // 所属模板
    pub operation_type: OperationType,  // 工序类型
    pub step_name: String,              // 显示名称
    pub parent_step_id: Option<String>, // 父节点 (仅根节点为空)
    pub tree_level: u32,                // 树层级 (根 = 0)
    pub is_optional: bool,              // 可选工序
    pub is_parallel: bool,              // 与同层兄弟无严格先后
    pub created_at: NaiveDateTime,
}

impl WorkflowStep {
    pub fn is_root(&self) -> bool {
        self.parent_step_id.is_none()
    }
}

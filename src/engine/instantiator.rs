// ==========================================
// 锻造生产追溯系统 - 工艺流程实例化
// ==========================================
// 职责: 按已解析模板为一个批系创建 ItemWorkflow 及全部步骤实例
// 规则:
// - 每个模板节点生成一个 PENDING 步骤, 件数全为 0
// - 父子关系与 tree_level 完全镜像模板
// - 每次调用都生成独立批系 (不做幂等)
// ==========================================

use crate::domain::tenant::TenantContext;
use crate::domain::types::{StepStatus, WorkflowStatus};
use crate::domain::workflow::{ItemWorkflow, ItemWorkflowStep};
use crate::engine::error::{LedgerError, LedgerResult};
use crate::engine::template_resolver::ResolvedTemplate;
use chrono::NaiveDateTime;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

/// 流程实例化器
pub struct WorkflowInstantiator {}

impl WorkflowInstantiator {
    pub fn new() -> Self {
        Self {}
    }

    /// 生成全局唯一追溯号
    pub fn generate_workflow_identifier() -> String {
        format!("WF-{}", Uuid::new_v4().simple().to_string().to_uppercase())
    }

    /// 实例化
    ///
    /// # 参数
    /// - `ctx`: 租户上下文 (模板必须属于同一租户)
    /// - `item_id`: 零件ID
    /// - `template`: 已解析模板
    /// - `now`: 创建时间
    pub fn instantiate(
        &self,
        ctx: &TenantContext,
        item_id: &str,
        template: &ResolvedTemplate,
        now: NaiveDateTime,
    ) -> LedgerResult<ItemWorkflow> {
        if template.tenant_id != ctx.tenant_id {
            return Err(LedgerError::not_found("WorkflowTemplate", &template.template_id));
        }
        if item_id.trim().is_empty() {
            return Err(LedgerError::Validation("item_id 不能为空".to_string()));
        }

        let workflow_id = Uuid::new_v4().to_string();

        // 模板节点ID → 实例步骤ID
        let mut instance_ids: HashMap<&str, String> = HashMap::with_capacity(template.len());
        let mut steps = Vec::with_capacity(template.len());

        // 层序保证父节点先于子节点出现
        for node in template.nodes() {
            let step_id = Uuid::new_v4().to_string();
            let parent_instance_id = match node.parent_step_id.as_deref() {
                Some(parent) => Some(instance_ids.get(parent).cloned().ok_or_else(|| {
                    LedgerError::invalid_template(
                        &template.template_id,
                        format!("节点 {} 的父节点未先行实例化", node.id),
                    )
                })?),
                None => None,
            };
            instance_ids.insert(node.id.as_str(), step_id.clone());

            steps.push(ItemWorkflowStep {
                id: step_id,
                item_workflow_id: workflow_id.clone(),
                workflow_step_id: node.id.clone(),
                parent_item_workflow_step_id: parent_instance_id,
                tree_level: node.tree_level,
                operation_type: node.operation_type,
                is_optional: node.is_optional,
                step_status: StepStatus::Pending,
                started_at: None,
                completed_at: None,
                operation_reference_id: None,
                operation_outcome: None,
                related_entity_ids: Vec::new(),
                initial_pieces_count: 0,
                pieces_available_for_next: 0,
                consumed_pieces_count: 0,
                rejected_pieces_count: 0,
                rework_pieces_count: 0,
                pieces_utilization_percentage: 0.0,
                notes: None,
                // 沿用模板节点创建时间, 同一模板的各批系兄弟顺序一致
                created_at: node.created_at,
                updated_at: now,
            });
        }

        let workflow = ItemWorkflow {
            id: workflow_id,
            tenant_id: ctx.tenant_id,
            workflow_identifier: Self::generate_workflow_identifier(),
            item_id: item_id.to_string(),
            workflow_template_id: template.template_id.clone(),
            workflow_status: WorkflowStatus::NotStarted,
            started_at: None,
            completed_at: None,
            steps,
            created_at: now,
            updated_at: now,
        };

        info!(
            tenant_id = ctx.tenant_id,
            item_workflow_id = %workflow.id,
            workflow_identifier = %workflow.workflow_identifier,
            template_id = %template.template_id,
            step_count = workflow.steps.len(),
            "工艺流程实例已创建"
        );

        Ok(workflow)
    }
}

impl Default for WorkflowInstantiator {
    fn default() -> Self {
        Self::new()
    }
}

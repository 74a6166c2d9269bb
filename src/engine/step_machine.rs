// ==========================================
// 锻造生产追溯系统 - 步骤状态机
// ==========================================
// 步骤: PENDING → IN_PROGRESS → COMPLETED (不可回退, 不可跳过)
// 流程: NOT_STARTED → IN_PROGRESS → COMPLETED
// ==========================================
// 激活: 工序实体创建并通过 operation_reference_id 关联时触发
// 完工: 显式完工请求触发, 附带 {step_id → completed_at}
// 红线: 完工请求整体校验通过后才落到流程上 (全有或全无)
// ==========================================

use crate::domain::types::{OperationType, StepStatus, WorkflowStatus};
use crate::domain::workflow::ItemWorkflow;
use crate::engine::error::{LedgerError, LedgerResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, info, warn};

// ==========================================
// 请求与结果
// ==========================================

/// 关联结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkResult {
    pub step_activated: bool,   // 本次触发 PENDING → IN_PROGRESS
    pub workflow_started: bool, // 本次触发 NOT_STARTED → IN_PROGRESS
}

/// 完工请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionRequest {
    /// 流程完工时间 (流程满足完工条件时使用)
    pub completed_at: NaiveDateTime,
    /// 步骤完工时间
    pub step_completions: BTreeMap<String, NaiveDateTime>,
    /// 要求本次请求必须使流程完工
    pub require_workflow_completion: bool,
}

/// 完工结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionResult {
    pub completed_step_ids: Vec<String>,
    pub workflow_completed: bool,
}

// ==========================================
// StepStateMachine
// ==========================================
pub struct StepStateMachine {
    require_upstream_activation: bool,
}

impl StepStateMachine {
    pub fn new(require_upstream_activation: bool) -> Self {
        Self {
            require_upstream_activation,
        }
    }

    // ==========================================
    // 激活 / 关联
    // ==========================================

    /// 将工序实体关联到步骤
    ///
    /// # 规则
    /// - PENDING: 迁移至 IN_PROGRESS, 记录 started_at 与 operation_reference_id
    /// - IN_PROGRESS: 追加到 related_entity_ids (锻造步骤只允许一个锻造实体)
    /// - COMPLETED: 拒绝
    /// - 流程首次激活时同步迁移流程状态
    pub fn link_operation(
        &self,
        workflow: &mut ItemWorkflow,
        step_id: &str,
        entity_id: &str,
        now: NaiveDateTime,
    ) -> LedgerResult<LinkResult> {
        if workflow.workflow_status == WorkflowStatus::Completed {
            return Err(LedgerError::InvalidTransition {
                entity: "ItemWorkflow".to_string(),
                id: workflow.id.clone(),
                from: WorkflowStatus::Completed.to_string(),
                to: WorkflowStatus::InProgress.to_string(),
                reason: "流程已完工, 不能再关联工序实体".to_string(),
            });
        }

        let step = workflow
            .find_step(step_id)
            .ok_or_else(|| LedgerError::not_found("ItemWorkflowStep", step_id))?;

        match step.step_status {
            StepStatus::Completed => {
                return Err(step_transition_error(
                    step_id,
                    StepStatus::Completed,
                    StepStatus::InProgress,
                    "步骤已完工",
                ));
            }
            StepStatus::InProgress => {
                if step.references_entity(entity_id) {
                    return Ok(LinkResult {
                        step_activated: false,
                        workflow_started: false,
                    });
                }
                if step.operation_type == OperationType::Forging {
                    return Err(step_transition_error(
                        step_id,
                        StepStatus::InProgress,
                        StepStatus::InProgress,
                        "一个批系只能关联一个锻造实体",
                    ));
                }
                let step = workflow
                    .find_step_mut(step_id)
                    .ok_or_else(|| LedgerError::not_found("ItemWorkflowStep", step_id))?;
                step.related_entity_ids.push(entity_id.to_string());
                step.updated_at = now;
                debug!(
                    item_workflow_id = %step.item_workflow_id,
                    step_id = %step_id,
                    entity_id = %entity_id,
                    "工序实体追加关联到进行中步骤"
                );
                return Ok(LinkResult {
                    step_activated: false,
                    workflow_started: false,
                });
            }
            StepStatus::Pending => {}
        }

        if self.require_upstream_activation {
            self.check_upstream_activated(workflow, step_id)?;
        }

        let step = workflow
            .find_step_mut(step_id)
            .ok_or_else(|| LedgerError::not_found("ItemWorkflowStep", step_id))?;
        step.step_status = StepStatus::InProgress;
        step.started_at = Some(now);
        step.operation_reference_id = Some(entity_id.to_string());
        step.updated_at = now;

        let mut workflow_started = false;
        if workflow.workflow_status == WorkflowStatus::NotStarted {
            workflow.workflow_status = WorkflowStatus::InProgress;
            workflow.started_at = Some(now);
            workflow_started = true;
        }
        workflow.updated_at = now;

        info!(
            item_workflow_id = %workflow.id,
            step_id = %step_id,
            entity_id = %entity_id,
            workflow_started,
            "步骤已激活"
        );

        Ok(LinkResult {
            step_activated: true,
            workflow_started,
        })
    }

    /// 所有非可选祖先必须已激活
    fn check_upstream_activated(&self, workflow: &ItemWorkflow, step_id: &str) -> LedgerResult<()> {
        let mut cursor = workflow
            .find_step(step_id)
            .and_then(|s| s.parent_item_workflow_step_id.clone());
        let mut guard = 0usize;

        while let Some(parent_id) = cursor {
            guard += 1;
            if guard > workflow.steps.len() {
                return Err(LedgerError::Validation(format!(
                    "流程 {} 的步骤祖先链存在环",
                    workflow.id
                )));
            }
            let parent = workflow
                .find_step(&parent_id)
                .ok_or_else(|| LedgerError::not_found("ItemWorkflowStep", &parent_id))?;
            if !parent.step_status.is_activated() && !parent.is_optional {
                return Err(step_transition_error(
                    step_id,
                    StepStatus::Pending,
                    StepStatus::InProgress,
                    &format!("上游必经步骤 {}({}) 尚未开始", parent.id, parent.operation_type),
                ));
            }
            cursor = parent.parent_item_workflow_step_id.clone();
        }
        Ok(())
    }

    // ==========================================
    // 完工
    // ==========================================

    /// 执行完工请求
    ///
    /// # 参数
    /// - `batch_completions`: step_id → 关联工序实体的最晚完工时间
    ///   (None 表示仍有关联实体未完工)
    ///
    /// # 校验
    /// - 步骤必须处于 IN_PROGRESS
    /// - 步骤完工时间不得早于其工序实体完工时间、不得早于步骤开始时间
    /// - 流程完工时间不得早于任一步骤完工时间
    /// - 流程完工要求必经末端全部完工, 且没有进行中的步骤
    pub fn complete(
        &self,
        workflow: &mut ItemWorkflow,
        request: &CompletionRequest,
        batch_completions: &HashMap<String, Option<NaiveDateTime>>,
        now: NaiveDateTime,
    ) -> LedgerResult<CompletionResult> {
        if workflow.workflow_status == WorkflowStatus::Completed {
            return Err(LedgerError::InvalidTransition {
                entity: "ItemWorkflow".to_string(),
                id: workflow.id.clone(),
                from: WorkflowStatus::Completed.to_string(),
                to: WorkflowStatus::Completed.to_string(),
                reason: "流程已完工".to_string(),
            });
        }

        // 在草稿上执行, 全部通过后整体替换
        let mut draft = workflow.clone();
        let mut completed_step_ids = Vec::with_capacity(request.step_completions.len());

        for (step_id, completed_at) in &request.step_completions {
            let step = draft
                .find_step_mut(step_id)
                .ok_or_else(|| LedgerError::not_found("ItemWorkflowStep", step_id))?;

            if !step.step_status.can_transition_to(StepStatus::Completed) {
                return Err(step_transition_error(
                    step_id,
                    step.step_status,
                    StepStatus::Completed,
                    "只有进行中的步骤可以完工",
                ));
            }

            let batch_completed_at = batch_completions
                .get(step_id)
                .copied()
                .flatten()
                .ok_or_else(|| {
                    step_transition_error(
                        step_id,
                        StepStatus::InProgress,
                        StepStatus::Completed,
                        "关联的工序实体尚未完工",
                    )
                })?;

            if *completed_at < batch_completed_at {
                return Err(completion_time_error(
                    "ItemWorkflowStep",
                    step_id,
                    *completed_at,
                    "batch_completed_at",
                    batch_completed_at,
                ));
            }
            if let Some(started_at) = step.started_at {
                if *completed_at < started_at {
                    return Err(completion_time_error(
                        "ItemWorkflowStep",
                        step_id,
                        *completed_at,
                        "started_at",
                        started_at,
                    ));
                }
            }

            step.step_status = StepStatus::Completed;
            step.completed_at = Some(*completed_at);
            step.updated_at = now;
            completed_step_ids.push(step_id.clone());
        }

        let open_steps = self.open_steps(&draft);
        let workflow_completed = if open_steps.is_empty() && self.mandatory_leaves_completed(&draft) {
            if let Some(latest) = draft.steps.iter().filter_map(|s| s.completed_at).max() {
                if request.completed_at < latest {
                    return Err(completion_time_error(
                        "ItemWorkflow",
                        &draft.id,
                        request.completed_at,
                        "latest_step_completed_at",
                        latest,
                    ));
                }
            }
            draft.workflow_status = WorkflowStatus::Completed;
            draft.completed_at = Some(request.completed_at);
            true
        } else if request.require_workflow_completion {
            return Err(LedgerError::InvalidTransition {
                entity: "ItemWorkflow".to_string(),
                id: draft.id.clone(),
                from: draft.workflow_status.to_string(),
                to: WorkflowStatus::Completed.to_string(),
                reason: if open_steps.is_empty() {
                    "仍有必经末端步骤未完工".to_string()
                } else {
                    format!("仍有进行中的步骤未完工: {}", open_steps.join(", "))
                },
            });
        } else {
            false
        };

        draft.updated_at = now;
        *workflow = draft;

        info!(
            item_workflow_id = %workflow.id,
            completed_steps = completed_step_ids.len(),
            workflow_completed,
            "完工请求已应用"
        );

        Ok(CompletionResult {
            completed_step_ids,
            workflow_completed,
        })
    }

    /// 已激活但尚未完工的步骤 (流程完工前必须全部完工)
    pub fn open_steps(&self, workflow: &ItemWorkflow) -> Vec<String> {
        workflow
            .steps
            .iter()
            .filter(|s| s.step_status == StepStatus::InProgress)
            .map(|s| s.id.clone())
            .collect()
    }

    /// 所有必经末端步骤已完工; 已激活的可选末端步骤也必须完工
    pub fn mandatory_leaves_completed(&self, workflow: &ItemWorkflow) -> bool {
        workflow
            .steps
            .iter()
            .filter(|s| workflow.is_leaf(&s.id))
            .all(|leaf| match leaf.step_status {
                StepStatus::Completed => true,
                StepStatus::InProgress => false,
                StepStatus::Pending => leaf.is_optional,
            })
    }
}

impl Default for StepStateMachine {
    fn default() -> Self {
        Self::new(true)
    }
}

fn step_transition_error(step_id: &str, from: StepStatus, to: StepStatus, reason: &str) -> LedgerError {
    warn!(step_id = %step_id, from = %from, to = %to, reason = %reason, "步骤状态迁移被拒绝");
    LedgerError::InvalidTransition {
        entity: "ItemWorkflowStep".to_string(),
        id: step_id.to_string(),
        from: from.to_string(),
        to: to.to_string(),
        reason: reason.to_string(),
    }
}

fn completion_time_error(
    entity: &str,
    id: &str,
    completed_at: NaiveDateTime,
    reference: &str,
    reference_at: NaiveDateTime,
) -> LedgerError {
    warn!(
        entity = %entity,
        id = %id,
        completed_at = %completed_at,
        reference = %reference,
        reference_at = %reference_at,
        "完工时间早于参照时间"
    );
    LedgerError::InvalidCompletionTime {
        entity: entity.to_string(),
        id: id.to_string(),
        completed_at: completed_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        reference: reference.to_string(),
        reference_at: reference_at.format("%Y-%m-%d %H:%M:%S").to_string(),
    }
}

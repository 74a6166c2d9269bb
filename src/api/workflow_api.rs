// ==========================================
// 锻造生产追溯系统 - 工艺模板与批系流程 API
// ==========================================
// 职责: 模板登记/扩展/删除, 按模板实例化批系, 流程状态与步骤树查询
// 约束: 模板一旦被流程实例引用即不可修改 (新增节点/删除均拒绝)
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::api::with_write_tx;
use crate::domain::template::{WorkflowStep, WorkflowTemplate};
use crate::domain::tenant::TenantContext;
use crate::domain::workflow::{ItemWorkflow, StepTreeNode, WorkflowStatusView};
use crate::engine::error::LedgerError;
use crate::engine::instantiator::WorkflowInstantiator;
use crate::engine::ordering::build_step_tree;
use crate::engine::template_resolver::TemplateResolver;
use crate::repository::codec::{fmt_ts, now_ts};
use crate::repository::item_workflow_repo::{self, ItemWorkflowRepository};
use crate::repository::template_repo::{self, TemplateRepository};
use rusqlite::Connection;
use std::sync::{Arc, Mutex};
use tracing::info;

pub struct WorkflowApi {
    conn: Arc<Mutex<Connection>>,
    template_repo: TemplateRepository,
    workflow_repo: ItemWorkflowRepository,
    resolver: TemplateResolver,
    instantiator: WorkflowInstantiator,
}

impl WorkflowApi {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            template_repo: TemplateRepository::from_connection(conn.clone()),
            workflow_repo: ItemWorkflowRepository::from_connection(conn.clone()),
            conn,
            resolver: TemplateResolver::new(),
            instantiator: WorkflowInstantiator::new(),
        }
    }

    // ==========================================
    // 模板
    // ==========================================

    /// 校验并登记模板 (含全部节点)
    pub fn register_template(&self, ctx: &TenantContext, template: &WorkflowTemplate) -> ApiResult<()> {
        if template.tenant_id != ctx.tenant_id {
            return Err(ApiError::ValidationError(format!(
                "模板 {} 属于租户 {}, 不能由租户 {} 登记",
                template.id, template.tenant_id, ctx.tenant_id
            )));
        }
        if template.name.trim().is_empty() {
            return Err(ApiError::InvalidInput("模板名称不能为空".to_string()));
        }
        let resolved = self.resolver.resolve(template)?;

        with_write_tx(&self.conn, |tx| {
            template_repo::insert_template_tx(tx, template)?;
            Ok(())
        })?;

        info!(
            tenant_id = ctx.tenant_id,
            actor = ctx.actor_or_system(),
            template_id = %template.id,
            step_count = resolved.len(),
            "工艺模板已登记"
        );
        Ok(())
    }

    /// 向未被引用的模板追加节点
    pub fn add_template_step(
        &self,
        ctx: &TenantContext,
        template_id: &str,
        step: &WorkflowStep,
    ) -> ApiResult<WorkflowTemplate> {
        let template = with_write_tx(&self.conn, |tx| {
            let mut template = template_repo::find_template_tx(tx, ctx.tenant_id, template_id)?
                .ok_or_else(|| ApiError::not_found("WorkflowTemplate", template_id))?;
            if template_repo::template_in_use_tx(tx, ctx.tenant_id, template_id)? {
                return Err(LedgerError::invalid_template(template_id, "模板已被流程实例引用, 不能再修改").into());
            }
            template.steps.push(step.clone());
            self.resolver.resolve(&template)?;
            template_repo::insert_step_tx(tx, ctx.tenant_id, step)?;
            Ok(template)
        })?;

        info!(
            tenant_id = ctx.tenant_id,
            template_id = %template_id,
            step_id = %step.id,
            operation_type = %step.operation_type,
            "模板节点已追加"
        );
        Ok(template)
    }

    /// 软删除未被引用的模板
    pub fn delete_template(&self, ctx: &TenantContext, template_id: &str) -> ApiResult<()> {
        let now = now_ts();
        with_write_tx(&self.conn, |tx| {
            if template_repo::find_template_tx(tx, ctx.tenant_id, template_id)?.is_none() {
                return Err(ApiError::not_found("WorkflowTemplate", template_id));
            }
            if template_repo::template_in_use_tx(tx, ctx.tenant_id, template_id)? {
                return Err(LedgerError::invalid_template(template_id, "模板已被流程实例引用, 不能删除").into());
            }
            template_repo::soft_delete_template_tx(tx, ctx.tenant_id, template_id, &fmt_ts(now))?;
            Ok(())
        })?;

        info!(
            tenant_id = ctx.tenant_id,
            actor = ctx.actor_or_system(),
            template_id = %template_id,
            "工艺模板已删除"
        );
        Ok(())
    }

    pub fn get_template(&self, ctx: &TenantContext, template_id: &str) -> ApiResult<WorkflowTemplate> {
        self.template_repo
            .find_by_id(ctx.tenant_id, template_id)?
            .ok_or_else(|| ApiError::not_found("WorkflowTemplate", template_id))
    }

    pub fn list_templates(&self, ctx: &TenantContext) -> ApiResult<Vec<WorkflowTemplate>> {
        Ok(self.template_repo.list_by_tenant(ctx.tenant_id)?)
    }

    // ==========================================
    // 批系流程
    // ==========================================

    /// 按模板为零件实例化一条批系流程
    pub fn instantiate_workflow(
        &self,
        ctx: &TenantContext,
        item_id: &str,
        template_id: &str,
    ) -> ApiResult<ItemWorkflow> {
        let now = now_ts();
        let workflow = with_write_tx(&self.conn, |tx| {
            let template = template_repo::find_template_tx(tx, ctx.tenant_id, template_id)?
                .ok_or_else(|| ApiError::not_found("WorkflowTemplate", template_id))?;
            let resolved = self.resolver.resolve(&template)?;
            let workflow = self.instantiator.instantiate(ctx, item_id, &resolved, now)?;
            item_workflow_repo::insert_workflow_tx(tx, &workflow)?;
            Ok(workflow)
        })?;

        info!(
            tenant_id = ctx.tenant_id,
            actor = ctx.actor_or_system(),
            item_workflow_id = %workflow.id,
            workflow_identifier = %workflow.workflow_identifier,
            "批系流程已实例化"
        );
        Ok(workflow)
    }

    pub fn get_item_workflow(&self, ctx: &TenantContext, item_workflow_id: &str) -> ApiResult<ItemWorkflow> {
        self.workflow_repo
            .find_by_id(ctx.tenant_id, item_workflow_id)?
            .ok_or_else(|| ApiError::not_found("ItemWorkflow", item_workflow_id))
    }

    pub fn find_by_identifier(
        &self,
        ctx: &TenantContext,
        workflow_identifier: &str,
    ) -> ApiResult<ItemWorkflow> {
        self.workflow_repo
            .find_by_identifier(ctx.tenant_id, workflow_identifier)?
            .ok_or_else(|| ApiError::not_found("ItemWorkflow", workflow_identifier))
    }

    pub fn get_item_workflow_status(
        &self,
        ctx: &TenantContext,
        item_workflow_id: &str,
    ) -> ApiResult<WorkflowStatusView> {
        let workflow = self.get_item_workflow(ctx, item_workflow_id)?;
        Ok(WorkflowStatusView::from(&workflow))
    }

    /// 步骤树 (兄弟节点按先后规则排序)
    pub fn get_step_tree(&self, ctx: &TenantContext, item_workflow_id: &str) -> ApiResult<Vec<StepTreeNode>> {
        let workflow = self.get_item_workflow(ctx, item_workflow_id)?;
        Ok(build_step_tree(&workflow))
    }

    /// 零件下全部批系流程状态
    pub fn list_workflows_for_item(
        &self,
        ctx: &TenantContext,
        item_id: &str,
    ) -> ApiResult<Vec<WorkflowStatusView>> {
        let ids = self.workflow_repo.list_ids_by_item(ctx.tenant_id, item_id)?;
        let mut views = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(workflow) = self.workflow_repo.find_by_id(ctx.tenant_id, &id)? {
                views.push(WorkflowStatusView::from(&workflow));
            }
        }
        Ok(views)
    }
}

// ==========================================
// 锻造生产追溯系统 - 件数库存查询 API
// ==========================================
// 职责: 账户件数快照、工序库存看板、领用/日子批追溯 (只读)
// ==========================================

use crate::api::error::{ApiError, ApiResult};
use crate::domain::batch::{DailyMachiningBatch, PieceConsumption, PieceCountSnapshot};
use crate::domain::tenant::TenantContext;
use crate::domain::types::OperationType;
use crate::repository::batch_repo::BatchRepository;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

pub struct InventoryApi {
    batch_repo: BatchRepository,
}

impl InventoryApi {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self {
            batch_repo: BatchRepository::from_connection(conn),
        }
    }

    /// 单个账户件数快照
    pub fn get_snapshot(&self, ctx: &TenantContext, entity_id: &str) -> ApiResult<PieceCountSnapshot> {
        self.batch_repo
            .find_snapshot(ctx.tenant_id, entity_id)?
            .ok_or_else(|| ApiError::not_found("ProcessedItemBatch", entity_id))
    }

    pub fn get_batch_snapshots(
        &self,
        ctx: &TenantContext,
        stage_batch_id: &str,
    ) -> ApiResult<Vec<PieceCountSnapshot>> {
        Ok(self
            .batch_repo
            .find_snapshots_by_stage_batch(ctx.tenant_id, stage_batch_id)?)
    }

    /// 某工序可供下游领用的账户
    pub fn list_available(
        &self,
        ctx: &TenantContext,
        operation_type: OperationType,
    ) -> ApiResult<Vec<PieceCountSnapshot>> {
        Ok(self
            .batch_repo
            .list_available_snapshots(ctx.tenant_id, operation_type)?)
    }

    /// 账户被下游领用的记录
    pub fn get_consumption_history(
        &self,
        ctx: &TenantContext,
        entity_id: &str,
    ) -> ApiResult<Vec<PieceConsumption>> {
        if self.batch_repo.find_account(ctx.tenant_id, entity_id)?.is_none() {
            return Err(ApiError::not_found("ProcessedItemBatch", entity_id));
        }
        Ok(self
            .batch_repo
            .find_consumptions_by_source(ctx.tenant_id, entity_id)?)
    }

    pub fn get_daily_batches(
        &self,
        ctx: &TenantContext,
        machining_entity_id: &str,
    ) -> ApiResult<Vec<DailyMachiningBatch>> {
        Ok(self
            .batch_repo
            .find_daily_batches(ctx.tenant_id, machining_entity_id)?)
    }
}

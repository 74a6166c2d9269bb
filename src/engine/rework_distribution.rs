// ==========================================
// 锻造生产追溯系统 - 质检报废/返工分摊
// ==========================================
// 场景: 一个质检批覆盖的机加工件来自多个日子批,
//       质检报出的报废/返工需分摊回各日子批, 修正其实际完成件数
// 对账: 分摊合计 == 质检报废 + 返工, 否则 ReconciliationMismatch
// ==========================================
// 分摊方式:
// - 显式: 调用方给出每个日子批的报废/返工件数
// - 自动: 按实际完成件数比例, 最大余额法取整
//         余额相同按 operation_date, 再按 id 先后
// 幂等: 同一质检批只落一次分摊; 相同结果重放为空操作, 不同结果拒绝
// ==========================================

use crate::domain::batch::{DailyMachiningBatch, InspectionDistribution};
use crate::domain::tenant::TenantContext;
use crate::engine::error::{LedgerError, LedgerResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{info, warn};
use uuid::Uuid;

/// 单个日子批的分摊量
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionEntry {
    pub daily_machining_batch_id: String,
    pub rejected_pieces_count: u32,
    pub rework_pieces_count: u32,
}

impl DistributionEntry {
    fn total(&self) -> u64 {
        self.rejected_pieces_count as u64 + self.rework_pieces_count as u64
    }
}

/// 分摊请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionRequest {
    pub inspection_entity_id: String,
    pub total_rejected: u32,
    pub total_rework: u32,
    /// None 表示自动分摊
    pub explicit: Option<Vec<DistributionEntry>>,
}

/// 分摊结果
#[derive(Debug, Clone, PartialEq)]
pub struct DistributionResult {
    pub records: Vec<InspectionDistribution>,
    /// false 表示与已落库分摊一致, 本次未做任何修改
    pub newly_applied: bool,
}

pub struct ReworkDistributor {}

impl ReworkDistributor {
    pub fn new() -> Self {
        Self {}
    }

    /// 请求合计必须等于质检账户完工时报出的报废/返工件数
    pub fn check_reported_totals(
        &self,
        request: &DistributionRequest,
        reported_rejected: u32,
        reported_rework: u32,
    ) -> LedgerResult<()> {
        let pairs = [
            (reported_rejected, request.total_rejected, "rejected"),
            (reported_rework, request.total_rework, "rework"),
        ];
        for (expected, requested, kind) in pairs {
            if expected != requested {
                warn!(
                    inspection_entity_id = %request.inspection_entity_id,
                    kind,
                    expected,
                    requested,
                    "分摊合计与质检报出件数不一致"
                );
                return Err(LedgerError::ReconciliationMismatch {
                    inspection_id: request.inspection_entity_id.clone(),
                    expected: expected as u64,
                    distributed: requested as u64,
                });
            }
        }
        Ok(())
    }

    /// 计算分摊方案 (纯函数, 不修改日子批)
    pub fn plan(
        &self,
        request: &DistributionRequest,
        sub_batches: &[DailyMachiningBatch],
    ) -> LedgerResult<Vec<DistributionEntry>> {
        let mut ordered: Vec<&DailyMachiningBatch> = sub_batches.iter().collect();
        ordered.sort_by(|a, b| {
            a.operation_date
                .cmp(&b.operation_date)
                .then_with(|| a.id.cmp(&b.id))
        });

        let entries = match &request.explicit {
            Some(explicit) => self.validate_explicit(request, &ordered, explicit)?,
            None => self.apportion(request, &ordered)?,
        };
        Ok(entries
            .into_iter()
            .filter(|e| e.total() > 0)
            .collect())
    }

    /// 执行分摊
    ///
    /// # 参数
    /// - `sub_batches`: 质检批所领用机加工账户下的全部日子批 (写事务内加载)
    /// - `existing`: 该质检批已落库的分摊记录
    pub fn distribute(
        &self,
        ctx: &TenantContext,
        request: &DistributionRequest,
        sub_batches: &mut [DailyMachiningBatch],
        existing: &[InspectionDistribution],
        now: NaiveDateTime,
    ) -> LedgerResult<DistributionResult> {
        if !existing.is_empty() {
            return self.replay(request, sub_batches, existing);
        }

        let plan = self.plan(request, sub_batches)?;
        let mut records = Vec::with_capacity(plan.len());
        for entry in &plan {
            let sub = sub_batches
                .iter_mut()
                .find(|s| s.id == entry.daily_machining_batch_id)
                .ok_or_else(|| {
                    LedgerError::not_found("DailyMachiningBatch", &entry.daily_machining_batch_id)
                })?;
            let removed = entry.rejected_pieces_count + entry.rework_pieces_count;
            sub.rejected_pieces_count += entry.rejected_pieces_count;
            sub.rework_pieces_count += entry.rework_pieces_count;
            sub.actual_completed_pieces_count -= removed;

            records.push(InspectionDistribution {
                id: Uuid::new_v4().to_string(),
                tenant_id: ctx.tenant_id,
                inspection_entity_id: request.inspection_entity_id.clone(),
                daily_machining_batch_id: entry.daily_machining_batch_id.clone(),
                rejected_pieces_count: entry.rejected_pieces_count,
                rework_pieces_count: entry.rework_pieces_count,
                created_at: now,
            });
        }

        info!(
            tenant_id = ctx.tenant_id,
            inspection_entity_id = %request.inspection_entity_id,
            sub_batches = records.len(),
            rejected = request.total_rejected,
            rework = request.total_rework,
            mode = if request.explicit.is_some() { "explicit" } else { "auto" },
            "报废/返工已分摊到日子批"
        );

        Ok(DistributionResult {
            records,
            newly_applied: true,
        })
    }

    /// 重放: 还原日子批分摊前的件数, 重新计算并与已落库结果比对
    fn replay(
        &self,
        request: &DistributionRequest,
        sub_batches: &[DailyMachiningBatch],
        existing: &[InspectionDistribution],
    ) -> LedgerResult<DistributionResult> {
        let mut restored: Vec<DailyMachiningBatch> = sub_batches.to_vec();
        for record in existing {
            if let Some(sub) = restored
                .iter_mut()
                .find(|s| s.id == record.daily_machining_batch_id)
            {
                sub.actual_completed_pieces_count +=
                    record.rejected_pieces_count + record.rework_pieces_count;
                sub.rejected_pieces_count = sub
                    .rejected_pieces_count
                    .saturating_sub(record.rejected_pieces_count);
                sub.rework_pieces_count = sub
                    .rework_pieces_count
                    .saturating_sub(record.rework_pieces_count);
            }
        }

        let plan = self.plan(request, &restored)?;
        let planned: BTreeMap<&str, (u32, u32)> = plan
            .iter()
            .map(|e| {
                (
                    e.daily_machining_batch_id.as_str(),
                    (e.rejected_pieces_count, e.rework_pieces_count),
                )
            })
            .collect();
        let stored: BTreeMap<&str, (u32, u32)> = existing
            .iter()
            .filter(|r| r.rejected_pieces_count + r.rework_pieces_count > 0)
            .map(|r| {
                (
                    r.daily_machining_batch_id.as_str(),
                    (r.rejected_pieces_count, r.rework_pieces_count),
                )
            })
            .collect();

        if planned != stored {
            warn!(
                inspection_entity_id = %request.inspection_entity_id,
                "质检批已存在不同的分摊结果"
            );
            return Err(LedgerError::Validation(format!(
                "质检批 {} 已分摊, 不能以不同结果重新分摊",
                request.inspection_entity_id
            )));
        }

        Ok(DistributionResult {
            records: existing.to_vec(),
            newly_applied: false,
        })
    }

    fn validate_explicit(
        &self,
        request: &DistributionRequest,
        ordered: &[&DailyMachiningBatch],
        explicit: &[DistributionEntry],
    ) -> LedgerResult<Vec<DistributionEntry>> {
        let by_id: HashMap<&str, &DailyMachiningBatch> =
            ordered.iter().map(|s| (s.id.as_str(), *s)).collect();
        let mut seen: HashSet<&str> = HashSet::new();

        for entry in explicit {
            let id = entry.daily_machining_batch_id.as_str();
            let sub = by_id
                .get(id)
                .ok_or_else(|| LedgerError::not_found("DailyMachiningBatch", id))?;
            if !seen.insert(id) {
                return Err(LedgerError::Validation(format!("日子批 {} 重复分摊", id)));
            }
            if entry.total() > sub.actual_completed_pieces_count as u64 {
                return Err(LedgerError::Validation(format!(
                    "日子批 {} 分摊 {} 件超过实际完成 {} 件",
                    id,
                    entry.total(),
                    sub.actual_completed_pieces_count
                )));
            }
        }

        let expected = request.total_rejected as u64 + request.total_rework as u64;
        let distributed: u64 = explicit.iter().map(|e| e.total()).sum();
        let rejected: u64 = explicit.iter().map(|e| e.rejected_pieces_count as u64).sum();
        if distributed != expected || rejected != request.total_rejected as u64 {
            warn!(
                inspection_entity_id = %request.inspection_entity_id,
                expected,
                distributed,
                "分摊对账不平"
            );
            return Err(LedgerError::ReconciliationMismatch {
                inspection_id: request.inspection_entity_id.clone(),
                expected,
                distributed,
            });
        }

        Ok(explicit.to_vec())
    }

    /// 报废先按实际完成件数分摊, 返工再按剩余件数分摊
    fn apportion(
        &self,
        request: &DistributionRequest,
        ordered: &[&DailyMachiningBatch],
    ) -> LedgerResult<Vec<DistributionEntry>> {
        let capacity: Vec<u32> = ordered
            .iter()
            .map(|s| s.actual_completed_pieces_count)
            .collect();
        let total_capacity: u64 = capacity.iter().map(|c| *c as u64).sum();
        let expected = request.total_rejected as u64 + request.total_rework as u64;
        if expected > total_capacity {
            return Err(LedgerError::ReconciliationMismatch {
                inspection_id: request.inspection_entity_id.clone(),
                expected,
                distributed: total_capacity,
            });
        }

        let rejected = largest_remainder(request.total_rejected, &capacity);
        let remaining: Vec<u32> = capacity
            .iter()
            .zip(&rejected)
            .map(|(c, r)| c - r)
            .collect();
        let rework = largest_remainder(request.total_rework, &remaining);

        Ok(ordered
            .iter()
            .enumerate()
            .map(|(i, s)| DistributionEntry {
                daily_machining_batch_id: s.id.clone(),
                rejected_pieces_count: rejected[i],
                rework_pieces_count: rework[i],
            })
            .collect())
    }
}

impl Default for ReworkDistributor {
    fn default() -> Self {
        Self::new()
    }
}

/// 最大余额法: 按权重分配 total, 余额相同时靠前者优先
///
/// 调用方保证 total <= sum(weights); 每份不超过其权重
pub fn largest_remainder(total: u32, weights: &[u32]) -> Vec<u32> {
    let sum: u64 = weights.iter().map(|w| *w as u64).sum();
    if total == 0 || sum == 0 {
        return vec![0; weights.len()];
    }

    let mut shares: Vec<u32> = Vec::with_capacity(weights.len());
    let mut remainders: Vec<(u64, usize)> = Vec::with_capacity(weights.len());
    for (i, w) in weights.iter().enumerate() {
        let scaled = total as u64 * *w as u64;
        shares.push((scaled / sum) as u32);
        remainders.push((scaled % sum, i));
    }

    let assigned: u64 = shares.iter().map(|s| *s as u64).sum();
    let mut leftover = (total as u64).saturating_sub(assigned);

    remainders.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    for (remainder, i) in remainders {
        if leftover == 0 || remainder == 0 {
            break;
        }
        shares[i] += 1;
        leftover -= 1;
    }
    shares
}

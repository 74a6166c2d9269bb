// ==========================================
// 质检报废/返工分摊集成测试
// ==========================================
// 机加工账户按日报工拆成日子批, 质检完工时把报废/返工分摊回日子批
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod rework_distribution_test {
    use super::test_helpers::*;
    use forge_workflow_ledger::api::{
        ApiError, CompleteOperationBatchRequest, CreatedOperationBatch, DailyMachiningInput, ItemOutcomeInput,
    };
    use forge_workflow_ledger::config::config_keys;
    use forge_workflow_ledger::domain::batch::DailyMachiningBatch;
    use forge_workflow_ledger::domain::types::{BatchStatus, OperationType};
    use forge_workflow_ledger::domain::workflow::ItemWorkflow;
    use forge_workflow_ledger::engine::piece_ledger::ConsumptionRequest;
    use forge_workflow_ledger::engine::rework_distribution::{DistributionEntry, DistributionRequest};
    use forge_workflow_ledger::engine::step_machine::CompletionRequest;
    use std::collections::BTreeMap;

    /// 锻造 100 → 热处理 100 → 机加工 100 (日报工 50/30/20, 已完工) → 质检领用 100 (未完工)
    fn lineage_at_inspection(env: &TestEnv, item_id: &str) -> (ItemWorkflow, Vec<DailyMachiningBatch>, CreatedOperationBatch) {
        let wf = env.linear_lineage("tpl-linear", item_id);
        let forge_id = env.forge_and_finish(&wf, 100, 0, 1);
        let heat_id = env.pass_through(OperationType::HeatTreatment, &wf, &forge_id, ts(2, 8), ts(2, 9));

        let machining = env
            .start_batch(
                OperationType::Machining,
                &wf,
                vec![ConsumptionRequest::available(&heat_id, 100)],
                ts(3, 8),
            )
            .unwrap();
        let machining_id = machining.accounts[0].id.clone();
        for (day, pieces) in [(3, 50), (4, 30), (5, 20)] {
            env.operation_api
                .record_daily_machining(
                    &env.ctx,
                    &DailyMachiningInput {
                        machining_entity_id: machining_id.clone(),
                        operation_date: date(day),
                        completed_pieces: pieces,
                    },
                )
                .unwrap();
        }
        env.finish_batch(&machining, ts(5, 18), None, 0, 0).unwrap();

        let quality = env
            .start_batch(
                OperationType::Quality,
                &wf,
                vec![ConsumptionRequest::available(&machining_id, 100)],
                ts(6, 8),
            )
            .unwrap();

        let dailies = env
            .inventory_api
            .get_daily_batches(&env.ctx, &machining_id)
            .unwrap();
        (wf, dailies, quality)
    }

    fn complete_quality(
        env: &TestEnv,
        quality: &CreatedOperationBatch,
        rejected: u32,
        rework: u32,
        distribution: Option<Vec<DistributionEntry>>,
    ) -> Result<forge_workflow_ledger::api::CompletedOperationBatch, ApiError> {
        env.operation_api.complete_operation_batch(
            &env.ctx,
            &CompleteOperationBatchRequest {
                stage_batch_id: quality.stage_batch.id.clone(),
                completed_at: ts(6, 18),
                items: vec![ItemOutcomeInput {
                    processed_item_id: quality.accounts[0].id.clone(),
                    produced_pieces: None,
                    rejected_pieces: rejected,
                    rework_pieces: rework,
                    distribution,
                }],
            },
        )
    }

    fn by_date(mut dailies: Vec<DailyMachiningBatch>) -> Vec<DailyMachiningBatch> {
        dailies.sort_by_key(|d| d.operation_date);
        dailies
    }

    // ==========================================
    // 测试1: 3 个日子批, 10 报废 + 5 返工自动分摊, 合计恰为 15
    // ==========================================
    #[test]
    fn test_auto_distribution_across_daily_batches() {
        let env = TestEnv::new();
        let (_wf, dailies, quality) = lineage_at_inspection(&env, "ITEM-201");
        assert_eq!(dailies.len(), 3);
        let machining_id = dailies[0].machining_entity_id.clone();

        let completed = complete_quality(&env, &quality, 10, 5, None).unwrap();
        let total: u32 = completed
            .distributions
            .iter()
            .map(|d| d.rejected_pieces_count + d.rework_pieces_count)
            .sum();
        assert_eq!(total, 15);

        let dailies = by_date(env.inventory_api.get_daily_batches(&env.ctx, &machining_id).unwrap());
        let rejected: Vec<u32> = dailies.iter().map(|d| d.rejected_pieces_count).collect();
        let rework: Vec<u32> = dailies.iter().map(|d| d.rework_pieces_count).collect();
        let actual: Vec<u32> = dailies.iter().map(|d| d.actual_completed_pieces_count).collect();
        // 报废按 50/30/20 分摊; 返工按剩余 45/27/18 分摊, 余额相同取较早日期
        assert_eq!(rejected, vec![5, 3, 2]);
        assert_eq!(rework, vec![3, 1, 1]);
        assert_eq!(actual, vec![42, 26, 17]);
        for d in &dailies {
            assert_eq!(
                d.actual_completed_pieces_count + d.rejected_pieces_count + d.rework_pieces_count,
                d.completed_pieces_count
            );
        }

        let account = env.operation_api.get_account(&env.ctx, &quality.accounts[0].id).unwrap();
        assert_eq!(account.available_pieces_count, 85);
        assert_eq!(account.rejected_pieces_count, 10);
        assert_eq!(account.rework_pieces_count, 5);
        assert!(account.is_conserved());
    }

    // ==========================================
    // 测试2: 显式分摊合计不符 → 对账不平, 质检批完工整体回滚
    // ==========================================
    #[test]
    fn test_explicit_mismatch_rejected() {
        let env = TestEnv::new();
        let (_wf, dailies, quality) = lineage_at_inspection(&env, "ITEM-202");
        let dailies = by_date(dailies);

        let short = vec![
            DistributionEntry {
                daily_machining_batch_id: dailies[0].id.clone(),
                rejected_pieces_count: 6,
                rework_pieces_count: 4,
            },
            DistributionEntry {
                daily_machining_batch_id: dailies[1].id.clone(),
                rejected_pieces_count: 4,
                rework_pieces_count: 0,
            },
        ];
        let err = complete_quality(&env, &quality, 10, 5, Some(short)).unwrap_err();
        match err {
            ApiError::ReconciliationMismatch {
                expected,
                distributed,
                ..
            } => {
                assert_eq!(expected, 15);
                assert_eq!(distributed, 14);
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let account = env.operation_api.get_account(&env.ctx, &quality.accounts[0].id).unwrap();
        assert_eq!(account.status, BatchStatus::InProgress);
        assert_eq!(account.rejected_pieces_count, 0);
        let unchanged = env
            .inventory_api
            .get_daily_batches(&env.ctx, &dailies[0].machining_entity_id)
            .unwrap();
        assert!(unchanged
            .iter()
            .all(|d| d.actual_completed_pieces_count == d.completed_pieces_count));

        // 合计正确的显式分摊被接受, 零分摊的日子批不生成记录
        let exact = vec![
            DistributionEntry {
                daily_machining_batch_id: dailies[0].id.clone(),
                rejected_pieces_count: 6,
                rework_pieces_count: 5,
            },
            DistributionEntry {
                daily_machining_batch_id: dailies[1].id.clone(),
                rejected_pieces_count: 4,
                rework_pieces_count: 0,
            },
        ];
        let completed = complete_quality(&env, &quality, 10, 5, Some(exact)).unwrap();
        assert_eq!(completed.distributions.len(), 2);
    }

    // ==========================================
    // 测试3: 重放相同结果为空操作, 不同结果被拒
    // ==========================================
    #[test]
    fn test_distribution_replay() {
        let env = TestEnv::new();
        let (_wf, dailies, quality) = lineage_at_inspection(&env, "ITEM-203");
        let dailies = by_date(dailies);
        complete_quality(&env, &quality, 10, 5, None).unwrap();
        let inspection_id = quality.accounts[0].id.clone();

        let replay = env
            .operation_api
            .distribute_inspection(
                &env.ctx,
                &DistributionRequest {
                    inspection_entity_id: inspection_id.clone(),
                    total_rejected: 10,
                    total_rework: 5,
                    explicit: None,
                },
            )
            .unwrap();
        assert!(!replay.newly_applied);
        assert_eq!(replay.records.len(), 3);

        let after_replay = by_date(
            env.inventory_api
                .get_daily_batches(&env.ctx, &dailies[0].machining_entity_id)
                .unwrap(),
        );
        let actual: Vec<u32> = after_replay.iter().map(|d| d.actual_completed_pieces_count).collect();
        assert_eq!(actual, vec![42, 26, 17]);

        let different = vec![DistributionEntry {
            daily_machining_batch_id: dailies[0].id.clone(),
            rejected_pieces_count: 10,
            rework_pieces_count: 5,
        }];
        let err = env
            .operation_api
            .distribute_inspection(
                &env.ctx,
                &DistributionRequest {
                    inspection_entity_id: inspection_id.clone(),
                    total_rejected: 10,
                    total_rework: 5,
                    explicit: Some(different),
                },
            )
            .unwrap_err();
        assert!(matches!(err, ApiError::ValidationError(_)));

        // 报废合计与质检账户不一致
        let err = env
            .operation_api
            .distribute_inspection(
                &env.ctx,
                &DistributionRequest {
                    inspection_entity_id: inspection_id,
                    total_rejected: 9,
                    total_rework: 6,
                    explicit: None,
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::ReconciliationMismatch { expected: 10, distributed: 9, .. }
        ));
    }

    // ==========================================
    // 测试3b: 分摊合计必须等于质检完工时报出的件数
    // ==========================================
    #[test]
    fn test_distribution_must_match_reported_counts() {
        let env = TestEnv::new();
        let (_wf, dailies, quality) = lineage_at_inspection(&env, "ITEM-207");
        let machining_id = dailies[0].machining_entity_id.clone();
        complete_quality(&env, &quality, 0, 0, None).unwrap();
        let inspection_id = quality.accounts[0].id.clone();

        // 质检报 0 返工, 不能凭空分摊 15 件返工
        let err = env
            .operation_api
            .distribute_inspection(
                &env.ctx,
                &DistributionRequest {
                    inspection_entity_id: inspection_id.clone(),
                    total_rejected: 0,
                    total_rework: 15,
                    explicit: None,
                },
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ApiError::ReconciliationMismatch { expected: 0, distributed: 15, .. }
        ));
        let dailies = env.inventory_api.get_daily_batches(&env.ctx, &machining_id).unwrap();
        assert!(dailies
            .iter()
            .all(|d| d.actual_completed_pieces_count == d.completed_pieces_count));

        // 返工件被返工批次领走后, 报出件数不变, 重放仍按原返工数对账
        let (wf2, _dailies, quality2) = lineage_at_inspection(&env, "ITEM-208");
        complete_quality(&env, &quality2, 10, 5, None).unwrap();
        let inspection2 = quality2.accounts[0].id.clone();
        env.start_batch(
            OperationType::Machining,
            &wf2,
            vec![ConsumptionRequest::rework(&inspection2, 3)],
            ts(7, 8),
        )
        .unwrap();
        let account = env.operation_api.get_account(&env.ctx, &inspection2).unwrap();
        assert_eq!(account.rework_pieces_count, 2);
        assert_eq!(account.reported_rework_pieces_count, 5);

        let replay = env
            .operation_api
            .distribute_inspection(
                &env.ctx,
                &DistributionRequest {
                    inspection_entity_id: inspection2.clone(),
                    total_rejected: 10,
                    total_rework: 5,
                    explicit: None,
                },
            )
            .unwrap();
        assert!(!replay.newly_applied);
        assert!(matches!(
            env.operation_api.distribute_inspection(
                &env.ctx,
                &DistributionRequest {
                    inspection_entity_id: inspection2,
                    total_rejected: 10,
                    total_rework: 2,
                    explicit: None,
                },
            ),
            Err(ApiError::ReconciliationMismatch { expected: 5, distributed: 2, .. })
        ));
    }

    // ==========================================
    // 测试3c: 返工留池配置下, 报出的返工仍参与对账
    // ==========================================
    #[test]
    fn test_reported_rework_kept_when_rework_stays_in_pool() {
        let env = TestEnv::new();
        env.set_config(config_keys::REWORK_RETURNS_TO_POOL, "true");
        let (_wf, dailies, quality) = lineage_at_inspection(&env, "ITEM-209");
        let completed = complete_quality(&env, &quality, 4, 6, None).unwrap();
        let distributed_rework: u32 = completed.distributions.iter().map(|d| d.rework_pieces_count).sum();
        assert_eq!(distributed_rework, 6);

        let inspection_id = quality.accounts[0].id.clone();
        let account = env.operation_api.get_account(&env.ctx, &inspection_id).unwrap();
        assert_eq!(account.rework_pieces_count, 0);
        assert_eq!(account.reported_rework_pieces_count, 6);
        assert_eq!(account.available_pieces_count, 96);

        let replay = env
            .operation_api
            .distribute_inspection(
                &env.ctx,
                &DistributionRequest {
                    inspection_entity_id: inspection_id,
                    total_rejected: 4,
                    total_rework: 6,
                    explicit: None,
                },
            )
            .unwrap();
        assert!(!replay.newly_applied);
        assert_eq!(dailies.len(), 3);
    }

    // ==========================================
    // 测试4: 日机加工报工校验
    // ==========================================
    #[test]
    fn test_daily_machining_validation() {
        let env = TestEnv::new();
        let wf = env.linear_lineage("tpl-linear", "ITEM-204");
        let forge_id = env.forge_and_finish(&wf, 40, 0, 1);
        let heat_id = env.pass_through(OperationType::HeatTreatment, &wf, &forge_id, ts(2, 8), ts(2, 9));
        let machining = env
            .start_batch(
                OperationType::Machining,
                &wf,
                vec![ConsumptionRequest::available(&heat_id, 40)],
                ts(3, 8),
            )
            .unwrap();
        let machining_id = machining.accounts[0].id.clone();

        let input = |day: u32, pieces: u32| DailyMachiningInput {
            machining_entity_id: machining_id.clone(),
            operation_date: date(day),
            completed_pieces: pieces,
        };

        let daily = env.operation_api.record_daily_machining(&env.ctx, &input(3, 25)).unwrap();
        assert_eq!(daily.actual_completed_pieces_count, 25);

        // 同一天重复报工
        assert!(matches!(
            env.operation_api.record_daily_machining(&env.ctx, &input(3, 5)),
            Err(ApiError::ValidationError(_))
        ));
        // 报工合计超过领入件数
        assert!(matches!(
            env.operation_api.record_daily_machining(&env.ctx, &input(4, 16)),
            Err(ApiError::InsufficientPieces { requested: 16, available: 15, .. })
        ));
        // 零件数
        assert!(matches!(
            env.operation_api.record_daily_machining(&env.ctx, &input(4, 0)),
            Err(ApiError::InvalidInput(_))
        ));
        // 非机加工账户
        assert!(matches!(
            env.operation_api.record_daily_machining(
                &env.ctx,
                &DailyMachiningInput {
                    machining_entity_id: heat_id.clone(),
                    operation_date: date(4),
                    completed_pieces: 1,
                }
            ),
            Err(ApiError::ValidationError(_))
        ));

        env.operation_api.record_daily_machining(&env.ctx, &input(4, 15)).unwrap();

        // 日子批挂到机加工步骤
        let wf = env.reload(&wf);
        let step = wf.find_step(&step_of(&wf, OperationType::Machining)).unwrap();
        assert!(step.related_entity_ids.contains(&daily.id));

        env.finish_batch(&machining, ts(4, 18), None, 0, 0).unwrap();
        assert!(matches!(
            env.operation_api.record_daily_machining(&env.ctx, &input(5, 1)),
            Err(ApiError::InvalidTransition(_))
        ));
    }

    // ==========================================
    // 测试5: 返工件回池与返工池领用
    // ==========================================
    #[test]
    fn test_rework_pool() {
        let env = TestEnv::new();
        let (wf, _dailies, quality) = lineage_at_inspection(&env, "ITEM-205");
        complete_quality(&env, &quality, 10, 5, None).unwrap();
        let inspection_id = quality.accounts[0].id.clone();

        // 返工批次从质检账户的返工池领用
        let rework_batch = env
            .start_batch(
                OperationType::Machining,
                &wf,
                vec![ConsumptionRequest::rework(&inspection_id, 3)],
                ts(7, 8),
            )
            .unwrap();
        assert_eq!(rework_batch.accounts[0].initial_pieces_count, 3);

        let account = env.operation_api.get_account(&env.ctx, &inspection_id).unwrap();
        assert_eq!(account.rework_pieces_count, 2);
        assert_eq!(account.consumed_pieces_count, 3);
        assert!(account.is_conserved());

        // 余下 2 件显式回池
        let account = env.operation_api.return_rework(&env.ctx, &inspection_id, 2).unwrap();
        assert_eq!(account.rework_pieces_count, 0);
        assert_eq!(account.available_pieces_count, 87);
        assert!(account.is_conserved());

        assert!(matches!(
            env.operation_api.return_rework(&env.ctx, &inspection_id, 1),
            Err(ApiError::InsufficientPieces { available: 0, .. })
        ));
    }

    // ==========================================
    // 测试5b: 返工回流只能进入尚未完工的步骤
    // ==========================================
    #[test]
    fn test_rework_reentry_requires_open_step() {
        let env = TestEnv::new();
        let (wf, _dailies, quality) = lineage_at_inspection(&env, "ITEM-210");
        complete_quality(&env, &quality, 4, 6, None).unwrap();
        let inspection_id = quality.accounts[0].id.clone();

        // 机加工步骤进行中: 返工批次追加关联到该步骤
        let reentry = env
            .start_batch(
                OperationType::Machining,
                &wf,
                vec![ConsumptionRequest::rework(&inspection_id, 2)],
                ts(7, 8),
            )
            .unwrap();
        let machining_step = step_of(&wf, OperationType::Machining);
        let reloaded = env.reload(&wf);
        let step = reloaded.find_step(&machining_step).unwrap();
        assert!(step.related_entity_ids.contains(&reentry.accounts[0].id));
        assert_eq!(step.step_status, forge_workflow_ledger::domain::types::StepStatus::InProgress);
        env.finish_batch(&reentry, ts(7, 12), None, 0, 0).unwrap();

        // 机加工步骤完工后不再接收返工批次, 返工桶保持不变
        env.operation_api
            .complete_steps(
                &env.ctx,
                &wf.id,
                &CompletionRequest {
                    completed_at: ts(7, 13),
                    step_completions: BTreeMap::from([(machining_step.clone(), ts(7, 13))]),
                    require_workflow_completion: false,
                },
            )
            .unwrap();
        assert!(matches!(
            env.start_batch(
                OperationType::Machining,
                &wf,
                vec![ConsumptionRequest::rework(&inspection_id, 2)],
                ts(8, 8),
            ),
            Err(ApiError::InvalidTransition(_))
        ));
        let account = env.operation_api.get_account(&env.ctx, &inspection_id).unwrap();
        assert_eq!(account.rework_pieces_count, 4);
        assert!(account.is_conserved());
    }

    // ==========================================
    // 测试6: 返工留池配置下, 返工件不扣减可用件数
    // ==========================================
    #[test]
    fn test_rework_returns_to_pool_config() {
        let env = TestEnv::new();
        env.set_config(config_keys::REWORK_RETURNS_TO_POOL, "true");
        let wf = env.linear_lineage("tpl-linear", "ITEM-206");
        let forge = env.start_forge(&wf, 30, ts(1, 6)).unwrap();
        env.finish_batch(&forge, ts(1, 7), Some(30), 2, 4).unwrap();

        let account = env.operation_api.get_account(&env.ctx, &forge.accounts[0].id).unwrap();
        assert_eq!(account.available_pieces_count, 28);
        assert_eq!(account.rework_pieces_count, 0);
        assert!(account.is_conserved());
    }
}

// ==========================================
// 工艺模板与批系实例化集成测试
// ==========================================

#[path = "test_helpers.rs"]
mod test_helpers;

#[cfg(test)]
mod workflow_template_test {
    use super::test_helpers::*;
    use forge_workflow_ledger::api::ApiError;
    use forge_workflow_ledger::domain::tenant::TenantContext;
    use forge_workflow_ledger::domain::types::{OperationType, StepStatus, WorkflowStatus};

    // ==========================================
    // 测试1: 实例化镜像模板树, 全部步骤待开始
    // ==========================================
    #[test]
    fn test_instantiate_mirrors_template() {
        let env = TestEnv::new();
        let wf = env.linear_lineage("tpl-linear", "ITEM-501");

        assert_eq!(wf.workflow_status, WorkflowStatus::NotStarted);
        assert!(wf.workflow_identifier.starts_with("WF-"));
        assert_eq!(wf.steps.len(), 5);
        assert!(wf.steps.iter().all(|s| s.step_status == StepStatus::Pending));
        assert!(wf.steps.iter().all(|s| !s.has_piece_counts()));

        let root = wf.root_step().unwrap();
        assert_eq!(root.operation_type, OperationType::Forging);
        assert_eq!(root.tree_level, 0);

        // 父子关系镜像模板
        let heat = wf.find_step(&step_of(&wf, OperationType::HeatTreatment)).unwrap();
        assert_eq!(heat.parent_item_workflow_step_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(heat.workflow_step_id, "tpl-linear-heat");

        let by_identifier = env
            .workflow_api
            .find_by_identifier(&env.ctx, &wf.workflow_identifier)
            .unwrap();
        assert_eq!(by_identifier.id, wf.id);

        let other = env.linear_lineage("tpl-linear", "ITEM-501");
        assert_ne!(other.workflow_identifier, wf.workflow_identifier);
        let listed = env.workflow_api.list_workflows_for_item(&env.ctx, "ITEM-501").unwrap();
        assert_eq!(listed.len(), 2);
    }

    // ==========================================
    // 测试2: 非法模板被拒绝
    // ==========================================
    #[test]
    fn test_invalid_templates_rejected() {
        let env = TestEnv::new();

        // 根节点不是锻造
        let mut template = empty_template(TENANT_ID, "tpl-bad-root");
        template.steps = vec![template_step("tpl-bad-root", "heat", OperationType::HeatTreatment, None, 0, false)];
        assert!(matches!(
            env.workflow_api.register_template(&env.ctx, &template),
            Err(ApiError::InvalidTemplate(_))
        ));

        // 层级不连续
        let mut template = empty_template(TENANT_ID, "tpl-gap");
        template.steps = vec![
            template_step("tpl-gap", "forge", OperationType::Forging, None, 0, false),
            template_step("tpl-gap", "heat", OperationType::HeatTreatment, Some("forge"), 2, false),
        ];
        assert!(matches!(
            env.workflow_api.register_template(&env.ctx, &template),
            Err(ApiError::InvalidTemplate(_))
        ));

        // 父节点不存在
        let mut template = empty_template(TENANT_ID, "tpl-orphan");
        template.steps = vec![
            template_step("tpl-orphan", "forge", OperationType::Forging, None, 0, false),
            template_step("tpl-orphan", "heat", OperationType::HeatTreatment, Some("missing"), 1, false),
        ];
        assert!(matches!(
            env.workflow_api.register_template(&env.ctx, &template),
            Err(ApiError::InvalidTemplate(_))
        ));

        // 两个根节点
        let mut template = empty_template(TENANT_ID, "tpl-two-roots");
        template.steps = vec![
            template_step("tpl-two-roots", "forge-a", OperationType::Forging, None, 0, false),
            template_step("tpl-two-roots", "forge-b", OperationType::Forging, None, 0, false),
        ];
        assert!(matches!(
            env.workflow_api.register_template(&env.ctx, &template),
            Err(ApiError::InvalidTemplate(_))
        ));

        // 其他租户的模板
        let template = linear_template(TENANT_ID + 1, "tpl-foreign");
        assert!(matches!(
            env.workflow_api.register_template(&env.ctx, &template),
            Err(ApiError::ValidationError(_))
        ));

        assert!(env.workflow_api.list_templates(&env.ctx).unwrap().is_empty());
    }

    // ==========================================
    // 测试3: 模板被引用后不可修改/删除
    // ==========================================
    #[test]
    fn test_template_frozen_once_in_use() {
        let env = TestEnv::new();
        let mut template = empty_template(TENANT_ID, "tpl-grow");
        template.steps = vec![template_step("tpl-grow", "forge", OperationType::Forging, None, 0, false)];
        env.workflow_api.register_template(&env.ctx, &template).unwrap();

        let heat = template_step("tpl-grow", "heat", OperationType::HeatTreatment, Some("forge"), 1, false);
        let grown = env.workflow_api.add_template_step(&env.ctx, "tpl-grow", &heat).unwrap();
        assert_eq!(grown.steps.len(), 2);

        // 追加的节点同样要通过校验
        let bad = template_step("tpl-grow", "bad", OperationType::Machining, Some("heat"), 5, false);
        assert!(matches!(
            env.workflow_api.add_template_step(&env.ctx, "tpl-grow", &bad),
            Err(ApiError::InvalidTemplate(_))
        ));
        assert_eq!(env.workflow_api.get_template(&env.ctx, "tpl-grow").unwrap().steps.len(), 2);

        let wf = env.workflow_api.instantiate_workflow(&env.ctx, "ITEM-503", "tpl-grow").unwrap();
        assert_eq!(wf.steps.len(), 2);

        let machining = template_step("tpl-grow", "machining", OperationType::Machining, Some("heat"), 2, false);
        assert!(matches!(
            env.workflow_api.add_template_step(&env.ctx, "tpl-grow", &machining),
            Err(ApiError::InvalidTemplate(_))
        ));
        assert!(matches!(
            env.workflow_api.delete_template(&env.ctx, "tpl-grow"),
            Err(ApiError::InvalidTemplate(_))
        ));

        // 未被引用的模板可删除, 删除后不可再实例化
        env.workflow_api
            .register_template(&env.ctx, &linear_template(TENANT_ID, "tpl-unused"))
            .unwrap();
        env.workflow_api.delete_template(&env.ctx, "tpl-unused").unwrap();
        assert!(matches!(
            env.workflow_api.instantiate_workflow(&env.ctx, "ITEM-503", "tpl-unused"),
            Err(ApiError::NotFound(_))
        ));
    }

    // ==========================================
    // 测试4: 步骤树兄弟节点按 层级 → 工序名 → 创建时间 → ID 排序
    // ==========================================
    #[test]
    fn test_step_tree_sibling_order() {
        let env = TestEnv::new();
        let mut template = empty_template(TENANT_ID, "tpl-tree");
        // 故意倒序给出
        template.steps = vec![
            template_step("tpl-tree", "quality", OperationType::Quality, Some("forge"), 1, true),
            template_step("tpl-tree", "machining", OperationType::Machining, Some("forge"), 1, false),
            template_step("tpl-tree", "heat", OperationType::HeatTreatment, Some("forge"), 1, false),
            template_step("tpl-tree", "forge", OperationType::Forging, None, 0, false),
        ];
        env.workflow_api.register_template(&env.ctx, &template).unwrap();
        let wf = env.workflow_api.instantiate_workflow(&env.ctx, "ITEM-504", "tpl-tree").unwrap();

        let tree = env.workflow_api.get_step_tree(&env.ctx, &wf.id).unwrap();
        assert_eq!(tree.len(), 1);
        assert_eq!(tree[0].operation_type, OperationType::Forging);
        let children: Vec<OperationType> = tree[0].children.iter().map(|c| c.operation_type).collect();
        assert_eq!(
            children,
            vec![OperationType::HeatTreatment, OperationType::Machining, OperationType::Quality]
        );
        assert!(tree[0].children[2].is_optional);

        let status = env.workflow_api.get_item_workflow_status(&env.ctx, &wf.id).unwrap();
        assert_eq!(status.status, WorkflowStatus::NotStarted);
        assert!(status.started_at.is_none());
    }

    // ==========================================
    // 测试5: 租户隔离
    // ==========================================
    #[test]
    fn test_tenant_isolation() {
        let env = TestEnv::new();
        let wf = env.linear_lineage("tpl-linear", "ITEM-505");
        let other = TenantContext::new(TENANT_ID + 1);

        assert!(matches!(
            env.workflow_api.get_item_workflow(&other, &wf.id),
            Err(ApiError::NotFound(_))
        ));
        assert!(matches!(
            env.workflow_api.instantiate_workflow(&other, "ITEM-505", "tpl-linear"),
            Err(ApiError::NotFound(_))
        ));
        assert!(env.workflow_api.list_templates(&other).unwrap().is_empty());
    }
}

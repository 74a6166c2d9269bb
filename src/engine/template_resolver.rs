// ==========================================
// 锻造生产追溯系统 - 工艺模板解析器
// ==========================================
// 输入: WorkflowTemplate (扁平节点表, parent_step_id 表达父子)
// 输出: ResolvedTemplate (按层序 + 兄弟排序的节点竞技场)
// ==========================================
// 校验规则:
// - 节点ID唯一, 且属于该模板
// - 有且仅有一个根节点, 根节点为 FORGING 且 tree_level = 0
// - 父节点必须存在, 祖先链不得成环
// - tree_level = parent.tree_level + 1
// ==========================================

use crate::domain::template::{WorkflowStep, WorkflowTemplate};
use crate::domain::types::OperationType;
use crate::engine::error::{LedgerError, LedgerResult};
use crate::engine::ordering::compare_siblings;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

// ==========================================
// ResolvedTemplate - 已校验的模板树
// ==========================================
#[derive(Debug, Clone)]
pub struct ResolvedTemplate {
    pub template_id: String,
    pub tenant_id: i64,
    nodes: Vec<WorkflowStep>,
    children: HashMap<String, Vec<usize>>,
}

impl ResolvedTemplate {
    /// 根节点 (层序第一个)
    pub fn root(&self) -> &WorkflowStep {
        &self.nodes[0]
    }

    /// 层序节点列表 (父节点总在子节点之前)
    pub fn nodes(&self) -> &[WorkflowStep] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// 有序子节点
    pub fn children(&self, step_id: &str) -> Vec<&WorkflowStep> {
        self.children
            .get(step_id)
            .map(|idx| idx.iter().map(|i| &self.nodes[*i]).collect())
            .unwrap_or_default()
    }

    pub fn is_leaf(&self, step_id: &str) -> bool {
        self.children
            .get(step_id)
            .map(|c| c.is_empty())
            .unwrap_or(true)
    }
}

// ==========================================
// TemplateResolver - 模板解析器
// ==========================================
/// 无状态解析器
pub struct TemplateResolver {}

impl TemplateResolver {
    pub fn new() -> Self {
        Self {}
    }

    /// 校验模板并产出有序树
    pub fn resolve(&self, template: &WorkflowTemplate) -> LedgerResult<ResolvedTemplate> {
        let template_id = template.id.as_str();

        if template.steps.is_empty() {
            return Err(self.reject(template_id, "模板没有任何工序节点".to_string()));
        }

        // 1. ID 唯一 + 归属
        let mut by_id: HashMap<&str, &WorkflowStep> = HashMap::with_capacity(template.steps.len());
        for step in &template.steps {
            if step.template_id != template.id {
                return Err(self.reject(
                    template_id,
                    format!("节点 {} 属于模板 {}", step.id, step.template_id),
                ));
            }
            if by_id.insert(step.id.as_str(), step).is_some() {
                return Err(self.reject(template_id, format!("节点ID重复: {}", step.id)));
            }
        }

        // 2. 唯一根节点
        let roots: Vec<&WorkflowStep> = template.steps.iter().filter(|s| s.is_root()).collect();
        let root = match roots.as_slice() {
            [] => return Err(self.reject(template_id, "缺少根节点".to_string())),
            [only] => *only,
            many => {
                return Err(self.reject(
                    template_id,
                    format!("存在 {} 个根节点", many.len()),
                ))
            }
        };
        if root.operation_type != OperationType::Forging {
            return Err(self.reject(
                template_id,
                format!("根节点必须为 FORGING, 实际为 {}", root.operation_type),
            ));
        }
        if root.tree_level != 0 {
            return Err(self.reject(
                template_id,
                format!("根节点 tree_level 必须为 0, 实际为 {}", root.tree_level),
            ));
        }

        // 3. 父节点存在 + 祖先链无环 + 层级连续
        for step in &template.steps {
            let Some(parent_id) = step.parent_step_id.as_deref() else {
                continue;
            };
            let parent = by_id.get(parent_id).ok_or_else(|| {
                self.reject(
                    template_id,
                    format!("节点 {} 的父节点 {} 不存在", step.id, parent_id),
                )
            })?;

            self.check_acyclic(template_id, step, &by_id)?;

            if step.tree_level != parent.tree_level + 1 {
                return Err(self.reject(
                    template_id,
                    format!(
                        "节点 {} tree_level={} 与父节点 tree_level={} 不连续",
                        step.id, step.tree_level, parent.tree_level
                    ),
                ));
            }
        }

        // 4. 层序展开 (兄弟节点确定性排序)
        let mut child_map: HashMap<&str, Vec<&WorkflowStep>> = HashMap::new();
        for step in &template.steps {
            if let Some(parent_id) = step.parent_step_id.as_deref() {
                child_map.entry(parent_id).or_default().push(step);
            }
        }
        for list in child_map.values_mut() {
            list.sort_by(|a, b| compare_siblings(*a, *b));
        }

        let mut nodes: Vec<WorkflowStep> = Vec::with_capacity(template.steps.len());
        let mut index_of: HashMap<String, usize> = HashMap::new();
        let mut children: HashMap<String, Vec<usize>> = HashMap::new();
        let mut queue: VecDeque<&WorkflowStep> = VecDeque::from([root]);

        while let Some(step) = queue.pop_front() {
            let idx = nodes.len();
            index_of.insert(step.id.clone(), idx);
            if let Some(parent_id) = &step.parent_step_id {
                children.entry(parent_id.clone()).or_default().push(idx);
            }
            nodes.push(step.clone());
            if let Some(kids) = child_map.get(step.id.as_str()) {
                queue.extend(kids.iter().copied());
            }
        }

        if nodes.len() != template.steps.len() {
            return Err(self.reject(
                template_id,
                format!(
                    "存在 {} 个节点无法从根节点到达",
                    template.steps.len() - nodes.len()
                ),
            ));
        }

        debug!(
            template_id = %template_id,
            node_count = nodes.len(),
            "工艺模板解析完成"
        );

        Ok(ResolvedTemplate {
            template_id: template.id.clone(),
            tenant_id: template.tenant_id,
            nodes,
            children,
        })
    }

    /// 祖先链回访自身即为环
    fn check_acyclic(
        &self,
        template_id: &str,
        step: &WorkflowStep,
        by_id: &HashMap<&str, &WorkflowStep>,
    ) -> LedgerResult<()> {
        let mut visited: HashSet<&str> = HashSet::from([step.id.as_str()]);
        let mut cursor = step.parent_step_id.as_deref();

        while let Some(id) = cursor {
            if !visited.insert(id) {
                return Err(self.reject(
                    template_id,
                    format!("节点 {} 的祖先链存在环", step.id),
                ));
            }
            cursor = by_id.get(id).and_then(|s| s.parent_step_id.as_deref());
        }
        Ok(())
    }

    fn reject(&self, template_id: &str, reason: String) -> LedgerError {
        warn!(template_id = %template_id, reason = %reason, "工艺模板校验失败");
        LedgerError::invalid_template(template_id, reason)
    }
}

impl Default for TemplateResolver {
    fn default() -> Self {
        Self::new()
    }
}

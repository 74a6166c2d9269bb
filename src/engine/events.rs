// ==========================================
// 锻造生产追溯系统 - 引擎层事件发布
// ==========================================
// 职责: 定义流程事件发布 trait, 订单汇总通过它观察流程状态变化
// 说明: Engine 层定义 trait, 上层按需实现 (如消息通知、订单状态回写)
// ==========================================

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;

// ==========================================
// 流程事件类型
// ==========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkflowEventType {
    /// 步骤激活 (PENDING → IN_PROGRESS)
    StepActivated,
    /// 流程开始 (NOT_STARTED → IN_PROGRESS)
    WorkflowStarted,
    /// 步骤完工
    StepCompleted,
    /// 流程完工
    WorkflowCompleted,
    /// 账户件数变化 (领用 / 完工 / 回池)
    PiecesChanged,
}

impl WorkflowEventType {
    pub fn as_str(&self) -> &str {
        match self {
            WorkflowEventType::StepActivated => "StepActivated",
            WorkflowEventType::WorkflowStarted => "WorkflowStarted",
            WorkflowEventType::StepCompleted => "StepCompleted",
            WorkflowEventType::WorkflowCompleted => "WorkflowCompleted",
            WorkflowEventType::PiecesChanged => "PiecesChanged",
        }
    }

    /// 是否改变了流程级状态 (订单汇总只关心这类事件)
    pub fn changes_workflow_status(&self) -> bool {
        matches!(
            self,
            WorkflowEventType::WorkflowStarted | WorkflowEventType::WorkflowCompleted
        )
    }
}

/// 流程事件
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEvent {
    pub tenant_id: i64,
    pub item_workflow_id: String,
    pub event_type: WorkflowEventType,
    /// 步骤级事件的步骤ID
    pub step_id: Option<String>,
    /// 触发事件的工序实体ID
    pub entity_id: Option<String>,
    pub occurred_at: NaiveDateTime,
}

impl WorkflowEvent {
    pub fn workflow(
        tenant_id: i64,
        item_workflow_id: impl Into<String>,
        event_type: WorkflowEventType,
        occurred_at: NaiveDateTime,
    ) -> Self {
        Self {
            tenant_id,
            item_workflow_id: item_workflow_id.into(),
            event_type,
            step_id: None,
            entity_id: None,
            occurred_at,
        }
    }

    pub fn step(
        tenant_id: i64,
        item_workflow_id: impl Into<String>,
        event_type: WorkflowEventType,
        step_id: impl Into<String>,
        entity_id: Option<String>,
        occurred_at: NaiveDateTime,
    ) -> Self {
        Self {
            tenant_id,
            item_workflow_id: item_workflow_id.into(),
            event_type,
            step_id: Some(step_id.into()),
            entity_id,
            occurred_at,
        }
    }
}

// ==========================================
// 事件发布 Trait
// ==========================================

/// 流程事件发布者
///
/// 事件在写事务提交之后发布; 发布失败只记日志, 不回滚账本
pub trait WorkflowEventPublisher: Send + Sync {
    fn publish(&self, event: &WorkflowEvent) -> Result<(), Box<dyn Error + Send + Sync>>;
}

/// 空操作事件发布者 (单元测试 / 无订阅方)
#[derive(Debug, Clone, Default)]
pub struct NoOpEventPublisher;

impl WorkflowEventPublisher for NoOpEventPublisher {
    fn publish(&self, event: &WorkflowEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
        tracing::debug!(
            item_workflow_id = %event.item_workflow_id,
            event_type = event.event_type.as_str(),
            "NoOpEventPublisher: 跳过事件发布"
        );
        Ok(())
    }
}

/// 可选的事件发布者包装
pub struct OptionalEventPublisher {
    inner: Option<Arc<dyn WorkflowEventPublisher>>,
}

impl OptionalEventPublisher {
    pub fn with_publisher(publisher: Arc<dyn WorkflowEventPublisher>) -> Self {
        Self {
            inner: Some(publisher),
        }
    }

    pub fn none() -> Self {
        Self { inner: None }
    }

    /// 逐个发布; 失败记 warn 后继续
    pub fn publish_all(&self, events: &[WorkflowEvent]) {
        let Some(publisher) = &self.inner else {
            tracing::debug!(count = events.len(), "未配置发布者, 跳过流程事件");
            return;
        };
        for event in events {
            if let Err(e) = publisher.publish(event) {
                tracing::warn!(
                    item_workflow_id = %event.item_workflow_id,
                    event_type = event.event_type.as_str(),
                    error = %e,
                    "流程事件发布失败"
                );
            }
        }
    }

    pub fn is_configured(&self) -> bool {
        self.inner.is_some()
    }
}

impl Default for OptionalEventPublisher {
    fn default() -> Self {
        Self::none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    fn ts() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 2, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap()
    }

    #[derive(Default)]
    struct Recording {
        seen: Mutex<Vec<WorkflowEventType>>,
    }

    impl WorkflowEventPublisher for Recording {
        fn publish(&self, event: &WorkflowEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
            self.seen.lock().unwrap().push(event.event_type);
            Ok(())
        }
    }

    struct Failing;

    impl WorkflowEventPublisher for Failing {
        fn publish(&self, _event: &WorkflowEvent) -> Result<(), Box<dyn Error + Send + Sync>> {
            Err("broker down".into())
        }
    }

    #[test]
    fn test_noop_publisher() {
        let event = WorkflowEvent::workflow(1, "wf", WorkflowEventType::WorkflowStarted, ts());
        assert!(NoOpEventPublisher.publish(&event).is_ok());
    }

    #[test]
    fn test_optional_publisher_forwards_in_order() {
        let recording = Arc::new(Recording::default());
        let publisher = OptionalEventPublisher::with_publisher(recording.clone());
        assert!(publisher.is_configured());

        publisher.publish_all(&[
            WorkflowEvent::step(1, "wf", WorkflowEventType::StepActivated, "s1", None, ts()),
            WorkflowEvent::workflow(1, "wf", WorkflowEventType::WorkflowStarted, ts()),
        ]);
        assert_eq!(
            *recording.seen.lock().unwrap(),
            vec![WorkflowEventType::StepActivated, WorkflowEventType::WorkflowStarted]
        );
    }

    #[test]
    fn test_publish_failure_is_swallowed() {
        let publisher = OptionalEventPublisher::with_publisher(Arc::new(Failing));
        publisher.publish_all(&[WorkflowEvent::workflow(
            1,
            "wf",
            WorkflowEventType::WorkflowCompleted,
            ts(),
        )]);
        assert!(!OptionalEventPublisher::none().is_configured());
    }

    #[test]
    fn test_workflow_status_events() {
        assert!(WorkflowEventType::WorkflowCompleted.changes_workflow_status());
        assert!(!WorkflowEventType::PiecesChanged.changes_workflow_status());
    }
}

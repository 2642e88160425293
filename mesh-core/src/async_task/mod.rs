//! Async Human-Task Service (C9): task-group state machine for stimuli that
//! fan out into N pending human-response tasks, aggregated once every task
//! in the group is `completed` or `timed_out`.
//!
//! Grounded in idiom on `loom::channels::NamedBarrierValue` again — a task
//! group's "all outstanding human tasks done" condition is structurally the
//! same barrier as peer-subtask aggregation (`task::barrier`) — and on
//! `loom::memory::MemorySaver` for the in-memory store shape
//! (`Mutex<HashMap<...>>`).

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Completed,
    TimedOut,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingHumanTask {
    pub task_id: String,
    pub group_id: String,
    pub action_name: String,
    pub action_params: Value,
    pub action_idx: u32,
    pub action_list_id: String,
    pub originator: String,
    pub async_response_id: String,
    pub user_form: Value,
    pub approver_list: Vec<String>,
    pub status: TaskStatus,
    pub timeout_time: i64,
    pub user_response: Option<Value>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TaskGroup {
    pub group_id: String,
    pub stimulus_uuid: String,
    pub session_id: String,
    pub gateway_id: String,
    pub task_ids: Vec<String>,
    pub status: TaskStatus,
}

/// One raw async-response descriptor, as handed to `create_task_group` —
/// the caller has already decided how many human tasks this stimulus needs.
#[derive(Clone, Debug)]
pub struct AsyncResponseSpec {
    pub action_name: String,
    pub action_params: Value,
    pub action_idx: u32,
    pub action_list_id: String,
    pub originator: String,
    pub async_response_id: String,
    pub user_form: Value,
    pub approver_list: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum AsyncTaskError {
    #[error("task {0} not found")]
    TaskNotFound(String),
    #[error("group {0} not found")]
    GroupNotFound(String),
    #[error("storage error: {0}")]
    Storage(String),
}

/// One completed-or-timed-out task's contribution to the aggregated
/// publish (spec §4.9).
#[derive(Clone, Debug, Serialize)]
pub struct AggregatedTaskResult {
    pub action_name: String,
    pub action_params: Value,
    pub action_idx: u32,
    pub action_list_id: String,
    pub originator: String,
    pub async_response_id: String,
    pub user_response: Option<Value>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AggregatedGroupResult {
    pub group_id: String,
    pub results: Vec<AggregatedTaskResult>,
    pub timed_out: bool,
}

/// Minimal projection for `get_pending_forms` (spec §4.9).
#[derive(Clone, Debug, Serialize)]
pub struct PendingFormSummary {
    pub task_id: String,
    pub session_id: String,
    pub stimulus_uuid: String,
    pub user_form: Value,
}

/// Pluggable storage contract (`original_source`'s
/// `storage_providers/{base,memory,mongodb}_storage_provider.py`); this spec
/// implements only the in-memory provider, leaving room for a document-store
/// one behind the same trait.
#[async_trait]
pub trait AsyncTaskStore: Send + Sync {
    async fn put_task(&self, task: PendingHumanTask) -> Result<(), AsyncTaskError>;
    async fn get_task(&self, task_id: &str) -> Result<PendingHumanTask, AsyncTaskError>;
    async fn update_task(&self, task: PendingHumanTask) -> Result<(), AsyncTaskError>;
    async fn put_group(&self, group: TaskGroup) -> Result<(), AsyncTaskError>;
    async fn get_group(&self, group_id: &str) -> Result<TaskGroup, AsyncTaskError>;
    async fn update_group(&self, group: TaskGroup) -> Result<(), AsyncTaskError>;
    async fn all_pending_tasks(&self) -> Result<Vec<PendingHumanTask>, AsyncTaskError>;
    async fn tasks_for_approver(&self, approver_identity: &str) -> Result<Vec<PendingHumanTask>, AsyncTaskError>;
}

#[derive(Default)]
pub struct InMemoryAsyncTaskStore {
    tasks: dashmap::DashMap<String, PendingHumanTask>,
    groups: dashmap::DashMap<String, TaskGroup>,
}

impl InMemoryAsyncTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AsyncTaskStore for InMemoryAsyncTaskStore {
    async fn put_task(&self, task: PendingHumanTask) -> Result<(), AsyncTaskError> {
        self.tasks.insert(task.task_id.clone(), task);
        Ok(())
    }

    async fn get_task(&self, task_id: &str) -> Result<PendingHumanTask, AsyncTaskError> {
        self.tasks
            .get(task_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| AsyncTaskError::TaskNotFound(task_id.to_string()))
    }

    async fn update_task(&self, task: PendingHumanTask) -> Result<(), AsyncTaskError> {
        self.tasks.insert(task.task_id.clone(), task);
        Ok(())
    }

    async fn put_group(&self, group: TaskGroup) -> Result<(), AsyncTaskError> {
        self.groups.insert(group.group_id.clone(), group);
        Ok(())
    }

    async fn get_group(&self, group_id: &str) -> Result<TaskGroup, AsyncTaskError> {
        self.groups
            .get(group_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| AsyncTaskError::GroupNotFound(group_id.to_string()))
    }

    async fn update_group(&self, group: TaskGroup) -> Result<(), AsyncTaskError> {
        self.groups.insert(group.group_id.clone(), group);
        Ok(())
    }

    async fn all_pending_tasks(&self) -> Result<Vec<PendingHumanTask>, AsyncTaskError> {
        Ok(self
            .tasks
            .iter()
            .filter(|e| e.value().status == TaskStatus::Pending)
            .map(|e| e.value().clone())
            .collect())
    }

    async fn tasks_for_approver(&self, approver_identity: &str) -> Result<Vec<PendingHumanTask>, AsyncTaskError> {
        Ok(self
            .tasks
            .iter()
            .filter(|e| e.value().status == TaskStatus::Pending && e.value().approver_list.iter().any(|a| a == approver_identity))
            .map(|e| e.value().clone())
            .collect())
    }
}

/// Wall-clock source for `timeout_time`/sweeper comparisons; pluggable so
/// tests can control time without sleeping.
pub fn system_clock() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs() as i64
}

pub struct AsyncTaskService<S: AsyncTaskStore> {
    store: S,
    task_timeout_seconds: i64,
    clock: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl<S: AsyncTaskStore> AsyncTaskService<S> {
    pub fn new(store: S, task_timeout_seconds: i64) -> Self {
        Self {
            store,
            task_timeout_seconds,
            clock: Box::new(system_clock),
        }
    }

    #[cfg(test)]
    fn with_clock(store: S, task_timeout_seconds: i64, clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        Self {
            store,
            task_timeout_seconds,
            clock: Box::new(clock),
        }
    }

    fn now(&self) -> i64 {
        (self.clock)()
    }

    pub async fn create_task_group(
        &self,
        stimulus_uuid: impl Into<String>,
        session_id: impl Into<String>,
        gateway_id: impl Into<String>,
        responses: Vec<AsyncResponseSpec>,
        task_id_factory: impl Fn() -> String,
    ) -> Result<TaskGroup, AsyncTaskError> {
        let group_id = task_id_factory();
        let stimulus_uuid = stimulus_uuid.into();
        let session_id = session_id.into();
        let gateway_id = gateway_id.into();
        let timeout_time = self.now() + self.task_timeout_seconds;

        let mut task_ids = Vec::with_capacity(responses.len());
        for response in responses {
            let task_id = task_id_factory();
            self.store
                .put_task(PendingHumanTask {
                    task_id: task_id.clone(),
                    group_id: group_id.clone(),
                    action_name: response.action_name,
                    action_params: response.action_params,
                    action_idx: response.action_idx,
                    action_list_id: response.action_list_id,
                    originator: response.originator,
                    async_response_id: response.async_response_id,
                    user_form: response.user_form,
                    approver_list: response.approver_list,
                    status: TaskStatus::Pending,
                    timeout_time,
                    user_response: None,
                })
                .await?;
            task_ids.push(task_id);
        }

        let group = TaskGroup {
            group_id,
            stimulus_uuid,
            session_id,
            gateway_id,
            task_ids,
            status: TaskStatus::Pending,
        };
        self.store.put_group(group.clone()).await?;
        Ok(group)
    }

    /// Returns `Some(aggregate)` once every task in the group has settled
    /// (`completed` or `timed_out`) — the caller publishes it on the
    /// orchestrator async-response topic and should not call again for the
    /// same group.
    async fn maybe_aggregate(&self, group_id: &str, timed_out: bool) -> Result<Option<AggregatedGroupResult>, AsyncTaskError> {
        let mut group = self.store.get_group(group_id).await?;
        let mut results = Vec::with_capacity(group.task_ids.len());
        let mut all_settled = true;
        for task_id in &group.task_ids {
            let task = self.store.get_task(task_id).await?;
            match task.status {
                TaskStatus::Pending => all_settled = false,
                TaskStatus::Completed | TaskStatus::TimedOut => results.push(AggregatedTaskResult {
                    action_name: task.action_name,
                    action_params: task.action_params,
                    action_idx: task.action_idx,
                    action_list_id: task.action_list_id,
                    originator: task.originator,
                    async_response_id: task.async_response_id,
                    user_response: task.user_response,
                }),
            }
        }

        if !all_settled {
            return Ok(None);
        }

        group.status = TaskStatus::Completed;
        self.store.update_group(group).await?;
        Ok(Some(AggregatedGroupResult {
            group_id: group_id.to_string(),
            results,
            timed_out,
        }))
    }

    pub async fn user_response(&self, task_id: &str, form_data: Value) -> Result<Option<AggregatedGroupResult>, AsyncTaskError> {
        let mut task = self.store.get_task(task_id).await?;
        task.status = TaskStatus::Completed;
        task.user_response = Some(form_data);
        let group_id = task.group_id.clone();
        self.store.update_task(task).await?;
        self.maybe_aggregate(&group_id, false).await
    }

    /// Sweeps every pending task past its `timeout_time`, marking it
    /// `timed_out`; returns any groups that newly became fully settled as a
    /// result (spec §4.9 step 3).
    pub async fn sweep_timeouts(&self) -> Result<Vec<AggregatedGroupResult>, AsyncTaskError> {
        let now = self.now();
        let mut newly_settled = Vec::new();
        let mut touched_groups: HashMap<String, ()> = HashMap::new();

        for mut task in self.store.all_pending_tasks().await? {
            if task.timeout_time >= now {
                continue;
            }
            task.status = TaskStatus::TimedOut;
            let group_id = task.group_id.clone();
            self.store.update_task(task).await?;
            touched_groups.insert(group_id, ());
        }

        for group_id in touched_groups.into_keys() {
            if let Some(aggregate) = self.maybe_aggregate(&group_id, true).await? {
                newly_settled.push(aggregate);
            }
        }
        Ok(newly_settled)
    }

    pub async fn get_pending_forms(&self, approver_identity: &str) -> Result<Vec<PendingFormSummary>, AsyncTaskError> {
        let tasks = self.store.tasks_for_approver(approver_identity).await?;
        let mut out = Vec::with_capacity(tasks.len());
        for task in tasks {
            let group = self.store.get_group(&task.group_id).await?;
            out.push(PendingFormSummary {
                task_id: task.task_id,
                session_id: group.session_id,
                stimulus_uuid: group.stimulus_uuid,
                user_form: task.user_form,
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn spec(approver: &str) -> AsyncResponseSpec {
        AsyncResponseSpec {
            action_name: "approve_purchase".to_string(),
            action_params: Value::Null,
            action_idx: 0,
            action_list_id: "list-1".to_string(),
            originator: "agent-1".to_string(),
            async_response_id: "ar-1".to_string(),
            user_form: serde_json::json!({"question": "approve?"}),
            approver_list: vec![approver.to_string()],
        }
    }

    fn id_factory() -> impl Fn() -> String {
        let counter = AtomicU64::new(0);
        move || format!("id-{}", counter.fetch_add(1, Ordering::SeqCst))
    }

    #[tokio::test]
    async fn single_task_group_aggregates_on_user_response() {
        let service = AsyncTaskService::with_clock(InMemoryAsyncTaskStore::new(), 3600, || 0);
        let group = service
            .create_task_group("stim-1", "sess-1", "gw-1", vec![spec("alice")], id_factory())
            .await
            .unwrap();

        let task_id = group.task_ids[0].clone();
        let aggregate = service
            .user_response(&task_id, serde_json::json!({"approved": true}))
            .await
            .unwrap();

        let aggregate = aggregate.expect("single-task group settles immediately");
        assert_eq!(aggregate.results.len(), 1);
        assert!(!aggregate.timed_out);
    }

    #[tokio::test]
    async fn waits_for_all_tasks_in_a_multi_task_group() {
        let service = AsyncTaskService::with_clock(InMemoryAsyncTaskStore::new(), 3600, || 0);
        let group = service
            .create_task_group("stim-1", "sess-1", "gw-1", vec![spec("alice"), spec("bob")], id_factory())
            .await
            .unwrap();

        let first = service.user_response(&group.task_ids[0], serde_json::json!("yes")).await.unwrap();
        assert!(first.is_none(), "should not aggregate until both respond");

        let second = service.user_response(&group.task_ids[1], serde_json::json!("no")).await.unwrap();
        assert_eq!(second.unwrap().results.len(), 2);
    }

    #[tokio::test]
    async fn sweep_timeouts_settles_expired_groups() {
        let service = AsyncTaskService::with_clock(InMemoryAsyncTaskStore::new(), -1, || 100);
        let group = service
            .create_task_group("stim-1", "sess-1", "gw-1", vec![spec("alice")], id_factory())
            .await
            .unwrap();
        let _ = group;

        let settled = service.sweep_timeouts().await.unwrap();
        assert_eq!(settled.len(), 1);
        assert!(settled[0].timed_out);
    }

    #[tokio::test]
    async fn get_pending_forms_filters_by_approver_identity() {
        let service = AsyncTaskService::with_clock(InMemoryAsyncTaskStore::new(), 3600, || 0);
        service
            .create_task_group("stim-1", "sess-1", "gw-1", vec![spec("alice")], id_factory())
            .await
            .unwrap();

        assert_eq!(service.get_pending_forms("alice").await.unwrap().len(), 1);
        assert_eq!(service.get_pending_forms("carol").await.unwrap().len(), 0);
    }
}

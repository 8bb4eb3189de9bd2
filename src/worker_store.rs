//! Worker data store (external collaborator).
//!
//! The core never writes worker fields other than status-terminal
//! transitions during termination. Modeled as a trait so the reaper and
//! redistributor can be tested against an in-memory double without a real
//! task store.

use crate::types::{ProjectId, WorkerId, WorkerRecord, WorkerStatus};
use async_trait::async_trait;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub task_id: String,
    pub worker_id: WorkerId,
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Dispatched,
    Error,
    Done,
}

#[async_trait]
pub trait WorkerStore: Send + Sync {
    async fn get_worker(&self, worker_id: &str) -> Option<WorkerRecord>;
    async fn get_tasks_for_worker(&self, worker_id: &str, status: TaskStatus) -> Vec<TaskRecord>;
    async fn fail_task(&self, task_id: &str);
    async fn release_claims(&self, worker_id: &str);
    async fn update_worker_status(&self, worker_id: &str, status: WorkerStatus);
}

/// In-memory worker store: backs the admin demo binary and the test suite.
/// There is no real external task store in this repo (out of scope).
pub struct InMemoryWorkerStore {
    inner: parking_lot::RwLock<Inner>,
}

struct Inner {
    workers: HashMap<WorkerId, WorkerRecord>,
    tasks: HashMap<String, TaskRecord>,
}

impl Default for InMemoryWorkerStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWorkerStore {
    pub fn new() -> Self {
        Self {
            inner: parking_lot::RwLock::new(Inner {
                workers: HashMap::new(),
                tasks: HashMap::new(),
            }),
        }
    }

    pub fn insert_worker(&self, worker_id: WorkerId, status: WorkerStatus, project_id: Option<ProjectId>) {
        self.inner.write().workers.insert(
            worker_id.clone(),
            WorkerRecord {
                worker_id,
                status,
                project_id,
            },
        );
    }

    pub fn insert_task(&self, task_id: &str, worker_id: &str, status: TaskStatus) {
        self.inner.write().tasks.insert(
            task_id.to_string(),
            TaskRecord {
                task_id: task_id.to_string(),
                worker_id: worker_id.to_string(),
                status,
            },
        );
    }
}

#[async_trait]
impl WorkerStore for InMemoryWorkerStore {
    async fn get_worker(&self, worker_id: &str) -> Option<WorkerRecord> {
        self.inner.read().workers.get(worker_id).cloned()
    }

    async fn get_tasks_for_worker(&self, worker_id: &str, status: TaskStatus) -> Vec<TaskRecord> {
        self.inner
            .read()
            .tasks
            .values()
            .filter(|t| t.worker_id == worker_id && t.status == status)
            .cloned()
            .collect()
    }

    async fn fail_task(&self, task_id: &str) {
        if let Some(task) = self.inner.write().tasks.get_mut(task_id) {
            task.status = TaskStatus::Error;
        }
    }

    async fn release_claims(&self, _worker_id: &str) {
        // No claim table in the in-memory double; the real store owns this.
    }

    async fn update_worker_status(&self, worker_id: &str, status: WorkerStatus) {
        if let Some(w) = self.inner.write().workers.get_mut(worker_id) {
            w.status = status;
        }
    }
}

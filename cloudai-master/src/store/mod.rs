//! Persistent mirror (spec §3/§6): the in-memory state is authoritative and
//! always consulted first; every mutation is additionally mirrored
//! best-effort to MongoDB via [`mongo::MongoMirror`]. A mirror write
//! failure never fails the caller's operation (spec §7 `Transient`): it
//! logs a warning and moves on, matching the teacher's repo-trait-over-a-
//! pool pattern generalized from a SQL pool to a Mongo `Database` handle.

pub mod mongo;

use cloudai_common::model::{Assignment, Task, TaskId, TaskResult, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::warn;

pub struct TaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
    assignments: RwLock<HashMap<TaskId, Assignment>>,
    results: RwLock<HashMap<TaskId, TaskResult>>,
    mirror: Option<Arc<mongo::MongoMirror>>,
}

impl TaskStore {
    pub fn new(mirror: Option<Arc<mongo::MongoMirror>>) -> Arc<Self> {
        Arc::new(TaskStore {
            tasks: RwLock::new(HashMap::new()),
            assignments: RwLock::new(HashMap::new()),
            results: RwLock::new(HashMap::new()),
            mirror,
        })
    }

    pub async fn insert_task(&self, task: Task) {
        if let Some(mirror) = &self.mirror {
            if let Err(err) = mirror.upsert_task(&task).await {
                warn!(task_id = %task.task_id, error = %err, "task mirror write failed");
            }
        }
        self.tasks.write().await.insert(task.task_id, task);
    }

    pub async fn update_task<F>(&self, task_id: TaskId, f: F) -> Option<Task>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write().await;
        let task = tasks.get_mut(&task_id)?;
        f(task);
        let updated = task.clone();
        drop(tasks);
        if let Some(mirror) = &self.mirror {
            if let Err(err) = mirror.upsert_task(&updated).await {
                warn!(task_id = %task_id, error = %err, "task mirror write failed");
            }
        }
        Some(updated)
    }

    pub async fn get_task(&self, task_id: TaskId) -> Option<Task> {
        self.tasks.read().await.get(&task_id).cloned()
    }

    pub async fn list_tasks(&self, status_filter: Option<TaskStatus>) -> Vec<Task> {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| status_filter.is_none_or(|s| t.status == s))
            .cloned()
            .collect()
    }

    pub async fn upsert_assignment(&self, assignment: Assignment) {
        if let Some(mirror) = &self.mirror {
            if let Err(err) = mirror.upsert_assignment(&assignment).await {
                warn!(assignment_id = %assignment.assignment_id.0, error = %err, "assignment mirror write failed");
            }
        }
        self.assignments
            .write()
            .await
            .insert(assignment.task_id, assignment);
    }

    pub async fn update_assignment<F>(&self, task_id: TaskId, f: F) -> Option<Assignment>
    where
        F: FnOnce(&mut Assignment),
    {
        let mut assignments = self.assignments.write().await;
        let assignment = assignments.get_mut(&task_id)?;
        f(assignment);
        let updated = assignment.clone();
        drop(assignments);
        if let Some(mirror) = &self.mirror {
            if let Err(err) = mirror.upsert_assignment(&updated).await {
                warn!(task_id = %task_id, error = %err, "assignment mirror write failed");
            }
        }
        Some(updated)
    }

    pub async fn get_assignment(&self, task_id: TaskId) -> Option<Assignment> {
        self.assignments.read().await.get(&task_id).cloned()
    }

    pub async fn insert_result(&self, result: TaskResult) {
        if let Some(mirror) = &self.mirror {
            if let Err(err) = mirror.upsert_result(&result).await {
                warn!(task_id = %result.task_id, error = %err, "result mirror write failed");
            }
        }
        self.results.write().await.insert(result.task_id, result);
    }

    pub async fn get_result(&self, task_id: TaskId) -> Option<TaskResult> {
        self.results.read().await.get(&task_id).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_r::test;
    use chrono::Utc;
    use cloudai_common::model::{ResourceVector, TaskClass};

    fn sample_task() -> Task {
        Task {
            task_id: TaskId::new(),
            image: "alpine".into(),
            command: None,
            requirements: ResourceVector {
                cpu: 1.0,
                memory: 1.0,
                storage: 1.0,
                gpu: 0.0,
            },
            user_id: "u1".into(),
            tag: None,
            k_value: 2.0,
            task_class: TaskClass::CpuLight,
            status: TaskStatus::Queued,
            arrival: Utc::now(),
            started: None,
            completed: None,
            deadline: Utc::now(),
            retry_count: 0,
            last_error: None,
        }
    }

    #[test]
    async fn insert_then_get_round_trips() {
        let store = TaskStore::new(None);
        let task = sample_task();
        let task_id = task.task_id;
        store.insert_task(task).await;
        let fetched = store.get_task(task_id).await.unwrap();
        assert_eq!(fetched.status, TaskStatus::Queued);
    }

    #[test]
    async fn update_task_mutates_in_place() {
        let store = TaskStore::new(None);
        let task = sample_task();
        let task_id = task.task_id;
        store.insert_task(task).await;
        store
            .update_task(task_id, |t| t.status = TaskStatus::Running)
            .await;
        assert_eq!(
            store.get_task(task_id).await.unwrap().status,
            TaskStatus::Running
        );
    }

    #[test]
    async fn list_tasks_filters_by_status() {
        let store = TaskStore::new(None);
        let mut t1 = sample_task();
        t1.status = TaskStatus::Running;
        let t2 = sample_task();
        store.insert_task(t1).await;
        store.insert_task(t2).await;
        let running = store.list_tasks(Some(TaskStatus::Running)).await;
        assert_eq!(running.len(), 1);
        let all = store.list_tasks(None).await;
        assert_eq!(all.len(), 2);
    }
}

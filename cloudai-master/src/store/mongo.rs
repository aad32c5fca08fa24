//! Best-effort MongoDB mirror of the in-memory state, spec §6 "Persistent
//! state layout": one collection per entity, non-transactional, keyed on
//! the entity's id. A write failure here maps to `CloudAiError::Transient`
//! for callers that surface it, but `store::TaskStore` already treats it as
//! warn-and-continue since the in-memory state stays authoritative.

use cloudai_common::model::{Assignment, Task, TaskResult, Worker, WorkerId};
use futures::TryStreamExt;
use mongodb::bson::doc;
use mongodb::options::ReplaceOptions;
use mongodb::{Client, Collection, Database};

pub struct MongoMirror {
    tasks: Collection<Task>,
    assignments: Collection<Assignment>,
    results: Collection<TaskResult>,
    workers: Collection<Worker>,
}

impl MongoMirror {
    pub async fn connect(uri: &str, database: &str) -> Result<Self, mongodb::error::Error> {
        let client = Client::with_uri_str(uri).await?;
        let db: Database = client.database(database);
        Ok(MongoMirror {
            tasks: db.collection("tasks"),
            assignments: db.collection("assignments"),
            results: db.collection("results"),
            workers: db.collection("workers"),
        })
    }

    /// Spec §4.1 `PreAuthorize`/registration handshake/heartbeat persistence.
    pub async fn upsert_worker(&self, worker: &Worker) -> Result<(), mongodb::error::Error> {
        self.workers
            .replace_one(doc! { "workerId": worker.worker_id.0.clone() }, worker)
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await?;
        Ok(())
    }

    /// Spec §4.1 `RevokeAndUnregister`.
    pub async fn delete_worker(&self, worker_id: &WorkerId) -> Result<(), mongodb::error::Error> {
        self.workers
            .delete_one(doc! { "workerId": worker_id.0.clone() })
            .await?;
        Ok(())
    }

    /// Rehydration on master restart, spec §3: workers are read back with
    /// `active` left however they were last persisted; the registry resets
    /// it to `false` until a fresh heartbeat arrives.
    pub async fn list_workers(&self) -> Result<Vec<Worker>, mongodb::error::Error> {
        let cursor = self.workers.find(doc! {}).await?;
        cursor.try_collect().await
    }

    pub async fn upsert_task(&self, task: &Task) -> Result<(), mongodb::error::Error> {
        self.tasks
            .replace_one(doc! { "taskId": task.task_id.0.to_string() }, task)
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await?;
        Ok(())
    }

    pub async fn upsert_assignment(
        &self,
        assignment: &Assignment,
    ) -> Result<(), mongodb::error::Error> {
        self.assignments
            .replace_one(
                doc! { "assignmentId": assignment.assignment_id.0.to_string() },
                assignment,
            )
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await?;
        Ok(())
    }

    pub async fn upsert_result(&self, result: &TaskResult) -> Result<(), mongodb::error::Error> {
        self.results
            .replace_one(doc! { "taskId": result.task_id.0.to_string() }, result)
            .with_options(ReplaceOptions::builder().upsert(true).build())
            .await?;
        Ok(())
    }
}

//! Async task queue adapter
//!
//! Lets scans run detached from any client connection. Submitting returns
//! a task id immediately; the scan executes on a spawned worker that
//! walks the task state machine:
//!
//! ```text
//! queued --dispatch--> progress --complete--> success
//!                          |
//!                          +--error--> retry (bounded, backed off)
//!                          |              +--exhausted--> failure
//!                          +--cancel--> failure
//! ```
//!
//! Progress updates land on tier boundaries and on every open port; only
//! the latest value is observable through [`TaskQueue::poll`]. Retries
//! re-execute the scan from scratch. Finished records stay pollable for a
//! retention window and are then reaped.

use crate::engine::{ScanEngine, ScanRequest};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use netscout_core::{Error, EventSink, QueueConfig, ScanEvent, ScanRecord};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Task lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Progress,
    Success,
    Failure,
    Retry,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Success | TaskState::Failure)
    }
}

/// Observable task record, returned by [`TaskQueue::poll`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_id: Uuid,
    pub scan_id: Uuid,
    pub state: TaskState,
    /// 0..=100, latest value only
    pub progress: u8,
    pub message: String,
    pub retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ScanRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Event sink that folds scan events into task progress updates
struct ProgressSink {
    tasks: Arc<DashMap<Uuid, TaskRecord>>,
    task_id: Uuid,
}

impl EventSink for ProgressSink {
    fn emit(&self, event: ScanEvent) {
        let (progress, message) = match &event {
            ScanEvent::TierStart { priority, count, progress } => {
                (*progress, format!("scanning {} tier ({} ports)", priority, count))
            }
            ScanEvent::OpenPort { port_result, progress } => {
                (*progress, format!("open port {}", port_result.port))
            }
            ScanEvent::TierComplete { priority, progress, .. } => {
                (*progress, format!("{} tier complete", priority))
            }
            ScanEvent::ScanComplete { progress, .. } => (*progress, "scan complete".to_string()),
            _ => return,
        };

        if let Some(mut task) = self.tasks.get_mut(&self.task_id) {
            task.progress = progress.round().clamp(0.0, 100.0) as u8;
            task.message = message;
            task.updated_at = Utc::now();
        }
    }
}

/// In-process task broker over the scan engine
pub struct TaskQueue {
    engine: Arc<ScanEngine>,
    config: QueueConfig,
    tasks: Arc<DashMap<Uuid, TaskRecord>>,
    cancels: DashMap<Uuid, CancellationToken>,
}

impl TaskQueue {
    pub fn new(engine: Arc<ScanEngine>, config: QueueConfig) -> Self {
        Self {
            engine,
            config,
            tasks: Arc::new(DashMap::new()),
            cancels: DashMap::new(),
        }
    }

    /// Enqueue a scan; returns (task id, pre-assigned scan id)
    pub fn submit(self: &Arc<Self>, mut request: ScanRequest) -> (Uuid, Uuid) {
        let task_id = Uuid::new_v4();
        let scan_id = request.scan_id.unwrap_or_else(Uuid::new_v4);
        request.scan_id = Some(scan_id);

        self.tasks.insert(
            task_id,
            TaskRecord {
                task_id,
                scan_id,
                state: TaskState::Queued,
                progress: 0,
                message: "queued".to_string(),
                retries: 0,
                result: None,
                error: None,
                updated_at: Utc::now(),
            },
        );

        let cancel = CancellationToken::new();
        self.cancels.insert(task_id, cancel.clone());

        let queue = Arc::clone(self);
        tokio::spawn(async move {
            queue.run_task(task_id, request, cancel).await;
        });

        debug!("task {} queued (scan {})", task_id, scan_id);
        (task_id, scan_id)
    }

    /// Latest state of a task, if it exists and has not been reaped
    pub fn poll(&self, task_id: Uuid) -> Option<TaskRecord> {
        self.reap();
        self.tasks.get(&task_id).map(|t| t.clone())
    }

    /// Cancel a running task; it moves to `failure`
    pub fn cancel(&self, task_id: Uuid) -> bool {
        match self.cancels.get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop terminal records older than the retention window
    pub fn reap(&self) {
        let horizon = Utc::now()
            - chrono::Duration::seconds(self.config.retention_s.min(i64::MAX as u64) as i64);
        self.tasks
            .retain(|_, task| !(task.state.is_terminal() && task.updated_at < horizon));
    }

    async fn run_task(
        self: Arc<Self>,
        task_id: Uuid,
        request: ScanRequest,
        cancel: CancellationToken,
    ) {
        let backoff = Duration::from_secs(self.config.retry_backoff_s);
        let mut attempt: u32 = 0;

        loop {
            self.update(task_id, |task| {
                task.state = TaskState::Progress;
                task.message = if attempt == 0 {
                    "dispatched".to_string()
                } else {
                    format!("retry attempt {}", attempt)
                };
            });

            let sink = Arc::new(ProgressSink {
                tasks: Arc::clone(&self.tasks),
                task_id,
            });

            let outcome = self
                .engine
                .scan(request.clone(), sink, cancel.clone())
                .await;

            match outcome {
                Ok(record) => {
                    info!("task {} succeeded (scan {})", task_id, record.scan_id);
                    self.update(task_id, |task| {
                        task.state = TaskState::Success;
                        task.progress = 100;
                        task.message = "scan complete".to_string();
                        task.result = Some(record.clone());
                    });
                    break;
                }
                Err(Error::Cancelled) => {
                    info!("task {} cancelled", task_id);
                    self.update(task_id, |task| {
                        task.state = TaskState::Failure;
                        task.error = Some("cancelled".to_string());
                        task.message = "cancelled".to_string();
                    });
                    break;
                }
                Err(e) if e.is_client_error() => {
                    // Validation and resolution failures are never retried
                    warn!("task {} rejected: {}", task_id, e);
                    self.update(task_id, |task| {
                        task.state = TaskState::Failure;
                        task.error = Some(e.to_string());
                        task.message = "rejected".to_string();
                    });
                    break;
                }
                Err(e) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        warn!("task {} failed after {} retries: {}", task_id, attempt - 1, e);
                        self.update(task_id, |task| {
                            task.state = TaskState::Failure;
                            task.retries = attempt - 1;
                            task.error = Some(e.to_string());
                            task.message = "retries exhausted".to_string();
                        });
                        break;
                    }

                    warn!(
                        "task {} errored ({}); retry {} in {:?}",
                        task_id, e, attempt, backoff
                    );
                    self.update(task_id, |task| {
                        task.state = TaskState::Retry;
                        task.retries = attempt;
                        task.error = Some(e.to_string());
                        task.message = format!("retrying in {}s", backoff.as_secs());
                    });

                    tokio::select! {
                        _ = cancel.cancelled() => {
                            self.update(task_id, |task| {
                                task.state = TaskState::Failure;
                                task.error = Some("cancelled".to_string());
                                task.message = "cancelled".to_string();
                            });
                            break;
                        }
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
            }
        }

        self.cancels.remove(&task_id);
    }

    fn update(&self, task_id: Uuid, mutate: impl FnOnce(&mut TaskRecord)) {
        if let Some(mut task) = self.tasks.get_mut(&task_id) {
            mutate(&mut task);
            task.updated_at = Utc::now();
        }
    }
}

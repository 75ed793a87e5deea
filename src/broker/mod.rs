//! Active-task inspection through the broker control plane.
//!
//! Workers answer control commands broadcast on the broker. The probe asks
//! two questions:
//!
//! - **active_queues**: which queues does each worker consume from?
//! - **active**: which tasks is each of those workers executing right now?
//!
//! [`get_active_tasks`] combines the answers for one queue into a report
//! keyed by worker hostname. Inspection problems never abort a probe run:
//! the report degrades to empty mappings and carries the error line for the
//! caller to print.

pub mod pidbox;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BrokerError;
use crate::message::display_value;

pub use pidbox::RedisMailbox;

/// Placeholder substituted for argument values in the redacted report.
pub const REDACTED: &str = "REDACTED";

/// A queue binding reported by a worker.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WorkerQueue {
    pub name: String,
}

/// A task a worker reports as executing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ActiveTask {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub args: Option<Value>,
    #[serde(default)]
    pub kwargs: Option<Value>,
    #[serde(default)]
    pub hostname: Option<String>,
}

/// Control commands the inspector relies on.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Queue bindings of every worker that answers, keyed by worker name.
    async fn active_queues(&self) -> Result<BTreeMap<String, Vec<WorkerQueue>>, BrokerError>;

    /// Currently executing tasks of the named workers, keyed by worker name.
    async fn active(
        &self,
        workers: &[String],
    ) -> Result<BTreeMap<String, Vec<ActiveTask>>, BrokerError>;
}

/// Per-host list of `[task, args, kwargs]` lines.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ActiveTasks(BTreeMap<String, Vec<[String; 3]>>);

impl ActiveTasks {
    pub fn push(&mut self, hostname: &str, entry: [String; 3]) {
        self.0.entry(hostname.to_string()).or_default().push(entry);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Pretty JSON with 4-space indentation and sorted keys.
    pub fn to_pretty_json(&self) -> String {
        pretty_json(self)
    }
}

/// Both renderings of the active tasks for one queue.
#[derive(Debug, Clone, PartialEq)]
pub struct ActiveTasksReport {
    /// Real argument values.
    pub full: String,
    /// Arguments replaced by [`REDACTED`].
    pub redacted: String,
    /// Error line to print when inspection failed.
    pub error: Option<String>,
}

impl ActiveTasksReport {
    fn from_tasks(full: &ActiveTasks, redacted: &ActiveTasks, error: Option<String>) -> Self {
        Self {
            full: full.to_pretty_json(),
            redacted: redacted.to_pretty_json(),
            error,
        }
    }
}

/// Collects the tasks active on workers consuming from `queue`.
///
/// Never fails: any control-plane error is logged and kept in
/// [`ActiveTasksReport::error`], and the report is built from empty mappings.
pub async fn get_active_tasks<C>(control: &C, queue: &str) -> ActiveTasksReport
where
    C: ControlPlane + ?Sized,
{
    let mut full = ActiveTasks::default();
    let mut redacted = ActiveTasks::default();
    let mut error = None;

    if let Err(err) = collect_active_tasks(control, queue, &mut full, &mut redacted).await {
        tracing::warn!(queue, error = %err, "Active task inspection failed, reporting none");
        error = Some(format!(
            "ERROR: Unable to inspect active tasks for queue {queue}, exception {err}"
        ));
        full = ActiveTasks::default();
        redacted = ActiveTasks::default();
    }

    ActiveTasksReport::from_tasks(&full, &redacted, error)
}

async fn collect_active_tasks<C>(
    control: &C,
    queue: &str,
    full: &mut ActiveTasks,
    redacted: &mut ActiveTasks,
) -> Result<(), BrokerError>
where
    C: ControlPlane + ?Sized,
{
    let workers: Vec<String> = control
        .active_queues()
        .await?
        .into_iter()
        .filter(|(_, queues)| queues.iter().any(|q| q.name == queue))
        .map(|(worker, _)| worker)
        .collect();

    tracing::debug!(queue, workers = ?workers, "Workers consuming from queue");
    if workers.is_empty() {
        return Ok(());
    }

    for (worker, tasks) in control.active(&workers).await? {
        for task in tasks {
            let hostname = task.hostname.as_deref().unwrap_or(&worker);
            let name = format!("task: {}", task.name.as_deref().unwrap_or("null"));
            full.push(
                hostname,
                [
                    name.clone(),
                    format!("args: {}", optional_value(task.args.as_ref())),
                    format!("kwargs: {}", optional_value(task.kwargs.as_ref())),
                ],
            );
            redacted.push(
                hostname,
                [
                    name,
                    format!("args: {REDACTED}"),
                    format!("kwargs: {REDACTED}"),
                ],
            );
        }
    }
    Ok(())
}

fn optional_value(value: Option<&Value>) -> String {
    value.map(display_value).unwrap_or_else(|| "null".to_string())
}

/// Serializes `value` as JSON indented by four spaces.
pub fn pretty_json<T: Serialize + ?Sized>(value: &T) -> String {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
    match value.serialize(&mut serializer) {
        Ok(()) => String::from_utf8(buf).unwrap_or_default(),
        Err(_) => "{}".to_string(),
    }
}

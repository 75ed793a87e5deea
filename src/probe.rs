//! The probe loop: read entries from the head of a queue and report on them.
//!
//! For every requested index the probe reads the entry without consuming it,
//! decodes its body, asks the control plane which tasks are active for the
//! queue, and prints a report followed by the decoded body. Decode failures
//! are reported and counted but never stop the loop; store failures that
//! survive the retry policy end the run.

use std::io::Write;

use serde_json::Value;
use tracing::{debug, info};

use crate::broker::{get_active_tasks, ControlPlane};
use crate::error::{DecodeError, StateError};
use crate::message::{extract_body, QueueEntry, TaskBody};
use crate::report::generate_info;
use crate::state::{load_state, render_record};
use crate::storage::QueueStore;

/// Tally of a probe run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbeOutcome {
    /// Entries found and reported.
    pub inspected: usize,
    /// Indexes past the end of the queue.
    pub skipped: usize,
    /// Entries whose body could not be decoded.
    pub failed: usize,
}

impl ProbeOutcome {
    pub fn has_failures(&self) -> bool {
        self.failed > 0
    }

    /// Process exit status: 1 when any entry failed to decode.
    pub fn exit_code(&self) -> u8 {
        u8::from(self.has_failures())
    }
}

/// Inspects the first `items` entries of `queue`.
pub async fn probe_queue<S, C, W>(
    store: &S,
    control: &C,
    queue: &str,
    items: usize,
    out: &mut W,
) -> anyhow::Result<ProbeOutcome>
where
    S: QueueStore + ?Sized,
    C: ControlPlane + ?Sized,
    W: Write,
{
    let mut outcome = ProbeOutcome::default();

    for count in 0..items {
        writeln!(out, "Count: {count}")?;

        let Some(raw) = store.lindex(queue, count).await? else {
            debug!(queue, index = count, "No entry at index");
            outcome.skipped += 1;
            continue;
        };
        outcome.inspected += 1;

        let (correlation_id, body) = match decode_entry(&raw) {
            Ok(decoded) => decoded,
            Err((correlation_id, err)) => {
                writeln!(
                    out,
                    "ERROR: Unable to extract task body in queue {queue}, exception {err}"
                )?;
                outcome.failed += 1;
                (correlation_id, TaskBody::empty())
            }
        };

        let active_tasks = get_active_tasks(control, queue).await;
        if let Some(error) = &active_tasks.error {
            writeln!(out, "{error}")?;
        }
        debug!(
            queue,
            redacted_active_tasks = %active_tasks.redacted,
            "Active tasks"
        );

        let info = generate_info(queue, &correlation_id, &body, &active_tasks.full);
        writeln!(out, "{info}")?;
        writeln!(out, "BODY")?;
        writeln!(out, "{}", body.to_pretty())?;
    }

    info!(
        queue,
        inspected = outcome.inspected,
        skipped = outcome.skipped,
        failed = outcome.failed,
        "Probe finished"
    );
    Ok(outcome)
}

/// Parses an entry and extracts its body, keeping the correlation id even
/// when the body is undecodable.
fn decode_entry(raw: &[u8]) -> Result<(Value, TaskBody), (Value, DecodeError)> {
    let entry = QueueEntry::from_slice(raw).map_err(|err| (Value::Null, err))?;
    match extract_body(&entry) {
        Ok(body) => Ok((entry.properties, body)),
        Err(err) => Err((entry.properties, err)),
    }
}

/// Prints every list-typed key with its length. Returns the number of lists.
pub async fn list_queues<S, W>(store: &S, out: &mut W) -> anyhow::Result<usize>
where
    S: QueueStore + ?Sized,
    W: Write,
{
    let mut keys = store.keys().await?;
    keys.sort();

    let mut queues = Vec::new();
    for key in keys {
        if store.key_type(&key).await? != "list" {
            continue;
        }
        let len = store.llen(&key).await?;
        queues.push((key, len));
    }

    if queues.is_empty() {
        writeln!(out, "No queues found")?;
        return Ok(0);
    }

    writeln!(out, "{:<40} {:>10}", "Queue", "Pending")?;
    for (name, len) in &queues {
        writeln!(out, "{name:<40} {len:>10}")?;
    }
    Ok(queues.len())
}

/// Prints the queue-age monitoring record of `queue`.
///
/// Store failures are fatal like any other store read; malformed records
/// are reported and ignored.
pub async fn print_age_state<S, W>(store: &S, queue: &str, out: &mut W) -> anyhow::Result<()>
where
    S: QueueStore + ?Sized,
    W: Write,
{
    match load_state(store).await {
        Ok(state) => writeln!(out, "{}", render_record(queue, state.get(queue)))?,
        Err(StateError::Store(err)) => return Err(err.into()),
        Err(err) => writeln!(out, "ERROR: Unable to read queue age state, exception {err}")?,
    }
    Ok(())
}

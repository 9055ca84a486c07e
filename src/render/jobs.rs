use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::render::client::{RenderClient, HISTORY_PATH, PROMPT_PATH};
use crate::render::graph::WorkflowGraph;
use crate::render::outputs::OutputBundle;
use crate::render::profiles::PollSchedule;
use crate::transport::RequestBody;

/// Status string the render server reports for a job it rejected or that
/// crashed during execution.
pub const ERROR_STATUS: &str = "error";
pub const ATTEMPTS_PER_MINUTE: u32 = 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobHandle {
    pub job_id: String,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubmitError {
    #[error("failed to submit workflow: {0}")]
    TransportFailed(String),
    #[error("render server response has no prompt_id")]
    NoJobId,
}

pub fn submit_job(
    client: &RenderClient,
    graph: &WorkflowGraph,
    client_id: &str,
) -> Result<JobHandle, SubmitError> {
    let body = json!({
        "prompt": graph.to_value(),
        "client_id": client_id,
    });
    let resp = client
        .post(PROMPT_PATH, RequestBody::Json(body))
        .map_err(|e| SubmitError::TransportFailed(e.to_string()))?;
    if !resp.is_success() {
        return Err(SubmitError::TransportFailed(format!(
            "HTTP {}: {}",
            resp.status,
            resp.text_lossy().trim()
        )));
    }
    let payload = resp.json::<Value>().map_err(|_| SubmitError::NoJobId)?;
    let job_id = payload
        .get("prompt_id")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .ok_or(SubmitError::NoJobId)?;
    info!(job_id, nodes = graph.len(), "workflow submitted");
    Ok(JobHandle {
        job_id: job_id.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Pending,
    Running,
    Completed(OutputBundle),
    Failed(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PollError {
    #[error("failed to query job status: {0}")]
    TransportFailed(String),
    #[error("render job {job_id} failed: {reason}")]
    JobFailed { job_id: String, reason: String },
    #[error("render job {job_id} did not finish after {attempts} status checks")]
    Timeout { job_id: String, attempts: u32 },
}

/// Reads one `/history/{job_id}` body. `None` means the server does not list
/// the job yet.
pub fn classify_history(history: &Value, job_id: &str) -> Option<JobStatus> {
    let entry = history.get(job_id)?;
    let Some(status) = entry.get("status").filter(|s| s.is_object()) else {
        return Some(JobStatus::Pending);
    };
    let completed = status
        .get("completed")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let status_str = status.get("status_str").and_then(Value::as_str);

    if status_str == Some(ERROR_STATUS) {
        return Some(JobStatus::Failed(failure_reason(status)));
    }
    if completed {
        let bundle = entry
            .get("outputs")
            .map(OutputBundle::from_outputs)
            .unwrap_or_default();
        return Some(JobStatus::Completed(bundle));
    }
    Some(JobStatus::Running)
}

fn failure_reason(status: &Value) -> String {
    let execution_error = status
        .get("messages")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_array)
        .find(|message| message.first().and_then(Value::as_str) == Some("execution_error"))
        .and_then(|message| message.get(1));

    let Some(details) = execution_error else {
        return String::from("render server reported status 'error'");
    };
    let exception = details
        .get("exception_message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty());
    let node_type = details.get("node_type").and_then(Value::as_str);
    match (node_type, exception) {
        (Some(node_type), Some(exception)) => format!("{node_type}: {exception}"),
        (None, Some(exception)) => exception.to_string(),
        _ => String::from("render server reported status 'error'"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollPhase {
    Submitted,
    Waiting,
    NotYetVisible,
    Running,
    Completed,
    Failed,
    TimedOut,
}

impl PollPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::TimedOut)
    }
}

/// Attempt accounting and phase transitions for one job. Owns no I/O.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollMachine {
    phase: PollPhase,
    attempts: u32,
    max_attempts: u32,
}

impl PollMachine {
    pub fn new(max_attempts: u32) -> Self {
        Self {
            phase: PollPhase::Submitted,
            attempts: 0,
            max_attempts,
        }
    }

    pub fn phase(&self) -> PollPhase {
        self.phase
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Claims the next attempt. Returns `false` and moves to `TimedOut` once
    /// the budget is spent.
    pub fn begin_tick(&mut self) -> bool {
        if self.phase.is_terminal() {
            return false;
        }
        if self.attempts >= self.max_attempts {
            self.phase = PollPhase::TimedOut;
            return false;
        }
        self.attempts += 1;
        true
    }

    pub fn observe(&mut self, status: Option<&JobStatus>) -> PollPhase {
        self.phase = match status {
            None => PollPhase::NotYetVisible,
            Some(JobStatus::Pending) => PollPhase::Waiting,
            Some(JobStatus::Running) => PollPhase::Running,
            Some(JobStatus::Completed(_)) => PollPhase::Completed,
            Some(JobStatus::Failed(_)) => PollPhase::Failed,
        };
        self.phase
    }
}

pub trait PollClock: Send + Sync + 'static {
    fn sleep(&self, duration: Duration);
}

pub type SharedPollClock = Arc<dyn PollClock>;

#[derive(Debug, Clone, Copy, Default)]
pub struct StdPollClock;

impl PollClock for StdPollClock {
    fn sleep(&self, duration: Duration) {
        thread::sleep(duration);
    }
}

pub fn max_attempts_for(timeout_minutes: u32) -> u32 {
    if timeout_minutes == 0 {
        warn!(
            minimum_minutes = 1,
            "timeout of zero minutes raised to the minimum"
        );
    }
    ATTEMPTS_PER_MINUTE.saturating_mul(timeout_minutes.max(1))
}

pub struct JobPoller<'a> {
    client: &'a RenderClient,
    clock: &'a dyn PollClock,
    schedule: PollSchedule,
    max_attempts: u32,
}

impl<'a> JobPoller<'a> {
    pub fn new(
        client: &'a RenderClient,
        clock: &'a dyn PollClock,
        schedule: PollSchedule,
        timeout_minutes: u32,
    ) -> Self {
        Self {
            client,
            clock,
            schedule,
            max_attempts: max_attempts_for(timeout_minutes),
        }
    }

    pub fn wait_for_completion(&self, job: &JobHandle) -> Result<OutputBundle, PollError> {
        let job_id = job.job_id.as_str();
        let path = format!("{HISTORY_PATH}/{job_id}");
        let mut machine = PollMachine::new(self.max_attempts);

        self.clock.sleep(self.schedule.initial_grace);
        while machine.begin_tick() {
            self.clock.sleep(self.schedule.interval);
            let history = self.fetch_history(path.as_str())?;
            let status = classify_history(&history, job_id);
            let phase = machine.observe(status.as_ref());
            debug!(job_id, attempt = machine.attempts(), phase = ?phase, "job status");

            match status {
                Some(JobStatus::Completed(bundle)) => {
                    info!(job_id, attempts = machine.attempts(), "render job completed");
                    return Ok(bundle);
                }
                Some(JobStatus::Failed(reason)) => {
                    return Err(PollError::JobFailed {
                        job_id: job_id.to_string(),
                        reason,
                    });
                }
                _ => {}
            }
        }
        Err(PollError::Timeout {
            job_id: job_id.to_string(),
            attempts: machine.attempts(),
        })
    }

    fn fetch_history(&self, path: &str) -> Result<Value, PollError> {
        let resp = self
            .client
            .get(path)
            .map_err(|e| PollError::TransportFailed(e.to_string()))?;
        if !resp.is_success() {
            return Err(PollError::TransportFailed(format!("HTTP {}", resp.status)));
        }
        resp.json::<Value>()
            .map_err(|e| PollError::TransportFailed(format!("history body is not JSON: {e}")))
    }
}

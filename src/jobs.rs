//! Asynchronous server-side jobs (light-curve rebinning, time-sliced
//! spectra).
//!
//! A job moves through [`JobState::Queued`], [`JobState::Running`] and then
//! either [`JobState::Complete`] or [`JobState::Failed`]; transitions happen
//! on the server and are only observable by polling. Nothing here retries or
//! polls on its own except [`Client::wait_for_job`], which the caller invokes
//! explicitly.

use std::fmt;
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::client::Client;
use crate::error::{Error, Result};
use crate::reply::{Fields, check_envelope};
use crate::transport::Transport;

/// Poll interval recommended by the service.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Rebin,
    Timeslice,
}

impl JobKind {
    fn as_str(self) -> &'static str {
        match self {
            JobKind::Rebin => "rebin",
            JobKind::Timeslice => "timeslice",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque token identifying a submitted job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle {
    id: String,
    kind: JobKind,
}

impl JobHandle {
    /// Rebuilds a handle from a previously issued job ID.
    pub fn new(kind: JobKind, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    pub(crate) fn expect_kind(&self, kind: JobKind) -> Result<()> {
        if self.kind == kind {
            Ok(())
        } else {
            Err(Error::InvalidRequest(format!(
                "job {} is a {} job, not a {kind} job",
                self.id, self.kind
            )))
        }
    }

    fn params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("JobID".into(), Value::from(self.id.as_str()));
        params.insert("jobType".into(), Value::from(self.kind.as_str()));
        params
    }
}

impl fmt::Display for JobHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} job {}", self.kind, self.id)
    }
}

/// Job lifecycle states with their wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobState {
    Queued = 1,
    Running = 2,
    Complete = 3,
    /// The job errored or was cancelled.
    Failed = 4,
}

impl JobState {
    /// Codes other than 1-3, including negative ones, mean the job will not
    /// complete.
    pub fn from_code(code: i64) -> Self {
        match code {
            1 => JobState::Queued,
            2 => JobState::Running,
            3 => JobState::Complete,
            _ => JobState::Failed,
        }
    }

    pub fn code(self) -> i64 {
        self as i64
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Complete | JobState::Failed)
    }
}

/// A status poll result as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub code: i64,
    pub text: String,
}

impl JobStatus {
    pub fn state(&self) -> JobState {
        JobState::from_code(self.code)
    }
}

pub(crate) fn handle_from_reply(
    kind: JobKind,
    reply: &Map<String, Value>,
    context: &str,
) -> Result<JobHandle> {
    let f = Fields::new(reply, context);
    f.require(&["JobID"])?;
    let id = match &reply["JobID"] {
        Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return Err(Error::malformed(context, "JobID is not a string")),
    };
    Ok(JobHandle::new(kind, id))
}

impl<T: Transport> Client<T> {
    /// Reads the current status of a job. Never changes job state.
    pub fn job_status(&self, job: &JobHandle) -> Result<JobStatus> {
        let context = job.to_string();
        let reply = self.call("checkJobStatus", &context, job.params())?;
        let f = Fields::new(&reply, &context);
        f.require(&["statusCode", "statusText"])?;
        Ok(JobStatus {
            code: f.i64("statusCode")?,
            text: f.str("statusText")?.to_string(),
        })
    }

    pub fn job_complete(&self, job: &JobHandle) -> Result<bool> {
        Ok(self.job_status(job)?.state() == JobState::Complete)
    }

    /// Asks the server to cancel a job.
    ///
    /// Returns `false` when the server declines because the job has already
    /// completed or been cancelled. Any other refusal, such as an unknown
    /// job ID, is an error.
    pub fn cancel_job(&self, job: &JobHandle) -> Result<bool> {
        let reply = self.call_raw("cancelJob", job.params())?;
        match check_envelope("cancelJob", &job.to_string(), reply) {
            Ok(_) => {
                log::info!("cancelled {job}");
                Ok(true)
            }
            Err(refused @ Error::Api { .. }) => {
                let status = self.job_status(job)?;
                if status.state().is_terminal() {
                    log::info!("could not cancel {job}: job is {}", status.text);
                    Ok(false)
                } else {
                    Err(refused)
                }
            }
            Err(e) => Err(e),
        }
    }

    /// Polls every `interval` until the job is complete or failed, giving up
    /// after `max_polls` polls if set. Returns the last status seen.
    pub fn wait_for_job(
        &self,
        job: &JobHandle,
        interval: Duration,
        max_polls: Option<usize>,
    ) -> Result<JobStatus> {
        let mut polls = 0usize;
        let mut last_text: Option<String> = None;
        loop {
            let status = self.job_status(job)?;
            polls += 1;

            if last_text.as_deref() != Some(status.text.as_str()) {
                log::info!("{job}: {} ({})", status.text, status.code);
                last_text = Some(status.text.clone());
            }

            if status.state().is_terminal() || max_polls.is_some_and(|m| polls >= m) {
                return Ok(status);
            }
            thread::sleep(interval);
        }
    }

    /// Fetches a job's result payload.
    ///
    /// The server marks results of unfinished jobs with `statusCode`; those
    /// surface as [`Error::JobNotComplete`] and are not retried.
    pub(crate) fn job_result(&self, job: &JobHandle, api: &str) -> Result<Map<String, Value>> {
        let context = job.to_string();
        let reply = self.call_raw(api, job.params())?;

        if let Value::Object(map) = &reply {
            let f = Fields::new(map, &context);
            if f.contains("statusCode") {
                let code = f.i64("statusCode")?;
                if JobState::from_code(code) != JobState::Complete {
                    return Err(Error::JobNotComplete {
                        job: job.id().to_string(),
                        code,
                        text: f.opt_str("statusText")?.unwrap_or_default().to_string(),
                    });
                }
            }
        }
        check_envelope(api, &context, reply)
    }
}

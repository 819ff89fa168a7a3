//! Jobs
//!
//! A job is one pending data-area operation of this process. Jobs live only
//! in memory; the coordinator consumes each exactly once.

use serde_json::Value;
use tokio::sync::oneshot;

use crate::cache::now_ms;
use crate::error::{CacheError, Result};

/// Outcome delivered to the job's caller. GET yields the value, if any.
pub type JobOutcome = Result<Option<Value>>;

/// Operation to perform once the floor is held.
#[derive(Debug, Clone, PartialEq)]
pub enum JobKind {
    Get,
    Set { value: Value, ttl: Option<u64> },
    Reset,
}

impl JobKind {
    pub fn name(&self) -> &'static str {
        match self {
            JobKind::Get => "GET",
            JobKind::Set { .. } => "SET",
            JobKind::Reset => "RESET",
        }
    }
}

// == Job ==
#[derive(Debug)]
pub struct Job {
    pub kind: JobKind,
    pub key: String,
    /// When the job was created (Unix milliseconds); becomes `arriveAt` for SET
    pub arrive_at: u64,
    responder: oneshot::Sender<JobOutcome>,
}

impl Job {
    /// Creates a job and the receipt its caller awaits.
    pub fn new(kind: JobKind, key: impl Into<String>) -> (Self, JobReceipt) {
        let (responder, receiver) = oneshot::channel();
        let job = Self {
            kind,
            key: key.into(),
            arrive_at: now_ms(),
            responder,
        };
        (job, JobReceipt { receiver })
    }

    /// Delivers the outcome. A caller that stopped waiting is ignored.
    pub fn complete(self, outcome: JobOutcome) {
        let _ = self.responder.send(outcome);
    }
}

// == Job Receipt ==
/// Caller side of a job.
#[derive(Debug)]
pub struct JobReceipt {
    receiver: oneshot::Receiver<JobOutcome>,
}

impl JobReceipt {
    /// Waits for the job to run. Fails if the coordinator drops the job.
    pub async fn wait(self) -> JobOutcome {
        self.receiver.await.map_err(|_| {
            CacheError::Protocol("coordinator stopped before the job completed".to_string())
        })?
    }
}

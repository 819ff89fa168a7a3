//! Admission tickets
//!
//! A ticket is an empty file `<issuedAt>-<processId>` in the queue area. The
//! process owning the smallest ticket holds the floor and is the only one
//! allowed to touch the data area.

use std::fmt;
use std::path::PathBuf;

use tokio::fs;
use tracing::{debug, warn};

use crate::cache::now_ms;
use crate::error::{CacheError, Result};
use crate::workdir::{self, Workdir};

// == Queue Ticket ==
/// One pending admission request.
///
/// Ordering is by `issued_at`, then by `process_id`, so two tickets issued in
/// the same millisecond by different processes still have a definite order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueueTicket {
    /// Issue time (Unix milliseconds)
    pub issued_at: u64,
    /// Process that requested admission
    pub process_id: String,
}

impl QueueTicket {
    pub fn new(issued_at: u64, process_id: impl Into<String>) -> Self {
        Self {
            issued_at,
            process_id: process_id.into(),
        }
    }

    /// File name in the queue area.
    pub fn file_name(&self) -> String {
        format!("{}-{}", self.issued_at, self.process_id)
    }

    /// Parses a queue-area file name; `None` if it is not a ticket.
    pub fn parse(name: &str) -> Option<Self> {
        let (issued_at, process_id) = name.split_once('-')?;
        if process_id.is_empty() {
            return None;
        }
        Some(Self::new(issued_at.parse().ok()?, process_id))
    }

    pub fn is_owned_by(&self, process_id: &str) -> bool {
        self.process_id == process_id
    }
}

impl fmt::Display for QueueTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

// == Ticket Queue ==
/// This process's view of the shared queue area.
#[derive(Debug)]
pub struct TicketQueue {
    dir: PathBuf,
    process_id: String,
    last_issued: u64,
}

impl TicketQueue {
    pub fn new(workdir: &Workdir, process_id: impl Into<String>) -> Self {
        Self {
            dir: workdir.queue_dir(),
            process_id: process_id.into(),
            last_issued: 0,
        }
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    // == Admit ==
    /// Writes a new ticket for this process stamped with the current time.
    pub async fn admit(&mut self) -> Result<QueueTicket> {
        self.admit_at(now_ms()).await
    }

    /// Writes a new ticket stamped `now`, or just after this process's
    /// previous ticket if the clock has not advanced past it.
    pub async fn admit_at(&mut self, now: u64) -> Result<QueueTicket> {
        let issued_at = now.max(self.last_issued + 1);
        let ticket = QueueTicket::new(issued_at, self.process_id.as_str());
        let path = self.dir.join(ticket.file_name());

        fs::write(&path, b"")
            .await
            .map_err(|e| CacheError::io(&path, e))?;

        self.last_issued = issued_at;
        debug!(ticket = %ticket, "Admitted queue ticket");
        Ok(ticket)
    }

    // == List ==
    /// All outstanding tickets, oldest first. Foreign files are skipped.
    pub async fn list(&self) -> Result<Vec<QueueTicket>> {
        let mut tickets: Vec<QueueTicket> = workdir::list_names(&self.dir)
            .await?
            .into_iter()
            .filter_map(|name| {
                let ticket = QueueTicket::parse(&name);
                if ticket.is_none() {
                    warn!(file = %name, "Ignoring unrecognized file in queue area");
                }
                ticket
            })
            .collect();
        tickets.sort();
        Ok(tickets)
    }

    // == Release ==
    /// Deletes `ticket`. Returns false if it was already gone.
    pub async fn release(&self, ticket: &QueueTicket) -> Result<bool> {
        let released = workdir::remove_if_exists(&self.dir.join(ticket.file_name())).await?;
        if released {
            debug!(ticket = %ticket, "Released queue ticket");
        }
        Ok(released)
    }

    /// Deletes every ticket owned by this process, returning how many went.
    pub async fn release_all_own(&self) -> Result<usize> {
        let mut released = 0;
        for ticket in self.list().await? {
            if ticket.is_owned_by(&self.process_id) && self.release(&ticket).await? {
                released += 1;
            }
        }
        Ok(released)
    }
}

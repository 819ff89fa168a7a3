//! Queue coordinator
//!
//! Single task that owns this process's pending jobs and decides when to run
//! them. Local enqueues and queue-area change notifications arrive as
//! commands on one channel, so every floor decision is made in one place.
//!
//! ## Protocol
//!
//! 1. Each enqueued job admits its own ticket.
//! 2. On every command the queue area is listed. If the oldest ticket belongs
//!    to this process, one job is popped (FIFO) and run against the data area.
//! 3. The floor ticket is released whether the job failed or not, then the
//!    job's caller is notified.
//! 4. The check repeats until the floor is held by someone else or no local
//!    work remains. Releases by other processes arrive as `Recheck`.

use std::collections::VecDeque;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::job::{Job, JobKind, JobOutcome};
use super::ticket::TicketQueue;
use crate::cache::DataStore;
use crate::error::CacheError;
use crate::workdir::Workdir;

const COMMAND_CHANNEL_CAPACITY: usize = 1024;

/// Commands accepted by the [`Coordinator`]
#[derive(Debug)]
pub enum CoordinatorCommand {
    /// Queue a job and request admission for it
    Enqueue(Job),
    /// The queue area changed; re-evaluate who holds the floor
    Recheck,
    /// Fail pending jobs, withdraw tickets and stop
    Shutdown { resp: oneshot::Sender<()> },
}

// == Coordinator Handle ==
/// Cloneable sender side used by the cache and the queue watcher.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    sender: mpsc::Sender<CoordinatorCommand>,
}

impl CoordinatorHandle {
    /// Enqueues a job and waits for its outcome.
    pub async fn submit(&self, kind: JobKind, key: &str) -> JobOutcome {
        let (job, receipt) = Job::new(kind, key);
        self.sender
            .send(CoordinatorCommand::Enqueue(job))
            .await
            .map_err(|_| CacheError::Protocol("coordinator is not running".to_string()))?;
        receipt.wait().await
    }

    /// Asks for a floor re-check. Returns false once the coordinator is gone.
    pub fn recheck(&self) -> bool {
        match self.sender.try_send(CoordinatorCommand::Recheck) {
            Ok(()) => true,
            // Queued commands each trigger a check anyway.
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }

    /// Stops the coordinator and waits until it has withdrawn its tickets.
    pub async fn shutdown(&self) {
        let (resp, done) = oneshot::channel();
        if self
            .sender
            .send(CoordinatorCommand::Shutdown { resp })
            .await
            .is_ok()
        {
            let _ = done.await;
        }
    }

    /// Handle that does not keep the coordinator alive.
    pub fn downgrade(&self) -> WeakCoordinatorHandle {
        WeakCoordinatorHandle {
            sender: self.sender.downgrade(),
        }
    }
}

/// Non-owning [`CoordinatorHandle`].
#[derive(Debug, Clone)]
pub struct WeakCoordinatorHandle {
    sender: mpsc::WeakSender<CoordinatorCommand>,
}

impl WeakCoordinatorHandle {
    pub fn upgrade(&self) -> Option<CoordinatorHandle> {
        self.sender
            .upgrade()
            .map(|sender| CoordinatorHandle { sender })
    }
}

// == Coordinator ==
pub struct Coordinator {
    tickets: TicketQueue,
    store: DataStore,
    pending: VecDeque<Job>,
    receiver: mpsc::Receiver<CoordinatorCommand>,
}

impl Coordinator {
    /// Creates a coordinator for `process_id` over the shared `workdir`.
    pub fn new(workdir: &Workdir, process_id: &str, max_ttl: u64) -> (Self, CoordinatorHandle) {
        let (sender, receiver) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let coordinator = Self {
            tickets: TicketQueue::new(workdir, process_id),
            store: DataStore::new(workdir, process_id, max_ttl),
            pending: VecDeque::new(),
            receiver,
        };
        (coordinator, CoordinatorHandle { sender })
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    fn process_id(&self) -> &str {
        self.tickets.process_id()
    }

    async fn run(mut self) {
        info!(process_id = %self.process_id(), "Starting queue coordinator");

        let mut shutdown_resp = None;
        while let Some(command) = self.receiver.recv().await {
            match command {
                CoordinatorCommand::Enqueue(job) => self.enqueue(job).await,
                CoordinatorCommand::Recheck => self.try_run().await,
                CoordinatorCommand::Shutdown { resp } => {
                    shutdown_resp = Some(resp);
                    break;
                }
            }
        }

        self.drain().await;
        info!(process_id = %self.process_id(), "Queue coordinator stopped");

        if let Some(resp) = shutdown_resp {
            let _ = resp.send(());
        }
    }

    async fn enqueue(&mut self, job: Job) {
        debug!(kind = job.kind.name(), key = %job.key, "Enqueuing job");

        match self.tickets.admit().await {
            Ok(_) => {
                self.pending.push_back(job);
                self.try_run().await;
            }
            Err(e) => {
                error!(kind = job.kind.name(), key = %job.key, error = %e, "Failed to admit ticket for job");
                job.complete(Err(e));
            }
        }
    }

    // == Try Run ==
    async fn try_run(&mut self) {
        let mut readmitted = false;

        loop {
            let tickets = match self.tickets.list().await {
                Ok(tickets) => tickets,
                Err(e) => {
                    warn!(error = %e, "Failed to list queue area");
                    return;
                }
            };
            let own: Vec<_> = tickets
                .iter()
                .filter(|t| t.is_owned_by(self.process_id()))
                .cloned()
                .collect();

            if self.pending.is_empty() {
                for ticket in &own {
                    if let Err(e) = self.tickets.release(ticket).await {
                        warn!(ticket = %ticket, error = %e, "Failed to release leftover ticket");
                    }
                }
                return;
            }

            if own.is_empty() {
                // Our tickets are gone (reaped while we looked dead) but work remains.
                if readmitted {
                    return;
                }
                readmitted = true;
                match self.tickets.admit().await {
                    Ok(ticket) => {
                        info!(ticket = %ticket, pending = self.pending.len(), "Re-admitted ticket for pending jobs");
                        continue;
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to re-admit ticket");
                        return;
                    }
                }
            }

            let Some(floor) = tickets.first() else {
                return;
            };
            if !floor.is_owned_by(self.process_id()) {
                debug!(floor = %floor, pending = self.pending.len(), "Waiting for the floor");
                return;
            }
            let floor = floor.clone();

            let Some(job) = self.pending.pop_front() else {
                return;
            };
            let outcome = self.execute(&job).await;
            readmitted = false;

            if let Err(e) = self.tickets.release(&floor).await {
                warn!(ticket = %floor, error = %e, "Failed to release floor ticket");
            }

            match &outcome {
                Ok(_) => debug!(kind = job.kind.name(), key = %job.key, "Job completed"),
                Err(e) => error!(kind = job.kind.name(), key = %job.key, error = %e, "Job failed"),
            }
            job.complete(outcome);
        }
    }

    async fn execute(&self, job: &Job) -> JobOutcome {
        match &job.kind {
            JobKind::Get => Ok(self.store.read(&job.key).await?.map(|entry| entry.value)),
            JobKind::Set { value, ttl } => {
                self.store
                    .write(&job.key, value.clone(), *ttl, job.arrive_at)
                    .await?;
                Ok(None)
            }
            JobKind::Reset => {
                self.store.delete(&job.key).await?;
                Ok(None)
            }
        }
    }

    async fn drain(&mut self) {
        self.receiver.close();
        while let Ok(command) = self.receiver.try_recv() {
            match command {
                CoordinatorCommand::Enqueue(job) => self.pending.push_back(job),
                CoordinatorCommand::Shutdown { resp } => {
                    let _ = resp.send(());
                }
                CoordinatorCommand::Recheck => {}
            }
        }

        for job in self.pending.drain(..) {
            job.complete(Err(CacheError::Protocol(
                "cache is shutting down".to_string(),
            )));
        }

        match self.tickets.release_all_own().await {
            Ok(0) => {}
            Ok(released) => debug!(released, "Withdrew outstanding tickets"),
            Err(e) => warn!(error = %e, "Failed to withdraw outstanding tickets"),
        }
    }
}

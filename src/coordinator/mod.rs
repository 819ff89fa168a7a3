//! Coordinator Module
//!
//! Cross-process mutual exclusion around the shared data area, built from
//! admission tickets in the queue area (oldest ticket wins).

mod job;
mod processor;
mod ticket;

pub use job::{Job, JobKind, JobOutcome, JobReceipt};
pub use processor::{Coordinator, CoordinatorCommand, CoordinatorHandle, WeakCoordinatorHandle};
pub use ticket::{QueueTicket, TicketQueue};

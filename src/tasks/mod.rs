//! Background Tasks Module
//!
//! Contains background tasks that run for as long as the file cache is open.
//!
//! # Tasks
//! - Heartbeat: refreshes this process's liveness file and reaps what dead processes left behind
//! - Queue watch: notifies the coordinator when other processes' tickets change

mod heartbeat;
mod queue_watch;

pub use heartbeat::{spawn_heartbeat_task, HealthReport, HeartbeatMonitor};
pub use queue_watch::spawn_queue_watcher;

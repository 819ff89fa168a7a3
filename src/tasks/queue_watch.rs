//! Queue Watch Task
//!
//! Polls the queue area and tells the coordinator to re-check the floor
//! whenever the set of tickets held by other processes changes. Changes to
//! this process's own tickets are ignored: the coordinator made them.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::coordinator::{QueueTicket, WeakCoordinatorHandle};
use crate::workdir;

/// Spawns the watcher. It exits on its own once the coordinator is gone.
///
/// # Arguments
/// * `queue_dir` - Queue area to poll
/// * `process_id` - This process, whose tickets are ignored
/// * `poll_interval` - Time between scans
/// * `coordinator` - Receiver of `Recheck` notifications
pub fn spawn_queue_watcher(
    queue_dir: PathBuf,
    process_id: String,
    poll_interval: Duration,
    coordinator: WeakCoordinatorHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            queue_dir = %queue_dir.display(),
            interval_ms = poll_interval.as_millis() as u64,
            "Starting queue watcher"
        );

        let mut last_seen: Option<BTreeSet<String>> = None;

        loop {
            tokio::time::sleep(poll_interval).await;

            let foreign = match workdir::list_names(&queue_dir).await {
                Ok(names) => foreign_tickets(names, &process_id),
                Err(e) => {
                    warn!(error = %e, "Queue watcher failed to list queue area");
                    continue;
                }
            };

            if last_seen.as_ref() == Some(&foreign) {
                continue;
            }
            debug!(foreign_tickets = foreign.len(), "Queue area changed");
            last_seen = Some(foreign);

            let delivered = coordinator
                .upgrade()
                .map(|handle| handle.recheck())
                .unwrap_or(false);
            if !delivered {
                info!("Coordinator stopped; queue watcher exiting");
                break;
            }
        }
    })
}

/// Ticket file names in `names` that belong to other processes.
fn foreign_tickets(names: Vec<String>, process_id: &str) -> BTreeSet<String> {
    names
        .into_iter()
        .filter(|name| {
            QueueTicket::parse(name)
                .map(|ticket| !ticket.is_owned_by(process_id))
                .unwrap_or(false)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::{Coordinator, JobKind};
    use crate::workdir::Workdir;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_foreign_tickets_excludes_own_and_junk() {
        let names = vec![
            "10-p1".to_string(),
            "11-p2".to_string(),
            "notes".to_string(),
            "12-p3".to_string(),
        ];
        let foreign = foreign_tickets(names, "p1");
        assert_eq!(
            foreign.into_iter().collect::<Vec<_>>(),
            vec!["11-p2".to_string(), "12-p3".to_string()]
        );
    }

    #[tokio::test]
    async fn test_release_by_other_process_wakes_waiting_job() {
        let tmp = TempDir::new().unwrap();
        let workdir = Workdir::new(tmp.path());
        workdir.ensure().await.unwrap();

        let (coordinator, handle) = Coordinator::new(&workdir, "p1", 60_000);
        let _task = coordinator.spawn();
        let watcher = spawn_queue_watcher(
            workdir.queue_dir(),
            "p1".to_string(),
            Duration::from_millis(10),
            handle.downgrade(),
        );

        let blocker = workdir.queue_dir().join(QueueTicket::new(1, "p2").file_name());
        std::fs::write(&blocker, b"").unwrap();

        let submitter = handle.clone();
        let job = tokio::spawn(async move {
            submitter
                .submit(JobKind::Set { value: json!("v"), ttl: None }, "k")
                .await
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!job.is_finished());

        // No explicit recheck: the watcher must notice the release.
        std::fs::remove_file(&blocker).unwrap();
        let outcome = tokio::time::timeout(Duration::from_secs(2), job)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_ok());

        watcher.abort();
    }

    #[tokio::test]
    async fn test_watcher_exits_when_coordinator_stops() {
        let tmp = TempDir::new().unwrap();
        let workdir = Workdir::new(tmp.path());
        workdir.ensure().await.unwrap();

        let (coordinator, handle) = Coordinator::new(&workdir, "p1", 60_000);
        let task = coordinator.spawn();
        let watcher = spawn_queue_watcher(
            workdir.queue_dir(),
            "p1".to_string(),
            Duration::from_millis(10),
            handle.downgrade(),
        );

        handle.shutdown().await;
        task.await.unwrap();
        drop(handle);

        // Force a change so the watcher tries to notify.
        std::fs::write(workdir.queue_dir().join("5-p9"), b"").unwrap();
        tokio::time::timeout(Duration::from_secs(2), watcher)
            .await
            .unwrap()
            .unwrap();
    }
}

//! Heartbeat and Health Check Task
//!
//! Keeps this process's heartbeat file fresh and periodically reconciles the
//! shared areas against the set of live processes:
//!
//! 1. Heartbeats older than the timeout are deleted; the rest form the alive set.
//! 2. Tickets of processes outside the alive set are deleted, unblocking the queue.
//! 3. Entries whose owner is not alive AND which outlived their TTL are deleted.
//!    Entries of dead owners still within TTL stay readable.
//! 4. Temp files left by dead writers are deleted.
//!
//! A failure on one file is logged and the sweep moves on.

use std::collections::BTreeSet;
use std::path::Path;
use std::time::Duration;

use tokio::fs;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{load_entry, now_ms};
use crate::config::Config;
use crate::coordinator::QueueTicket;
use crate::error::{CacheError, Result};
use crate::workdir::{self, Workdir};

// == Health Report ==
/// Outcome of one health check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    /// Processes whose heartbeat is younger than the timeout
    pub alive: BTreeSet<String>,
    pub reaped_heartbeats: usize,
    pub reaped_tickets: usize,
    pub reaped_entries: usize,
    pub reaped_temp_files: usize,
}

impl HealthReport {
    pub fn is_alive(&self, process_id: &str) -> bool {
        self.alive.contains(process_id)
    }

    fn reaped_anything(&self) -> bool {
        self.reaped_heartbeats + self.reaped_tickets + self.reaped_entries + self.reaped_temp_files > 0
    }
}

// == Heartbeat Monitor ==
#[derive(Debug, Clone)]
pub struct HeartbeatMonitor {
    workdir: Workdir,
    process_id: String,
    /// Milliseconds without a beat after which a process is dead
    timeout: u64,
    /// Lifetime of entries stored without a TTL
    max_ttl: u64,
}

impl HeartbeatMonitor {
    pub fn new(workdir: Workdir, process_id: impl Into<String>, timeout: u64, max_ttl: u64) -> Self {
        Self {
            workdir,
            process_id: process_id.into(),
            timeout,
            max_ttl,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            Workdir::new(&config.workdir),
            config.process_id.as_str(),
            config.heartbeat_timeout,
            config.max_ttl,
        )
    }

    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    // == Beat ==
    /// Rewrites this process's heartbeat with the current time.
    pub async fn beat(&self) -> Result<()> {
        self.beat_at(now_ms()).await
    }

    pub async fn beat_at(&self, now: u64) -> Result<()> {
        workdir::atomic_write(
            &self.workdir.proc_dir(),
            &self.process_id,
            now.to_string().as_bytes(),
            &self.process_id,
        )
        .await
    }

    /// Deletes this process's heartbeat, e.g. on shutdown.
    pub async fn remove_heartbeat(&self) -> Result<()> {
        workdir::remove_if_exists(&self.workdir.proc_dir().join(&self.process_id)).await?;
        Ok(())
    }

    // == Health Check ==
    pub async fn health_check(&self) -> HealthReport {
        self.health_check_at(now_ms()).await
    }

    /// Runs the sweep as of `now`. Never fails; problems are logged.
    pub async fn health_check_at(&self, now: u64) -> HealthReport {
        let mut report = HealthReport::default();

        if let Err(e) = self.sweep_heartbeats(now, &mut report).await {
            // Without a trustworthy alive set nothing else may be reaped.
            warn!(error = %e, "Health check could not read heartbeats; skipping sweep");
            return report;
        }
        // The caller is running, whatever its own file says.
        report.alive.insert(self.process_id.clone());

        if let Err(e) = self.sweep_tickets(&mut report).await {
            warn!(error = %e, "Health check could not read queue area");
        }
        if let Err(e) = self.sweep_entries(now, &mut report).await {
            warn!(error = %e, "Health check could not read data area");
        }
        for dir in [self.workdir.proc_dir(), self.workdir.data_dir()] {
            if let Err(e) = self.sweep_temp_files(&dir, &mut report).await {
                warn!(dir = %dir.display(), error = %e, "Health check could not scan temp files");
            }
        }

        if report.reaped_anything() {
            info!(
                alive = report.alive.len(),
                heartbeats = report.reaped_heartbeats,
                tickets = report.reaped_tickets,
                entries = report.reaped_entries,
                temp_files = report.reaped_temp_files,
                "Health check reaped stale files"
            );
        } else {
            debug!(alive = report.alive.len(), "Health check: nothing to reap");
        }
        report
    }

    async fn sweep_heartbeats(&self, now: u64, report: &mut HealthReport) -> Result<()> {
        let dir = self.workdir.proc_dir();

        for process_id in workdir::list_names(&dir).await? {
            let path = dir.join(&process_id);
            let last_beat = match read_heartbeat(&path).await {
                Ok(Some(last_beat)) => last_beat,
                Ok(None) => continue,
                Err(e) => {
                    warn!(process_id = %process_id, error = %e, "Skipping unreadable heartbeat");
                    continue;
                }
            };

            if now.saturating_sub(last_beat) >= self.timeout {
                match workdir::remove_if_exists(&path).await {
                    Ok(true) => {
                        report.reaped_heartbeats += 1;
                        info!(process_id = %process_id, last_beat, "Process considered dead");
                    }
                    Ok(false) => {}
                    Err(e) => warn!(process_id = %process_id, error = %e, "Failed to remove stale heartbeat"),
                }
            } else {
                report.alive.insert(process_id);
            }
        }
        Ok(())
    }

    async fn sweep_tickets(&self, report: &mut HealthReport) -> Result<()> {
        let dir = self.workdir.queue_dir();

        for name in workdir::list_names(&dir).await? {
            let Some(ticket) = QueueTicket::parse(&name) else {
                continue;
            };
            if report.is_alive(&ticket.process_id) {
                continue;
            }
            match workdir::remove_if_exists(&dir.join(&name)).await {
                Ok(true) => {
                    report.reaped_tickets += 1;
                    info!(ticket = %ticket, "Removed ticket of dead process");
                }
                Ok(false) => {}
                Err(e) => warn!(ticket = %ticket, error = %e, "Failed to remove orphaned ticket"),
            }
        }
        Ok(())
    }

    async fn sweep_entries(&self, now: u64, report: &mut HealthReport) -> Result<()> {
        let dir = self.workdir.data_dir();

        for name in workdir::list_names(&dir).await? {
            let path = dir.join(&name);
            let entry = match load_entry(&path).await {
                Ok(Some(entry)) => entry,
                Ok(None) => continue,
                Err(e) => {
                    warn!(file = %name, error = %e, "Skipping unreadable cache entry");
                    continue;
                }
            };

            if report.is_alive(&entry.owner_process_id) || !entry.is_expired_at(now, self.max_ttl) {
                continue;
            }
            match workdir::remove_if_exists(&path).await {
                Ok(true) => {
                    report.reaped_entries += 1;
                    debug!(file = %name, owner = %entry.owner_process_id, "Removed expired entry of dead process");
                }
                Ok(false) => {}
                Err(e) => warn!(file = %name, error = %e, "Failed to remove expired entry"),
            }
        }
        Ok(())
    }

    async fn sweep_temp_files(&self, dir: &Path, report: &mut HealthReport) -> Result<()> {
        for (name, owner) in workdir::list_temp_files(dir).await? {
            if report.is_alive(&owner) {
                continue;
            }
            match workdir::remove_if_exists(&dir.join(&name)).await {
                Ok(true) => report.reaped_temp_files += 1,
                Ok(false) => {}
                Err(e) => warn!(file = %name, error = %e, "Failed to remove leftover temp file"),
            }
        }
        Ok(())
    }

    // == Start ==
    /// Beats and checks once, then spawns the periodic task.
    ///
    /// Fails only if the first heartbeat cannot be written.
    pub async fn start(self, interval: Duration) -> Result<JoinHandle<()>> {
        self.beat().await?;
        self.health_check().await;
        Ok(spawn_heartbeat_task(self, interval))
    }
}

/// Timestamp stored in a heartbeat file; `Ok(None)` if the file vanished.
async fn read_heartbeat(path: &Path) -> Result<Option<u64>> {
    let contents = match fs::read_to_string(path).await {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(CacheError::io(path, e)),
    };
    contents.trim().parse().map(Some).map_err(|_| {
        CacheError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, "heartbeat is not a timestamp"),
        )
    })
}

/// Spawns a background task that refreshes the heartbeat and runs a health
/// check every `interval`.
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during shutdown.
pub fn spawn_heartbeat_task(monitor: HeartbeatMonitor, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            process_id = %monitor.process_id,
            interval_ms = interval.as_millis() as u64,
            "Starting heartbeat task"
        );

        loop {
            tokio::time::sleep(interval).await;

            if let Err(e) = monitor.beat().await {
                warn!(process_id = %monitor.process_id, error = %e, "Failed to refresh heartbeat");
            }
            monitor.health_check().await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheEntry;
    use serde_json::json;
    use tempfile::TempDir;

    const TIMEOUT: u64 = 1_000;
    const MAX_TTL: u64 = 60_000;
    const NOW: u64 = 1_000_000;

    async fn monitor_for(tmp: &TempDir, process_id: &str) -> HeartbeatMonitor {
        let workdir = Workdir::new(tmp.path());
        workdir.ensure().await.unwrap();
        HeartbeatMonitor::new(workdir, process_id, TIMEOUT, MAX_TTL)
    }

    fn write_heartbeat(tmp: &TempDir, process_id: &str, at: u64) {
        std::fs::write(tmp.path().join("proc").join(process_id), at.to_string()).unwrap();
    }

    fn write_ticket(tmp: &TempDir, issued_at: u64, process_id: &str) -> std::path::PathBuf {
        let path = tmp
            .path()
            .join("queue")
            .join(QueueTicket::new(issued_at, process_id).file_name());
        std::fs::write(&path, b"").unwrap();
        path
    }

    fn write_entry(tmp: &TempDir, name: &str, entry: &CacheEntry) -> std::path::PathBuf {
        let path = tmp.path().join("data").join(name);
        std::fs::write(&path, serde_json::to_vec(entry).unwrap()).unwrap();
        path
    }

    #[tokio::test]
    async fn test_beat_writes_timestamp() {
        let tmp = TempDir::new().unwrap();
        let monitor = monitor_for(&tmp, "p1").await;

        monitor.beat_at(12_345).await.unwrap();

        let contents = std::fs::read_to_string(tmp.path().join("proc/p1")).unwrap();
        assert_eq!(contents, "12345");
    }

    #[tokio::test]
    async fn test_stale_heartbeat_and_its_tickets_are_reaped() {
        let tmp = TempDir::new().unwrap();
        let monitor = monitor_for(&tmp, "p1").await;
        monitor.beat_at(NOW).await.unwrap();

        write_heartbeat(&tmp, "live", NOW - TIMEOUT + 1);
        write_heartbeat(&tmp, "dead", NOW - TIMEOUT);
        let live_ticket = write_ticket(&tmp, 10, "live");
        let dead_ticket = write_ticket(&tmp, 5, "dead");
        let ghost_ticket = write_ticket(&tmp, 7, "never_registered");

        let report = monitor.health_check_at(NOW).await;

        assert_eq!(
            report.alive,
            ["live", "p1"].iter().map(|s| s.to_string()).collect::<BTreeSet<_>>()
        );
        assert_eq!(report.reaped_heartbeats, 1);
        assert_eq!(report.reaped_tickets, 2);
        assert!(!tmp.path().join("proc/dead").exists());
        assert!(live_ticket.exists());
        assert!(!dead_ticket.exists());
        assert!(!ghost_ticket.exists());
    }

    #[tokio::test]
    async fn test_own_tickets_survive_without_own_heartbeat() {
        let tmp = TempDir::new().unwrap();
        let monitor = monitor_for(&tmp, "p1").await;
        let own_ticket = write_ticket(&tmp, 1, "p1");

        let report = monitor.health_check_at(NOW).await;

        assert!(report.is_alive("p1"));
        assert!(own_ticket.exists());
    }

    #[tokio::test]
    async fn test_entries_of_dead_owners_are_reaped_only_when_expired() {
        let tmp = TempDir::new().unwrap();
        let monitor = monitor_for(&tmp, "p1").await;
        write_heartbeat(&tmp, "live", NOW);

        let dead_expired = write_entry(&tmp, "a", &CacheEntry::new(json!(1), NOW - 500, Some(100), "dead"));
        let dead_fresh = write_entry(&tmp, "b", &CacheEntry::new(json!(2), NOW - 50, Some(100), "dead"));
        let dead_max_ttl = write_entry(&tmp, "c", &CacheEntry::new(json!(3), NOW - MAX_TTL - 1, None, "dead"));
        let live_expired = write_entry(&tmp, "d", &CacheEntry::new(json!(4), NOW - 500, Some(100), "live"));

        let report = monitor.health_check_at(NOW).await;

        assert_eq!(report.reaped_entries, 2);
        assert!(!dead_expired.exists());
        assert!(dead_fresh.exists());
        assert!(!dead_max_ttl.exists());
        assert!(live_expired.exists(), "entries of live owners expire on read, not in the sweep");
    }

    #[tokio::test]
    async fn test_corrupt_files_do_not_stop_the_sweep() {
        let tmp = TempDir::new().unwrap();
        let monitor = monitor_for(&tmp, "p1").await;

        std::fs::write(tmp.path().join("proc/garbled"), "not a number").unwrap();
        write_heartbeat(&tmp, "dead", 1);
        std::fs::write(tmp.path().join("data/broken"), "{").unwrap();
        let expired = write_entry(&tmp, "old", &CacheEntry::new(json!(0), 1, Some(1), "dead"));

        let report = monitor.health_check_at(NOW).await;

        assert_eq!(report.reaped_heartbeats, 1);
        assert_eq!(report.reaped_entries, 1);
        assert!(tmp.path().join("proc/garbled").exists());
        assert!(tmp.path().join("data/broken").exists());
        assert!(!expired.exists());
    }

    #[tokio::test]
    async fn test_temp_files_of_dead_writers_are_reaped() {
        let tmp = TempDir::new().unwrap();
        let monitor = monitor_for(&tmp, "p1").await;

        std::fs::write(tmp.path().join("data/.tmp-dead-key"), "{").unwrap();
        std::fs::write(tmp.path().join("data/.tmp-p1-key"), "{").unwrap();
        std::fs::write(tmp.path().join("proc/.tmp-dead-dead"), "1").unwrap();

        let report = monitor.health_check_at(NOW).await;

        assert_eq!(report.reaped_temp_files, 2);
        assert!(tmp.path().join("data/.tmp-p1-key").exists());
    }

    #[tokio::test]
    async fn test_health_check_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let monitor = monitor_for(&tmp, "p1").await;
        write_heartbeat(&tmp, "dead", 1);
        write_ticket(&tmp, 1, "dead");

        let first = monitor.health_check_at(NOW).await;
        let second = monitor.health_check_at(NOW).await;

        assert_eq!(first.reaped_tickets, 1);
        assert_eq!(second.reaped_tickets, 0);
        assert_eq!(first.alive, second.alive);
    }

    #[tokio::test]
    async fn test_missing_workdir_reaps_nothing() {
        let tmp = TempDir::new().unwrap();
        let monitor = HeartbeatMonitor::new(Workdir::new(tmp.path().join("absent")), "p1", TIMEOUT, MAX_TTL);

        let report = monitor.health_check_at(NOW).await;
        assert_eq!(report, HealthReport::default());
    }

    #[tokio::test]
    async fn test_heartbeat_task_refreshes_and_can_be_aborted() {
        let tmp = TempDir::new().unwrap();
        let monitor = monitor_for(&tmp, "p1").await;
        let path = tmp.path().join("proc/p1");

        let handle = monitor.start(Duration::from_millis(50)).await.unwrap();
        let first: u64 = std::fs::read_to_string(&path).unwrap().parse().unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        let later: u64 = std::fs::read_to_string(&path).unwrap().parse().unwrap();
        assert!(later > first, "heartbeat should have been refreshed");

        handle.abort();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_finished(), "Task should be finished after abort");
    }

    #[tokio::test]
    async fn test_remove_heartbeat() {
        let tmp = TempDir::new().unwrap();
        let monitor = monitor_for(&tmp, "p1").await;
        monitor.beat().await.unwrap();

        monitor.remove_heartbeat().await.unwrap();
        monitor.remove_heartbeat().await.unwrap();
        assert!(!tmp.path().join("proc/p1").exists());
    }
}

//! Cache Facade
//!
//! Public get/set/reset surface. Depending on configuration a call is served
//! by the in-memory mapping, turned into a job for the coordinated on-disk
//! store, or both.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::cache::{key_codec, CacheStats, MemoryStore};
use crate::config::Config;
use crate::coordinator::{Coordinator, CoordinatorHandle, JobKind};
use crate::error::{CacheError, Result};
use crate::tasks::{spawn_queue_watcher, HealthReport, HeartbeatMonitor};
use crate::workdir::Workdir;

// == Cache ==
/// Dual-mode cache handle. Clones share the same state.
#[derive(Clone)]
pub struct Cache {
    inner: Arc<CacheInner>,
}

struct CacheInner {
    config: Config,
    memory: RwLock<MemoryStore>,
    stats: Mutex<CacheStats>,
    timers: Mutex<ExpiryTimers>,
    backend: Mutex<Option<FileBackend>>,
}

/// Tasks started by `init()` in file mode.
struct FileBackend {
    coordinator: CoordinatorHandle,
    coordinator_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
    watcher_task: JoinHandle<()>,
    monitor: HeartbeatMonitor,
    /// End of the startup wait every `init()` call honours
    ready_at: Instant,
}

impl FileBackend {
    async fn shutdown(self) {
        self.watcher_task.abort();
        self.coordinator.shutdown().await;
        let _ = self.coordinator_task.await;

        // Beat until the tickets are gone so nobody mistakes us for dead early.
        self.heartbeat_task.abort();
        if let Err(e) = self.monitor.remove_heartbeat().await {
            warn!(error = %e, "Failed to remove heartbeat on shutdown");
        }
        info!(process_id = %self.monitor.process_id(), "File cache closed");
    }

    fn abort(self) {
        self.watcher_task.abort();
        self.heartbeat_task.abort();
        // Dropping the last handle stops the coordinator, which withdraws its tickets.
    }
}

/// Local one-shot expiry timers, at most one per key.
#[derive(Default)]
struct ExpiryTimers {
    next_id: u64,
    by_key: HashMap<String, (u64, JoinHandle<()>)>,
}

impl ExpiryTimers {
    fn cancel(&mut self, key: &str) {
        if let Some((_, task)) = self.by_key.remove(key) {
            task.abort();
        }
    }

    /// Drops the record of a timer that fired, unless it was replaced since.
    fn forget(&mut self, key: &str, id: u64) {
        if self.by_key.get(key).map(|(current, _)| *current) == Some(id) {
            self.by_key.remove(key);
        }
    }

    fn cancel_all(&mut self) {
        for (_, (_, task)) in self.by_key.drain() {
            task.abort();
        }
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        self.timers.get_mut().cancel_all();
        if let Some(backend) = self.backend.get_mut().take() {
            backend.abort();
        }
    }
}

impl Cache {
    // == Constructor ==
    /// Creates a cache. Nothing touches the filesystem until [`init`](Self::init).
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(CacheInner {
                config,
                memory: RwLock::new(MemoryStore::new()),
                stats: Mutex::new(CacheStats::new()),
                timers: Mutex::new(ExpiryTimers::default()),
                backend: Mutex::new(None),
            }),
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn process_id(&self) -> &str {
        &self.inner.config.process_id
    }

    // == Init ==
    /// Starts the file cache: creates the shared areas, starts the heartbeat,
    /// the coordinator and the queue watcher.
    ///
    /// Returns only after one full heartbeat timeout, so processes starting
    /// together have registered before anyone reaps. Idempotent; a no-op when
    /// the file cache is disabled.
    pub async fn init(&self) -> Result<()> {
        let config = &self.inner.config;
        if !config.use_file_cache {
            return Ok(());
        }

        let mut backend = self.inner.backend.lock().await;
        if let Some(existing) = backend.as_ref() {
            let ready_at = existing.ready_at;
            drop(backend);
            tokio::time::sleep_until(ready_at).await;
            return Ok(());
        }

        let workdir = Workdir::new(&config.workdir);
        workdir.ensure().await?;

        let monitor = HeartbeatMonitor::from_config(config);
        let heartbeat_task = monitor.clone().start(config.heartbeat_interval()).await?;

        let (coordinator, handle) = Coordinator::new(&workdir, &config.process_id, config.max_ttl);
        let coordinator_task = coordinator.spawn();
        let watcher_task = spawn_queue_watcher(
            workdir.queue_dir(),
            config.process_id.clone(),
            Duration::from_millis(config.queue_poll_interval),
            handle.downgrade(),
        );

        // Registered before waiting so a cancelled init still leaves the
        // tasks owned by this cache.
        let ready_at = Instant::now() + Duration::from_millis(config.heartbeat_timeout);
        *backend = Some(FileBackend {
            coordinator: handle,
            coordinator_task,
            heartbeat_task,
            watcher_task,
            monitor,
            ready_at,
        });
        drop(backend);

        info!(
            process_id = %config.process_id,
            workdir = %config.workdir.display(),
            heartbeat_timeout_ms = config.heartbeat_timeout,
            "File cache started; waiting for peers to register"
        );
        tokio::time::sleep_until(ready_at).await;
        Ok(())
    }

    // == Close ==
    /// Stops background tasks, fails jobs still waiting for the floor,
    /// withdraws this process's tickets and heartbeat. Idempotent.
    pub async fn close(&self) {
        self.inner.timers.lock().await.cancel_all();

        let backend = self.inner.backend.lock().await.take();
        if let Some(backend) = backend {
            backend.shutdown().await;
        }
    }

    // == Get ==
    /// Retrieves a value by key, or `None` if absent or expired.
    pub async fn get(&self, key: &str) -> Result<Option<Value>> {
        self.validate_key(key)?;
        let config = &self.inner.config;

        if config.use_mem_cache {
            let cached = self.inner.memory.read().await.get(key);
            if let Some(value) = cached {
                self.inner.stats.lock().await.record_memory_hit();
                return Ok(Some(value));
            }
        }

        let value = if config.use_file_cache {
            self.coordinator().await?.submit(JobKind::Get, key).await?
        } else {
            None
        };

        let mut stats = self.inner.stats.lock().await;
        if value.is_some() {
            stats.record_file_hit();
        } else {
            stats.record_miss();
        }
        Ok(value)
    }

    // == Set ==
    /// Stores a value. A positive `ttl` also arms a local timer that resets
    /// the key once it elapses; the on-disk entry carries the TTL as well.
    pub async fn set(&self, key: &str, value: Value, ttl: Option<Duration>) -> Result<()> {
        self.validate_key(key)?;
        let config = &self.inner.config;
        let ttl_ms = ttl.map(|t| t.as_millis() as u64).filter(|ms| *ms > 0);

        let memory_value = config.use_mem_cache.then(|| value.clone());

        if config.use_file_cache {
            self.coordinator()
                .await?
                .submit(JobKind::Set { value, ttl: ttl_ms }, key)
                .await?;
        }

        if let Some(value) = memory_value {
            self.inner.memory.write().await.set(key, value);
        }

        if config.use_file_cache || config.use_mem_cache {
            self.schedule_expiry(key, ttl_ms).await;
        }

        self.inner.stats.lock().await.record_set();
        debug!(key = %key, ttl_ms = ?ttl_ms, "Set key");
        Ok(())
    }

    // == Reset ==
    /// Removes a key. Resetting an absent key succeeds.
    pub async fn reset(&self, key: &str) -> Result<()> {
        self.validate_key(key)?;
        self.inner.timers.lock().await.cancel(key);
        self.reset_entry(key).await
    }

    async fn reset_entry(&self, key: &str) -> Result<()> {
        let config = &self.inner.config;

        if config.use_mem_cache {
            self.inner.memory.write().await.remove(key);
        }
        if config.use_file_cache {
            self.coordinator().await?.submit(JobKind::Reset, key).await?;
        }

        self.inner.stats.lock().await.record_reset();
        debug!(key = %key, "Reset key");
        Ok(())
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub async fn stats(&self) -> CacheStats {
        let mut stats = self.inner.stats.lock().await.clone();
        stats.set_memory_entries(self.inner.memory.read().await.len());
        stats
    }

    /// Whether `init()` has started the file cache.
    pub async fn is_file_backed(&self) -> bool {
        self.inner.backend.lock().await.is_some()
    }

    /// Runs a health check now instead of waiting for the next heartbeat.
    pub async fn health_check(&self) -> Result<HealthReport> {
        let monitor = self
            .inner
            .backend
            .lock()
            .await
            .as_ref()
            .map(|backend| backend.monitor.clone())
            .ok_or(CacheError::NotInitialized)?;
        Ok(monitor.health_check().await)
    }

    fn validate_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(CacheError::InvalidKey("key cannot be empty".to_string()));
        }
        if self.inner.config.use_file_cache {
            key_codec::encode(key)?;
        }
        Ok(())
    }

    async fn coordinator(&self) -> Result<CoordinatorHandle> {
        self.inner
            .backend
            .lock()
            .await
            .as_ref()
            .map(|backend| backend.coordinator.clone())
            .ok_or(CacheError::NotInitialized)
    }

    /// Replaces the key's local timer; `None` just cancels it.
    async fn schedule_expiry(&self, key: &str, ttl_ms: Option<u64>) {
        let mut timers = self.inner.timers.lock().await;
        timers.cancel(key);

        let Some(ttl_ms) = ttl_ms else {
            return;
        };
        timers.next_id += 1;
        let id = timers.next_id;

        let cache = Arc::downgrade(&self.inner);
        let timer_key = key.to_string();
        let task = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(ttl_ms)).await;

            let Some(inner) = cache.upgrade() else {
                return;
            };
            let cache = Cache { inner };
            cache.inner.timers.lock().await.forget(&timer_key, id);

            debug!(key = %timer_key, ttl_ms, "Local TTL elapsed");
            if let Err(e) = cache.reset_entry(&timer_key).await {
                warn!(key = %timer_key, error = %e, "Failed to reset expired key");
            }
        });

        timers.by_key.insert(key.to_string(), (id, task));
    }
}

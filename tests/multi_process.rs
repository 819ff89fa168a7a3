//! Integration Tests for Shared-Directory Coordination
//!
//! Several cache instances with distinct process ids share one directory, the
//! way separate processes would.

use std::time::Duration;

use dual_cache::cache::{key_codec, now_ms, CacheEntry};
use dual_cache::coordinator::QueueTicket;
use dual_cache::workdir::Workdir;
use dual_cache::{Cache, Config};
use serde_json::json;
use tempfile::TempDir;

// == Helper Functions ==

const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(150);

fn file_config(tmp: &TempDir, process_id: &str) -> Config {
    Config::default()
        .with_process_id(process_id)
        .with_file_cache(tmp.path())
        .with_mem_cache(false)
        .with_heartbeat_timeout(HEARTBEAT_TIMEOUT)
        .with_queue_poll_interval(Duration::from_millis(10))
}

async fn start_instances(tmp: &TempDir, ids: &[&str]) -> Vec<Cache> {
    let caches: Vec<Cache> = ids
        .iter()
        .map(|id| Cache::new(file_config(tmp, id)).unwrap())
        .collect();
    init_all(&caches).await;
    caches
}

async fn init_all(caches: &[Cache]) {
    let handles: Vec<_> = caches
        .iter()
        .cloned()
        .map(|cache| tokio::spawn(async move { cache.init().await }))
        .collect();
    for handle in handles {
        handle.await.unwrap().unwrap();
    }
}

async fn close_all(caches: &[Cache]) {
    for cache in caches {
        cache.close().await;
    }
}

// == Tests ==

#[tokio::test]
async fn test_value_written_by_one_instance_is_read_by_another() {
    let tmp = TempDir::new().unwrap();
    let caches = start_instances(&tmp, &["writer", "reader"]).await;

    caches[0]
        .set("greeting", json!({"text": "hello"}), None)
        .await
        .unwrap();

    let value = caches[1].get("greeting").await.unwrap();
    assert_eq!(value, Some(json!({"text": "hello"})));
    assert_eq!(caches[1].stats().await.file_hits, 1);

    close_all(&caches).await;
}

#[tokio::test]
async fn test_concurrent_writers_agree_on_last_write() {
    let tmp = TempDir::new().unwrap();
    let caches = start_instances(&tmp, &["left", "right"]).await;

    let left = caches[0].clone();
    let right = caches[1].clone();
    let (a, b) = tokio::join!(
        tokio::spawn(async move { left.set("a", json!(1), None).await }),
        tokio::spawn(async move { right.set("a", json!(2), None).await }),
    );
    a.unwrap().unwrap();
    b.unwrap().unwrap();

    let seen_left = caches[0].get("a").await.unwrap();
    let seen_right = caches[1].get("a").await.unwrap();
    assert_eq!(seen_left, seen_right);
    assert!(seen_left == Some(json!(1)) || seen_left == Some(json!(2)));

    close_all(&caches).await;
}

#[tokio::test]
async fn test_many_writers_leave_no_tickets_behind() {
    let tmp = TempDir::new().unwrap();
    let caches = start_instances(&tmp, &["p1", "p2", "p3"]).await;

    let mut handles = Vec::new();
    for (i, cache) in caches.iter().enumerate() {
        for n in 0..5 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.set(&format!("k{}", n), json!(i * 10 + n), None).await
            }));
        }
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    for n in 0..5 {
        let key = format!("k{}", n);
        let first = caches[0].get(&key).await.unwrap();
        assert!(first.is_some());
        assert_eq!(caches[1].get(&key).await.unwrap(), first);
        assert_eq!(caches[2].get(&key).await.unwrap(), first);
    }

    let queue = Workdir::new(tmp.path()).queue_dir();
    let remaining = dual_cache::workdir::list_names(&queue).await.unwrap();
    assert!(remaining.is_empty(), "leftover tickets: {:?}", remaining);

    close_all(&caches).await;
}

#[tokio::test]
async fn test_dead_process_ticket_is_reaped() {
    let tmp = TempDir::new().unwrap();
    let workdir = Workdir::new(tmp.path());
    workdir.ensure().await.unwrap();

    // A peer that beat once and then died while holding the oldest ticket.
    std::fs::write(workdir.proc_dir().join("ghost"), now_ms().to_string()).unwrap();
    let ghost_ticket = QueueTicket::new(1, "ghost");
    std::fs::write(workdir.queue_dir().join(ghost_ticket.file_name()), b"").unwrap();

    let cache = Cache::new(file_config(&tmp, "survivor")).unwrap();
    cache.init().await.unwrap();

    let result = tokio::time::timeout(Duration::from_secs(3), cache.set("k", json!("v"), None)).await;
    result.expect("set stayed blocked behind a dead peer").unwrap();

    assert!(!workdir.queue_dir().join(ghost_ticket.file_name()).exists());
    assert!(!workdir.proc_dir().join("ghost").exists());
    assert_eq!(cache.get("k").await.unwrap(), Some(json!("v")));

    cache.close().await;
}

#[tokio::test]
async fn test_expired_entry_is_removed_by_another_instance_read() {
    let tmp = TempDir::new().unwrap();
    let caches = start_instances(&tmp, &["setter", "observer"]).await;

    // Owned by a live process and carrying no local timer anywhere.
    let entry = CacheEntry::new(json!("lived"), now_ms() - 10_000, Some(50), "setter");
    let path = Workdir::new(tmp.path())
        .data_dir()
        .join(key_codec::encode("short").unwrap());
    std::fs::write(&path, serde_json::to_vec(&entry).unwrap()).unwrap();

    assert_eq!(caches[1].get("short").await.unwrap(), None);
    assert!(!path.exists());
    assert_eq!(caches[0].get("short").await.unwrap(), None);

    close_all(&caches).await;
}

#[tokio::test]
async fn test_entry_within_ttl_is_visible_to_other_instances() {
    let tmp = TempDir::new().unwrap();
    let caches = start_instances(&tmp, &["setter", "observer"]).await;

    caches[0]
        .set("fresh", json!("still here"), Some(Duration::from_secs(60)))
        .await
        .unwrap();

    assert_eq!(caches[1].get("fresh").await.unwrap(), Some(json!("still here")));

    close_all(&caches).await;
}

#[tokio::test]
async fn test_reset_is_visible_everywhere_and_idempotent() {
    let tmp = TempDir::new().unwrap();
    let caches = start_instances(&tmp, &["one", "two"]).await;

    caches[0].set("doomed", json!(true), None).await.unwrap();
    caches[1].reset("doomed").await.unwrap();
    caches[1].reset("doomed").await.unwrap();

    assert_eq!(caches[0].get("doomed").await.unwrap(), None);

    close_all(&caches).await;
}

#[tokio::test]
async fn test_close_withdraws_heartbeat() {
    let tmp = TempDir::new().unwrap();
    let caches = start_instances(&tmp, &["stays", "leaves"]).await;
    let proc_dir = Workdir::new(tmp.path()).proc_dir();
    assert!(proc_dir.join("leaves").exists());

    caches[1].close().await;
    assert!(!proc_dir.join("leaves").exists());

    let report = caches[0].health_check().await.unwrap();
    assert!(report.is_alive("stays"));
    assert!(!report.is_alive("leaves"));

    caches[0].close().await;
}

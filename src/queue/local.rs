use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::time::Instant;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::queue::traits::{Delivery, QueueProvider};
use crate::{error::RustDwError, Result};

const READY_DIR: &str = "ready";
const INFLIGHT_DIR: &str = "inflight";
const CORRUPT_DIR: &str = "corrupt";
const TMP_DIR: &str = "tmp";
const FRESH_EXT: &str = "msg";
const REDELIVERED_EXT: &str = "redo";
const CRC_LEN: usize = 4;

/// Durable queue backed by a directory tree, shareable between processes.
///
/// Each queue is `<root>/<queue>/{ready,inflight,corrupt,tmp}`. A message is
/// one file holding a little-endian CRC32 followed by the payload. Claiming
/// renames the file from `ready/` into `inflight/` with the claim time
/// prefixed, so only one consumer can win a given message. Ack deletes the
/// in-flight file; nack, or a claim older than the visibility timeout, moves
/// it back to `ready/`.
///
/// Receivers work through a cached, sorted listing of `ready/` and only
/// list the directory again once that cache is exhausted, so draining N
/// messages costs about one directory scan rather than N.
pub struct LocalQueue {
    root: PathBuf,
    poll_interval: Duration,
    visibility_timeout: Duration,
    last_stamp: AtomicI64,
    pending: Mutex<HashMap<String, VecDeque<String>>>,
}

impl LocalQueue {
    pub fn new(root: PathBuf, poll_interval: Duration, visibility_timeout: Duration) -> Self {
        Self {
            root,
            poll_interval,
            visibility_timeout,
            last_stamp: AtomicI64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Publish stamp in microseconds, strictly increasing per provider so
    /// ready files sort in publish order.
    fn next_stamp(&self) -> i64 {
        let now = Utc::now().timestamp_micros();
        let prev = self
            .last_stamp
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(now.max(last + 1)))
            .unwrap_or(now);
        now.max(prev + 1)
    }

    pub fn from_config(config: &QueueConfig) -> Self {
        Self::new(
            config.path.clone(),
            Duration::from_millis(config.poll_interval_ms),
            Duration::from_millis(config.visibility_timeout_ms),
        )
    }

    fn queue_dir(&self, queue: &str) -> Result<PathBuf> {
        let valid = !queue.is_empty()
            && queue
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
        if !valid {
            return Err(RustDwError::Queue(format!("invalid queue name: {queue:?}")));
        }
        Ok(self.root.join(queue))
    }

    async fn ensure_layout(&self, queue: &str) -> Result<PathBuf> {
        let dir = self.queue_dir(queue)?;
        for sub in [READY_DIR, INFLIGHT_DIR, CORRUPT_DIR, TMP_DIR] {
            fs::create_dir_all(dir.join(sub)).await.map_err(|e| {
                RustDwError::Queue(format!("cannot create {}: {e}", dir.join(sub).display()))
            })?;
        }
        Ok(dir)
    }

    async fn sorted_names(dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let mut entries = match fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
            Err(e) => return Err(RustDwError::Queue(format!("cannot list {}: {e}", dir.display()))),
        };
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Move in-flight messages whose claim expired back to `ready/`.
    async fn requeue_expired(&self, dir: &Path) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let timeout = self.visibility_timeout.as_millis() as i64;

        for name in Self::sorted_names(&dir.join(INFLIGHT_DIR)).await? {
            let Some((claimed_at, original)) = split_claim(&name) else {
                continue;
            };
            if now - claimed_at < timeout {
                continue;
            }
            let target = dir.join(READY_DIR).join(redelivered_name(original));
            match fs::rename(dir.join(INFLIGHT_DIR).join(&name), target).await {
                Ok(()) => debug!(message = original, "Requeued expired in-flight message"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    async fn try_claim(&self, queue: &str, dir: &Path) -> Result<Option<Delivery>> {
        let mut relisted = false;
        loop {
            let cached = self.pending.lock().get_mut(queue).and_then(VecDeque::pop_front);
            let name = match cached {
                Some(name) => name,
                None if relisted => return Ok(None),
                None => {
                    let names: VecDeque<String> = Self::sorted_names(&dir.join(READY_DIR))
                        .await?
                        .into_iter()
                        .filter(|name| is_message_name(name))
                        .collect();
                    self.pending.lock().insert(queue.to_string(), names);
                    relisted = true;
                    continue;
                }
            };
            let claimed = format!("{}~{}", Utc::now().timestamp_millis(), name);
            let inflight_path = dir.join(INFLIGHT_DIR).join(&claimed);
            match fs::rename(dir.join(READY_DIR).join(&name), &inflight_path).await {
                Ok(()) => {}
                // another consumer won this message
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }

            let raw = fs::read(&inflight_path).await?;
            match decode_message(&raw) {
                Some(payload) => {
                    return Ok(Some(Delivery {
                        queue: queue.to_string(),
                        delivery_id: claimed,
                        payload,
                        published_at: published_at(&name),
                        redelivered: name.ends_with(REDELIVERED_EXT),
                    }));
                }
                None => {
                    warn!(queue, message = %name, "Quarantining message with bad checksum");
                    fs::rename(&inflight_path, dir.join(CORRUPT_DIR).join(&name)).await?;
                }
            }
        }
    }
}

#[async_trait]
impl QueueProvider for LocalQueue {
    async fn declare(&self, queue: &str) -> Result<()> {
        self.ensure_layout(queue).await?;
        Ok(())
    }

    async fn publish(&self, queue: &str, payload: Bytes) -> Result<()> {
        let dir = self.ensure_layout(queue).await?;
        let name = format!(
            "{:020}-{}.{}",
            self.next_stamp(),
            Uuid::new_v4().simple(),
            FRESH_EXT
        );
        let tmp_path = dir.join(TMP_DIR).join(&name);

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(&crc32fast::hash(&payload).to_le_bytes()).await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp_path, dir.join(READY_DIR).join(&name)).await?;
        Ok(())
    }

    async fn receive(&self, queue: &str, timeout: Duration) -> Result<Option<Delivery>> {
        let dir = self.ensure_layout(queue).await?;
        let deadline = Instant::now() + timeout;

        loop {
            self.requeue_expired(&dir).await?;
            if let Some(delivery) = self.try_claim(queue, &dir).await? {
                return Ok(Some(delivery));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<()> {
        let dir = self.queue_dir(&delivery.queue)?;
        match fs::remove_file(dir.join(INFLIGHT_DIR).join(&delivery.delivery_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(
                    queue = %delivery.queue,
                    delivery = %delivery.delivery_id,
                    "Ack after visibility timeout; message may be delivered again"
                );
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn nack(&self, delivery: &Delivery) -> Result<()> {
        let dir = self.queue_dir(&delivery.queue)?;
        let Some((_, original)) = split_claim(&delivery.delivery_id) else {
            return Err(RustDwError::Queue(format!(
                "malformed delivery id: {}",
                delivery.delivery_id
            )));
        };
        let target = dir.join(READY_DIR).join(redelivered_name(original));
        match fs::rename(dir.join(INFLIGHT_DIR).join(&delivery.delivery_id), target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn depth(&self, queue: &str) -> Result<usize> {
        let dir = self.queue_dir(queue)?;
        // ready first: a claim racing this listing is counted twice, never missed
        let ready = Self::sorted_names(&dir.join(READY_DIR)).await?;
        let inflight = Self::sorted_names(&dir.join(INFLIGHT_DIR)).await?;
        Ok(ready.iter().filter(|n| is_message_name(n)).count() + inflight.len())
    }
}

fn is_message_name(name: &str) -> bool {
    name.ends_with(FRESH_EXT) || name.ends_with(REDELIVERED_EXT)
}

fn split_claim(name: &str) -> Option<(i64, &str)> {
    let (claimed_at, original) = name.split_once('~')?;
    Some((claimed_at.parse().ok()?, original))
}

fn redelivered_name(original: &str) -> String {
    let stem = original
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(original);
    format!("{stem}.{REDELIVERED_EXT}")
}

fn published_at(name: &str) -> DateTime<Utc> {
    name.split('-')
        .next()
        .and_then(|micros| micros.parse::<i64>().ok())
        .and_then(|micros| {
            let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
            DateTime::<Utc>::from_timestamp(micros.div_euclid(1_000_000), nanos)
        })
        .unwrap_or_else(Utc::now)
}

fn decode_message(raw: &[u8]) -> Option<Bytes> {
    if raw.len() < CRC_LEN {
        return None;
    }
    let (crc, payload) = raw.split_at(CRC_LEN);
    let expected = u32::from_le_bytes([crc[0], crc[1], crc[2], crc[3]]);
    (crc32fast::hash(payload) == expected).then(|| Bytes::copy_from_slice(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn queue_in(dir: &TempDir, visibility: Duration) -> LocalQueue {
        LocalQueue::new(dir.path().to_path_buf(), Duration::from_millis(5), visibility)
    }

    #[tokio::test]
    async fn test_publish_claim_ack_cycle() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir, Duration::from_secs(60));

        queue.publish("products", Bytes::from_static(b"{\"product_id\":\"A\"}")).await.unwrap();
        assert_eq!(queue.depth("products").await.unwrap(), 1);

        let delivery = queue
            .receive("products", Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.payload, Bytes::from_static(b"{\"product_id\":\"A\"}"));
        assert!(!delivery.redelivered);
        assert_eq!(queue.depth("products").await.unwrap(), 1);

        queue.ack(&delivery).await.unwrap();
        assert_eq!(queue.depth("products").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_messages_survive_provider_restart() {
        let dir = TempDir::new().unwrap();
        {
            let queue = queue_in(&dir, Duration::from_secs(60));
            queue.publish("users", Bytes::from_static(b"one")).await.unwrap();
        }

        let reopened = queue_in(&dir, Duration::from_secs(60));
        let delivery = reopened.receive("users", Duration::from_millis(50)).await.unwrap();
        assert_eq!(delivery.unwrap().payload, Bytes::from_static(b"one"));
    }

    #[tokio::test]
    async fn test_expired_claim_is_redelivered() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir, Duration::from_millis(1));
        queue.publish("orders", Bytes::from_static(b"x")).await.unwrap();

        let first = queue.receive("orders", Duration::from_millis(50)).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let second = queue.receive("orders", Duration::from_millis(50)).await.unwrap().unwrap();
        assert!(second.redelivered);
        assert_ne!(first.delivery_id, second.delivery_id);
    }

    #[tokio::test]
    async fn test_drain_picks_up_messages_published_mid_drain() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir, Duration::from_secs(60));
        for payload in ["a", "b", "c"] {
            queue.publish("orders", Bytes::from(payload)).await.unwrap();
        }

        let first = queue.receive("orders", Duration::from_millis(50)).await.unwrap().unwrap();
        queue.ack(&first).await.unwrap();
        queue.publish("orders", Bytes::from_static(b"d")).await.unwrap();

        let mut seen = vec![first.payload];
        while let Some(delivery) = queue.receive("orders", Duration::from_millis(20)).await.unwrap() {
            queue.ack(&delivery).await.unwrap();
            seen.push(delivery.payload);
        }
        assert_eq!(seen, vec![
            Bytes::from_static(b"a"),
            Bytes::from_static(b"b"),
            Bytes::from_static(b"c"),
            Bytes::from_static(b"d"),
        ]);
        assert_eq!(queue.depth("orders").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_listing_skips_messages_claimed_elsewhere() {
        let dir = TempDir::new().unwrap();
        let left = queue_in(&dir, Duration::from_secs(60));
        let right = queue_in(&dir, Duration::from_secs(60));
        for payload in ["a", "b", "c"] {
            left.publish("users", Bytes::from(payload)).await.unwrap();
        }

        let a = left.receive("users", Duration::from_millis(50)).await.unwrap().unwrap();
        let b = right.receive("users", Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(a.payload, Bytes::from_static(b"a"));
        assert_eq!(b.payload, Bytes::from_static(b"b"));

        let c = left.receive("users", Duration::from_millis(50)).await.unwrap().unwrap();
        assert_eq!(c.payload, Bytes::from_static(b"c"));
        assert!(right.receive("users", Duration::from_millis(20)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_nack_returns_message() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir, Duration::from_secs(60));
        queue.publish("orders", Bytes::from_static(b"x")).await.unwrap();

        let delivery = queue.receive("orders", Duration::from_millis(50)).await.unwrap().unwrap();
        queue.nack(&delivery).await.unwrap();

        let again = queue.receive("orders", Duration::from_millis(50)).await.unwrap().unwrap();
        assert!(again.redelivered);
    }

    #[tokio::test]
    async fn test_corrupt_message_is_quarantined() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir, Duration::from_secs(60));
        queue.declare("users").await.unwrap();
        std::fs::write(
            dir.path().join("users").join(READY_DIR).join("00000000000000000001-bad.msg"),
            b"\0\0\0\0garbage",
        )
        .unwrap();

        assert!(queue.receive("users", Duration::from_millis(20)).await.unwrap().is_none());
        assert_eq!(queue.depth("users").await.unwrap(), 0);
        assert!(dir.path().join("users").join(CORRUPT_DIR).join("00000000000000000001-bad.msg").exists());
    }

    #[tokio::test]
    async fn test_rejects_path_like_queue_names() {
        let dir = TempDir::new().unwrap();
        let queue = queue_in(&dir, Duration::from_secs(60));
        assert!(queue.publish("../etc", Bytes::new()).await.is_err());
    }
}

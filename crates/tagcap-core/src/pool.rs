//! Credential pool with round-robin rotation and per-entry cooldowns.
//!
//! The rotation cursor is a single atomic; each slot carries its own
//! cooldown stamp behind its own lock, so waiting callers never hold a
//! whole-pool lock. The pool-wide lock is touched only when advancing the
//! rotation (a cheap snapshot) and when the health check removes entries.

use crate::error::CaptionError;
use crate::service::CaptionService;
use crate::types::CancelFlag;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

/// One API credential loaded from the credentials file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub api_key: String,
}

impl Credential {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

/// Pool tuning knobs.
#[derive(Debug, Clone)]
pub struct PoolOptions {
    /// Minimum interval between two uses of the same entry
    pub cooldown: Duration,

    /// Ceiling on how long `acquire` may wait for one entry's cooldown
    pub acquire_timeout: Duration,

    /// Short-sleep step while waiting out a cooldown
    pub poll_interval: Duration,

    /// Extra cooldown applied to an entry after a rate-limit signal
    pub rate_limit_penalty: Duration,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_millis(2000),
            acquire_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(25),
            rate_limit_penalty: Duration::from_secs(30),
        }
    }
}

/// One rotation entry. Owned by the pool; the cooldown stamp is only
/// mutated under the slot's own lock.
#[derive(Debug)]
struct Slot {
    credential: Credential,
    /// Earliest next use; stamped forward on every successful acquire.
    next_ready: Mutex<Instant>,
}

impl Slot {
    fn new(credential: Credential) -> Arc<Self> {
        Arc::new(Self {
            credential,
            next_ready: Mutex::new(Instant::now()),
        })
    }
}

/// A credential checked out of the pool.
///
/// Keeps a handle to its slot so a rate-limit penalty lands on the right
/// entry without going back through the rotation.
pub struct Lease {
    slot: Arc<Slot>,
    penalty: Duration,
}

impl Lease {
    pub fn credential(&self) -> &Credential {
        &self.slot.credential
    }

    /// Push this entry's next-available time further into the future after
    /// the service reported a rate limit. The entry stays in rotation.
    pub fn penalize(&self) {
        let mut next_ready = lock_stamp(&self.slot.next_ready);
        *next_ready = Instant::now() + self.penalty;
        tracing::warn!(
            "Credential penalized for {:?} after rate limit",
            self.penalty
        );
    }
}

/// Round-robin credential pool with per-entry cooldowns.
pub struct ResourcePool {
    slots: RwLock<Vec<Arc<Slot>>>,
    cursor: AtomicUsize,
    options: PoolOptions,
}

impl ResourcePool {
    pub fn new(credentials: Vec<Credential>, options: PoolOptions) -> Self {
        Self {
            slots: RwLock::new(credentials.into_iter().map(Slot::new).collect()),
            cursor: AtomicUsize::new(0),
            options,
        }
    }

    /// Load credentials from a file, one API key per line. Blank lines and
    /// `#` comments are ignored.
    pub fn from_file(path: &Path, options: PoolOptions) -> Result<Self, CaptionError> {
        let content = std::fs::read_to_string(path).map_err(|e| CaptionError::io(path, e))?;
        let credentials: Vec<Credential> = content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(Credential::new)
            .collect();
        if credentials.is_empty() {
            return Err(CaptionError::ResourceExhausted);
        }
        Ok(Self::new(credentials, options))
    }

    pub fn len(&self) -> usize {
        read_slots(&self.slots).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Acquire the next credential in rotation, waiting out its cooldown.
    ///
    /// Exactly one caller observes each cursor value, so concurrent
    /// acquisitions never land on the same rotation index. The wait is a
    /// bounded short-sleep poll; a credential that never becomes ready
    /// within the ceiling yields `ResourceTimeout`.
    pub async fn acquire(&self, cancel: &CancelFlag) -> Result<Lease, CaptionError> {
        let slot = {
            let slots = read_slots(&self.slots);
            if slots.is_empty() {
                return Err(CaptionError::ResourceExhausted);
            }
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % slots.len();
            slots[index].clone()
        };

        let started = Instant::now();
        loop {
            if cancel.is_cancelled() {
                return Err(CaptionError::Cancelled);
            }
            {
                // Check and stamp in one critical section so two waiters
                // cannot both claim the same ready window.
                let mut next_ready = lock_stamp(&slot.next_ready);
                let now = Instant::now();
                if now >= *next_ready {
                    *next_ready = now + self.options.cooldown;
                    return Ok(Lease {
                        slot: slot.clone(),
                        penalty: self.options.rate_limit_penalty,
                    });
                }
            }
            if started.elapsed() >= self.options.acquire_timeout {
                return Err(CaptionError::ResourceTimeout {
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// Probe every entry through the service and drop the ones that fail.
    ///
    /// Returns the number of surviving entries; an empty pool afterwards is
    /// fatal for the whole run.
    pub async fn health_check(&self, service: &dyn CaptionService) -> Result<usize, CaptionError> {
        let snapshot: Vec<Arc<Slot>> = read_slots(&self.slots).clone();
        let mut alive = Vec::with_capacity(snapshot.len());
        for slot in snapshot {
            if service.probe(&slot.credential).await {
                alive.push(slot);
            } else {
                tracing::warn!("Dropping credential that failed its health probe");
            }
        }
        let survivors = alive.len();
        *self
            .slots
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = alive;
        if survivors == 0 {
            return Err(CaptionError::ResourceExhausted);
        }
        Ok(survivors)
    }
}

fn read_slots(slots: &RwLock<Vec<Arc<Slot>>>) -> std::sync::RwLockReadGuard<'_, Vec<Arc<Slot>>> {
    slots.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn lock_stamp(stamp: &Mutex<Instant>) -> std::sync::MutexGuard<'_, Instant> {
    stamp.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestPart;
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn pool_with(keys: &[&str], options: PoolOptions) -> ResourcePool {
        ResourcePool::new(keys.iter().map(|k| Credential::new(*k)).collect(), options)
    }

    fn fast_options() -> PoolOptions {
        PoolOptions {
            cooldown: Duration::from_millis(0),
            acquire_timeout: Duration::from_millis(500),
            poll_interval: Duration::from_millis(1),
            rate_limit_penalty: Duration::from_millis(50),
        }
    }

    /// Probe-only service stub for health-check tests.
    struct ProbeService {
        healthy: Vec<String>,
    }

    #[async_trait]
    impl CaptionService for ProbeService {
        fn name(&self) -> &str {
            "probe-stub"
        }

        async fn generate(
            &self,
            _parts: &[RequestPart],
            _credential: &Credential,
        ) -> Result<String, CaptionError> {
            Err(CaptionError::Refused {
                message: "probe stub".to_string(),
            })
        }

        async fn probe(&self, credential: &Credential) -> bool {
            self.healthy.contains(&credential.api_key)
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }
    }

    #[tokio::test]
    async fn test_acquire_rotates_round_robin() {
        let pool = pool_with(&["a", "b", "c"], fast_options());
        let cancel = CancelFlag::new();
        let mut seen = Vec::new();
        for _ in 0..6 {
            let lease = pool.acquire(&cancel).await.unwrap();
            seen.push(lease.credential().api_key.clone());
        }
        assert_eq!(seen, vec!["a", "b", "c", "a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_empty_pool_is_exhausted() {
        let pool = pool_with(&[], fast_options());
        let cancel = CancelFlag::new();
        let result = pool.acquire(&cancel).await;
        assert!(matches!(result, Err(CaptionError::ResourceExhausted)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquisition_is_fair() {
        // K entries, M >= K * 10 acquisitions from N concurrent tasks:
        // every entry must be issued the same number of times (+-1).
        let pool = Arc::new(pool_with(&["a", "b", "c", "d"], fast_options()));
        let cancel = CancelFlag::new();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            let cancel = cancel.clone();
            handles.push(tokio::spawn(async move {
                let mut keys = Vec::new();
                for _ in 0..10 {
                    let lease = pool.acquire(&cancel).await.unwrap();
                    keys.push(lease.credential().api_key.clone());
                }
                keys
            }));
        }

        let mut counts: HashMap<String, usize> = HashMap::new();
        for handle in handles {
            for key in handle.await.unwrap() {
                *counts.entry(key).or_default() += 1;
            }
        }

        assert_eq!(counts.values().sum::<usize>(), 80);
        let min = counts.values().min().copied().unwrap_or(0);
        let max = counts.values().max().copied().unwrap_or(0);
        assert!(
            max - min <= 1,
            "unbalanced rotation: min={min} max={max} counts={counts:?}"
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_cooldown_forces_wait_on_reuse() {
        // 2 entries, cooldown 1 time unit: the third sequential acquire
        // returns to the first entry and must wait out its cooldown.
        let options = PoolOptions {
            cooldown: Duration::from_millis(100),
            ..fast_options()
        };
        let pool = pool_with(&["a", "b"], options);
        let cancel = CancelFlag::new();

        let started = Instant::now();
        for _ in 0..3 {
            pool.acquire(&cancel).await.unwrap();
        }
        assert!(
            started.elapsed() >= Duration::from_millis(100),
            "third acquire should have waited, elapsed {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_acquire_times_out_on_cold_entry() {
        let options = PoolOptions {
            cooldown: Duration::from_secs(3600),
            acquire_timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(5),
            rate_limit_penalty: Duration::from_millis(0),
        };
        let pool = pool_with(&["a"], options);
        let cancel = CancelFlag::new();

        pool.acquire(&cancel).await.unwrap();
        let result = pool.acquire(&cancel).await;
        assert!(matches!(result, Err(CaptionError::ResourceTimeout { .. })));
    }

    #[tokio::test]
    async fn test_cancel_interrupts_cooldown_wait() {
        let options = PoolOptions {
            cooldown: Duration::from_secs(3600),
            acquire_timeout: Duration::from_secs(3600),
            poll_interval: Duration::from_millis(5),
            rate_limit_penalty: Duration::from_millis(0),
        };
        let pool = pool_with(&["a"], options);
        let cancel = CancelFlag::new();

        pool.acquire(&cancel).await.unwrap();
        cancel.cancel();
        let result = pool.acquire(&cancel).await;
        assert!(matches!(result, Err(CaptionError::Cancelled)));
    }

    #[tokio::test]
    async fn test_penalize_extends_cooldown() {
        let options = PoolOptions {
            cooldown: Duration::from_millis(0),
            acquire_timeout: Duration::from_millis(40),
            poll_interval: Duration::from_millis(5),
            rate_limit_penalty: Duration::from_secs(3600),
        };
        let pool = pool_with(&["a"], options);
        let cancel = CancelFlag::new();

        let lease = pool.acquire(&cancel).await.unwrap();
        lease.penalize();
        // Entry is still in rotation but unavailable until the penalty ends.
        let result = pool.acquire(&cancel).await;
        assert!(matches!(result, Err(CaptionError::ResourceTimeout { .. })));
    }

    #[tokio::test]
    async fn test_health_check_prunes_dead_entries() {
        let pool = pool_with(&["good", "dead", "also-good"], fast_options());
        let service = ProbeService {
            healthy: vec!["good".to_string(), "also-good".to_string()],
        };
        let survivors = pool.health_check(&service).await.unwrap();
        assert_eq!(survivors, 2);
        assert_eq!(pool.len(), 2);
    }

    #[tokio::test]
    async fn test_health_check_all_dead_is_fatal() {
        let pool = pool_with(&["dead-1", "dead-2"], fast_options());
        let service = ProbeService { healthy: vec![] };
        let result = pool.health_check(&service).await;
        assert!(matches!(result, Err(CaptionError::ResourceExhausted)));
        assert!(pool.is_empty());
    }

    #[test]
    fn test_from_file_skips_comments_and_blanks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("keys.txt");
        std::fs::write(&path, "# keys\nkey-one\n\nkey-two\n").unwrap();

        let pool = ResourcePool::from_file(&path, fast_options()).unwrap();
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_from_file_empty_is_exhausted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.txt");
        std::fs::write(&path, "# nothing here\n").unwrap();

        let result = ResourcePool::from_file(&path, fast_options());
        assert!(matches!(result, Err(CaptionError::ResourceExhausted)));
    }
}

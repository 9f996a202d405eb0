//! Rotating pool of Gemini API keys.
//!
//! Requests take keys round-robin so volume is spread across keys. A key that
//! hits a rate limit sits out for a cooldown; a key the API rejects is
//! disabled for the rest of the run.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Show only the tail of a key, e.g. `...f00d`.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() > 4 {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("...{}", tail)
    } else {
        key.to_string()
    }
}

/// A single API key with usage tracking.
#[derive(Debug)]
pub struct ApiKey {
    value: String,
    cooldown_until: RwLock<Option<Instant>>,
    disabled: AtomicBool,
    request_count: AtomicU64,
}

impl ApiKey {
    pub fn new(value: String) -> Self {
        Self {
            value,
            cooldown_until: RwLock::new(None),
            disabled: AtomicBool::new(false),
            request_count: AtomicU64::new(0),
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn masked(&self) -> String {
        mask_key(&self.value)
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled.load(Ordering::Relaxed)
    }

    pub fn cooldown_remaining(&self) -> Option<Duration> {
        let until = (*self.cooldown_until.read())?;
        until
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
    }

    pub fn is_cooling_down(&self) -> bool {
        self.cooldown_remaining().is_some()
    }

    fn is_available(&self) -> bool {
        !self.is_disabled() && !self.is_cooling_down()
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }

    fn record_usage(&self) {
        self.request_count.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPoolStats {
    pub total_keys: usize,
    pub available_keys: usize,
    pub cooling_down: usize,
    pub disabled: usize,
    pub total_requests: u64,
}

/// Round-robin pool of API keys shared by all workers.
#[derive(Debug)]
pub struct KeyPool {
    keys: Vec<Arc<ApiKey>>,
    cursor: AtomicUsize,
}

impl KeyPool {
    pub fn new(keys: Vec<String>) -> Self {
        Self {
            keys: keys.into_iter().map(|k| Arc::new(ApiKey::new(k))).collect(),
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Next usable key in rotation.
    ///
    /// Keys on cooldown are skipped. When every enabled key is cooling down,
    /// the one that frees up first is returned. Returns `None` only when the
    /// pool is empty or every key has been disabled.
    pub fn next_key(&self) -> Option<Arc<ApiKey>> {
        let len = self.keys.len();
        if len == 0 {
            return None;
        }

        for _ in 0..len {
            let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
            let key = &self.keys[idx];
            if key.is_available() {
                key.record_usage();
                return Some(key.clone());
            }
        }

        let soonest = self
            .keys
            .iter()
            .filter(|k| !k.is_disabled())
            .min_by_key(|k| k.cooldown_remaining().unwrap_or(Duration::ZERO))?;
        soonest.record_usage();
        Some(soonest.clone())
    }

    pub fn mark_rate_limited(&self, key: &ApiKey, cooldown: Duration) {
        let mut guard = key.cooldown_until.write();
        let until = Instant::now() + cooldown;
        // Never shorten an existing cooldown
        if guard.map_or(true, |current| current < until) {
            *guard = Some(until);
        }
        warn!(
            "API key {} rate limited, cooling down for {:.1}s",
            key.masked(),
            cooldown.as_secs_f64()
        );
    }

    pub fn disable(&self, key: &ApiKey) {
        if !key.disabled.swap(true, Ordering::Relaxed) {
            warn!("API key {} rejected by the API, disabling it", key.masked());
            let remaining = self.keys.iter().filter(|k| !k.is_disabled()).count();
            info!("{} of {} API keys still enabled", remaining, self.keys.len());
        }
    }

    /// True when no key can be used right now.
    pub fn all_unavailable(&self) -> bool {
        self.keys.iter().all(|k| !k.is_available())
    }

    /// Shortest cooldown among enabled keys, if all of them are cooling down.
    pub fn min_cooldown(&self) -> Option<Duration> {
        if !self.all_unavailable() {
            return None;
        }
        self.keys
            .iter()
            .filter(|k| !k.is_disabled())
            .filter_map(|k| k.cooldown_remaining())
            .min()
    }

    pub fn all_disabled(&self) -> bool {
        self.keys.iter().all(|k| k.is_disabled())
    }

    pub fn stats(&self) -> KeyPoolStats {
        let disabled = self.keys.iter().filter(|k| k.is_disabled()).count();
        let cooling_down = self
            .keys
            .iter()
            .filter(|k| !k.is_disabled() && k.is_cooling_down())
            .count();
        KeyPoolStats {
            total_keys: self.keys.len(),
            available_keys: self.keys.len() - disabled - cooling_down,
            cooling_down,
            disabled,
            total_requests: self.keys.iter().map(|k| k.request_count()).sum(),
        }
    }
}

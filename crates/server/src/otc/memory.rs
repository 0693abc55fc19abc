use super::CodeBackend;
use crate::error::OtcError;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Minimum time between two sweeps of expired entries.
const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Clone)]
struct CodeEntry {
    value: String,
    expires_at: Instant,
}

impl CodeEntry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process [`CodeBackend`] for tests and single-node development.
///
/// Expired entries are treated as absent. Writes sweep them out of the map at
/// most once per sweep interval, so codes that are never redeemed do not pile up.
#[derive(Clone)]
pub struct MemoryBackend {
    entries: Arc<DashMap<String, CodeEntry>>,
    sweep_interval: Duration,
    last_sweep: Arc<Mutex<Instant>>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            last_sweep: Arc::new(Mutex::new(Instant::now())),
        }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    /// Drops expired entries if the sweep interval has passed.
    fn maybe_sweep(&self) {
        if let Ok(mut last_sweep) = self.last_sweep.try_lock()
            && last_sweep.elapsed() >= self.sweep_interval
        {
            *last_sweep = Instant::now();
            drop(last_sweep);
            self.entries.retain(|_, entry| !entry.is_expired());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl CodeBackend for MemoryBackend {
    async fn set_if_absent(
        &self,
        key: &str,
        value: &str,
        ttl: Duration,
    ) -> Result<bool, OtcError> {
        // Must run before taking the entry guard below; retain locks every shard.
        self.maybe_sweep();

        let entry = CodeEntry {
            value: value.to_string(),
            expires_at: Instant::now() + ttl,
        };
        // The entry guard holds the shard lock, so check and insert are atomic.
        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) if occupied.get().is_expired() => {
                occupied.insert(entry);
                Ok(true)
            }
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(vacant) => {
                vacant.insert(entry);
                Ok(true)
            }
        }
    }

    async fn take(&self, key: &str) -> Result<Option<String>, OtcError> {
        Ok(self
            .entries
            .remove(key)
            .map(|(_, entry)| entry)
            .filter(|entry| !entry.is_expired())
            .map(|entry| entry.value))
    }
}

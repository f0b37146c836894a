//! Per-(provider, model) rate-limit gate consulted by the retry engine
//! (spec §4.5, glossary: "Rate-limit gate").

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

pub struct RateLimitGate {
    gated_until: Mutex<HashMap<String, Instant>>,
}

impl Default for RateLimitGate {
    fn default() -> Self {
        Self::new()
    }
}

impl RateLimitGate {
    pub fn new() -> Self {
        Self { gated_until: Mutex::new(HashMap::new()) }
    }

    pub fn mark_gated(&self, key: &str, duration: Duration) {
        let until = Instant::now() + duration;
        self.gated_until.lock().unwrap().insert(key.to_string(), until);
    }

    /// Remaining gate duration for `key`, or `None` if not gated (or the
    /// gate has already expired).
    pub fn gated_remaining(&self, key: &str) -> Option<Duration> {
        let map = self.gated_until.lock().unwrap();
        let until = *map.get(key)?;
        let now = Instant::now();
        if until > now {
            Some(until - now)
        } else {
            None
        }
    }
}

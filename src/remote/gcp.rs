use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Read-through cache of scriptId → Cloud Platform project id. Entries live
/// for 24h; a lost or expired entry triggers re-discovery through the
/// project metadata lookup, never an error. Constructed once at startup and
/// passed down; no global instance.
pub struct GcpProjectCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

impl GcpProjectCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn get(&self, script_id: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("gcp cache poisoned");
        match entries.get(script_id) {
            Some((value, stored_at)) if stored_at.elapsed() < self.ttl => Some(value.clone()),
            Some(_) => {
                entries.remove(script_id);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, script_id: &str, project_id: &str) {
        let mut entries = self.entries.lock().expect("gcp cache poisoned");
        entries.insert(
            script_id.to_string(),
            (project_id.to_string(), Instant::now()),
        );
    }
}

impl Default for GcpProjectCache {
    fn default() -> Self {
        Self::new()
    }
}

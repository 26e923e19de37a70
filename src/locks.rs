use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

/// In-process named locks, one per scriptId, serializing destructive
/// multi-step sequences (deployment reset, forced project init). Constructed
/// once at startup and passed down by the owner; there is no global instance.
/// Entry points acquire at most once per call, so re-entrancy never arises.
#[derive(Default)]
pub struct ProjectLocks {
    entries: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ProjectLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, script_id: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut entries = self.entries.lock().expect("project locks poisoned");
            entries
                .entry(script_id.to_string())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone()
        };
        entry.lock_owned().await
    }
}

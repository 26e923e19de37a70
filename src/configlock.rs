use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(15 * 60);
const POLL_INTERVAL: Duration = Duration::from_millis(200);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
/// Lease refreshed on every heartbeat; a lock past its lease is reclaimable.
const LEASE: Duration = Duration::from_secs(10 * 60);
/// A lock from a different host is reclaimable after this age regardless of
/// lease, since its pid cannot be probed from here.
const STALE_MAX: Duration = Duration::from_secs(30 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockFileContent {
    pub holder: String,
    pub pid: u32,
    pub hostname: String,
    pub acquired_at: String,
    pub expires_at: String,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub heartbeat: Option<String>,
}

impl LockFileContent {
    fn describe(&self) -> String {
        format!(
            "{} (pid {} on {}, operation {}, acquired {})",
            self.holder, self.pid, self.hostname, self.operation, self.acquired_at
        )
    }
}

/// Exclusive cross-process lock over the config document, file-backed with
/// exclusive-create semantics. While held, a background tick refreshes the
/// lease; if ownership is lost to a stale-lock reclaim, the tick stops and
/// marks the guard un-held rather than overwrite the new owner.
#[derive(Debug, Clone)]
pub struct ConfigLock {
    lock_path: PathBuf,
}

impl ConfigLock {
    pub fn for_config(config_path: &Path) -> Self {
        let mut name = config_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "gas-config.json".to_string());
        name.push_str(".worktree.lock");
        Self {
            lock_path: config_path.with_file_name(name),
        }
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub async fn acquire(&self, operation: &str) -> Result<ConfigLockGuard> {
        self.acquire_timeout(operation, DEFAULT_ACQUIRE_TIMEOUT).await
    }

    pub async fn acquire_timeout(
        &self,
        operation: &str,
        timeout: Duration,
    ) -> Result<ConfigLockGuard> {
        let started = std::time::Instant::now();
        let mut last_holder = String::from("unknown");
        loop {
            match self.try_create(operation) {
                Ok(guard) => return Ok(guard),
                Err(TryCreateError::Held(content)) => {
                    if is_stale(&content, Utc::now()) {
                        tracing::warn!(
                            lock = %self.lock_path.display(),
                            holder = %content.describe(),
                            "reclaiming stale config lock"
                        );
                        let _ = std::fs::remove_file(&self.lock_path);
                        continue;
                    }
                    last_holder = content.describe();
                }
                Err(TryCreateError::Unreadable) => {
                    // A lock file we cannot parse cannot be verified; claim it.
                    let _ = std::fs::remove_file(&self.lock_path);
                    continue;
                }
                Err(TryCreateError::Io(err)) => return Err(err.into()),
            }
            if started.elapsed() >= timeout {
                return Err(Error::LockTimeout {
                    lock: self.lock_path.display().to_string(),
                    waited_secs: started.elapsed().as_secs(),
                    holder: last_holder,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    fn try_create(&self, operation: &str) -> std::result::Result<ConfigLockGuard, TryCreateError> {
        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(TryCreateError::Io)?;
        }
        let mut options = std::fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        match options.open(&self.lock_path) {
            Ok(file) => {
                let now = Utc::now();
                let content = LockFileContent {
                    holder: format!("gascp@{}", std::process::id()),
                    pid: std::process::id(),
                    hostname: local_hostname(),
                    acquired_at: now.to_rfc3339(),
                    expires_at: lease_expiry(now),
                    operation: operation.to_string(),
                    heartbeat: None,
                };
                use std::io::Write as _;
                let mut file = file;
                let payload =
                    serde_json::to_vec_pretty(&content).expect("lock payload serializes");
                file.write_all(&payload).map_err(TryCreateError::Io)?;
                drop(file);
                Ok(ConfigLockGuard::start(self.lock_path.clone(), content))
            }
            Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                match read_lock_file(&self.lock_path) {
                    Some(content) => Err(TryCreateError::Held(content)),
                    None => Err(TryCreateError::Unreadable),
                }
            }
            Err(err) => Err(TryCreateError::Io(err)),
        }
    }
}

enum TryCreateError {
    Held(LockFileContent),
    Unreadable,
    Io(std::io::Error),
}

fn read_lock_file(path: &Path) -> Option<LockFileContent> {
    let data = std::fs::read(path).ok()?;
    serde_json::from_slice(&data).ok()
}

fn local_hostname() -> String {
    gethostname::gethostname().to_string_lossy().into_owned()
}

fn lease_expiry(now: DateTime<Utc>) -> String {
    (now + chrono::Duration::seconds(LEASE.as_secs() as i64)).to_rfc3339()
}

/// Stale when: the holder is on this host and its pid is dead, the lease has
/// expired, or the holder is on another host and the lock is older than the
/// cross-host maximum.
fn is_stale(content: &LockFileContent, now: DateTime<Utc>) -> bool {
    if let Ok(expires) = DateTime::parse_from_rfc3339(&content.expires_at) {
        if expires.with_timezone(&Utc) < now {
            return true;
        }
    }
    if content.hostname == local_hostname() {
        if !pid_alive(content.pid) {
            return true;
        }
    } else if let Ok(acquired) = DateTime::parse_from_rfc3339(&content.acquired_at) {
        let age = now.signed_duration_since(acquired.with_timezone(&Utc));
        if age.to_std().map(|a| a > STALE_MAX).unwrap_or(false) {
            return true;
        }
    }
    false
}

#[cfg(unix)]
fn pid_alive(pid: u32) -> bool {
    // Signal 0 probes existence; EPERM still means the process exists.
    let rc = unsafe { libc::kill(pid as libc::pid_t, 0) };
    rc == 0 || std::io::Error::last_os_error().raw_os_error() == Some(libc::EPERM)
}

#[cfg(not(unix))]
fn pid_alive(_pid: u32) -> bool {
    // No probe available; rely on lease expiry.
    true
}

/// Held lock. Releasing (explicitly or on drop) unlinks the file only when
/// the on-disk payload still names this process; a release that finds a
/// different owner is a no-op.
#[derive(Debug)]
pub struct ConfigLockGuard {
    lock_path: PathBuf,
    pid: u32,
    hostname: String,
    held: Arc<AtomicBool>,
    heartbeat: Option<tokio::task::JoinHandle<()>>,
}

impl ConfigLockGuard {
    fn start(lock_path: PathBuf, content: LockFileContent) -> Self {
        let held = Arc::new(AtomicBool::new(true));
        let heartbeat = tokio::runtime::Handle::try_current().ok().map(|handle| {
            let path = lock_path.clone();
            let held = held.clone();
            let pid = content.pid;
            let hostname = content.hostname.clone();
            handle.spawn(async move {
                heartbeat_loop(path, pid, hostname, held).await;
            })
        });
        Self {
            lock_path,
            pid: content.pid,
            hostname: content.hostname,
            held,
            heartbeat,
        }
    }

    pub fn still_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(handle) = self.heartbeat.take() {
            handle.abort();
        }
        if !self.held.swap(false, Ordering::SeqCst) {
            return;
        }
        match read_lock_file(&self.lock_path) {
            Some(content) if content.pid == self.pid && content.hostname == self.hostname => {
                if let Err(err) = std::fs::remove_file(&self.lock_path) {
                    tracing::warn!(lock = %self.lock_path.display(), %err, "lock unlink failed");
                }
            }
            _ => {
                // Reclaimed by someone else; never overwrite a new owner.
                tracing::warn!(
                    lock = %self.lock_path.display(),
                    "lock ownership lost before release"
                );
            }
        }
    }
}

impl Drop for ConfigLockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

async fn heartbeat_loop(path: PathBuf, pid: u32, hostname: String, held: Arc<AtomicBool>) {
    loop {
        tokio::time::sleep(HEARTBEAT_INTERVAL).await;
        if !held.load(Ordering::SeqCst) {
            return;
        }
        let Some(mut content) = read_lock_file(&path) else {
            held.store(false, Ordering::SeqCst);
            return;
        };
        if content.pid != pid || content.hostname != hostname {
            // The lock was reclaimed as stale; stop without touching it.
            held.store(false, Ordering::SeqCst);
            return;
        }
        let now = Utc::now();
        content.heartbeat = Some(now.to_rfc3339());
        content.expires_at = lease_expiry(now);
        if let Err(err) = write_atomically(&path, &content) {
            tracing::warn!(lock = %path.display(), %err, "lock heartbeat write failed");
        }
    }
}

fn write_atomically(path: &Path, content: &LockFileContent) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    use std::io::Write as _;
    tmp.write_all(&serde_json::to_vec_pretty(content).expect("lock payload serializes"))?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

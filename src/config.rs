use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::configlock::{ConfigLock, ConfigLockGuard, DEFAULT_ACQUIRE_TIMEOUT};
use crate::error::{Error, Result};
use crate::remote::ContainerType;

pub const CONFIG_FILE: &str = "gas-config.json";
pub const LOCAL_ROOT_ENV: &str = "GASCP_LOCAL_ROOT";
pub const CONFIG_DIR_ENV: &str = "GASCP_CONFIG_DIR";
const CONFIG_VERSION: u32 = 1;

/// The unified on-disk config document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub oauth: OauthConfig,
    #[serde(default)]
    pub projects: BTreeMap<String, ProjectEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_project: Option<String>,
    #[serde(default)]
    pub local_root: LocalRootConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub worktrees: BTreeMap<String, WorktreeEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OauthConfig {
    pub client_id: String,
    #[serde(rename = "type")]
    pub client_type: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
}

impl Default for OauthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_type: "uwp".to_string(),
            redirect_uris: vec!["http://127.0.0.1".to_string()],
            scopes: vec![
                "https://www.googleapis.com/auth/script.projects".to_string(),
                "https://www.googleapis.com/auth/script.deployments".to_string(),
                "https://www.googleapis.com/auth/drive".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectEntry {
    pub script_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environments: Option<Environments>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Environments {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<EnvPointer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staging: Option<EnvPointer>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prod: Option<EnvPointer>,
}

/// Where an environment currently points. `history` is only populated for
/// prod: every version prod has pointed at, oldest first, which is what
/// rollback walks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvPointer {
    pub deployment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub web_app_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRootConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_working_dir: Option<String>,
    #[serde(default)]
    pub config_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorktreeState {
    Ready,
    Claimed,
    Abandoned,
}

/// Registry entry for a parallel-development worktree: a distinct remote
/// project paired with a git worktree inside the parent's repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeEntry {
    pub script_id: String,
    pub parent_script_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_container_id: Option<String>,
    pub container_type: ContainerType,
    pub branch: String,
    pub local_path: String,
    pub state: WorktreeState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<String>,
    pub created_at: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub base_hashes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_hashes_updated_at: Option<String>,
}

impl Config {
    pub fn project_by_name(&self, name: &str) -> Option<&ProjectEntry> {
        self.projects.get(name)
    }

    pub fn project_by_script_id(&self, script_id: &str) -> Option<(&String, &ProjectEntry)> {
        self.projects.iter().find(|(_, p)| p.script_id == script_id)
    }

    pub fn current_script_id(&self) -> Option<&str> {
        self.current_project
            .as_deref()
            .and_then(|name| self.projects.get(name))
            .map(|p| p.script_id.as_str())
    }

    /// Register a project; both the name and the scriptId must be unique in
    /// the catalog.
    pub fn register_project(&mut self, name: &str, entry: ProjectEntry) -> Result<()> {
        if let Some((existing, _)) = self.project_by_script_id(&entry.script_id) {
            if existing != name {
                return Err(Error::validation(format!(
                    "scriptId {} is already registered as {existing}",
                    entry.script_id
                )));
            }
        }
        self.projects.insert(name.to_string(), entry);
        Ok(())
    }
}

/// Directory holding `gas-config.json`: the env override for tests, then the
/// platform config dir.
pub fn config_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV) {
        return Ok(PathBuf::from(dir));
    }
    let pd = directories::ProjectDirs::from("", "", "gascp")
        .ok_or_else(|| Error::validation("unable to determine config dir"))?;
    Ok(pd.config_dir().to_path_buf())
}

/// Root of the local mirror tree. Env override first, then the configured
/// path, then `~/gas-repos`.
pub fn resolve_local_root(config: &Config) -> PathBuf {
    if let Ok(dir) = std::env::var(LOCAL_ROOT_ENV) {
        return PathBuf::from(dir);
    }
    if let Some(path) = &config.local_root.root_path {
        return PathBuf::from(path);
    }
    let home = std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join("gas-repos")
}

/// On-disk store for the unified config. All mutation goes through
/// [`ConfigStore::update`], which holds the cross-process lock; writes are
/// tmp-file-then-rename with a `.bak` snapshot of the prior version, and
/// reads transparently fall back to the snapshot when the primary is corrupt.
pub struct ConfigStore {
    path: PathBuf,
    lock: ConfigLock,
}

impl ConfigStore {
    pub fn open_default() -> Result<Self> {
        Ok(Self::at(config_dir()?.join(CONFIG_FILE)))
    }

    pub fn at(path: PathBuf) -> Self {
        let lock = ConfigLock::for_config(&path);
        Self { path, lock }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock(&self) -> &ConfigLock {
        &self.lock
    }

    fn backup_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| CONFIG_FILE.to_string());
        name.push_str(".bak");
        self.path.with_file_name(name)
    }

    /// Lock-free read; mutators must use [`ConfigStore::update`].
    pub fn load(&self) -> Result<Config> {
        if !self.path.exists() {
            return Ok(Config::default());
        }
        match read_config(&self.path) {
            Ok(cfg) => Ok(cfg),
            Err(primary_err) => {
                let backup = self.backup_path();
                if backup.exists() {
                    tracing::warn!(
                        config = %self.path.display(),
                        %primary_err,
                        "primary config unreadable; recovering from backup"
                    );
                    return read_config(&backup);
                }
                Err(primary_err)
            }
        }
    }

    pub fn save(&self, config: &mut Config) -> Result<()> {
        config.server.config_version = CONFIG_VERSION;
        config.server.last_modified = Some(Utc::now().to_rfc3339());
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Keep the previous good version around before replacing.
        if self.path.exists() {
            if let Err(err) = std::fs::copy(&self.path, self.backup_path()) {
                tracing::warn!(config = %self.path.display(), %err, "config backup failed");
            }
        }
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
        tmp.write_all(
            &serde_json::to_vec_pretty(config)
                .map_err(|err| Error::validation(format!("config does not serialize: {err}")))?,
        )?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    /// Run a mutation under the cross-process config lock.
    pub async fn update<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut Config) -> Result<T>,
    ) -> Result<T> {
        self.update_with_timeout(operation, DEFAULT_ACQUIRE_TIMEOUT, f)
            .await
    }

    pub async fn update_with_timeout<T>(
        &self,
        operation: &str,
        timeout: Duration,
        f: impl FnOnce(&mut Config) -> Result<T>,
    ) -> Result<T> {
        let guard = self.lock.acquire_timeout(operation, timeout).await?;
        let result = self.update_locked(f);
        guard.release();
        result
    }

    /// Mutation step for callers that already hold the lock guard.
    pub fn update_locked<T>(&self, f: impl FnOnce(&mut Config) -> Result<T>) -> Result<T> {
        let mut config = self.load()?;
        let value = f(&mut config)?;
        self.save(&mut config)?;
        Ok(value)
    }

    /// Acquire the config lock for a longer multi-step sequence.
    pub async fn lock_for(&self, operation: &str) -> Result<ConfigLockGuard> {
        self.lock.acquire(operation).await
    }
}

fn read_config(path: &Path) -> Result<Config> {
    let data = std::fs::read(path)?;
    serde_json::from_slice(&data)
        .map_err(|err| Error::validation(format!("config at {} is corrupt: {err}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(dir: &Path) -> ConfigStore {
        ConfigStore::at(dir.join(CONFIG_FILE))
    }

    #[test]
    fn load_missing_yields_default() {
        let tmp = tempfile::tempdir().unwrap();
        let cfg = store(tmp.path()).load().unwrap();
        assert!(cfg.projects.is_empty());
        assert!(cfg.current_project.is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path());
        let mut cfg = Config::default();
        cfg.register_project(
            "demo",
            ProjectEntry {
                script_id: "1aBcDeFgHiJkLmNoPqRsTuVwXyZ0123456789abcd".into(),
                last_sync: None,
                description: Some("demo project".into()),
                environments: None,
            },
        )
        .unwrap();
        cfg.current_project = Some("demo".into());
        s.save(&mut cfg).unwrap();

        let loaded = s.load().unwrap();
        assert_eq!(
            loaded.current_script_id(),
            Some("1aBcDeFgHiJkLmNoPqRsTuVwXyZ0123456789abcd")
        );
        assert_eq!(loaded.server.config_version, CONFIG_VERSION);
    }

    #[test]
    fn corrupt_primary_recovers_from_backup() {
        let tmp = tempfile::tempdir().unwrap();
        let s = store(tmp.path());
        let mut cfg = Config::default();
        cfg.current_project = Some("alpha".into());
        s.save(&mut cfg).unwrap();
        // Second save snapshots the first version into .bak.
        cfg.current_project = Some("beta".into());
        s.save(&mut cfg).unwrap();

        std::fs::write(s.path(), b"{ not json").unwrap();
        let recovered = s.load().unwrap();
        assert_eq!(recovered.current_project.as_deref(), Some("alpha"));
    }

    #[test]
    fn duplicate_script_id_rejected() {
        let mut cfg = Config::default();
        let entry = ProjectEntry {
            script_id: "1aBcDeFgHiJkLmNoPqRsTuVwXyZ0123456789abcd".into(),
            last_sync: None,
            description: None,
            environments: None,
        };
        cfg.register_project("one", entry.clone()).unwrap();
        let err = cfg.register_project("two", entry).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }
}

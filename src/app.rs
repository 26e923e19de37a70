use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::config::{ConfigStore, ProjectEntry};
use crate::deploy::DeploymentManager;
use crate::error::{Error, Result};
use crate::filemeta;
use crate::gitbridge::GitBridge;
use crate::hash;
use crate::infra::{InfraVerifier, VerificationOutcome, VerifyMode};
use crate::locks::ProjectLocks;
use crate::mirror;
use crate::modwrap;
use crate::pathspec::{self, FileKind};
use crate::remote::{
    AuthStatus, DriveHttpClient, DriveService, GcpProjectCache, ScriptHttpClient, ScriptService,
    SessionAuth,
};
use crate::worktree::WorktreeManager;
use crate::writeflow::WritePipeline;

/// Owner of every long-lived collaborator: clients, config store, lock
/// manager, caches. Constructed once at startup and passed down explicitly;
/// tools and commands never reach for hidden globals.
pub struct App {
    pub config: Arc<ConfigStore>,
    pub auth: Arc<SessionAuth>,
    pub remote: Arc<dyn ScriptService>,
    pub drive: Arc<dyn DriveService>,
    pub git: GitBridge,
    pub locks: Arc<ProjectLocks>,
    pub gcp: Arc<GcpProjectCache>,
}

impl App {
    pub fn from_env() -> Result<Self> {
        let config = Arc::new(ConfigStore::open_default()?);
        let auth = Arc::new(SessionAuth::new());
        let remote: Arc<dyn ScriptService> = Arc::new(ScriptHttpClient::new(auth.clone()));
        let drive: Arc<dyn DriveService> = Arc::new(DriveHttpClient::new(auth.clone()));
        Ok(Self::with_services(config, auth, remote, drive))
    }

    /// Assembly seam for tests: substitute fake services.
    pub fn with_services(
        config: Arc<ConfigStore>,
        auth: Arc<SessionAuth>,
        remote: Arc<dyn ScriptService>,
        drive: Arc<dyn DriveService>,
    ) -> Self {
        Self {
            config,
            auth,
            remote,
            drive,
            git: GitBridge::new(),
            locks: Arc::new(ProjectLocks::new()),
            gcp: Arc::new(GcpProjectCache::new()),
        }
    }

    pub fn local_root(&self) -> Result<PathBuf> {
        Ok(crate::config::resolve_local_root(&self.config.load()?))
    }

    pub fn pipeline(&self) -> Result<WritePipeline> {
        Ok(WritePipeline::new(
            self.remote.clone(),
            self.git.clone(),
            self.local_root()?,
        ))
    }

    pub fn deployments(&self) -> DeploymentManager {
        DeploymentManager::new(self.remote.clone(), self.config.clone(), self.locks.clone())
    }

    pub fn worktrees(&self) -> Result<WorktreeManager> {
        Ok(WorktreeManager::new(
            self.remote.clone(),
            self.drive.clone(),
            self.git.clone(),
            self.config.clone(),
            self.local_root()?,
        ))
    }

    pub fn infra(&self) -> InfraVerifier {
        InfraVerifier::new(self.remote.clone())
    }

    pub fn auth_status(&self) -> AuthStatus {
        self.auth.status()
    }

    fn resolve(&self, raw_path: &str) -> Result<pathspec::ResolvedPath> {
        let cfg = self.config.load()?;
        pathspec::resolve(raw_path, cfg.current_script_id())
    }

    /// Read a file, preferring the local mirror when asked and falling back
    /// to (and refreshing from) the remote. Returns the unwrapped body.
    pub async fn cat(&self, raw_path: &str, prefer_local: bool) -> Result<CatResult> {
        let resolved = self.resolve(raw_path)?;
        let local_root = self.local_root()?;

        if prefer_local {
            for kind in [FileKind::ServerJs, FileKind::Html, FileKind::Json] {
                let path =
                    mirror::local_path(&local_root, &resolved.script_id, &resolved.file_path, kind);
                if let Some(stored) = mirror::read_file(&path)? {
                    return Ok(CatResult::from_stored(&resolved, kind, &stored, "local"));
                }
            }
        }

        let files = self.remote.get_project_content(&resolved.script_id).await?;
        let file = files
            .iter()
            .find(|f| pathspec::file_name_matches(&f.name, &resolved.file_path))
            .ok_or_else(|| {
                Error::validation(format!(
                    "{}/{} does not exist remotely",
                    resolved.script_id, resolved.file_path
                ))
            })?;
        mirror::store_remote_file(&local_root, &resolved.script_id, file)?;
        Ok(CatResult::from_stored(
            &resolved,
            file.kind,
            &file.source,
            "remote",
        ))
    }

    /// Hash-level comparison of mirror, cache, and remote for one file.
    pub async fn file_status(&self, raw_path: &str) -> Result<FileStatus> {
        let resolved = self.resolve(raw_path)?;
        let local_root = self.local_root()?;
        let files = self.remote.get_project_content(&resolved.script_id).await?;
        let remote = files
            .iter()
            .find(|f| pathspec::file_name_matches(&f.name, &resolved.file_path));
        let kind = remote.map(|f| f.kind).unwrap_or(FileKind::ServerJs);
        let local_path =
            mirror::local_path(&local_root, &resolved.script_id, &resolved.file_path, kind);
        let local = mirror::read_file(&local_path)?;
        let local_hash = local.as_deref().map(hash::git_blob_sha1_str);
        let remote_hash = remote.map(|f| hash::git_blob_sha1_str(&f.source));
        let cached_hash = filemeta::get(&local_path).and_then(|m| m.content_hash);
        let in_sync = match (&local_hash, &remote_hash) {
            (Some(l), Some(r)) => hash::hashes_equal(l, r),
            (None, None) => true,
            _ => false,
        };
        Ok(FileStatus {
            script_id: resolved.script_id,
            filename: resolved.file_path,
            local_path: local_path.display().to_string(),
            local_hash,
            remote_hash,
            cached_hash,
            in_sync,
        })
    }

    /// Drop the xattr metadata cache for a whole project mirror.
    pub async fn cache_clear(&self, script_id: &str) -> Result<usize> {
        if !pathspec::is_script_id(script_id) {
            return Err(Error::validation(format!(
                "{script_id} is not a valid scriptId"
            )));
        }
        let dir = mirror::project_dir(&self.local_root()?, script_id);
        if !dir.exists() {
            return Ok(0);
        }
        Ok(filemeta::clear_all(&dir))
    }

    /// Mirror a remote project locally, seed its git repo, register it in
    /// the catalog, and verify the injected helpers (warn without force,
    /// repair with it).
    pub async fn project_init(
        &self,
        script_id: &str,
        name: Option<&str>,
        force: bool,
    ) -> Result<InitResult> {
        if !pathspec::is_script_id(script_id) {
            return Err(Error::validation(format!(
                "{script_id} is not a valid scriptId"
            )));
        }
        let _guard = self.locks.lock(script_id).await;
        let project = self.remote.get_project(script_id).await?;
        let files = self.remote.get_project_content(script_id).await?;
        let local_root = self.local_root()?;
        mirror::mirror_project(&local_root, script_id, &files)?;

        let project_dir = mirror::project_dir(&local_root, script_id);
        if let Some(crumb) = files
            .iter()
            .find(|f| f.name == ".git/config")
            .and_then(|f| crate::gitbridge::parse_breadcrumb(&f.source))
        {
            crate::gitbridge::validate_breadcrumb(&crumb, &local_root)?;
        }
        let seed: Vec<(String, String)> = files
            .iter()
            .filter(|f| !f.name.starts_with(".git/"))
            .map(|f| (pathspec::local_file_name(&f.name, f.kind), f.source.clone()))
            .collect();
        self.git.ensure_repo(&project_dir, &seed).await?;

        let mode = if force {
            VerifyMode::Repair
        } else {
            VerifyMode::Warn
        };
        let verification = self.infra().verify_project(script_id, mode).await?;

        if let Some(gcp) = &project.gcp_project_id {
            self.gcp.put(script_id, gcp);
        }

        let project_name = name
            .map(str::to_string)
            .unwrap_or_else(|| project.title.clone());
        let entry = ProjectEntry {
            script_id: script_id.to_string(),
            last_sync: Some(Utc::now().to_rfc3339()),
            description: None,
            environments: None,
        };
        let registered_name = project_name.clone();
        self.config
            .update("project init", move |cfg| {
                cfg.register_project(&registered_name, entry)?;
                if cfg.current_project.is_none() {
                    cfg.current_project = Some(registered_name.clone());
                }
                Ok(())
            })
            .await?;

        let verification_warnings: Vec<VerificationOutcome> = verification
            .iter()
            .filter(|v| v.is_warning())
            .cloned()
            .collect();
        Ok(InitResult {
            script_id: script_id.to_string(),
            name: project_name,
            files: files.len(),
            verification,
            verification_warnings,
        })
    }

    /// Create a fresh remote project, install the helpers under the strict
    /// tier, mirror it, and register it.
    pub async fn project_create(&self, title: &str, name: Option<&str>) -> Result<InitResult> {
        let project = self.remote.create_project(title, None).await?;
        self.infra()
            .verify_project(&project.script_id, VerifyMode::Strict)
            .await?;
        self.project_init(&project.script_id, name.or(Some(title)), false)
            .await
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatResult {
    pub script_id: String,
    pub filename: String,
    pub kind: FileKind,
    /// Unwrapped, edit-time body.
    pub content: String,
    pub wrapped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub module_options: Option<modwrap::ModuleOptions>,
    /// Hash of the stored (wrapped) form — the conflict-detection baseline.
    pub hash: String,
    pub source: String,
}

impl CatResult {
    fn from_stored(
        resolved: &pathspec::ResolvedPath,
        kind: FileKind,
        stored: &str,
        source: &str,
    ) -> Self {
        let stored_hash = hash::git_blob_sha1_str(stored);
        let unwrapped = modwrap::unwrap(stored);
        CatResult {
            script_id: resolved.script_id.clone(),
            filename: resolved.file_path.clone(),
            kind,
            content: unwrapped.inner,
            wrapped: unwrapped.was_wrapped,
            module_options: if unwrapped.was_wrapped && !unwrapped.options.is_empty() {
                Some(unwrapped.options)
            } else {
                None
            },
            hash: stored_hash,
            source: source.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStatus {
    pub script_id: String,
    pub filename: String,
    pub local_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_hash: Option<String>,
    pub in_sync: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InitResult {
    pub script_id: String,
    pub name: String,
    pub files: usize,
    pub verification: Vec<VerificationOutcome>,
    pub verification_warnings: Vec<VerificationOutcome>,
}

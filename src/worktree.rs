use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use regex::Regex;
use serde::Serialize;

use crate::config::{ConfigStore, WorktreeEntry, WorktreeState};
use crate::error::{Error, Result};
use crate::gitbridge::{self, GitBridge};
use crate::hash;
use crate::mirror;
use crate::pathspec::{self, FileKind};
use crate::remote::{ContainerType, DriveService, RemoteFile, ScriptService};

/// Branch prefix for parallel-development worktrees.
pub const BRANCH_PREFIX: &str = "wt/";

/// A claim older than this is treated as expired: the claimer is presumed
/// dead and the worktree is claimable again (the lock-style expiry scheme,
/// applied to claims).
fn claim_ttl() -> ChronoDuration {
    ChronoDuration::hours(2)
}

pub fn branch_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^wt/[a-z0-9][a-z0-9-]*$").expect("branch regex"))
}

/// Sanitize a requested name into a branch under the worktree prefix,
/// optionally suffixed with a fresh uuid fragment for uniqueness.
pub fn generate_branch(name: Option<&str>, unique_suffix: bool) -> String {
    let base = name.unwrap_or("worktree");
    let mut slug = String::with_capacity(base.len());
    let mut last_dash = true;
    for ch in base.chars() {
        let ch = ch.to_ascii_lowercase();
        if ch.is_ascii_alphanumeric() {
            slug.push(ch);
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    let slug = slug.trim_matches('-');
    let mut slug = if slug.is_empty() {
        "worktree".to_string()
    } else {
        slug.to_string()
    };
    if unique_suffix {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        slug.push('-');
        slug.push_str(&suffix[..8]);
    }
    format!("{BRANCH_PREFIX}{slug}")
}

#[derive(Debug, Clone)]
pub struct WorktreeAddRequest {
    pub parent_script_id: String,
    pub name: Option<String>,
    pub unique_suffix: bool,
    /// Claim the fresh worktree for this agent immediately.
    pub claim_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorktreeView {
    #[serde(flatten)]
    pub entry: WorktreeEntry,
    /// True when the entry is CLAIMED but the claim has expired; such an
    /// entry behaves as READY.
    pub stale_claim: bool,
}

/// Resources created during an add, torn down in reverse on failure.
#[derive(Default)]
struct CleanupPlan {
    script_id: Option<String>,
    container_id: Option<String>,
    worktree: Option<(PathBuf, PathBuf, String)>,
}

/// Lifecycle of parallel-development worktrees: a distinct remote project
/// (created fresh, or cloned by copying the parent's container) paired with
/// a git worktree on a new branch in the parent's repository. The whole add
/// sequence runs under the global config lock.
pub struct WorktreeManager {
    remote: Arc<dyn ScriptService>,
    drive: Arc<dyn DriveService>,
    git: GitBridge,
    config: Arc<ConfigStore>,
    local_root: PathBuf,
}

impl WorktreeManager {
    pub fn new(
        remote: Arc<dyn ScriptService>,
        drive: Arc<dyn DriveService>,
        git: GitBridge,
        config: Arc<ConfigStore>,
        local_root: PathBuf,
    ) -> Self {
        Self {
            remote,
            drive,
            git,
            config,
            local_root,
        }
    }

    pub async fn add(&self, req: WorktreeAddRequest) -> Result<WorktreeEntry> {
        let guard = self.config.lock_for("worktree add").await?;
        let result = self.add_locked(&req).await;
        guard.release();
        result
    }

    async fn add_locked(&self, req: &WorktreeAddRequest) -> Result<WorktreeEntry> {
        let parent_id = req.parent_script_id.as_str();
        if !pathspec::is_script_id(parent_id) {
            return Err(Error::validation(format!(
                "{parent_id} is not a valid scriptId"
            )));
        }
        let cfg = self.config.load()?;
        if cfg.project_by_script_id(parent_id).is_none() {
            return Err(Error::validation(format!(
                "parent project {parent_id} is not in the catalog; register it first"
            )));
        }

        let branch = generate_branch(req.name.as_deref(), req.unique_suffix);
        debug_assert!(branch_re().is_match(&branch));

        // Container type comes from the parent's parent Drive entity.
        let parent_project = self.remote.get_project(parent_id).await?;
        let (container_type, parent_container_id) = match &parent_project.parent_id {
            Some(container) => {
                let file = self.drive.get_file(container).await?;
                (ContainerType::from_mime(&file.mime_type), Some(container.clone()))
            }
            None => (ContainerType::Standalone, None),
        };

        let mut plan = CleanupPlan::default();
        match self
            .add_inner(req, &branch, &parent_project.title, container_type, parent_container_id.as_deref(), &mut plan)
            .await
        {
            Ok(entry) => Ok(entry),
            Err(err) => {
                self.cleanup(&mut plan).await;
                Err(err)
            }
        }
    }

    async fn add_inner(
        &self,
        req: &WorktreeAddRequest,
        branch: &str,
        parent_title: &str,
        container_type: ContainerType,
        parent_container_id: Option<&str>,
        plan: &mut CleanupPlan,
    ) -> Result<WorktreeEntry> {
        let parent_id = req.parent_script_id.as_str();
        let slug = branch.trim_start_matches(BRANCH_PREFIX);

        // Create the backing remote project.
        let (new_script_id, new_container_id) = if container_type.is_container_bound() {
            let container = parent_container_id.ok_or_else(|| {
                Error::validation("container-bound parent has no container id")
            })?;
            let copy = self
                .drive
                .copy_file(container, &format!("{parent_title} ({slug})"))
                .await?;
            plan.container_id = Some(copy.id.clone());
            let Some(script_id) = self.drive.find_bound_script(&copy.id).await? else {
                return Err(Error::api(
                    "worktreeAdd",
                    format!(
                        "CONTAINER_COPY_FAILED: copying container {container} produced no bound script"
                    ),
                ));
            };
            plan.script_id = Some(script_id.clone());
            (script_id, Some(copy.id))
        } else {
            let project = self
                .remote
                .create_project(&format!("{parent_title} ({slug})"), None)
                .await?;
            plan.script_id = Some(project.script_id.clone());
            (project.script_id, None)
        };
        if new_script_id == parent_id {
            return Err(Error::api(
                "worktreeAdd",
                "remote returned the parent project as the new worktree project",
            ));
        }

        // Make sure the parent mirror is a git repository, seeding it from
        // the remote on first use.
        let parent_dir = mirror::project_dir(&self.local_root, parent_id);
        if !GitBridge::is_repo(&parent_dir) {
            let files = self.remote.get_project_content(parent_id).await?;
            if let Some(crumb) = files
                .iter()
                .find(|f| f.name == ".git/config")
                .and_then(|f| gitbridge::parse_breadcrumb(&f.source))
            {
                gitbridge::validate_breadcrumb(&crumb, &self.local_root)?;
            }
            let seed: Vec<(String, String)> = files
                .iter()
                .filter(|f| !f.name.starts_with(".git/"))
                .map(|f| {
                    (
                        pathspec::local_file_name(&f.name, f.kind),
                        f.source.clone(),
                    )
                })
                .collect();
            self.git.ensure_repo(&parent_dir, &seed).await?;
        }

        // Wire up the git worktree on the new branch.
        let worktree_path = self.local_root.join("worktrees").join(slug);
        self.git
            .worktree_add(&parent_dir, &worktree_path, branch)
            .await?;
        plan.worktree = Some((parent_dir.clone(), worktree_path.clone(), branch.to_string()));

        // Push the branch's files into the new remote project in one shot.
        let files = worktree_remote_files(&worktree_path)?;
        self.remote
            .update_project_content(&new_script_id, files.clone())
            .await?;

        // Baseline hashes for later cross-session conflict detection.
        let now = Utc::now().to_rfc3339();
        let base_hashes: BTreeMap<String, String> = files
            .iter()
            .map(|f| (f.name.clone(), hash::git_blob_sha1_str(&f.source)))
            .collect();

        let entry = WorktreeEntry {
            script_id: new_script_id.clone(),
            parent_script_id: parent_id.to_string(),
            container_id: new_container_id,
            parent_container_id: parent_container_id.map(str::to_string),
            container_type,
            branch: branch.to_string(),
            local_path: worktree_path.display().to_string(),
            state: if req.claim_by.is_some() {
                WorktreeState::Claimed
            } else {
                WorktreeState::Ready
            },
            claimed_by: req.claim_by.clone(),
            claimed_at: req.claim_by.as_ref().map(|_| now.clone()),
            created_at: now.clone(),
            base_hashes,
            base_hashes_updated_at: Some(now),
        };

        let stored = entry.clone();
        self.config.update_locked(move |cfg| {
            cfg.worktrees.insert(stored.script_id.clone(), stored);
            Ok(())
        })?;
        Ok(entry)
    }

    /// Best-effort teardown of everything `add` created before it failed.
    async fn cleanup(&self, plan: &mut CleanupPlan) {
        if let Some((repo, path, branch)) = plan.worktree.take() {
            if let Err(err) = self.git.worktree_remove(&repo, &path, &branch).await {
                tracing::warn!(%err, path = %path.display(), "worktree cleanup failed");
            }
        }
        if let Some(script_id) = plan.script_id.take() {
            if let Err(err) = self.drive.trash_file(&script_id).await {
                tracing::warn!(%err, script_id, "trash of worktree project failed");
            }
        }
        if let Some(container_id) = plan.container_id.take() {
            if let Err(err) = self.drive.trash_file(&container_id).await {
                tracing::warn!(%err, container_id, "trash of copied container failed");
            }
        }
    }

    pub fn list(&self) -> Result<Vec<WorktreeView>> {
        let cfg = self.config.load()?;
        let now = Utc::now();
        Ok(cfg
            .worktrees
            .into_values()
            .map(|entry| {
                let stale_claim = claim_expired(&entry, now);
                WorktreeView { entry, stale_claim }
            })
            .collect())
    }

    /// READY → CLAIMED. Taking over an expired claim is allowed.
    pub async fn claim(&self, script_id: &str, agent: &str) -> Result<WorktreeEntry> {
        let script_id = script_id.to_string();
        let agent = agent.to_string();
        self.config
            .update("worktree claim", move |cfg| {
                let entry = cfg.worktrees.get_mut(&script_id).ok_or_else(|| {
                    Error::validation(format!("no worktree registered for {script_id}"))
                })?;
                let now = Utc::now();
                match entry.state {
                    WorktreeState::Ready => {}
                    WorktreeState::Claimed if claim_expired(entry, now) => {
                        tracing::warn!(
                            script_id = %entry.script_id,
                            stale_claimer = entry.claimed_by.as_deref().unwrap_or("unknown"),
                            "taking over an expired worktree claim"
                        );
                    }
                    WorktreeState::Claimed => {
                        return Err(Error::validation(format!(
                            "worktree is already claimed by {}",
                            entry.claimed_by.as_deref().unwrap_or("another agent")
                        )));
                    }
                    WorktreeState::Abandoned => {
                        return Err(Error::validation("worktree is abandoned"));
                    }
                }
                entry.state = WorktreeState::Claimed;
                entry.claimed_by = Some(agent.clone());
                entry.claimed_at = Some(now.to_rfc3339());
                Ok(entry.clone())
            })
            .await
    }

    /// CLAIMED → READY, by the claiming agent (or forced).
    pub async fn release(&self, script_id: &str, agent: &str, force: bool) -> Result<WorktreeEntry> {
        let script_id = script_id.to_string();
        let agent = agent.to_string();
        self.config
            .update("worktree release", move |cfg| {
                let entry = cfg.worktrees.get_mut(&script_id).ok_or_else(|| {
                    Error::validation(format!("no worktree registered for {script_id}"))
                })?;
                if entry.state != WorktreeState::Claimed {
                    return Err(Error::validation("worktree is not claimed"));
                }
                if !force && entry.claimed_by.as_deref() != Some(agent.as_str()) {
                    return Err(Error::validation(format!(
                        "worktree is claimed by {}, not {agent}",
                        entry.claimed_by.as_deref().unwrap_or("unknown")
                    )));
                }
                entry.state = WorktreeState::Ready;
                entry.claimed_by = None;
                entry.claimed_at = None;
                Ok(entry.clone())
            })
            .await
    }

    /// Abandon a worktree: tear down the git worktree and trash the backing
    /// remote resources, then drop the registry entry. Teardown failures
    /// leave the entry marked ABANDONED for a later retry.
    pub async fn remove(&self, script_id: &str) -> Result<Vec<String>> {
        let guard = self.config.lock_for("worktree remove").await?;
        let result = self.remove_locked(script_id).await;
        guard.release();
        result
    }

    async fn remove_locked(&self, script_id: &str) -> Result<Vec<String>> {
        let cfg = self.config.load()?;
        let entry = cfg
            .worktrees
            .get(script_id)
            .cloned()
            .ok_or_else(|| Error::validation(format!("no worktree registered for {script_id}")))?;

        let mut warnings = Vec::new();
        let parent_dir = mirror::project_dir(&self.local_root, &entry.parent_script_id);
        let worktree_path = Path::new(&entry.local_path);
        if worktree_path.exists() {
            if let Err(err) = self
                .git
                .worktree_remove(&parent_dir, worktree_path, &entry.branch)
                .await
            {
                warnings.push(format!("git worktree removal failed: {err}"));
            }
        }
        if let Err(err) = self.drive.trash_file(&entry.script_id).await {
            warnings.push(format!("trash of project {} failed: {err}", entry.script_id));
        }
        if let Some(container) = &entry.container_id {
            if let Err(err) = self.drive.trash_file(container).await {
                warnings.push(format!("trash of container {container} failed: {err}"));
            }
        }

        let succeeded = warnings.is_empty();
        let script_id = script_id.to_string();
        self.config.update_locked(move |cfg| {
            if succeeded {
                cfg.worktrees.remove(&script_id);
            } else if let Some(entry) = cfg.worktrees.get_mut(&script_id) {
                entry.state = WorktreeState::Abandoned;
            }
            Ok(())
        })?;
        Ok(warnings)
    }
}

fn claim_expired(entry: &WorktreeEntry, now: DateTime<Utc>) -> bool {
    if entry.state != WorktreeState::Claimed {
        return false;
    }
    let Some(claimed_at) = entry
        .claimed_at
        .as_deref()
        .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
    else {
        return true;
    };
    now.signed_duration_since(claimed_at.with_timezone(&Utc)) > claim_ttl()
}

/// Files of a worktree directory expressed as remote files: extensions map
/// back to kinds, git internals and the gitignore stay local.
fn worktree_remote_files(dir: &Path) -> Result<Vec<RemoteFile>> {
    let mut out = Vec::new();
    for (rel, bytes) in mirror::list_files(dir)? {
        if rel == ".gitignore" {
            continue;
        }
        let Some((stem, ext)) = rel.rsplit_once('.') else {
            continue;
        };
        let Some(kind) = FileKind::from_extension(ext) else {
            tracing::debug!(file = rel, "skipping file with unmapped extension");
            continue;
        };
        let source = String::from_utf8(bytes).map_err(|_| {
            Error::validation(format!("{rel} is not valid UTF-8 and cannot be pushed"))
        })?;
        out.push(RemoteFile::new(stem, kind, source));
    }
    Ok(out)
}

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;

use crate::conflict::{self, ConflictCheck, HashSource};
use crate::error::{Error, Result};
use crate::filemeta::{self, FileMeta};
use crate::gitbridge::GitBridge;
use crate::hash;
use crate::hooks;
use crate::mirror;
use crate::modwrap::{self, ModuleOptions};
use crate::pathspec::{self, FileKind};
use crate::remote::{RemoteFile, ScriptService};
use crate::syncgate;

#[derive(Debug, Clone)]
pub struct WriteRequest {
    pub script_id: String,
    /// Remote file path as the caller supplied it; extensions are stripped.
    pub filename: String,
    pub kind: FileKind,
    /// Unwrapped, edit-time content.
    pub content: String,
    pub expected_hash: Option<String>,
    pub force: bool,
    pub allow_new_local: bool,
    /// Trusted callers that already verified sync may skip the gate.
    pub skip_sync_check: bool,
    pub position: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GitContext {
    pub repo_root: String,
    pub branch: String,
    pub branch_created: bool,
    pub commit: String,
    pub hook_modified: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteOutcome {
    pub script_id: String,
    pub filename: String,
    pub hash: String,
    pub position: usize,
    pub total_files: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git: Option<GitContext>,
    pub next: String,
}

/// End-to-end write: sync gate → conflict check → hook-validated (or direct)
/// local write → remote push → metadata mirror, with rollback on push
/// failure. Step order is strict. No in-process mutual exclusion is imposed
/// across concurrent writes to the same file; the hash baseline makes the
/// stale writer fail with a conflict instead.
pub struct WritePipeline {
    remote: Arc<dyn ScriptService>,
    git: GitBridge,
    local_root: PathBuf,
}

impl WritePipeline {
    pub fn new(remote: Arc<dyn ScriptService>, git: GitBridge, local_root: PathBuf) -> Self {
        Self {
            remote,
            git,
            local_root,
        }
    }

    pub async fn execute(&self, req: WriteRequest) -> Result<WriteOutcome> {
        // Step 1: resolve names and the mirror path.
        if !pathspec::is_script_id(&req.script_id) {
            return Err(Error::validation(format!(
                "{} is not a valid scriptId",
                req.script_id
            )));
        }
        let file_path = pathspec::strip_known_extension(&req.filename);
        pathspec::validate_manifest_placement(&file_path)?;
        let local_path = mirror::local_path(&self.local_root, &req.script_id, &file_path, req.kind);

        // Current remote state feeds the gate, the conflict check, and the
        // wrapper-option carry-over.
        let remote_files = self.remote.get_project_content(&req.script_id).await?;
        let current = remote_files
            .iter()
            .find(|f| pathspec::file_name_matches(&f.name, &file_path));

        // Step 2: sync gate.
        if !req.skip_sync_check {
            syncgate::ensure_in_sync(
                &local_path,
                current.map(|f| f.source.as_str()),
                req.allow_new_local,
            )?;
        }

        // Wrap for storage, carrying forward the module options already on
        // the remote copy.
        let candidate = if modwrap::should_wrap(req.kind, &file_path) {
            let options = current
                .map(|f| modwrap::unwrap(&f.source).options)
                .unwrap_or_else(ModuleOptions::default);
            modwrap::wrap(&req.content, &file_path, &options)
        } else {
            req.content.clone()
        };

        // Step 3: conflict check. Hash source preference: explicit parameter,
        // then the xattr cache, then none (first-write semantics).
        let cached_hash = filemeta::get(&local_path).and_then(|m| m.content_hash);
        let (expected_hash, hash_source) = match (&req.expected_hash, &cached_hash) {
            (Some(h), _) => (Some(h.clone()), HashSource::Param),
            (None, Some(h)) => (Some(h.clone()), HashSource::Xattr),
            (None, None) => (None, HashSource::Computed),
        };
        conflict::check(ConflictCheck {
            script_id: &req.script_id,
            filename: &file_path,
            operation: "write",
            current_remote_content: current.map(|f| f.source.as_str()),
            proposed_content: Some(&candidate),
            expected_hash: expected_hash.as_deref(),
            hash_source,
            force: req.force,
        })?;

        // Step 4: hook-validated path when a git repository backs the mirror,
        // plain write otherwise.
        let project_dir = mirror::project_dir(&self.local_root, &req.script_id);
        let repo_root = GitBridge::discover_repo(&project_dir);
        let mut git_context = None;
        let mut previous_local: Option<Option<String>> = None;
        let final_content = match &repo_root {
            Some(root) => {
                let branch = self.git.ensure_feature_branch(root).await?;
                let rel = local_path
                    .strip_prefix(root)
                    .map_err(|_| {
                        Error::validation(format!(
                            "mirror file {} is outside its repository {}",
                            local_path.display(),
                            root.display()
                        ))
                    })?
                    .to_string_lossy()
                    .into_owned();
                let message = format!("Update {file_path}");
                let validated =
                    hooks::commit_with_hooks(&self.git, root, &rel, &candidate, &message).await?;
                git_context = Some(GitContext {
                    repo_root: root.display().to_string(),
                    branch: branch.branch,
                    branch_created: branch.created,
                    commit: validated.commit,
                    hook_modified: validated.hook_modified,
                });
                validated.content_after_hooks
            }
            None => {
                previous_local = Some(mirror::read_file(&local_path)?);
                mirror::write_file(&local_path, &candidate)?;
                candidate
            }
        };

        // Step 5: push the post-hook content remotely.
        let update = RemoteFile::new(file_path.clone(), req.kind, final_content.clone());
        let pushed = self
            .remote
            .update_file(&req.script_id, update, req.position)
            .await;
        let pushed = match pushed {
            Ok(pushed) => pushed,
            Err(err) => {
                return Err(self
                    .rollback_after_push_failure(
                        &req,
                        &file_path,
                        &local_path,
                        err,
                        git_context,
                        previous_local,
                    )
                    .await)
            }
        };

        // Step 6: mirror metadata after the remote accepted the write.
        let new_hash = hash::git_blob_sha1_str(&pushed.file.source);
        mirror::write_file(&local_path, &pushed.file.source)?;
        if let Some(update_time) = &pushed.file.update_time {
            mirror::set_mtime_from_remote(&local_path, update_time);
        }
        filemeta::put(
            &local_path,
            &FileMeta {
                remote_update_time: pushed.file.update_time.clone(),
                file_kind: Some(req.kind),
                content_hash: Some(new_hash.clone()),
            },
        );

        let next = match &git_context {
            Some(ctx) if ctx.hook_modified => format!(
                "hooks reformatted the file on branch {}; run file_cat to see the stored content",
                ctx.branch
            ),
            Some(ctx) => format!("committed on branch {} and pushed", ctx.branch),
            None => "pushed; run file_status to verify the mirror".to_string(),
        };
        Ok(WriteOutcome {
            script_id: req.script_id,
            filename: file_path,
            hash: new_hash,
            position: pushed.position,
            total_files: pushed.total_files,
            git: git_context,
            next,
        })
    }

    /// Step 7: the push failed. A cut-short push (timeout/cancel) has an
    /// unknown remote outcome, so neither the cache nor the local commit is
    /// touched. A definite rejection triggers the automatic rollback; if the
    /// rollback itself fails the error escalates with manual instructions.
    async fn rollback_after_push_failure(
        &self,
        req: &WriteRequest,
        file_path: &str,
        local_path: &std::path::Path,
        err: Error,
        git_context: Option<GitContext>,
        previous_local: Option<Option<String>>,
    ) -> Error {
        let message = err.to_string();
        let outcome_unknown = matches!(&err, Error::Api { timed_out: true, .. });
        if outcome_unknown {
            return Error::RemotePush {
                script_id: req.script_id.clone(),
                filename: file_path.to_string(),
                message,
                reverted_commit: None,
                outcome_unknown: true,
            };
        }
        if let Some(ctx) = git_context {
            let root = std::path::Path::new(&ctx.repo_root);
            match self.git.revert_commit(root, &ctx.commit).await {
                Ok(()) => Error::RemotePush {
                    script_id: req.script_id.clone(),
                    filename: file_path.to_string(),
                    message,
                    reverted_commit: Some(ctx.commit),
                    outcome_unknown: false,
                },
                Err(revert_err) => Error::CriticalRecovery {
                    commit: ctx.commit.clone(),
                    instructions: format!(
                        "remote push failed ({message}) and `git revert {}` also failed ({revert_err}). \
                         In {} run `git revert --no-edit {}` manually, or `git reset --hard HEAD~1` \
                         if the commit is unpublished, then re-sync with file_status.",
                        ctx.commit,
                        ctx.repo_root,
                        ctx.commit
                    ),
                },
            }
        } else {
            if let Some(previous) = previous_local {
                let restore = match &previous {
                    Some(content) => mirror::write_file(local_path, content),
                    None => mirror::remove_file(local_path),
                };
                if let Err(restore_err) = restore {
                    tracing::warn!(path = %local_path.display(), %restore_err, "local restore after failed push failed");
                }
            }
            Error::RemotePush {
                script_id: req.script_id.clone(),
                filename: file_path.to_string(),
                message,
                reverted_commit: None,
                outcome_unknown: false,
            }
        }
    }
}

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::mirror;

const OP_TIMEOUT: Duration = Duration::from_secs(30);
const INIT_TIMEOUT: Duration = Duration::from_secs(60);

/// Prefix for branches this system creates to isolate in-flight edits.
pub const FEATURE_PREFIX: &str = "edit/";
const MAINLINES: [&str; 2] = ["main", "master"];

#[derive(Debug, Clone)]
pub struct EnsureRepoOutcome {
    pub root: PathBuf,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct BranchContext {
    pub branch: String,
    pub created: bool,
}

#[derive(Debug, Clone)]
pub struct CommitOutcome {
    pub commit: String,
    pub hook_modified: bool,
}

/// Wrapper around the external git binary. Every invocation is an argument
/// array (never a shell string) with a wall-clock timeout; non-zero exits
/// surface stderr verbatim inside [`Error::Git`].
#[derive(Debug, Clone, Default)]
pub struct GitBridge;

impl GitBridge {
    pub fn new() -> Self {
        Self
    }

    async fn run_with_timeout(
        &self,
        dir: &Path,
        args: &[&str],
        timeout: Duration,
    ) -> Result<String> {
        let owned_args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        tracing::debug!(dir = %dir.display(), args = ?owned_args, "git");
        let mut cmd = tokio::process::Command::new("git");
        cmd.arg("-C")
            .arg(dir)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let output = match tokio::time::timeout(timeout, cmd.output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::GitTimeout {
                    args: owned_args,
                    timeout_secs: timeout.as_secs(),
                })
            }
        };
        if !output.status.success() {
            return Err(Error::Git {
                args: owned_args,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        self.run_with_timeout(dir, args, OP_TIMEOUT).await
    }

    pub fn is_repo(root: &Path) -> bool {
        root.join(".git").is_dir()
    }

    /// Walk upward from `start` looking for a `.git` directory.
    pub fn discover_repo(start: &Path) -> Option<PathBuf> {
        let mut cur = Some(start);
        while let Some(dir) = cur {
            if Self::is_repo(dir) {
                return Some(dir.to_path_buf());
            }
            cur = dir.parent();
        }
        None
    }

    /// Initialize a repository at `root` when absent: `git init`, identity
    /// seeding when unset, a `.gitignore`, the seed files, and an initial
    /// commit. Idempotent over an existing repository.
    pub async fn ensure_repo(&self, root: &Path, seed: &[(String, String)]) -> Result<EnsureRepoOutcome> {
        if Self::is_repo(root) {
            return Ok(EnsureRepoOutcome {
                root: root.to_path_buf(),
                created: false,
            });
        }
        std::fs::create_dir_all(root)?;
        self.run_with_timeout(root, &["init", "-b", "main"], INIT_TIMEOUT)
            .await?;
        self.seed_identity(root).await?;
        let gitignore = root.join(".gitignore");
        if !gitignore.exists() {
            std::fs::write(&gitignore, mirror::GITIGNORE)?;
        }
        for (rel, content) in seed {
            let path = root.join(rel);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(&path, content)?;
        }
        self.run(root, &["add", "-A"]).await?;
        // An empty project still gets its .gitignore committed.
        self.run(root, &["commit", "--no-verify", "-m", "Initial mirror of remote project"])
            .await?;
        Ok(EnsureRepoOutcome {
            root: root.to_path_buf(),
            created: true,
        })
    }

    async fn seed_identity(&self, root: &Path) -> Result<()> {
        if self.run(root, &["config", "user.name"]).await.is_err() {
            self.run(root, &["config", "user.name", "gascp"]).await?;
        }
        if self.run(root, &["config", "user.email"]).await.is_err() {
            self.run(root, &["config", "user.email", "gascp@localhost"])
                .await?;
        }
        Ok(())
    }

    pub async fn current_branch(&self, root: &Path) -> Result<String> {
        let out = self.run(root, &["symbolic-ref", "--short", "HEAD"]).await?;
        Ok(out.trim().to_string())
    }

    /// Keep edits off the mainline: when HEAD is on `main`/`master`, create
    /// and switch to a fresh feature branch; an existing feature branch is
    /// retained.
    pub async fn ensure_feature_branch(&self, root: &Path) -> Result<BranchContext> {
        let current = self.current_branch(root).await?;
        if !MAINLINES.contains(&current.as_str()) {
            return Ok(BranchContext {
                branch: current,
                created: false,
            });
        }
        let name = format!(
            "{FEATURE_PREFIX}{}",
            chrono::Utc::now().format("%Y%m%d-%H%M%S")
        );
        self.run(root, &["checkout", "-b", &name]).await?;
        Ok(BranchContext {
            branch: name,
            created: true,
        })
    }

    /// Stage and commit specific files. `hook_modified` reports whether any
    /// staged file's bytes changed across the commit (hooks may rewrite).
    pub async fn commit(&self, root: &Path, files: &[&str], message: &str) -> Result<CommitOutcome> {
        let mut add_args = vec!["add", "--"];
        add_args.extend_from_slice(files);
        self.run(root, &add_args).await?;

        let before: Vec<Option<Vec<u8>>> = files
            .iter()
            .map(|f| std::fs::read(root.join(f)).ok())
            .collect();
        let mut commit_args = vec!["commit", "-m", message, "--"];
        commit_args.extend_from_slice(files);
        self.run(root, &commit_args).await?;
        let after: Vec<Option<Vec<u8>>> = files
            .iter()
            .map(|f| std::fs::read(root.join(f)).ok())
            .collect();
        let hook_modified = before != after;

        let commit = self.run(root, &["rev-parse", "HEAD"]).await?;
        Ok(CommitOutcome {
            commit: commit.trim().to_string(),
            hook_modified,
        })
    }

    pub async fn revert_commit(&self, root: &Path, commit: &str) -> Result<()> {
        self.run(root, &["revert", "--no-edit", "--no-verify", commit])
            .await?;
        Ok(())
    }

    async fn branch_exists(&self, root: &Path, branch: &str) -> bool {
        self.run(
            root,
            &["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")],
        )
        .await
        .is_ok()
    }

    async fn branch_backs_worktree(&self, root: &Path, branch: &str) -> Result<bool> {
        let out = self.run(root, &["worktree", "list", "--porcelain"]).await?;
        let needle = format!("branch refs/heads/{branch}");
        Ok(out.lines().any(|line| line.trim() == needle))
    }

    /// Create a sibling worktree on a new branch. A pre-existing branch of
    /// the same name is force-deleted first, unless it currently backs a
    /// worktree.
    pub async fn worktree_add(
        &self,
        repo_root: &Path,
        worktree_path: &Path,
        branch: &str,
    ) -> Result<()> {
        if self.branch_exists(repo_root, branch).await {
            if self.branch_backs_worktree(repo_root, branch).await? {
                return Err(Error::validation(format!(
                    "branch {branch} is already checked out in another worktree"
                )));
            }
            self.run(repo_root, &["branch", "-D", branch]).await?;
        }
        if let Some(parent) = worktree_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let path = worktree_path.to_string_lossy();
        self.run_with_timeout(
            repo_root,
            &["worktree", "add", "-b", branch, path.as_ref(), "HEAD"],
            INIT_TIMEOUT,
        )
        .await?;
        Ok(())
    }

    /// Remove a worktree and delete its branch. Branch deletion failures are
    /// downgraded to a warning; the worktree removal itself must succeed.
    pub async fn worktree_remove(
        &self,
        repo_root: &Path,
        worktree_path: &Path,
        branch: &str,
    ) -> Result<()> {
        let path = worktree_path.to_string_lossy();
        self.run(repo_root, &["worktree", "remove", "--force", path.as_ref()])
            .await?;
        if let Err(err) = self.run(repo_root, &["branch", "-D", branch]).await {
            tracing::warn!(branch, %err, "branch delete after worktree removal failed");
        }
        Ok(())
    }

    /// Drop a path from the index without touching the working tree.
    pub async fn unstage(&self, root: &Path, rel_path: &str) -> Result<()> {
        self.run(root, &["reset", "-q", "--", rel_path]).await?;
        Ok(())
    }

}

/// Remote breadcrumb: a `.git/config`-style file stored inside the remote
/// project naming the local git directory, so a fresh machine can find the
/// repo. Only the `path` key of the `[gas "mirror"]` section is read.
pub fn parse_breadcrumb(content: &str) -> Option<PathBuf> {
    let mut in_section = false;
    for line in content.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            in_section = line == "[gas \"mirror\"]" || line == "[gas]";
            continue;
        }
        if in_section {
            if let Some(value) = line.strip_prefix("path") {
                let value = value.trim_start().strip_prefix('=')?.trim();
                if !value.is_empty() {
                    return Some(PathBuf::from(value));
                }
            }
        }
    }
    None
}

/// A breadcrumb naming a directory outside the expected local root is a hard
/// error at the ensure-repo step.
pub fn validate_breadcrumb(breadcrumb: &Path, local_root: &Path) -> Result<()> {
    if breadcrumb.starts_with(local_root) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "remote breadcrumb points at {} which is outside the local root {}",
            breadcrumb.display(),
            local_root.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breadcrumb_parsing() {
        let content = "[gas \"mirror\"]\n\tpath = /home/dev/gas-repos/project-abc\n";
        assert_eq!(
            parse_breadcrumb(content),
            Some(PathBuf::from("/home/dev/gas-repos/project-abc"))
        );
        assert_eq!(parse_breadcrumb("[core]\n\tbare = false\n"), None);
    }

    #[test]
    fn breadcrumb_outside_root_is_rejected() {
        let root = Path::new("/home/dev/gas-repos");
        assert!(validate_breadcrumb(Path::new("/home/dev/gas-repos/project-x"), root).is_ok());
        assert!(validate_breadcrumb(Path::new("/tmp/elsewhere"), root).is_err());
    }
}

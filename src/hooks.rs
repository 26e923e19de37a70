use std::path::Path;

use crate::error::{Error, Result};
use crate::gitbridge::GitBridge;
use crate::mirror;

#[derive(Debug, Clone)]
pub struct HookValidated {
    pub content_after_hooks: String,
    pub hook_modified: bool,
    pub commit: String,
}

/// Write + commit-with-hooks + read-back. Repository hooks (formatters,
/// linters, tests) may modify or reject the candidate before it is pushed
/// remotely. On any exit the local file and the git index agree: both at the
/// new content, or both back at the previous content.
pub async fn commit_with_hooks(
    git: &GitBridge,
    repo_root: &Path,
    rel_path: &str,
    candidate: &str,
    message: &str,
) -> Result<HookValidated> {
    let abs_path = repo_root.join(rel_path);
    let previous = mirror::read_file(&abs_path)?;

    mirror::write_file(&abs_path, candidate)?;

    match git.commit(repo_root, &[rel_path], message).await {
        Ok(outcome) => {
            let content_after_hooks = mirror::read_file(&abs_path)?.unwrap_or_default();
            Ok(HookValidated {
                hook_modified: outcome.hook_modified,
                commit: outcome.commit,
                content_after_hooks,
            })
        }
        Err(err) => {
            // Hook rejection (or a no-op commit): put tree and index back
            // exactly as they were before surfacing the failure.
            match &previous {
                Some(previous_content) => mirror::write_file(&abs_path, previous_content)?,
                None => mirror::remove_file(&abs_path)?,
            }
            if let Err(reset_err) = git.unstage(repo_root, rel_path).await {
                tracing::warn!(path = rel_path, %reset_err, "unstage after hook rejection failed");
            }
            let output = match err {
                Error::Git { stderr, .. } => stderr,
                other => other.to_string(),
            };
            Err(Error::HookRejected {
                path: abs_path,
                output,
            })
        }
    }
}

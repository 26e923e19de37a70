use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::filemeta;
use crate::hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncMethod {
    #[serde(rename = "cache-exact")]
    CacheExact,
    #[serde(rename = "computed-match")]
    ComputedMatch,
    #[serde(rename = "hash-mismatch")]
    HashMismatch,
    #[serde(rename = "no-local-file")]
    NoLocalFile,
    #[serde(rename = "new-remote-file")]
    NewRemoteFile,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncDiagnostics {
    pub local_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_hash: Option<String>,
    pub cached_hash_present: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cached_hash: Option<String>,
    pub method: SyncMethod,
    pub hint: String,
}

#[derive(Debug, Clone)]
pub struct SyncOutcome {
    pub method: SyncMethod,
    /// Hash of the current remote content, when the remote file exists.
    pub remote_hash: Option<String>,
}

/// Verify the local mirror copy is consistent with the remote before an
/// overwrite. The cached-hash comparison is the fast path; any divergence
/// falls back to hashing the actual bytes — the cache is an optimization,
/// never ground truth. The gate never reconciles anything silently.
pub fn ensure_in_sync(
    local_path: &Path,
    remote_content: Option<&str>,
    allow_new_local: bool,
) -> Result<SyncOutcome> {
    let Some(remote) = remote_content else {
        // Remote file does not exist yet: creation is always allowed.
        return Ok(SyncOutcome {
            method: SyncMethod::NewRemoteFile,
            remote_hash: None,
        });
    };
    let remote_hash = hash::git_blob_sha1_str(remote);
    let cached_hash = filemeta::get(local_path).and_then(|m| m.content_hash);

    let local_bytes = match std::fs::read(local_path) {
        Ok(bytes) => Some(bytes),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => None,
        Err(err) => return Err(err.into()),
    };
    let Some(local_bytes) = local_bytes else {
        if allow_new_local {
            return Ok(SyncOutcome {
                method: SyncMethod::NoLocalFile,
                remote_hash: Some(remote_hash),
            });
        }
        return Err(out_of_sync(
            local_path,
            None,
            &remote_hash,
            cached_hash,
            SyncMethod::NoLocalFile,
            "the remote file exists but there is no local copy; run file_cat to download it, or pass allowNewLocal to write anyway",
        ));
    };

    if let Some(cached) = &cached_hash {
        if hash::hashes_equal(cached, &remote_hash) {
            return Ok(SyncOutcome {
                method: SyncMethod::CacheExact,
                remote_hash: Some(remote_hash),
            });
        }
    }

    let local_hash = hash::git_blob_sha1(&local_bytes);
    if hash::hashes_equal(&local_hash, &remote_hash) {
        return Ok(SyncOutcome {
            method: SyncMethod::ComputedMatch,
            remote_hash: Some(remote_hash),
        });
    }

    Err(out_of_sync(
        local_path,
        Some(local_hash),
        &remote_hash,
        cached_hash,
        SyncMethod::HashMismatch,
        "the local copy is stale relative to the remote; run file_cat to download the latest remote version before overwriting",
    ))
}

fn out_of_sync(
    local_path: &Path,
    local_hash: Option<String>,
    remote_hash: &str,
    cached_hash: Option<String>,
    method: SyncMethod,
    hint: &str,
) -> Error {
    Error::Sync {
        diagnostics: Box::new(SyncDiagnostics {
            local_path: local_path.to_path_buf(),
            local_hash,
            remote_hash: Some(remote_hash.to_string()),
            cached_hash_present: cached_hash.is_some(),
            cached_hash,
            method,
            hint: hint.to_string(),
        }),
    }
}

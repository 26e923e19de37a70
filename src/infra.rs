use std::sync::Arc;

use serde::Serialize;

use crate::error::{Error, Result};
use crate::hash;
use crate::pathspec::{self, FileKind};
use crate::remote::{RemoteFile, ScriptService};

/// Helper files injected into every managed project, with their canonical
/// sources embedded at build time. The expected hash of each is the git
/// SHA-1 of the canonical content.
pub const MODULE_LOADER: &str = "CommonJS";
pub const EXEC_SHIM: &str = "__mcp_exec";

const MODULE_LOADER_SOURCE: &str = include_str!("runtime/CommonJS.js");
const EXEC_SHIM_SOURCE: &str = include_str!("runtime/__mcp_exec.js");

pub fn helper_files() -> [(&'static str, &'static str); 2] {
    [
        (MODULE_LOADER, MODULE_LOADER_SOURCE),
        (EXEC_SHIM, EXEC_SHIM_SOURCE),
    ]
}

pub fn expected_hash(name: &str) -> Option<String> {
    helper_files()
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, source)| hash::git_blob_sha1_str(source))
}

/// Verification tiers by call-site:
/// strict at project creation (write, re-fetch, fail on mismatch), warn at
/// project-init without force (report only), repair at project-init with
/// force (reinstall canonical content).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifyMode {
    Strict,
    Warn,
    Repair,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum VerifyStatus {
    Ok,
    Missing,
    Mismatch,
    Installed,
    Repaired,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationOutcome {
    pub file: String,
    pub expected_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_hash: Option<String>,
    pub status: VerifyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<String>,
}

impl VerificationOutcome {
    pub fn is_warning(&self) -> bool {
        matches!(self.status, VerifyStatus::Missing | VerifyStatus::Mismatch)
    }
}

pub struct InfraVerifier {
    remote: Arc<dyn ScriptService>,
}

impl InfraVerifier {
    pub fn new(remote: Arc<dyn ScriptService>) -> Self {
        Self { remote }
    }

    /// Verify (and per mode, install) every helper file in a project.
    pub async fn verify_project(
        &self,
        script_id: &str,
        mode: VerifyMode,
    ) -> Result<Vec<VerificationOutcome>> {
        let files = self.remote.get_project_content(script_id).await?;
        let mut outcomes = Vec::new();
        for (name, canonical) in helper_files() {
            let expected = hash::git_blob_sha1_str(canonical);
            let current = files
                .iter()
                .find(|f| pathspec::file_name_matches(&f.name, name));
            let actual = current.map(|f| hash::git_blob_sha1_str(&f.source));
            let outcome = match (mode, &actual) {
                (_, Some(actual_hash)) if hash::hashes_equal(actual_hash, &expected) => {
                    VerificationOutcome {
                        file: name.to_string(),
                        expected_hash: expected,
                        actual_hash: actual.clone(),
                        status: VerifyStatus::Ok,
                        advice: None,
                    }
                }
                (VerifyMode::Warn, _) => VerificationOutcome {
                    file: name.to_string(),
                    expected_hash: expected,
                    actual_hash: actual.clone(),
                    status: if actual.is_some() {
                        VerifyStatus::Mismatch
                    } else {
                        VerifyStatus::Missing
                    },
                    advice: Some(
                        "re-run project_init with force=true to reinstall the canonical helper"
                            .to_string(),
                    ),
                },
                (VerifyMode::Repair | VerifyMode::Strict, _) => {
                    let was_present = actual.is_some();
                    self.install(script_id, name, canonical).await?;
                    if mode == VerifyMode::Strict {
                        self.recheck(script_id, name, &expected).await?;
                    }
                    VerificationOutcome {
                        file: name.to_string(),
                        expected_hash: expected,
                        actual_hash: actual.clone(),
                        status: if was_present {
                            VerifyStatus::Repaired
                        } else {
                            VerifyStatus::Installed
                        },
                        advice: None,
                    }
                }
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn install(&self, script_id: &str, name: &str, canonical: &str) -> Result<()> {
        self.remote
            .update_file(
                script_id,
                RemoteFile::new(name, FileKind::ServerJs, canonical),
                None,
            )
            .await?;
        Ok(())
    }

    /// Strict tier: re-fetch after writing and fail when the stored content
    /// does not hash to the canonical value.
    async fn recheck(&self, script_id: &str, name: &str, expected: &str) -> Result<()> {
        let files = self.remote.get_project_content(script_id).await?;
        let stored = files
            .iter()
            .find(|f| pathspec::file_name_matches(&f.name, name))
            .ok_or_else(|| {
                Error::api(
                    "infrastructureVerify",
                    format!("{name} is missing after installation"),
                )
            })?;
        let actual = hash::git_blob_sha1_str(&stored.source);
        if !hash::hashes_equal(&actual, expected) {
            return Err(Error::api(
                "infrastructureVerify",
                format!("{name} stored with hash {actual}, expected {expected}"),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_hashes_are_stable() {
        let loader = expected_hash(MODULE_LOADER).unwrap();
        let shim = expected_hash(EXEC_SHIM).unwrap();
        assert_eq!(loader.len(), 40);
        assert_eq!(shim.len(), 40);
        assert_ne!(loader, shim);
        assert_eq!(expected_hash("NotAHelper"), None);
    }
}

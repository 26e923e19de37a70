use std::path::PathBuf;

use serde_json::{json, Value};
use thiserror::Error;

use crate::conflict::ConflictReport;
use crate::syncgate::SyncDiagnostics;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// The single error taxonomy the core emits. Tools map these onto structured
/// envelopes at the MCP boundary; nothing below that layer formats messages
/// for humans.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0}")]
    Validation(String),

    #[error("no valid access token available")]
    Authentication,

    #[error("remote content changed since the baseline for {}/{}", .report.script_id, .report.filename)]
    Conflict { report: Box<ConflictReport> },

    #[error("local copy is out of sync with the remote for {}", .diagnostics.local_path.display())]
    Sync {
        diagnostics: Box<SyncDiagnostics>,
    },

    #[error("git hooks rejected the commit for {}", .path.display())]
    HookRejected { path: PathBuf, output: String },

    #[error("remote push failed for {script_id}/{filename}: {message}")]
    RemotePush {
        script_id: String,
        filename: String,
        message: String,
        /// Commit that was reverted after the failed push, if any.
        reverted_commit: Option<String>,
        /// True when the push was cut short (timeout/cancel) and the remote
        /// outcome cannot be known. No rollback is attempted in that case.
        outcome_unknown: bool,
    },

    #[error("remote push failed and the git revert of {commit} also failed; manual recovery required")]
    CriticalRecovery {
        commit: String,
        instructions: String,
    },

    #[error("could not acquire {lock} within {waited_secs}s (held by {holder})")]
    LockTimeout {
        lock: String,
        waited_secs: u64,
        holder: String,
    },

    #[error("{operation} failed: {message}")]
    Api {
        operation: String,
        message: String,
        status: Option<u16>,
        timed_out: bool,
    },

    #[error("git {} exited with code {code}: {stderr}", .args.join(" "))]
    Git {
        args: Vec<String>,
        code: i32,
        stderr: String,
    },

    #[error("git {} did not finish within {timeout_secs}s", .args.join(" "))]
    GitTimeout {
        args: Vec<String>,
        timeout_secs: u64,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn api(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Api {
            operation: operation.into(),
            message: message.into(),
            status: None,
            timed_out: false,
        }
    }

    /// Stable machine-readable kind name for the structured envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation",
            Error::Authentication => "authentication",
            Error::Conflict { .. } => "conflict",
            Error::Sync { .. } => "sync",
            Error::HookRejected { .. } => "hookRejected",
            Error::RemotePush { .. } => "remotePush",
            Error::CriticalRecovery { .. } => "criticalRecovery",
            Error::LockTimeout { .. } => "lockTimeout",
            Error::Api { .. } => "api",
            Error::Git { .. } | Error::GitTimeout { .. } => "git",
            Error::Io(_) => "io",
        }
    }

    /// Actionable next steps, keyed for the agent on the other end.
    pub fn hints(&self) -> Value {
        match self {
            Error::Authentication => json!({
                "auth": "start the OAuth flow and export GASCP_ACCESS_TOKEN for this session",
            }),
            Error::Conflict { .. } => json!({
                "resolve": "run file_cat to download the latest remote version, reapply your edit, then retry with the new hash",
                "force": "pass force=true to overwrite the remote copy regardless of the baseline",
            }),
            Error::Sync { diagnostics } => json!({
                "resolve": diagnostics.hint,
            }),
            Error::HookRejected { .. } => json!({
                "resolve": "fix the issues reported by the repository hooks; the local file was reverted",
            }),
            Error::RemotePush {
                outcome_unknown: true,
                ..
            } => json!({
                "resolve": "the remote outcome is unknown; run file_status to compare hashes before retrying",
            }),
            Error::CriticalRecovery { instructions, .. } => json!({
                "manualRecovery": instructions,
            }),
            Error::LockTimeout { holder, .. } => json!({
                "holder": holder,
                "resolve": "retry once the holder finishes, or remove the lock file if the holder is gone",
            }),
            _ => Value::Null,
        }
    }

    /// The structured failure object promised by every tool.
    pub fn envelope(&self) -> Value {
        let mut obj = json!({
            "kind": self.kind(),
            "message": self.to_string(),
        });
        let hints = self.hints();
        if !hints.is_null() {
            obj["hints"] = hints;
        }
        match self {
            Error::Conflict { report } => {
                obj["conflict"] = serde_json::to_value(report).unwrap_or(Value::Null);
            }
            Error::Sync { diagnostics } => {
                obj["sync"] = serde_json::to_value(diagnostics).unwrap_or(Value::Null);
            }
            Error::RemotePush {
                reverted_commit,
                outcome_unknown,
                ..
            } => {
                obj["revertedCommit"] = json!(reverted_commit);
                obj["outcomeUnknown"] = json!(outcome_unknown);
            }
            Error::CriticalRecovery { commit, .. } => {
                obj["orphanedCommit"] = json!(commit);
            }
            _ => {}
        }
        obj
    }
}

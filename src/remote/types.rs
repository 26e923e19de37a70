use serde::{Deserialize, Serialize};

use crate::pathspec::FileKind;

/// One file as stored in a remote project. Projects carry an ordered
/// sequence of these; the order is observable and mutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFile {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: FileKind,
    pub source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl RemoteFile {
    pub fn new(name: impl Into<String>, kind: FileKind, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind,
            source: source.into(),
            update_time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub script_id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gcp_project_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Version {
    pub version_number: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,
}

/// Flattened deployment view. `version_number == None` means the deployment
/// tracks HEAD.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub deployment_id: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web_app_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub function_name: String,
    pub process_status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
}

/// Result of a single-file update through the read-modify-write path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate {
    pub file: RemoteFile,
    /// Position of the file within the project's ordered file list.
    pub position: usize,
    pub total_files: usize,
}

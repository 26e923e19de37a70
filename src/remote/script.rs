use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::pathspec;
use crate::remote::auth::TokenProvider;
use crate::remote::types::{Deployment, FileUpdate, ProcessInfo, Project, RemoteFile, Version};

pub const DEFAULT_BASE_URL: &str = "https://script.googleapis.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Thin typed wrapper over the Apps Script REST API. Everything above this
/// trait treats the remote as an ordered file store plus versions and
/// deployments; tests substitute an in-memory fake.
#[async_trait]
pub trait ScriptService: Send + Sync {
    async fn get_project(&self, script_id: &str) -> Result<Project>;
    async fn create_project(&self, title: &str, parent_id: Option<&str>) -> Result<Project>;
    async fn get_project_content(&self, script_id: &str) -> Result<Vec<RemoteFile>>;
    async fn update_project_content(
        &self,
        script_id: &str,
        files: Vec<RemoteFile>,
    ) -> Result<Vec<RemoteFile>>;
    async fn create_version(&self, script_id: &str, description: &str) -> Result<Version>;
    async fn list_versions(&self, script_id: &str) -> Result<Vec<Version>>;
    async fn get_version(&self, script_id: &str, version_number: u32) -> Result<Version>;
    async fn create_deployment(
        &self,
        script_id: &str,
        description: &str,
        version_number: Option<u32>,
    ) -> Result<Deployment>;
    async fn update_deployment(
        &self,
        script_id: &str,
        deployment_id: &str,
        description: &str,
        version_number: Option<u32>,
    ) -> Result<Deployment>;
    async fn delete_deployment(&self, script_id: &str, deployment_id: &str) -> Result<()>;
    async fn list_deployments(&self, script_id: &str) -> Result<Vec<Deployment>>;
    async fn get_deployment(&self, script_id: &str, deployment_id: &str) -> Result<Deployment>;
    async fn list_processes(&self, script_id: &str) -> Result<Vec<ProcessInfo>>;

    /// Single-file update expressed over the whole-content endpoint:
    /// read-modify-write with optional target position. New files append
    /// unless a position is given; existing files keep their slot.
    async fn update_file(
        &self,
        script_id: &str,
        file: RemoteFile,
        position: Option<usize>,
    ) -> Result<FileUpdate> {
        let mut files = self.get_project_content(script_id).await?;
        let existing = files
            .iter()
            .position(|f| pathspec::file_name_matches(&f.name, &file.name));
        let mut slot = match existing {
            Some(idx) => {
                files[idx] = file.clone();
                idx
            }
            None => {
                files.push(file.clone());
                files.len() - 1
            }
        };
        if let Some(target) = position {
            let target = target.min(files.len() - 1);
            if target != slot {
                let moved = files.remove(slot);
                files.insert(target, moved);
                slot = target;
            }
        }
        let updated = self.update_project_content(script_id, files).await?;
        let position = updated
            .iter()
            .position(|f| pathspec::file_name_matches(&f.name, &file.name))
            .unwrap_or(slot);
        let stored = updated.get(position).cloned().unwrap_or(file);
        Ok(FileUpdate {
            file: stored,
            position,
            total_files: updated.len(),
        })
    }
}

/// reqwest-backed implementation. Tokens are resolved per call from the
/// provider; per-call timeouts come from the client configuration.
pub struct ScriptHttpClient {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<dyn TokenProvider>,
}

impl ScriptHttpClient {
    pub fn new(auth: Arc<dyn TokenProvider>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, auth)
    }

    pub fn with_base_url(base_url: impl Into<String>, auth: Arc<dyn TokenProvider>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            auth,
        }
    }

    async fn request(
        &self,
        operation: &str,
        method: reqwest::Method,
        path: &str,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let token = self.auth.access_token()?;
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        tracing::debug!(operation, %url, "apps script request");
        let mut req = self.http.request(method, &url).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.map_err(|err| classify(operation, &err))?;
        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|err| classify(operation, &err))?;
        if !status.is_success() {
            return Err(Error::Api {
                operation: operation.to_string(),
                message: upstream_message(&text).unwrap_or(text),
                status: Some(status.as_u16()),
                timed_out: false,
            });
        }
        if text.is_empty() {
            return Ok(serde_json::Value::Null);
        }
        serde_json::from_str(&text).map_err(|err| Error::Api {
            operation: operation.to_string(),
            message: format!("invalid JSON response: {err}"),
            status: Some(status.as_u16()),
            timed_out: false,
        })
    }

    fn parse<T: serde::de::DeserializeOwned>(
        operation: &str,
        value: serde_json::Value,
    ) -> Result<T> {
        serde_json::from_value(value).map_err(|err| Error::Api {
            operation: operation.to_string(),
            message: format!("unexpected response shape: {err}"),
            status: None,
            timed_out: false,
        })
    }
}

fn classify(operation: &str, err: &reqwest::Error) -> Error {
    Error::Api {
        operation: operation.to_string(),
        message: err.to_string(),
        status: err.status().map(|s| s.as_u16()),
        timed_out: err.is_timeout(),
    }
}

fn upstream_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .get("error")?
        .get("message")?
        .as_str()
        .map(str::to_string)
}

#[derive(Deserialize)]
struct ContentResponse {
    #[serde(default)]
    files: Vec<RemoteFile>,
}

#[derive(Deserialize)]
struct VersionsResponse {
    #[serde(default)]
    versions: Vec<Version>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDeployment {
    deployment_id: String,
    #[serde(default)]
    deployment_config: Option<WireDeploymentConfig>,
    #[serde(default)]
    update_time: Option<String>,
    #[serde(default)]
    entry_points: Vec<WireEntryPoint>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireDeploymentConfig {
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    version_number: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEntryPoint {
    #[serde(default)]
    entry_point_type: Option<String>,
    #[serde(default)]
    web_app: Option<WireWebApp>,
}

#[derive(Deserialize)]
struct WireWebApp {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Deserialize)]
struct DeploymentsResponse {
    #[serde(default)]
    deployments: Vec<WireDeployment>,
}

#[derive(Deserialize)]
struct ProcessesResponse {
    #[serde(default)]
    processes: Vec<ProcessInfo>,
}

impl From<WireDeployment> for Deployment {
    fn from(wire: WireDeployment) -> Self {
        let config = wire.deployment_config;
        let web_app_url = wire
            .entry_points
            .into_iter()
            .find(|ep| ep.entry_point_type.as_deref() == Some("WEB_APP"))
            .and_then(|ep| ep.web_app)
            .and_then(|w| w.url);
        Deployment {
            deployment_id: wire.deployment_id,
            description: config
                .as_ref()
                .and_then(|c| c.description.clone())
                .unwrap_or_default(),
            version_number: config.and_then(|c| c.version_number),
            web_app_url,
            update_time: wire.update_time,
        }
    }
}

fn deployment_config_body(
    script_id: &str,
    description: &str,
    version_number: Option<u32>,
) -> serde_json::Value {
    let mut config = json!({
        "scriptId": script_id,
        "manifestFileName": "appsscript",
        "description": description,
    });
    if let Some(v) = version_number {
        config["versionNumber"] = json!(v);
    }
    config
}

#[async_trait]
impl ScriptService for ScriptHttpClient {
    async fn get_project(&self, script_id: &str) -> Result<Project> {
        let value = self
            .request(
                "getProject",
                reqwest::Method::GET,
                &format!("projects/{script_id}"),
                None,
            )
            .await?;
        Self::parse("getProject", value)
    }

    async fn create_project(&self, title: &str, parent_id: Option<&str>) -> Result<Project> {
        let mut body = json!({ "title": title });
        if let Some(parent) = parent_id {
            body["parentId"] = json!(parent);
        }
        let value = self
            .request("createProject", reqwest::Method::POST, "projects", Some(body))
            .await?;
        Self::parse("createProject", value)
    }

    async fn get_project_content(&self, script_id: &str) -> Result<Vec<RemoteFile>> {
        let value = self
            .request(
                "getProjectContent",
                reqwest::Method::GET,
                &format!("projects/{script_id}/content"),
                None,
            )
            .await?;
        let parsed: ContentResponse = Self::parse("getProjectContent", value)?;
        Ok(parsed.files)
    }

    async fn update_project_content(
        &self,
        script_id: &str,
        files: Vec<RemoteFile>,
    ) -> Result<Vec<RemoteFile>> {
        let value = self
            .request(
                "updateProjectContent",
                reqwest::Method::PUT,
                &format!("projects/{script_id}/content"),
                Some(json!({ "files": files })),
            )
            .await?;
        let parsed: ContentResponse = Self::parse("updateProjectContent", value)?;
        Ok(parsed.files)
    }

    async fn create_version(&self, script_id: &str, description: &str) -> Result<Version> {
        let value = self
            .request(
                "createVersion",
                reqwest::Method::POST,
                &format!("projects/{script_id}/versions"),
                Some(json!({ "description": description })),
            )
            .await?;
        Self::parse("createVersion", value)
    }

    async fn list_versions(&self, script_id: &str) -> Result<Vec<Version>> {
        let value = self
            .request(
                "listVersions",
                reqwest::Method::GET,
                &format!("projects/{script_id}/versions"),
                None,
            )
            .await?;
        let parsed: VersionsResponse = Self::parse("listVersions", value)?;
        Ok(parsed.versions)
    }

    async fn get_version(&self, script_id: &str, version_number: u32) -> Result<Version> {
        let value = self
            .request(
                "getVersion",
                reqwest::Method::GET,
                &format!("projects/{script_id}/versions/{version_number}"),
                None,
            )
            .await?;
        Self::parse("getVersion", value)
    }

    async fn create_deployment(
        &self,
        script_id: &str,
        description: &str,
        version_number: Option<u32>,
    ) -> Result<Deployment> {
        let value = self
            .request(
                "createDeployment",
                reqwest::Method::POST,
                &format!("projects/{script_id}/deployments"),
                Some(deployment_config_body(script_id, description, version_number)),
            )
            .await?;
        let wire: WireDeployment = Self::parse("createDeployment", value)?;
        Ok(wire.into())
    }

    async fn update_deployment(
        &self,
        script_id: &str,
        deployment_id: &str,
        description: &str,
        version_number: Option<u32>,
    ) -> Result<Deployment> {
        let value = self
            .request(
                "updateDeployment",
                reqwest::Method::PUT,
                &format!("projects/{script_id}/deployments/{deployment_id}"),
                Some(json!({
                    "deploymentConfig": deployment_config_body(script_id, description, version_number),
                })),
            )
            .await?;
        let wire: WireDeployment = Self::parse("updateDeployment", value)?;
        Ok(wire.into())
    }

    async fn delete_deployment(&self, script_id: &str, deployment_id: &str) -> Result<()> {
        self.request(
            "deleteDeployment",
            reqwest::Method::DELETE,
            &format!("projects/{script_id}/deployments/{deployment_id}"),
            None,
        )
        .await?;
        Ok(())
    }

    async fn list_deployments(&self, script_id: &str) -> Result<Vec<Deployment>> {
        let value = self
            .request(
                "listDeployments",
                reqwest::Method::GET,
                &format!("projects/{script_id}/deployments"),
                None,
            )
            .await?;
        let parsed: DeploymentsResponse = Self::parse("listDeployments", value)?;
        Ok(parsed.deployments.into_iter().map(Into::into).collect())
    }

    async fn get_deployment(&self, script_id: &str, deployment_id: &str) -> Result<Deployment> {
        let value = self
            .request(
                "getDeployment",
                reqwest::Method::GET,
                &format!("projects/{script_id}/deployments/{deployment_id}"),
                None,
            )
            .await?;
        let wire: WireDeployment = Self::parse("getDeployment", value)?;
        Ok(wire.into())
    }

    async fn list_processes(&self, script_id: &str) -> Result<Vec<ProcessInfo>> {
        let value = self
            .request(
                "listProcesses",
                reqwest::Method::GET,
                &format!("processes?userProcessFilter.scriptId={script_id}"),
                None,
            )
            .await?;
        let parsed: ProcessesResponse = Self::parse("listProcesses", value)?;
        Ok(parsed.processes)
    }
}

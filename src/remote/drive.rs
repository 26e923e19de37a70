use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::remote::auth::TokenProvider;

pub const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/drive/v3";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const SCRIPT_MIME: &str = "application/vnd.google-apps.script";

/// Drive-side container classification of a script's parent entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerType {
    Standalone,
    Sheets,
    Docs,
    Forms,
    Slides,
}

impl ContainerType {
    pub fn from_mime(mime: &str) -> ContainerType {
        match mime {
            "application/vnd.google-apps.spreadsheet" => ContainerType::Sheets,
            "application/vnd.google-apps.document" => ContainerType::Docs,
            "application/vnd.google-apps.form" => ContainerType::Forms,
            "application/vnd.google-apps.presentation" => ContainerType::Slides,
            _ => ContainerType::Standalone,
        }
    }

    pub fn is_container_bound(self) -> bool {
        self != ContainerType::Standalone
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
}

/// The slice of the Drive API the worktree manager needs: container
/// inspection, container copy (which clones bound scripts), trash, and
/// bound-script lookup.
#[async_trait]
pub trait DriveService: Send + Sync {
    async fn get_file(&self, file_id: &str) -> Result<DriveFile>;
    async fn copy_file(&self, file_id: &str, new_name: &str) -> Result<DriveFile>;
    async fn trash_file(&self, file_id: &str) -> Result<()>;
    /// Locate the script bound to a container, if any.
    async fn find_bound_script(&self, container_id: &str) -> Result<Option<String>>;
    /// All script projects visible to the session (Drive is the directory;
    /// the Apps Script API has no listing of its own).
    async fn list_script_projects(&self) -> Result<Vec<DriveFile>>;
}

pub struct DriveHttpClient {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<dyn TokenProvider>,
}

impl DriveHttpClient {
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
        tracing::debug!(operation, %url, "drive request");
        let mut req = self.http.request(method, &url).bearer_auth(token);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send().await.map_err(|err| Error::Api {
            operation: operation.to_string(),
            message: err.to_string(),
            status: err.status().map(|s| s.as_u16()),
            timed_out: err.is_timeout(),
        })?;
        let status = resp.status();
        let text = resp.text().await.map_err(|err| Error::Api {
            operation: operation.to_string(),
            message: err.to_string(),
            status: Some(status.as_u16()),
            timed_out: err.is_timeout(),
        })?;
        if !status.is_success() {
            return Err(Error::Api {
                operation: operation.to_string(),
                message: text,
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
}

#[derive(Deserialize)]
struct FileListResponse {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[async_trait]
impl DriveService for DriveHttpClient {
    async fn get_file(&self, file_id: &str) -> Result<DriveFile> {
        let value = self
            .request(
                "driveGetFile",
                reqwest::Method::GET,
                &format!("files/{file_id}?fields=id,name,mimeType"),
                None,
            )
            .await?;
        serde_json::from_value(value).map_err(|err| Error::api("driveGetFile", err.to_string()))
    }

    async fn copy_file(&self, file_id: &str, new_name: &str) -> Result<DriveFile> {
        let value = self
            .request(
                "driveCopyFile",
                reqwest::Method::POST,
                &format!("files/{file_id}/copy?fields=id,name,mimeType"),
                Some(json!({ "name": new_name })),
            )
            .await?;
        serde_json::from_value(value).map_err(|err| Error::api("driveCopyFile", err.to_string()))
    }

    async fn trash_file(&self, file_id: &str) -> Result<()> {
        self.request(
            "driveTrashFile",
            reqwest::Method::PATCH,
            &format!("files/{file_id}"),
            Some(json!({ "trashed": true })),
        )
        .await?;
        Ok(())
    }

    async fn find_bound_script(&self, container_id: &str) -> Result<Option<String>> {
        let query = format!("'{container_id}' in parents and mimeType='{SCRIPT_MIME}'");
        let encoded: String = url_encode(&query);
        let value = self
            .request(
                "driveFindBoundScript",
                reqwest::Method::GET,
                &format!("files?q={encoded}&fields=files(id,name,mimeType)"),
                None,
            )
            .await?;
        let parsed: FileListResponse = serde_json::from_value(value)
            .map_err(|err| Error::api("driveFindBoundScript", err.to_string()))?;
        Ok(parsed.files.into_iter().next().map(|f| f.id))
    }

    async fn list_script_projects(&self) -> Result<Vec<DriveFile>> {
        let query = format!("mimeType='{SCRIPT_MIME}' and trashed=false");
        let encoded = url_encode(&query);
        let value = self
            .request(
                "listProjects",
                reqwest::Method::GET,
                &format!("files?q={encoded}&fields=files(id,name,mimeType)"),
                None,
            )
            .await?;
        let parsed: FileListResponse = serde_json::from_value(value)
            .map_err(|err| Error::api("listProjects", err.to_string()))?;
        Ok(parsed.files)
    }
}

fn url_encode(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_type_from_mime() {
        assert_eq!(
            ContainerType::from_mime("application/vnd.google-apps.spreadsheet"),
            ContainerType::Sheets
        );
        assert_eq!(
            ContainerType::from_mime("application/vnd.google-apps.presentation"),
            ContainerType::Slides
        );
        assert_eq!(
            ContainerType::from_mime("application/pdf"),
            ContainerType::Standalone
        );
        assert!(!ContainerType::Standalone.is_container_bound());
        assert!(ContainerType::Forms.is_container_bound());
    }

    #[test]
    fn query_encoding() {
        assert_eq!(url_encode("a b'c"), "a%20b%27c");
    }
}

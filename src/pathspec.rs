use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Remote file kinds as the Apps Script API names them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    #[serde(rename = "SERVER_JS")]
    ServerJs,
    #[serde(rename = "HTML")]
    Html,
    #[serde(rename = "JSON")]
    Json,
}

impl FileKind {
    /// Extension appended to the on-disk mirror name. Remote names carry no
    /// extension.
    pub fn extension(self) -> &'static str {
        match self {
            FileKind::ServerJs => ".gs",
            FileKind::Html => ".html",
            FileKind::Json => ".json",
        }
    }

    pub fn from_extension(ext: &str) -> Option<FileKind> {
        match ext {
            "gs" | "js" => Some(FileKind::ServerJs),
            "html" => Some(FileKind::Html),
            "json" => Some(FileKind::Json),
            _ => None,
        }
    }

    pub fn as_api_str(self) -> &'static str {
        match self {
            FileKind::ServerJs => "SERVER_JS",
            FileKind::Html => "HTML",
            FileKind::Json => "JSON",
        }
    }
}

fn script_id_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{25,60}$").expect("script id regex"))
}

pub fn is_script_id(s: &str) -> bool {
    script_id_re().is_match(s)
}

/// A parsed hybrid path: `<scriptId>/<path>` or `<path>` resolved against a
/// default project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPath {
    pub script_id: String,
    /// Remote file path, extension-free. May contain `/` for logical folders.
    pub file_path: String,
}

/// Parse a hybrid path. An embedded scriptId always overrides the default.
pub fn resolve(raw: &str, default_script_id: Option<&str>) -> Result<ResolvedPath> {
    let raw = raw.trim_matches('/');
    if raw.is_empty() {
        return Err(Error::validation("path must not be empty"));
    }
    let (script_id, rest) = match raw.split_once('/') {
        Some((head, rest)) if is_script_id(head) => (head.to_string(), rest),
        _ if is_script_id(raw) => {
            return Err(Error::validation(format!(
                "path {raw} names a project but no file; append /<filename>"
            )))
        }
        _ => match default_script_id {
            Some(id) if is_script_id(id) => (id.to_string(), raw),
            Some(id) => {
                return Err(Error::validation(format!(
                    "default scriptId {id} is not a valid script id"
                )))
            }
            None => {
                return Err(Error::validation(format!(
                    "path {raw} has no embedded scriptId and no current project is set"
                )))
            }
        },
    };
    let file_path = strip_known_extension(rest);
    if file_path.is_empty() {
        return Err(Error::validation("filename must not be empty"));
    }
    validate_manifest_placement(&file_path)?;
    Ok(ResolvedPath {
        script_id,
        file_path,
    })
}

/// Drop a trailing extension when it is one this system appends on disk.
/// Arbitrary dots inside names (`utils.v2`) are preserved.
pub fn strip_known_extension(name: &str) -> String {
    if let Some((stem, ext)) = name.rsplit_once('.') {
        if !stem.is_empty() && FileKind::from_extension(ext).is_some() {
            return stem.to_string();
        }
    }
    name.to_string()
}

/// On-disk name for a remote file.
pub fn local_file_name(remote_name: &str, kind: FileKind) -> String {
    format!("{remote_name}{}", kind.extension())
}

pub fn is_manifest(name: &str) -> bool {
    let base = name.rsplit('/').next().unwrap_or(name);
    let base = strip_known_extension(base);
    base.eq_ignore_ascii_case("appsscript")
}

/// The manifest must live at project root.
pub fn validate_manifest_placement(file_path: &str) -> Result<()> {
    if file_path.contains('/') && is_manifest(file_path) {
        return Err(Error::validation(format!(
            "the appsscript manifest must live at the project root, not at {file_path}"
        )));
    }
    Ok(())
}

/// Extension-agnostic filename comparison; the manifest additionally compares
/// case-insensitively.
pub fn file_name_matches(stored: &str, requested: &str) -> bool {
    let a = strip_known_extension(stored);
    let b = strip_known_extension(requested);
    if a == b {
        return true;
    }
    is_manifest(&a) && is_manifest(&b)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SID: &str = "1aBcDeFgHiJkLmNoPqRsTuVwXyZ0123456789abcd";

    #[test]
    fn embedded_script_id_overrides_default() {
        let p = resolve(&format!("{SID}/Util"), Some("not-a-real-id")).unwrap();
        assert_eq!(p.script_id, SID);
        assert_eq!(p.file_path, "Util");
    }

    #[test]
    fn default_used_when_no_embedded_id() {
        let p = resolve("lib/helpers.gs", Some(SID)).unwrap();
        assert_eq!(p.script_id, SID);
        assert_eq!(p.file_path, "lib/helpers");
    }

    #[test]
    fn missing_default_is_a_validation_error() {
        let err = resolve("Util", None).unwrap_err();
        assert_eq!(err.kind(), "validation");
    }

    #[test]
    fn manifest_must_be_at_root() {
        assert!(resolve(&format!("{SID}/sub/appsscript"), None).is_err());
        assert!(resolve(&format!("{SID}/appsscript"), None).is_ok());
    }

    #[test]
    fn extension_handling() {
        assert_eq!(strip_known_extension("Code.gs"), "Code");
        assert_eq!(strip_known_extension("index.html"), "index");
        assert_eq!(strip_known_extension("utils.v2"), "utils.v2");
        assert_eq!(local_file_name("Code", FileKind::ServerJs), "Code.gs");
    }

    #[test]
    fn name_matching_is_extension_agnostic() {
        assert!(file_name_matches("Code", "Code.gs"));
        assert!(file_name_matches("Code.js", "Code"));
        assert!(!file_name_matches("Code", "Other"));
        assert!(file_name_matches("appsscript", "AppsScript.json"));
    }
}

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::pathspec::FileKind;

const ATTR_UPDATE_TIME: &str = "user.gas.updateTime";
const ATTR_FILE_TYPE: &str = "user.gas.fileType";
const ATTR_CONTENT_HASH: &str = "user.gas.contentHash";

/// Per-file metadata attached to a mirror file as extended attributes. The
/// cache is strictly optional: every reader has a computed-from-bytes
/// fallback, and writes tolerate unsupported filesystems silently.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_update_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_kind: Option<FileKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl FileMeta {
    pub fn is_empty(&self) -> bool {
        self.remote_update_time.is_none() && self.file_kind.is_none() && self.content_hash.is_none()
    }
}

/// Read the metadata for `path`. Returns `None` when the file is absent, has
/// no attributes, or the filesystem does not support them.
pub fn get(path: &Path) -> Option<FileMeta> {
    if !path.is_file() {
        return None;
    }
    let meta = FileMeta {
        remote_update_time: read_attr(path, ATTR_UPDATE_TIME),
        file_kind: read_attr(path, ATTR_FILE_TYPE).and_then(|s| parse_kind(&s)),
        content_hash: read_attr(path, ATTR_CONTENT_HASH),
    };
    if meta.is_empty() {
        None
    } else {
        Some(meta)
    }
}

/// Best-effort write; a filesystem without xattr support is a silent no-op.
pub fn put(path: &Path, meta: &FileMeta) {
    if let Some(t) = &meta.remote_update_time {
        write_attr(path, ATTR_UPDATE_TIME, t);
    }
    if let Some(kind) = meta.file_kind {
        write_attr(path, ATTR_FILE_TYPE, kind.as_api_str());
    }
    if let Some(h) = &meta.content_hash {
        write_attr(path, ATTR_CONTENT_HASH, h);
    }
}

/// Remove the attributes only; file bytes are never touched.
pub fn clear(path: &Path) {
    for name in [ATTR_UPDATE_TIME, ATTR_FILE_TYPE, ATTR_CONTENT_HASH] {
        remove_attr(path, name);
    }
}

/// Clear metadata for every regular file under a project directory.
pub fn clear_all(project_dir: &Path) -> usize {
    let mut cleared = 0;
    for entry in walkdir::WalkDir::new(project_dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if entry.path().components().any(|c| c.as_os_str() == ".git") {
            continue;
        }
        clear(entry.path());
        cleared += 1;
    }
    cleared
}

fn parse_kind(s: &str) -> Option<FileKind> {
    match s {
        "SERVER_JS" => Some(FileKind::ServerJs),
        "HTML" => Some(FileKind::Html),
        "JSON" => Some(FileKind::Json),
        _ => None,
    }
}

#[cfg(unix)]
fn read_attr(path: &Path, name: &str) -> Option<String> {
    match xattr::get(path, name) {
        Ok(Some(bytes)) => String::from_utf8(bytes).ok().filter(|s| !s.is_empty()),
        Ok(None) => None,
        Err(err) => {
            tracing::debug!(path = %path.display(), name, %err, "xattr read failed");
            None
        }
    }
}

#[cfg(unix)]
fn write_attr(path: &Path, name: &str, value: &str) {
    if let Err(err) = xattr::set(path, name, value.as_bytes()) {
        tracing::debug!(path = %path.display(), name, %err, "xattr write skipped");
    }
}

#[cfg(unix)]
fn remove_attr(path: &Path, name: &str) {
    if let Err(err) = xattr::remove(path, name) {
        tracing::debug!(path = %path.display(), name, %err, "xattr remove skipped");
    }
}

#[cfg(not(unix))]
fn read_attr(_path: &Path, _name: &str) -> Option<String> {
    None
}

#[cfg(not(unix))]
fn write_attr(_path: &Path, _name: &str, _value: &str) {}

#[cfg(not(unix))]
fn remove_attr(_path: &Path, _name: &str) {}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;

    fn xattrs_supported(dir: &Path) -> bool {
        let probe = dir.join(".xattr-probe");
        fs::write(&probe, b"x").unwrap();
        let ok = xattr::set(&probe, "user.gas.probe", b"1").is_ok();
        let _ = fs::remove_file(&probe);
        ok
    }

    #[test]
    fn round_trip_and_clear() {
        let tmp = tempfile::tempdir().unwrap();
        if !xattrs_supported(tmp.path()) {
            return;
        }
        let file = tmp.path().join("Code.gs");
        fs::write(&file, "function f(){}").unwrap();
        assert!(get(&file).is_none());

        let meta = FileMeta {
            remote_update_time: Some("2026-01-02T03:04:05Z".into()),
            file_kind: Some(FileKind::ServerJs),
            content_hash: Some(crate::hash::git_blob_sha1(b"function f(){}")),
        };
        put(&file, &meta);
        assert_eq!(get(&file), Some(meta));

        clear(&file);
        assert!(get(&file).is_none());
        // file bytes untouched
        assert_eq!(fs::read_to_string(&file).unwrap(), "function f(){}");
    }

    #[test]
    fn absent_file_reads_none() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(get(&tmp.path().join("missing.gs")).is_none());
    }
}

use std::path::{Path, PathBuf};

use chrono::DateTime;

use crate::error::Result;
use crate::filemeta::{self, FileMeta};
use crate::hash;
use crate::pathspec::{self, FileKind};
use crate::remote::RemoteFile;

/// Seeded into every fresh project repository.
pub const GITIGNORE: &str = "# gascp local mirror\n.DS_Store\n*.swp\nnode_modules/\n";

/// Directory of a project's local mirror.
pub fn project_dir(local_root: &Path, script_id: &str) -> PathBuf {
    local_root.join(format!("project-{script_id}"))
}

/// On-disk path of one remote file, extension appended per kind.
pub fn local_path(local_root: &Path, script_id: &str, file_path: &str, kind: FileKind) -> PathBuf {
    project_dir(local_root, script_id).join(pathspec::local_file_name(file_path, kind))
}

pub fn read_file(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(s) => Ok(Some(s)),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err.into()),
    }
}

pub fn write_file(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

pub fn remove_file(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Mirror the remote `updateTime` onto the file's mtime. Informational only
/// (sync decisions are hash-based); failures are swallowed.
pub fn set_mtime_from_remote(path: &Path, update_time: &str) {
    let Ok(parsed) = DateTime::parse_from_rfc3339(update_time) else {
        return;
    };
    let system_time: std::time::SystemTime = parsed.into();
    match std::fs::File::options().write(true).open(path) {
        Ok(file) => {
            if let Err(err) = file.set_modified(system_time) {
                tracing::debug!(path = %path.display(), %err, "mtime mirror skipped");
            }
        }
        Err(err) => tracing::debug!(path = %path.display(), %err, "mtime mirror skipped"),
    }
}

/// Write one remote file into the mirror and refresh its metadata cache.
pub fn store_remote_file(local_root: &Path, script_id: &str, file: &RemoteFile) -> Result<PathBuf> {
    let path = local_path(local_root, script_id, &file.name, file.kind);
    write_file(&path, &file.source)?;
    if let Some(update_time) = &file.update_time {
        set_mtime_from_remote(&path, update_time);
    }
    filemeta::put(
        &path,
        &FileMeta {
            remote_update_time: file.update_time.clone(),
            file_kind: Some(file.kind),
            content_hash: Some(hash::git_blob_sha1_str(&file.source)),
        },
    );
    Ok(path)
}

/// Mirror an entire project; returns the project directory.
pub fn mirror_project(local_root: &Path, script_id: &str, files: &[RemoteFile]) -> Result<PathBuf> {
    let dir = project_dir(local_root, script_id);
    std::fs::create_dir_all(&dir)?;
    let gitignore = dir.join(".gitignore");
    if !gitignore.exists() {
        std::fs::write(&gitignore, GITIGNORE)?;
    }
    for file in files {
        store_remote_file(local_root, script_id, file)?;
    }
    Ok(dir)
}

/// Every mirrored file under a directory as `(relative name, bytes)`,
/// skipping git internals. Order is stable (sorted by path).
pub fn list_files(dir: &Path) -> Result<Vec<(String, Vec<u8>)>> {
    let mut out = Vec::new();
    for entry in walkdir::WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let path = entry.path();
        if path.components().any(|c| c.as_os_str() == ".git") {
            continue;
        }
        let rel = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned();
        out.push((rel, std::fs::read(path)?));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SID: &str = "1aBcDeFgHiJkLmNoPqRsTuVwXyZ0123456789abcd";

    #[test]
    fn layout_matches_kind() {
        let root = Path::new("/tmp/root");
        assert_eq!(
            local_path(root, SID, "Code", FileKind::ServerJs),
            root.join(format!("project-{SID}")).join("Code.gs")
        );
        assert_eq!(
            local_path(root, SID, "views/index", FileKind::Html),
            root.join(format!("project-{SID}")).join("views/index.html")
        );
    }

    #[test]
    fn mirror_and_list() {
        let tmp = tempfile::tempdir().unwrap();
        let files = vec![
            RemoteFile::new("appsscript", FileKind::Json, "{}"),
            RemoteFile::new("Code", FileKind::ServerJs, "function f(){}"),
        ];
        let dir = mirror_project(tmp.path(), SID, &files).unwrap();
        assert!(dir.join(".gitignore").exists());
        let listed = list_files(&dir).unwrap();
        let names: Vec<_> = listed.iter().map(|(n, _)| n.as_str()).collect();
        assert!(names.contains(&"Code.gs"));
        assert!(names.contains(&"appsscript.json"));
    }
}

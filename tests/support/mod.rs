#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use gascp::app::App;
use gascp::config::{Config, ConfigStore, ProjectEntry};
use gascp::error::{Error, Result};
use gascp::pathspec::FileKind;
use gascp::remote::{
    Deployment, DriveFile, DriveService, ProcessInfo, Project, RemoteFile, ScriptService,
    SessionAuth, Version,
};

pub fn git(args: &[&str], cwd: &Path) {
    let status = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .env("GIT_AUTHOR_NAME", "Test User")
        .env("GIT_AUTHOR_EMAIL", "test@example.com")
        .env("GIT_COMMITTER_NAME", "Test User")
        .env("GIT_COMMITTER_EMAIL", "test@example.com")
        .status()
        .unwrap();
    assert!(
        status.success(),
        "git {:?} failed in {}",
        args,
        cwd.display()
    );
}

/// Deterministic, shape-valid script ids for tests.
pub fn script_id(n: u32) -> String {
    format!("1TestProj{n:0>31}")
}

#[derive(Debug, Clone, Default)]
struct FakeProject {
    title: String,
    parent_id: Option<String>,
    files: Vec<RemoteFile>,
    versions: Vec<Version>,
    deployments: Vec<Deployment>,
}

#[derive(Default)]
struct FakeState {
    projects: HashMap<String, FakeProject>,
    counter: u64,
    update_seq: u64,
    pub fail_update_content: bool,
    pub timeout_update_content: bool,
    /// Simulate remote-side mangling of stored sources.
    pub corrupt_writes: bool,
    /// Fail deployment creation once this many have been created.
    pub fail_create_deployment_after: Option<usize>,
    created_deployments: usize,
    pub fail_delete_deployment: bool,
}

/// In-memory stand-in for the Apps Script REST service.
pub struct FakeScript {
    state: Mutex<FakeState>,
}

impl FakeScript {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(FakeState::default()),
        })
    }

    pub fn seed_project(&self, script_id: &str, title: &str, files: Vec<RemoteFile>) {
        let mut state = self.state.lock().unwrap();
        state.projects.insert(
            script_id.to_string(),
            FakeProject {
                title: title.to_string(),
                parent_id: None,
                files,
                ..FakeProject::default()
            },
        );
    }

    pub fn set_parent(&self, script_id: &str, container_id: &str) {
        let mut state = self.state.lock().unwrap();
        state
            .projects
            .get_mut(script_id)
            .expect("project seeded")
            .parent_id = Some(container_id.to_string());
    }

    pub fn files(&self, script_id: &str) -> Vec<RemoteFile> {
        let state = self.state.lock().unwrap();
        state
            .projects
            .get(script_id)
            .map(|p| p.files.clone())
            .unwrap_or_default()
    }

    pub fn file_source(&self, script_id: &str, name: &str) -> Option<String> {
        let state = self.state.lock().unwrap();
        state.projects.get(script_id).and_then(|p| {
            p.files
                .iter()
                .find(|f| gascp::pathspec::file_name_matches(&f.name, name))
                .map(|f| f.source.clone())
        })
    }

    pub fn deployments(&self, script_id: &str) -> Vec<Deployment> {
        let state = self.state.lock().unwrap();
        state
            .projects
            .get(script_id)
            .map(|p| p.deployments.clone())
            .unwrap_or_default()
    }

    pub fn add_deployment(&self, script_id: &str, description: &str) -> String {
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let id = format!("dep-{}", state.counter);
        let project = state.projects.get_mut(script_id).expect("project seeded");
        project.deployments.push(Deployment {
            deployment_id: id.clone(),
            description: description.to_string(),
            version_number: None,
            web_app_url: None,
            update_time: None,
        });
        id
    }

    pub fn set_fail_update_content(&self, on: bool) {
        self.state.lock().unwrap().fail_update_content = on;
    }

    pub fn set_timeout_update_content(&self, on: bool) {
        self.state.lock().unwrap().timeout_update_content = on;
    }

    pub fn set_corrupt_writes(&self, on: bool) {
        self.state.lock().unwrap().corrupt_writes = on;
    }

    pub fn set_fail_create_deployment_after(&self, n: Option<usize>) {
        let mut state = self.state.lock().unwrap();
        state.fail_create_deployment_after = n;
        state.created_deployments = 0;
    }

    pub fn set_fail_delete_deployment(&self, on: bool) {
        self.state.lock().unwrap().fail_delete_deployment = on;
    }

    fn stamp(state: &mut FakeState) -> String {
        state.update_seq += 1;
        format!("2026-01-01T00:00:{:02}.000Z", state.update_seq % 60)
    }
}

#[async_trait]
impl ScriptService for FakeScript {
    async fn get_project(&self, script_id: &str) -> Result<Project> {
        let state = self.state.lock().unwrap();
        let project = state
            .projects
            .get(script_id)
            .ok_or_else(|| Error::api("getProject", format!("unknown project {script_id}")))?;
        Ok(Project {
            script_id: script_id.to_string(),
            title: project.title.clone(),
            parent_id: project.parent_id.clone(),
            gcp_project_id: None,
            create_time: None,
            update_time: None,
        })
    }

    async fn create_project(&self, title: &str, parent_id: Option<&str>) -> Result<Project> {
        let mut state = self.state.lock().unwrap();
        state.counter += 1;
        let script_id = format!("1FakeProj{:0>31}", state.counter);
        state.projects.insert(
            script_id.clone(),
            FakeProject {
                title: title.to_string(),
                parent_id: parent_id.map(str::to_string),
                ..FakeProject::default()
            },
        );
        Ok(Project {
            script_id,
            title: title.to_string(),
            parent_id: parent_id.map(str::to_string),
            gcp_project_id: None,
            create_time: None,
            update_time: None,
        })
    }

    async fn get_project_content(&self, script_id: &str) -> Result<Vec<RemoteFile>> {
        let state = self.state.lock().unwrap();
        let project = state.projects.get(script_id).ok_or_else(|| {
            Error::api("getProjectContent", format!("unknown project {script_id}"))
        })?;
        Ok(project.files.clone())
    }

    async fn update_project_content(
        &self,
        script_id: &str,
        files: Vec<RemoteFile>,
    ) -> Result<Vec<RemoteFile>> {
        let mut state = self.state.lock().unwrap();
        if state.timeout_update_content {
            return Err(Error::Api {
                operation: "updateProjectContent".into(),
                message: "deadline exceeded".into(),
                status: None,
                timed_out: true,
            });
        }
        if state.fail_update_content {
            return Err(Error::Api {
                operation: "updateProjectContent".into(),
                message: "simulated remote failure".into(),
                status: Some(500),
                timed_out: false,
            });
        }
        let corrupt = state.corrupt_writes;
        let stamp = Self::stamp(&mut state);
        let project = state.projects.get_mut(script_id).ok_or_else(|| {
            Error::api("updateProjectContent", format!("unknown project {script_id}"))
        })?;
        project.files = files
            .into_iter()
            .map(|mut f| {
                if corrupt {
                    f.source.push_str("\n// drift");
                }
                f.update_time = Some(stamp.clone());
                f
            })
            .collect();
        Ok(project.files.clone())
    }

    async fn create_version(&self, script_id: &str, description: &str) -> Result<Version> {
        let mut state = self.state.lock().unwrap();
        let project = state
            .projects
            .get_mut(script_id)
            .ok_or_else(|| Error::api("createVersion", format!("unknown project {script_id}")))?;
        let version_number = project.versions.len() as u32 + 1;
        let version = Version {
            version_number,
            description: Some(description.to_string()),
            create_time: None,
        };
        project.versions.push(version.clone());
        Ok(version)
    }

    async fn list_versions(&self, script_id: &str) -> Result<Vec<Version>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .projects
            .get(script_id)
            .map(|p| p.versions.clone())
            .unwrap_or_default())
    }

    async fn get_version(&self, script_id: &str, version_number: u32) -> Result<Version> {
        let state = self.state.lock().unwrap();
        state
            .projects
            .get(script_id)
            .and_then(|p| {
                p.versions
                    .iter()
                    .find(|v| v.version_number == version_number)
                    .cloned()
            })
            .ok_or_else(|| Error::api("getVersion", format!("unknown version {version_number}")))
    }

    async fn create_deployment(
        &self,
        script_id: &str,
        description: &str,
        version_number: Option<u32>,
    ) -> Result<Deployment> {
        let mut state = self.state.lock().unwrap();
        if let Some(limit) = state.fail_create_deployment_after {
            if state.created_deployments >= limit {
                return Err(Error::api(
                    "createDeployment",
                    "simulated create failure".to_string(),
                ));
            }
        }
        state.created_deployments += 1;
        state.counter += 1;
        let id = format!("dep-{}", state.counter);
        let deployment = Deployment {
            deployment_id: id.clone(),
            description: description.to_string(),
            version_number,
            web_app_url: Some(format!("https://script.google.com/macros/s/{id}/exec")),
            update_time: None,
        };
        let project = state
            .projects
            .get_mut(script_id)
            .ok_or_else(|| Error::api("createDeployment", format!("unknown project {script_id}")))?;
        project.deployments.push(deployment.clone());
        Ok(deployment)
    }

    async fn update_deployment(
        &self,
        script_id: &str,
        deployment_id: &str,
        description: &str,
        version_number: Option<u32>,
    ) -> Result<Deployment> {
        let mut state = self.state.lock().unwrap();
        let project = state
            .projects
            .get_mut(script_id)
            .ok_or_else(|| Error::api("updateDeployment", format!("unknown project {script_id}")))?;
        let deployment = project
            .deployments
            .iter_mut()
            .find(|d| d.deployment_id == deployment_id)
            .ok_or_else(|| {
                Error::api("updateDeployment", format!("unknown deployment {deployment_id}"))
            })?;
        deployment.description = description.to_string();
        deployment.version_number = version_number;
        Ok(deployment.clone())
    }

    async fn delete_deployment(&self, script_id: &str, deployment_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        if state.fail_delete_deployment {
            return Err(Error::api(
                "deleteDeployment",
                format!("simulated delete failure for {deployment_id}"),
            ));
        }
        let project = state
            .projects
            .get_mut(script_id)
            .ok_or_else(|| Error::api("deleteDeployment", format!("unknown project {script_id}")))?;
        project
            .deployments
            .retain(|d| d.deployment_id != deployment_id);
        Ok(())
    }

    async fn list_deployments(&self, script_id: &str) -> Result<Vec<Deployment>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .projects
            .get(script_id)
            .map(|p| p.deployments.clone())
            .unwrap_or_default())
    }

    async fn get_deployment(&self, script_id: &str, deployment_id: &str) -> Result<Deployment> {
        let state = self.state.lock().unwrap();
        state
            .projects
            .get(script_id)
            .and_then(|p| {
                p.deployments
                    .iter()
                    .find(|d| d.deployment_id == deployment_id)
                    .cloned()
            })
            .ok_or_else(|| {
                Error::api("getDeployment", format!("unknown deployment {deployment_id}"))
            })
    }

    async fn list_processes(&self, _script_id: &str) -> Result<Vec<ProcessInfo>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct DriveState {
    files: HashMap<String, DriveFile>,
    bound_scripts: HashMap<String, String>,
    trashed: Vec<String>,
    counter: u64,
    /// When copying a container, skip creating its bound script.
    pub copy_without_script: bool,
}

/// In-memory stand-in for the Drive REST service.
pub struct FakeDrive {
    state: Mutex<DriveState>,
}

impl FakeDrive {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(DriveState::default()),
        })
    }

    pub fn seed_container(&self, container_id: &str, mime_type: &str, bound_script: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        state.files.insert(
            container_id.to_string(),
            DriveFile {
                id: container_id.to_string(),
                name: format!("container {container_id}"),
                mime_type: mime_type.to_string(),
            },
        );
        if let Some(script) = bound_script {
            state
                .bound_scripts
                .insert(container_id.to_string(), script.to_string());
        }
    }

    pub fn trashed(&self) -> Vec<String> {
        self.state.lock().unwrap().trashed.clone()
    }

    pub fn set_copy_without_script(&self, on: bool) {
        self.state.lock().unwrap().copy_without_script = on;
    }
}

#[async_trait]
impl DriveService for FakeDrive {
    async fn get_file(&self, file_id: &str) -> Result<DriveFile> {
        let state = self.state.lock().unwrap();
        state
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| Error::api("driveGetFile", format!("unknown file {file_id}")))
    }

    async fn copy_file(&self, file_id: &str, new_name: &str) -> Result<DriveFile> {
        let mut state = self.state.lock().unwrap();
        let original = state
            .files
            .get(file_id)
            .cloned()
            .ok_or_else(|| Error::api("driveCopyFile", format!("unknown file {file_id}")))?;
        state.counter += 1;
        let copy = DriveFile {
            id: format!("container-copy-{}", state.counter),
            name: new_name.to_string(),
            mime_type: original.mime_type,
        };
        state.files.insert(copy.id.clone(), copy.clone());
        if !state.copy_without_script {
            let script = format!("1CopyProj{:0>31}", state.counter);
            state.bound_scripts.insert(copy.id.clone(), script);
        }
        Ok(copy)
    }

    async fn trash_file(&self, file_id: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.trashed.push(file_id.to_string());
        state.files.remove(file_id);
        Ok(())
    }

    async fn find_bound_script(&self, container_id: &str) -> Result<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.bound_scripts.get(container_id).cloned())
    }

    async fn list_script_projects(&self) -> Result<Vec<DriveFile>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .files
            .values()
            .filter(|f| f.mime_type == "application/vnd.google-apps.script")
            .cloned()
            .collect())
    }
}

/// Tempdir-backed fixture wiring the fakes into an [`App`].
pub struct Fixture {
    pub tmp: TempDir,
    pub config: Arc<ConfigStore>,
    pub script: Arc<FakeScript>,
    pub drive: Arc<FakeDrive>,
    pub local_root: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let local_root = tmp.path().join("local");
        std::fs::create_dir_all(&local_root).unwrap();
        let config = Arc::new(ConfigStore::at(tmp.path().join("config/gas-config.json")));
        let mut cfg = Config::default();
        cfg.local_root.root_path = Some(local_root.display().to_string());
        config.save(&mut cfg).unwrap();
        Self {
            tmp,
            config,
            script: FakeScript::new(),
            drive: FakeDrive::new(),
            local_root,
        }
    }

    pub fn app(&self) -> App {
        App::with_services(
            self.config.clone(),
            Arc::new(SessionAuth::with_token("test-token")),
            self.script.clone(),
            self.drive.clone(),
        )
    }

    pub fn register_project(&self, name: &str, script_id: &str) {
        let mut cfg = self.config.load().unwrap();
        cfg.register_project(
            name,
            ProjectEntry {
                script_id: script_id.to_string(),
                last_sync: None,
                description: None,
                environments: None,
            },
        )
        .unwrap();
        if cfg.current_project.is_none() {
            cfg.current_project = Some(name.to_string());
        }
        self.config.save(&mut cfg).unwrap();
    }

    pub fn project_dir(&self, script_id: &str) -> PathBuf {
        gascp::mirror::project_dir(&self.local_root, script_id)
    }

    /// Materialize the mirror for a seeded remote project and turn it into a
    /// git repository with an initial commit.
    pub fn mirror_with_git(&self, script_id: &str) -> PathBuf {
        let files = self.script.files(script_id);
        let dir = gascp::mirror::mirror_project(&self.local_root, script_id, &files).unwrap();
        git(&["init", "-b", "main"], &dir);
        git(&["config", "user.email", "test@example.com"], &dir);
        git(&["config", "user.name", "Test User"], &dir);
        git(&["config", "commit.gpgSign", "false"], &dir);
        git(&["add", "-A"], &dir);
        git(&["commit", "-m", "initial"], &dir);
        dir
    }
}

pub fn remote_file(name: &str, kind: FileKind, source: &str) -> RemoteFile {
    RemoteFile::new(name, kind, source)
}

#[path = "support/mod.rs"]
mod support;

use std::fs;
use std::path::Path;

use gascp::config::WorktreeState;
use gascp::error::Error;
use gascp::hash::git_blob_sha1;
use gascp::pathspec::FileKind;
use gascp::worktree::{branch_re, WorktreeAddRequest};
use support::{remote_file, script_id, Fixture};

fn add_request(parent: &str) -> WorktreeAddRequest {
    WorktreeAddRequest {
        parent_script_id: parent.to_string(),
        name: Some("Fix Login".into()),
        unique_suffix: false,
        claim_by: None,
    }
}

fn seed_parent(fix: &Fixture, n: u32) -> String {
    let sid = script_id(n);
    fix.script.seed_project(
        &sid,
        "parent",
        vec![
            remote_file("appsscript", FileKind::Json, "{}"),
            remote_file("Code", FileKind::ServerJs, "function main() {}\n"),
        ],
    );
    fix.register_project("parent", &sid);
    sid
}

#[tokio::test]
async fn add_standalone_creates_project_worktree_and_registry_entry() {
    let fix = Fixture::new();
    let parent = seed_parent(&fix, 20);

    let app = fix.app();
    let entry = app
        .worktrees()
        .unwrap()
        .add(add_request(&parent))
        .await
        .unwrap();

    // A distinct remote project on a well-formed branch.
    assert_ne!(entry.script_id, parent);
    assert!(branch_re().is_match(&entry.branch));
    assert_eq!(entry.parent_script_id, parent);
    assert!(matches!(entry.state, WorktreeState::Ready));

    // The git worktree exists on that branch.
    let worktree = Path::new(&entry.local_path);
    assert!(worktree.join("Code.gs").exists());
    let head = std::process::Command::new("git")
        .args(["symbolic-ref", "--short", "HEAD"])
        .current_dir(worktree)
        .output()
        .unwrap();
    assert_eq!(String::from_utf8_lossy(&head.stdout).trim(), entry.branch);

    // Baseline hashes match a recompute from the worktree directory.
    assert!(!entry.base_hashes.is_empty());
    for (name, expected) in &entry.base_hashes {
        let kind_ext = if name == "appsscript" { ".json" } else { ".gs" };
        let bytes = fs::read(worktree.join(format!("{name}{kind_ext}"))).unwrap();
        assert_eq!(&git_blob_sha1(&bytes), expected);
    }

    // The new remote project received the branch's files.
    assert_eq!(
        fix.script.file_source(&entry.script_id, "Code").unwrap(),
        "function main() {}\n"
    );

    // Registry entry persisted.
    let cfg = fix.config.load().unwrap();
    assert!(cfg.worktrees.contains_key(&entry.script_id));
}

#[tokio::test]
async fn add_failure_cleans_up_everything_it_created() {
    let fix = Fixture::new();
    let parent = seed_parent(&fix, 21);

    let app = fix.app();
    let manager = app.worktrees().unwrap();

    // First add seeds the parent repo, then the content push fails.
    fix.script.set_fail_update_content(true);
    let err = manager.add(add_request(&parent)).await.unwrap_err();
    assert!(matches!(err, Error::Api { .. }));
    fix.script.set_fail_update_content(false);

    // The fresh remote project was trashed and nothing was registered.
    assert!(!fix.drive.trashed().is_empty());
    let cfg = fix.config.load().unwrap();
    assert!(cfg.worktrees.is_empty());
    // The half-made git worktree is gone again.
    assert!(!fix.local_root.join("worktrees/fix-login").exists());

    // A retry on the same name succeeds.
    manager.add(add_request(&parent)).await.unwrap();
}

#[tokio::test]
async fn container_bound_parent_copies_the_container() {
    let fix = Fixture::new();
    let parent = seed_parent(&fix, 22);
    fix.drive
        .seed_container("sheet-1", "application/vnd.google-apps.spreadsheet", Some(&parent));
    fix.script.set_parent(&parent, "sheet-1");

    let app = fix.app();
    let entry = app
        .worktrees()
        .unwrap()
        .add(add_request(&parent))
        .await
        .unwrap();
    assert!(entry.container_id.is_some());
    assert_eq!(entry.parent_container_id.as_deref(), Some("sheet-1"));
    // The bound script of the copied container backs the worktree.
    assert!(entry.script_id.starts_with("1CopyProj"));
}

#[tokio::test]
async fn container_copy_without_bound_script_fails_and_trashes_the_copy() {
    let fix = Fixture::new();
    let parent = seed_parent(&fix, 23);
    fix.drive
        .seed_container("sheet-2", "application/vnd.google-apps.spreadsheet", Some(&parent));
    fix.script.set_parent(&parent, "sheet-2");
    fix.drive.set_copy_without_script(true);

    let app = fix.app();
    let err = app
        .worktrees()
        .unwrap()
        .add(add_request(&parent))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("CONTAINER_COPY_FAILED"));
    assert!(fix
        .drive
        .trashed()
        .iter()
        .any(|id| id.starts_with("container-copy-")));
}

#[tokio::test]
async fn claim_release_state_machine() {
    let fix = Fixture::new();
    let parent = seed_parent(&fix, 24);
    let app = fix.app();
    let manager = app.worktrees().unwrap();
    let entry = manager.add(add_request(&parent)).await.unwrap();

    let claimed = manager.claim(&entry.script_id, "agent-a").await.unwrap();
    assert!(matches!(claimed.state, WorktreeState::Claimed));
    assert_eq!(claimed.claimed_by.as_deref(), Some("agent-a"));

    // A second claimant is rejected while the claim is fresh.
    let err = manager.claim(&entry.script_id, "agent-b").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));

    // Only the claimer may release, unless forced.
    let err = manager
        .release(&entry.script_id, "agent-b", false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    let released = manager
        .release(&entry.script_id, "agent-a", false)
        .await
        .unwrap();
    assert!(matches!(released.state, WorktreeState::Ready));
    assert!(released.claimed_by.is_none());

    // Claimable again once released.
    manager.claim(&entry.script_id, "agent-b").await.unwrap();
}

#[tokio::test]
async fn remove_tears_down_and_unregisters() {
    let fix = Fixture::new();
    let parent = seed_parent(&fix, 25);
    let app = fix.app();
    let manager = app.worktrees().unwrap();
    let entry = manager.add(add_request(&parent)).await.unwrap();
    let worktree = entry.local_path.clone();
    assert!(Path::new(&worktree).exists());

    let warnings = manager.remove(&entry.script_id).await.unwrap();
    assert!(warnings.is_empty());
    assert!(!Path::new(&worktree).exists());
    assert!(fix.drive.trashed().contains(&entry.script_id));
    let cfg = fix.config.load().unwrap();
    assert!(!cfg.worktrees.contains_key(&entry.script_id));
}

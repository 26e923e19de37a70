#[path = "support/mod.rs"]
mod support;

use gascp::modwrap::{self, ModuleOptions};
use gascp::pathspec::FileKind;
use support::{remote_file, script_id, Fixture};

#[tokio::test]
async fn cat_unwraps_and_reports_the_stored_hash() {
    let fix = Fixture::new();
    let sid = script_id(40);
    let options = ModuleOptions {
        load_now: Some(false),
        hoisted_functions: None,
        events: None,
    };
    let stored = modwrap::wrap("function hello() { return 1; }", "Code", &options);
    fix.script
        .seed_project(&sid, "demo", vec![remote_file("Code", FileKind::ServerJs, &stored)]);
    fix.register_project("demo", &sid);

    let app = fix.app();
    let result = app.cat("Code", false).await.unwrap();
    assert_eq!(result.content, "function hello() { return 1; }");
    assert!(result.wrapped);
    assert_eq!(result.hash, gascp::hash::git_blob_sha1_str(&stored));
    assert_eq!(result.module_options.unwrap().load_now, Some(false));
    assert_eq!(result.source, "remote");

    // The remote read refreshed the mirror; a local read now matches.
    let local = app.cat("Code", true).await.unwrap();
    assert_eq!(local.source, "local");
    assert_eq!(local.content, result.content);
    assert_eq!(local.hash, result.hash);
}

#[tokio::test]
async fn cache_clear_then_local_cat_equals_remote_cat() {
    let fix = Fixture::new();
    let sid = script_id(41);
    fix.script.seed_project(
        &sid,
        "demo",
        vec![remote_file("Page", FileKind::Html, "<h1>hi</h1>\n")],
    );
    fix.register_project("demo", &sid);

    let app = fix.app();
    // Populate the mirror, then drop its metadata cache.
    app.cat("Page.html", false).await.unwrap();
    app.cache_clear(&sid).await.unwrap();

    let local = app.cat("Page.html", true).await.unwrap();
    let remote = app.cat("Page.html", false).await.unwrap();
    assert_eq!(local.content, remote.content);
    assert_eq!(local.hash, remote.hash);
}

#[tokio::test]
async fn file_status_tracks_sync_state() {
    let fix = Fixture::new();
    let sid = script_id(42);
    fix.script.seed_project(
        &sid,
        "demo",
        vec![remote_file("Page", FileKind::Html, "same\n")],
    );
    fix.register_project("demo", &sid);

    let app = fix.app();
    // No local copy yet.
    let status = app.file_status("Page.html").await.unwrap();
    assert!(!status.in_sync);
    assert!(status.local_hash.is_none());

    app.cat("Page.html", false).await.unwrap();
    let status = app.file_status("Page.html").await.unwrap();
    assert!(status.in_sync);
    assert_eq!(status.local_hash, status.remote_hash);

    std::fs::write(fix.project_dir(&sid).join("Page.html"), "edited\n").unwrap();
    let status = app.file_status("Page.html").await.unwrap();
    assert!(!status.in_sync);
}

#[path = "support/mod.rs"]
mod support;

use gascp::deploy::EnvSlot;
use gascp::error::Error;
use support::{remote_file, script_id, Fixture};

use gascp::pathspec::FileKind;

fn seeded(fix: &Fixture, n: u32) -> String {
    let sid = script_id(n);
    fix.script.seed_project(
        &sid,
        "demo",
        vec![remote_file("appsscript", FileKind::Json, "{}")],
    );
    fix.register_project("demo", &sid);
    sid
}

#[tokio::test]
async fn reset_replaces_an_old_deployment_with_the_three_slots() {
    let fix = Fixture::new();
    let sid = seeded(&fix, 10);
    let old_id = fix.script.add_deployment(&sid, "[DEV] legacy");

    let app = fix.app();
    let outcome = app.deployments().reset(&sid).await.unwrap();
    assert_eq!(outcome.status, "success");
    assert!(outcome.warnings.is_empty());

    let deployments = fix.script.deployments(&sid);
    assert_eq!(deployments.len(), 3);
    for slot in EnvSlot::ALL {
        assert!(
            deployments
                .iter()
                .any(|d| d.description.starts_with(slot.marker())),
            "missing slot {slot:?}"
        );
    }
    assert!(deployments.iter().all(|d| d.deployment_id != old_id));

    // Environment pointers were recorded in the catalog.
    let cfg = fix.config.load().unwrap();
    let entry = cfg.project_by_script_id(&sid).unwrap().1;
    let envs = entry.environments.as_ref().unwrap();
    assert!(envs.dev.is_some() && envs.staging.is_some() && envs.prod.is_some());
}

#[tokio::test]
async fn reset_reports_partial_when_old_deployments_resist_deletion() {
    let fix = Fixture::new();
    let sid = seeded(&fix, 11);
    let old_id = fix.script.add_deployment(&sid, "[DEV] legacy");
    fix.script.set_fail_delete_deployment(true);

    let app = fix.app();
    let outcome = app.deployments().reset(&sid).await.unwrap();
    assert_eq!(outcome.status, "partial");
    assert!(outcome.warnings.iter().any(|w| w.contains(&old_id)));
    // Old deployment still present alongside the three new ones.
    assert_eq!(fix.script.deployments(&sid).len(), 4);
}

#[tokio::test]
async fn reset_rolls_back_created_deployments_when_a_create_fails() {
    let fix = Fixture::new();
    let sid = seeded(&fix, 12);
    fix.script.add_deployment(&sid, "[DEV] legacy");
    fix.script.set_fail_create_deployment_after(Some(2));

    let app = fix.app();
    let err = app.deployments().reset(&sid).await.unwrap_err();
    assert!(matches!(err, Error::Api { .. }));

    // The two fresh deployments were deleted again; the project was never
    // left without its old deployment.
    let deployments = fix.script.deployments(&sid);
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].description, "[DEV] legacy");
}

#[tokio::test]
async fn promote_and_rollback_walk_the_prod_history() {
    let fix = Fixture::new();
    let sid = seeded(&fix, 13);
    let app = fix.app();
    app.deployments().reset(&sid).await.unwrap();

    // First release: dev → staging snapshots a version, staging → prod
    // moves the pointer.
    let p1 = app
        .deployments()
        .promote(&sid, EnvSlot::Staging, Some("first release"))
        .await
        .unwrap();
    assert_eq!(p1.version_number, 1);
    let p1 = app
        .deployments()
        .promote(&sid, EnvSlot::Prod, None)
        .await
        .unwrap();
    assert_eq!(p1.version_number, 1);

    // Second release.
    app.deployments()
        .promote(&sid, EnvSlot::Staging, Some("second release"))
        .await
        .unwrap();
    let p2 = app
        .deployments()
        .promote(&sid, EnvSlot::Prod, None)
        .await
        .unwrap();
    assert_eq!(p2.version_number, 2);

    let status = app.deployments().status(&sid).await.unwrap();
    let prod = status
        .slots
        .iter()
        .find(|s| s.environment == EnvSlot::Prod)
        .and_then(|s| s.deployment.as_ref())
        .unwrap();
    assert_eq!(prod.version_number, Some(2));

    // Rollback chooses the version immediately preceding current prod.
    let rollback = app.deployments().rollback(&sid, None).await.unwrap();
    assert_eq!(rollback.from_version, Some(2));
    assert_eq!(rollback.to_version, 1);

    // A second rollback has nowhere left to go.
    let err = app.deployments().rollback(&sid, None).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn staging_promotion_requires_a_description() {
    let fix = Fixture::new();
    let sid = seeded(&fix, 14);
    let app = fix.app();
    app.deployments().reset(&sid).await.unwrap();

    let err = app
        .deployments()
        .promote(&sid, EnvSlot::Staging, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    let err = app
        .deployments()
        .promote(&sid, EnvSlot::Staging, Some("   "))
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn repeated_reset_converges_to_exactly_three_slots() {
    let fix = Fixture::new();
    let sid = seeded(&fix, 15);
    let app = fix.app();
    app.deployments().reset(&sid).await.unwrap();
    app.deployments().reset(&sid).await.unwrap();

    let deployments = fix.script.deployments(&sid);
    assert_eq!(deployments.len(), 3);
    for slot in EnvSlot::ALL {
        assert_eq!(
            deployments
                .iter()
                .filter(|d| d.description.starts_with(slot.marker()))
                .count(),
            1
        );
    }
}

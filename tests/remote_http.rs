use std::sync::Arc;

use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use gascp::error::Error;
use gascp::remote::{ScriptHttpClient, ScriptService, SessionAuth};

fn client(server: &MockServer) -> ScriptHttpClient {
    ScriptHttpClient::with_base_url(server.uri(), Arc::new(SessionAuth::with_token("tok")))
}

#[tokio::test]
async fn content_parses_into_remote_files() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/abc/content"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "scriptId": "abc",
            "files": [
                { "name": "appsscript", "type": "JSON", "source": "{}" },
                { "name": "Code", "type": "SERVER_JS", "source": "var x;", "updateTime": "2026-01-01T00:00:00Z" }
            ]
        })))
        .mount(&server)
        .await;

    let files = client(&server).get_project_content("abc").await.unwrap();
    assert_eq!(files.len(), 2);
    assert_eq!(files[1].name, "Code");
    assert_eq!(files[1].update_time.as_deref(), Some("2026-01-01T00:00:00Z"));
}

#[tokio::test]
async fn upstream_error_message_is_extracted() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/abc/content"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({
            "error": { "code": 403, "message": "The caller does not have permission" }
        })))
        .mount(&server)
        .await;

    let err = client(&server).get_project_content("abc").await.unwrap_err();
    let Error::Api {
        operation,
        message,
        status,
        ..
    } = err
    else {
        panic!("expected api error");
    };
    assert_eq!(operation, "getProjectContent");
    assert_eq!(status, Some(403));
    assert_eq!(message, "The caller does not have permission");
}

#[tokio::test]
async fn deployment_wire_shape_flattens_web_app_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/projects/abc/deployments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "deployments": [{
                "deploymentId": "dep-1",
                "deploymentConfig": {
                    "scriptId": "abc",
                    "description": "[DEV]",
                    "versionNumber": 4
                },
                "updateTime": "2026-02-01T00:00:00Z",
                "entryPoints": [
                    { "entryPointType": "EXECUTION_API" },
                    { "entryPointType": "WEB_APP", "webApp": { "url": "https://example.test/exec" } }
                ]
            }]
        })))
        .mount(&server)
        .await;

    let deployments = client(&server).list_deployments("abc").await.unwrap();
    assert_eq!(deployments.len(), 1);
    let d = &deployments[0];
    assert_eq!(d.deployment_id, "dep-1");
    assert_eq!(d.description, "[DEV]");
    assert_eq!(d.version_number, Some(4));
    assert_eq!(d.web_app_url.as_deref(), Some("https://example.test/exec"));
}

#[tokio::test]
async fn missing_token_fails_before_any_request() {
    let server = MockServer::start().await;
    let auth = Arc::new(SessionAuth::with_token(""));
    // An empty token is treated as absent.
    let client = ScriptHttpClient::with_base_url(server.uri(), auth);
    let err = client.get_project_content("abc").await.unwrap_err();
    assert!(matches!(err, Error::Authentication));
    assert!(server.received_requests().await.unwrap().is_empty());
}

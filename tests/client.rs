use std::io::Write;
use std::time::Duration;

use httpmock::MockServer;
use renderiq::{
    ClientConfig, Credential, CredentialStore, Error, ImageSource, RateLimit, RenderRequest,
    RenderStatus, RenderiqClient,
};
use serde_json::json;
use url::Url;

fn client_with(server: &MockServer, credentials: CredentialStore) -> RenderiqClient {
    let config = ClientConfig {
        base_url: Url::parse(&server.base_url()).expect("base url"),
        platform: "sketchup".to_string(),
        plugin_version: Some("1.4.0".to_string()),
        ..ClientConfig::default()
    };
    RenderiqClient::new(config, credentials).expect("client")
}

fn api_key_client(server: &MockServer) -> RenderiqClient {
    client_with(server, CredentialStore::new(Credential::ApiKey("key".to_string())))
}

#[tokio::test]
async fn identity_headers_are_sent() {
    let server = MockServer::start();
    let credits = server.mock(|when, then| {
        when.method("GET")
            .path("/api/plugins/credits")
            .header("x-renderiq-platform", "sketchup")
            .header("x-renderiq-plugin-version", "1.4.0")
            .header("x-api-key", "key")
            .header_missing("authorization");
        then.status(200).json_body(json!({
            "success": true,
            "data": { "balance": 120, "totalEarned": 200, "totalSpent": 80 }
        }));
    });

    let balance = api_key_client(&server).credits().await.expect("credits");

    assert_eq!(balance.balance, 120);
    assert_eq!(balance.total_spent, Some(80));
    credits.assert();
}

#[tokio::test]
async fn sign_in_swaps_credential_for_next_call() {
    let server = MockServer::start();
    let signin = server.mock(|when, then| {
        when.method("POST")
            .path("/api/plugins/auth/signin")
            .json_body(json!({ "email": "a@example.com", "password": "pw" }));
        then.status(200).json_body(json!({
            "success": true,
            "access_token": "fresh-token",
            "refresh_token": "refresh-1",
            "expires_at": 1767225600,
            "user": { "id": "u1", "email": "a@example.com" }
        }));
    });
    let me = server.mock(|when, then| {
        when.method("GET")
            .path("/api/plugins/auth/me")
            .header("authorization", "Bearer fresh-token")
            .header_missing("x-api-key");
        then.status(200).json_body(json!({
            "success": true,
            "user": { "id": "u1", "email": "a@example.com", "name": "Ada" }
        }));
    });

    let client = api_key_client(&server);
    let tokens = client.sign_in("a@example.com", "pw").await.expect("sign in");
    assert_eq!(tokens.refresh_token.as_deref(), Some("refresh-1"));
    assert_eq!(
        client.credentials().current(),
        Credential::AccessToken("fresh-token".to_string())
    );

    let user = client.user_info().await.expect("user");
    assert_eq!(user.name.as_deref(), Some("Ada"));
    signin.assert();
    me.assert();
}

#[tokio::test]
async fn rejected_sign_in_is_an_authentication_failure() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("POST").path("/api/plugins/auth/signin");
        then.status(200)
            .json_body(json!({ "success": false, "error": "Invalid credentials" }));
    });

    let client = api_key_client(&server);
    let err = client.sign_in("a@example.com", "wrong").await.unwrap_err();

    assert!(matches!(err, Error::Authentication(ref m) if m == "Invalid credentials"));
    assert_eq!(client.credentials().current(), Credential::ApiKey("key".to_string()));
}

#[tokio::test]
async fn refresh_replaces_bearer_token() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("POST")
            .path("/api/plugins/auth/refresh")
            .header("authorization", "Bearer stale")
            .json_body(json!({ "refresh_token": "r1" }));
        then.status(200).json_body(json!({
            "success": true,
            "access_token": "renewed",
            "refresh_token": "r2"
        }));
    });
    let credits = server.mock(|when, then| {
        when.method("GET")
            .path("/api/plugins/credits")
            .header("authorization", "Bearer renewed");
        then.status(200).json_body(json!({ "success": true, "data": { "balance": 1 } }));
    });

    let client = client_with(
        &server,
        CredentialStore::new(Credential::AccessToken("stale".to_string())),
    );
    client.refresh_token("r1").await.expect("refresh");
    client.credits().await.expect("credits");
    credits.assert();
}

#[tokio::test]
async fn unauthorized_status_maps_to_authentication() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/api/plugins/auth/me");
        then.status(401)
            .json_body(json!({ "success": false, "error": "Authentication required", "errorCode": "AUTH_REQUIRED" }));
    });

    let err = api_key_client(&server).user_info().await.unwrap_err();
    assert!(matches!(err, Error::Authentication(ref m) if m == "Authentication required"));
}

#[tokio::test]
async fn rate_limit_is_reported() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/api/plugins/projects");
        then.status(429)
            .header("retry-after", "42")
            .header("x-ratelimit-remaining", "0")
            .header("x-ratelimit-reset", "1767225600")
            .json_body(json!({ "success": false, "error": "Too many requests", "errorCode": "RATE_LIMITED" }));
    });

    let client = api_key_client(&server);
    let err = client.list_projects(50, 0, None).await.unwrap_err();

    assert!(err.is_rate_limited());
    assert_eq!(err.code(), Some("RATE_LIMITED"));
    assert!(matches!(err, Error::Service { retry_after: Some(42), .. }));
    assert_eq!(
        client.rate_limit(),
        Some(RateLimit {
            remaining: 0,
            reset: Some(1767225600)
        })
    );
}

#[tokio::test]
async fn list_projects_sends_pagination() {
    let server = MockServer::start();
    let list = server.mock(|when, then| {
        when.method("GET")
            .path("/api/plugins/projects")
            .query_param("limit", "10")
            .query_param("offset", "20")
            .query_param("platform", "revit");
        then.status(200)
            .header("x-ratelimit-remaining", "99")
            .json_body(json!({
                "success": true,
                "data": {
                    "projects": [
                        { "id": "p1", "name": "Tower", "slug": "tower", "renderCount": 3, "platform": "revit" }
                    ],
                    "total": 21,
                    "limit": 10,
                    "offset": 20
                }
            }));
    });

    let client = api_key_client(&server);
    let page = client
        .list_projects(10, 20, Some("revit"))
        .await
        .expect("projects");

    assert_eq!(page.total, 21);
    assert_eq!(page.projects[0].name, "Tower");
    assert_eq!(page.projects[0].render_count, Some(3));
    assert_eq!(client.rate_limit().map(|r| r.remaining), Some(99));
    list.assert();
}

#[tokio::test]
async fn project_and_create_project() {
    let server = MockServer::start();
    let get = server.mock(|when, then| {
        when.method("GET").path("/api/plugins/projects/p9");
        then.status(200).json_body(json!({
            "success": true,
            "data": { "id": "p9", "name": "Atrium" }
        }));
    });
    let create = server.mock(|when, then| {
        when.method("POST")
            .path("/api/plugins/projects")
            .header_exists("content-type")
            .body_includes("name=\"name\"")
            .body_includes("Lobby")
            .body_includes("name=\"description\"");
        then.status(200).json_body(json!({
            "success": true,
            "data": { "id": "p10", "name": "Lobby", "description": "ground floor" }
        }));
    });

    let client = api_key_client(&server);
    assert_eq!(client.project("p9").await.expect("project").name, "Atrium");

    let created = client
        .create_project("Lobby", Some("ground floor"), None)
        .await
        .expect("create");
    assert_eq!(created.id, "p10");
    get.assert();
    create.assert();
}

#[tokio::test]
async fn create_project_requires_name() {
    let server = MockServer::start();
    let err = api_key_client(&server)
        .create_project("", None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn url_wins_when_bytes_are_also_given() {
    let server = MockServer::start();
    let render = server.mock(|when, then| {
        when.method("POST")
            .path("/api/plugins/renders")
            .header("content-type", "application/json")
            .json_body(json!({
                "quality": "high",
                "aspectRatio": "4:3",
                "style": "photorealistic",
                "type": "image",
                "imageUrl": "https://cdn.example/in.png"
            }));
        then.status(200).json_body(json!({
            "success": true,
            "data": { "renderId": "r-url", "status": "pending" }
        }));
    });
    let init = server.mock(|when, then| {
        when.method("POST").path("/api/plugins/uploads/resumable/init");
        then.status(500);
    });

    let mut request = RenderRequest::from_bytes(vec![1, 2, 3]).aspect_ratio("4:3");
    request.image_url = Some("https://cdn.example/in.png".to_string());
    let created = api_key_client(&server)
        .create_render(&request)
        .await
        .expect("render");

    assert_eq!(created.render_id, "r-url");
    render.assert();
    init.assert_calls(0);
}

#[tokio::test]
async fn bytes_are_sent_as_multipart() {
    let server = MockServer::start();
    let render = server.mock(|when, then| {
        when.method("POST")
            .path("/api/plugins/renders")
            .body_includes("name=\"uploadedImageData\"; filename=\"image.png\"")
            .body_includes("name=\"uploadedImageType\"")
            .body_includes("image/png")
            .body_includes("name=\"prompt\"")
            .body_includes("warm interior");
        then.status(200).json_body(json!({
            "success": true,
            "data": { "renderId": "r-mp", "status": "processing", "progress": 0.0 }
        }));
    });

    let request = RenderRequest::from_bytes(b"fake png bytes".to_vec()).prompt("warm interior");
    let created = api_key_client(&server)
        .create_render(&request)
        .await
        .expect("render");

    assert_eq!(created.status, RenderStatus::Processing);
    render.assert();
}

#[tokio::test]
async fn missing_image_fails_before_any_request() {
    let server = MockServer::start();
    let any = server.mock(|when, then| {
        when.any_request();
        then.status(200);
    });

    let err = api_key_client(&server)
        .create_render(&RenderRequest::default())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    any.assert_calls(0);
}

#[tokio::test(flavor = "multi_thread")]
async fn wait_for_render_polls_until_terminal() {
    let server = MockServer::start_async().await;
    // Defined first, so it answers every poll until deleted.
    let mut processing = server
        .mock_async(|when, then| {
            when.method("GET").path("/api/plugins/renders/r-1");
            then.status(200).json_body(json!({
                "success": true,
                "data": { "renderId": "r-1", "status": "processing", "progress": 40.0 }
            }));
        })
        .await;
    let done = server
        .mock_async(|when, then| {
            when.method("GET").path("/api/plugins/renders/r-1");
            then.status(200).json_body(json!({
                "success": true,
                "data": {
                    "renderId": "r-1",
                    "status": "completed",
                    "outputUrl": "https://cdn.example/out.png",
                    "progress": 100.0
                }
            }));
        })
        .await;

    let client = api_key_client(&server);
    let waiting = tokio::spawn(async move {
        client
            .wait_for_render("r-1", Duration::from_millis(10))
            .await
    });

    while processing.calls_async().await < 2 {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(!waiting.is_finished());
    processing.delete_async().await;

    let render = waiting.await.expect("join").expect("render");

    assert_eq!(render.status, RenderStatus::Completed);
    assert_eq!(render.output_url.as_deref(), Some("https://cdn.example/out.png"));
    done.assert_calls_async(1).await;
}

#[tokio::test]
async fn empty_bytes_are_not_an_image() {
    let server = MockServer::start();
    let any = server.mock(|when, then| {
        when.any_request();
        then.status(200);
    });

    let err = api_key_client(&server)
        .create_render(&RenderRequest::from_bytes(Vec::new()))
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Validation(_)));
    any.assert_calls(0);
}

#[tokio::test]
async fn empty_bytes_fall_through_to_file() {
    let mut image = tempfile::Builder::new()
        .suffix(".jpg")
        .tempfile()
        .expect("temp image");
    image.write_all(b"jpeg bytes").expect("write image");
    let file_name = image
        .path()
        .file_name()
        .and_then(|n| n.to_str())
        .expect("file name")
        .to_string();

    let mut request = RenderRequest::from_file(image.path());
    request.image_data = Some(Vec::new().into());
    assert!(matches!(request.image_source(), Ok(ImageSource::File(_))));

    let server = MockServer::start();
    let render = server.mock(|when, then| {
        when.method("POST")
            .path("/api/plugins/renders")
            .body_includes(format!("filename=\"{file_name}\""))
            .body_includes("jpeg bytes")
            .body_includes("image/jpeg");
        then.status(200).json_body(json!({
            "success": true,
            "data": { "renderId": "r-file", "status": "pending" }
        }));
    });

    let created = api_key_client(&server)
        .create_render(&request)
        .await
        .expect("render");

    assert_eq!(created.render_id, "r-file");
    render.assert();
}

#[tokio::test]
async fn register_webhook_posts_events() {
    let server = MockServer::start();
    let register = server.mock(|when, then| {
        when.method("POST")
            .path("/api/plugins/webhooks/register")
            .json_body(json!({
                "url": "https://hooks.example/renderiq",
                "events": ["render.completed", "render.failed"]
            }));
        then.status(200).json_body(json!({
            "success": true,
            "data": { "id": "wh-1", "secret": "generated" }
        }));
    });

    let client = api_key_client(&server);
    let hook = client
        .register_webhook(
            "https://hooks.example/renderiq",
            vec![
                renderiq::webhook::RENDER_COMPLETED.to_string(),
                renderiq::webhook::RENDER_FAILED.to_string(),
            ],
            None,
        )
        .await
        .expect("webhook");

    assert_eq!(hook.id, "wh-1");
    assert_eq!(hook.secret.as_deref(), Some("generated"));

    let payload = r#"{"event":"render.completed"}"#;
    let signature = renderiq::webhook::sign_payload(payload, "generated");
    assert!(client.verify_webhook_signature(payload, &signature, "generated"));
    register.assert();
}

#[tokio::test]
async fn server_error_carries_details() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method("GET").path("/api/plugins/renders/missing");
        then.status(404).json_body(json!({
            "success": false,
            "error": "Render not found",
            "errorCode": "NOT_FOUND",
            "details": { "renderId": "missing" }
        }));
    });

    let err = api_key_client(&server)
        .render_status("missing")
        .await
        .unwrap_err();

    match err {
        Error::Service {
            status,
            message,
            code,
            details,
            retry_after,
        } => {
            assert_eq!(status.as_u16(), 404);
            assert_eq!(message, "Render not found");
            assert_eq!(code.as_deref(), Some("NOT_FOUND"));
            assert_eq!(details.expect("details")["renderId"], "missing");
            assert_eq!(retry_after, None);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn connection_failure_is_a_transport_error() {
    let config = ClientConfig {
        base_url: Url::parse("http://127.0.0.1:9").expect("url"),
        ..ClientConfig::default()
    };
    let client = RenderiqClient::new(
        config,
        CredentialStore::new(Credential::ApiKey("key".to_string())),
    )
    .expect("client");

    let err = client.credits().await.unwrap_err();
    assert!(matches!(err, Error::Transport(_)), "{err:?}");
}

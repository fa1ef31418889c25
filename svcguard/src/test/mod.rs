use std::sync::Arc;

use axum::{Router, http::StatusCode, middleware::from_fn_with_state, routing::post};
use axum_test::TestServer;
use base64::{Engine as _, engine::general_purpose};
use chrono::{Duration, Utc};
use serde_json::{Value, json};
use uuid::Uuid;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

use crate::{
    acl::{ApiKeyIdentity, ApiKeyResolver, AclError, PermissionMatrix},
    middleware::{
        Authorizer, MethodRequirement, PermissionResolver, SessionGate, authorization_middleware,
        captcha::{CaptchaVerifier, RecaptchaVerifier},
        session_middleware,
    },
    session::SessionGuard,
    test_utils::{bearer, create_test_acl_config, create_test_app, create_test_authorizer, create_test_config, issue_test_token},
    token::{Claims, SecretClass},
};

fn config_permissions(config: &crate::Config) -> Arc<dyn PermissionResolver> {
    Arc::new(config.permissions())
}

/// Mandatory method: the caller must hold permission 10 in service 5
#[test_log::test(tokio::test)]
async fn test_mandatory_permission_scenario() {
    let config = create_test_config();
    let server = create_test_app(create_test_authorizer(&config, config_permissions(&config)));

    let (_, token) = issue_test_token(&config, PermissionMatrix::from([(5, vec![20])]));
    let response = server.post("/blog.Posts/Create").add_header("authorization", bearer(&token)).await;
    response.assert_status_forbidden();
    assert_eq!(response.text(), "you don't have permission to access method");

    let (user_id, token) = issue_test_token(&config, PermissionMatrix::from([(5, vec![10])]));
    let response = server.post("/blog.Posts/Create").add_header("authorization", bearer(&token)).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["user_id"], json!(user_id));
    assert_eq!(body["can_moderate"], json!(false));
}

#[test_log::test(tokio::test)]
async fn test_credential_errors_are_distinct() {
    let config = create_test_config();
    let server = create_test_app(create_test_authorizer(&config, config_permissions(&config)));

    let response = server.post("/blog.Posts/Create").await;
    response.assert_status_unauthorized();
    assert_eq!(response.text(), "authorization header not found in request");

    let response = server.post("/blog.Posts/Create").add_header("authorization", "Token abc").await;
    response.assert_status_unauthorized();
    assert_eq!(response.text(), "missing prefix Bearer in your token");

    let response = server.post("/blog.Posts/Create").add_header("authorization", "Bearer not-a-jwt").await;
    response.assert_status_unauthorized();
    assert_eq!(response.text(), "jwt token is invalid");

    let mut claims = Claims::new(Uuid::new_v4(), Uuid::new_v4(), PermissionMatrix::from([(5, vec![10])]), vec![]);
    claims.exp = Utc::now().timestamp() - 60;
    let expired = config.token_engine().sign(SecretClass::Public, &claims).unwrap();
    let response = server.post("/blog.Posts/Create").add_header("authorization", bearer(&expired)).await;
    response.assert_status_unauthorized();
    assert_eq!(response.text(), "jwt token expired");

    let mut other = create_test_config();
    other.secrets.public_secret_key = "somebody-elses-secret".to_string();
    let (_, forged) = issue_test_token(&other, PermissionMatrix::from([(5, vec![10])]));
    let response = server.post("/blog.Posts/Create").add_header("authorization", bearer(&forged)).await;
    response.assert_status_unauthorized();
    assert_eq!(response.text(), "jwt token signature is invalid");
}

#[tokio::test]
async fn test_public_and_optional_methods() {
    let config = create_test_config();
    let server = create_test_app(create_test_authorizer(&config, config_permissions(&config)));

    server.post("/blog.Posts/List").await.assert_status_ok();

    let response = server.post("/blog.Posts/Feed").await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["user_id"], Value::Null);

    let (user_id, token) = issue_test_token(&config, PermissionMatrix::new());
    let response = server.post("/blog.Posts/Feed").add_header("authorization", bearer(&token)).await;
    response.assert_status_ok();
    assert_eq!(response.json::<Value>()["user_id"], json!(user_id));
}

#[tokio::test]
async fn test_grpc_requests_get_grpc_status() {
    let config = create_test_config();
    let server = create_test_app(create_test_authorizer(&config, config_permissions(&config)));

    let response = server
        .post("/blog.Posts/Create")
        .add_header("content-type", "application/grpc")
        .await;

    response.assert_status_ok();
    assert_eq!(response.header("grpc-status"), "16");
    assert_eq!(response.header("grpc-message"), "authorization header not found in request");
}

/// A delegation token minted by one service is accepted by the next one
#[test_log::test(tokio::test)]
async fn test_delegation_across_services() {
    let config = create_test_config();
    let server = create_test_app(create_test_authorizer(&config, config_permissions(&config)));
    let media_service = Uuid::new_v4();

    let (user_id, token) = issue_test_token(&config, PermissionMatrix::from([(5, vec![10]), (8, vec![1])]));
    let response = server
        .post("/blog.Posts/Forward")
        .add_header("authorization", bearer(&token))
        .add_header("x-target", media_service.to_string())
        .await;
    response.assert_status_ok();

    let outbound: Value = response.json();
    assert_eq!(outbound["s_id"], json!([media_service.simple().to_string()]));
    let delegated = outbound["authorization"][0].as_str().unwrap().to_string();
    assert_ne!(delegated, bearer(&token));

    // The media service has code 8 and the same private secret
    let mut media_config = create_test_config();
    media_config.service.code = 8;
    let media_permissions = media_config
        .permissions()
        .with_method("media.Files.Upload", MethodRequirement { permissions: vec![1], ..Default::default() });
    let media = create_test_authorizer(&media_config, Arc::new(media_permissions));

    let mut headers = axum::http::HeaderMap::new();
    headers.insert("authorization", delegated.parse().unwrap());
    let context = media.authorize("media.Files.Upload", &headers).await.unwrap();

    let token_acl = context.token_acl().unwrap();
    assert!(token_acl.is_private());
    assert_eq!(token_acl.controller().user_id(), user_id);
    assert_eq!(token_acl.extra_data()["origin"], json!("blog"));
}

#[tokio::test]
async fn test_captcha_gates_before_identity() {
    let captcha = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/siteverify"))
        .and(wiremock::matchers::query_param("response", "good"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true})))
        .mount(&captcha)
        .await;
    Mock::given(method("POST"))
        .and(path("/siteverify"))
        .and(wiremock::matchers::query_param("response", "bad"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": false, "error-codes": ["timeout-or-duplicate"]})))
        .mount(&captcha)
        .await;

    let config = create_test_config();
    let permissions = config.permissions().with_method(
        "blog.Posts.Create",
        MethodRequirement {
            permissions: vec![10],
            captcha: true,
            ..Default::default()
        },
    );
    let verifier = RecaptchaVerifier::new("captcha-secret", format!("{}/siteverify", captcha.uri()), std::time::Duration::from_secs(5)).unwrap();
    let authorizer = Authorizer::builder()
        .service_code(config.service.code)
        .acl(create_test_acl_config(&config))
        .permissions(Arc::new(permissions) as Arc<dyn PermissionResolver>)
        .captcha(Arc::new(verifier) as Arc<dyn CaptchaVerifier>)
        .build();
    let server = create_test_app(Arc::new(authorizer));

    // Captcha failures win even without credentials
    let response = server.post("/blog.Posts/Create").add_header("x-captcha-key", "bad").await;
    response.assert_status_forbidden();
    assert_eq!(response.text(), "your challenge is unsuccessful, try again to complete captcha challenge");

    let response = server.post("/blog.Posts/Create").await;
    response.assert_status(StatusCode::BAD_REQUEST);

    let (_, token) = issue_test_token(&config, PermissionMatrix::from([(5, vec![10])]));
    server
        .post("/blog.Posts/Create")
        .add_header("x-captcha-key", "good")
        .add_header("authorization", bearer(&token))
        .await
        .assert_status_ok();
}

struct StaticKeys;

#[async_trait::async_trait]
impl ApiKeyResolver for StaticKeys {
    async fn resolve(&self, api_key: &str) -> Result<ApiKeyIdentity, AclError> {
        match api_key {
            "sk-writer" => Ok(ApiKeyIdentity {
                user_id: Uuid::nil(),
                permissions: PermissionMatrix::from([(5, vec![10])]),
                roles: vec!["bot".to_string()],
            }),
            _ => Err(AclError::ApiKeyRejected),
        }
    }
}

#[tokio::test]
async fn test_api_key_fallback() {
    let config = create_test_config();
    let acl = config
        .acl_config(None, Some(Arc::new(StaticKeys) as Arc<dyn ApiKeyResolver>))
        .unwrap();
    let authorizer = Authorizer::builder()
        .service_code(config.service.code)
        .acl(Arc::new(acl))
        .permissions(config_permissions(&config))
        .build();
    let server = create_test_app(Arc::new(authorizer));

    server.post("/blog.Posts/Create").add_header("key", "sk-writer").await.assert_status_ok();

    let response = server.post("/blog.Posts/Create").add_header("key", "sk-unknown").await;
    response.assert_status_unauthorized();
    assert_eq!(response.text(), "api key is invalid");
}

#[tokio::test]
async fn test_session_gate() {
    let config = create_test_config();
    let guard = SessionGuard::new(&general_purpose::STANDARD.encode([5u8; 32]), "session_token").unwrap();
    let gate = Arc::new(SessionGate::new(guard.clone(), config_permissions(&config)));

    let app = Router::new()
        .route("/blog.Posts/List", post(|| async { "ok" }))
        .route("/blog.Posts/Create", post(|| async { "ok" }))
        .layer(from_fn_with_state(gate, session_middleware));
    let server = TestServer::new(app).unwrap();

    server.post("/blog.Posts/List").await.assert_status_ok();

    let response = server.post("/blog.Posts/Create").await;
    response.assert_status_unauthorized();
    assert_eq!(response.text(), "session_token cookie not found in request");

    let fresh = guard.seal(Utc::now() + Duration::minutes(10)).unwrap();
    server
        .post("/blog.Posts/Create")
        .add_header("cookie", format!("session_token={fresh}"))
        .await
        .assert_status_ok();

    let stale = guard.seal(Utc::now() - Duration::minutes(10)).unwrap();
    let response = server.post("/blog.Posts/Create").add_header("session_token", stale).await;
    response.assert_status_unauthorized();
    assert_eq!(response.text(), "token has been expired");
}

#[tokio::test]
async fn test_authorization_layer_rejects_unknown_methods() {
    let config = create_test_config();
    let app = Router::new()
        .route("/blog.Posts/Delete", post(|| async { "deleted" }))
        .layer(from_fn_with_state(
            create_test_authorizer(&config, config_permissions(&config)),
            authorization_middleware,
        ));
    let server = TestServer::new(app).unwrap();

    let response = server.post("/blog.Posts/Delete").await;
    response.assert_status(StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.text(), "Internal server error");
}

//! Test utilities for integration testing (available with `test-utils` feature).

use axum::{
    Json, Router,
    http::HeaderMap,
    middleware::from_fn_with_state,
    routing::post,
};
use axum_test::TestServer;
use serde_json::{Value, json};
use std::{collections::HashMap, sync::Arc};
use uuid::Uuid;

use crate::{
    acl::{AclConfig, PermissionMatrix},
    config::{Config, SecretsConfig, ServiceConfig},
    errors::Error,
    middleware::{Acl, Authorizer, MethodRequirement, PermissionResolver, authorization_middleware},
    token::Claims,
    types::{ServiceCode, UserId},
};

pub const TEST_SERVICE_CODE: ServiceCode = 5;

pub fn create_test_config() -> Config {
    Config {
        service: ServiceConfig {
            code: TEST_SERVICE_CODE,
            name: "test".to_string(),
        },
        secrets: SecretsConfig {
            public_secret_key: "test-public-secret-for-testing-only".to_string(),
            private_secret_key: "test-private-secret-for-testing-only".to_string(),
        },
        methods: HashMap::from([
            ("blog.Posts.List".to_string(), requirement(vec![0], false)),
            ("blog.Posts.Create".to_string(), requirement(vec![10], false)),
            ("blog.Posts.Feed".to_string(), requirement(vec![10], true)),
            ("blog.Posts.Forward".to_string(), requirement(vec![10], false)),
        ]),
        ..Default::default()
    }
}

pub fn requirement(permissions: Vec<i32>, optional: bool) -> MethodRequirement {
    MethodRequirement {
        permissions,
        optional,
        ..Default::default()
    }
}

pub fn create_test_acl_config(config: &Config) -> Arc<AclConfig> {
    Arc::new(config.acl_config(None, None).expect("test config has secrets"))
}

/// Mint a public access token for a fresh user holding `permissions`.
pub fn issue_test_token(config: &Config, permissions: PermissionMatrix) -> (UserId, String) {
    let user_id = Uuid::new_v4();
    let mut claims = Claims::new(user_id, Uuid::new_v4(), permissions, vec!["author".to_string()]);
    let token = config.token_engine().create_access_token(&mut claims).expect("signing succeeds");
    (user_id, token)
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {token}")
}

pub fn create_test_authorizer(config: &Config, permissions: Arc<dyn PermissionResolver>) -> Arc<Authorizer> {
    Arc::new(
        Authorizer::builder()
            .service_code(config.service.code)
            .acl(create_test_acl_config(config))
            .permissions(permissions)
            .build(),
    )
}

/// Router with a handful of `blog.Posts` methods behind the authorization middleware.
pub fn create_test_app(authorizer: Arc<Authorizer>) -> TestServer {
    let app = Router::new()
        .route("/blog.Posts/List", post(list_posts))
        .route("/blog.Posts/Create", post(create_post))
        .route("/blog.Posts/Feed", post(feed))
        .route("/blog.Posts/Forward", post(forward))
        .layer(from_fn_with_state(authorizer, authorization_middleware));

    TestServer::new(app).expect("Failed to create test server")
}

async fn list_posts() -> Json<Value> {
    Json(json!({ "posts": [] }))
}

async fn create_post(acl: Acl) -> Json<Value> {
    let controller = acl.controller();
    Json(json!({
        "user_id": controller.user_id(),
        "validated": controller.is_validated(),
        "can_moderate": controller.has_access(20),
    }))
}

async fn feed(acl: Option<Acl>) -> Json<Value> {
    match acl {
        Some(acl) => Json(json!({ "user_id": acl.controller().user_id() })),
        None => Json(json!({ "user_id": null })),
    }
}

/// Echo the metadata a downstream call to the service in `x-target` would carry.
async fn forward(mut acl: Acl, headers: HeaderMap) -> Result<Json<Value>, Error> {
    let target = headers
        .get("x-target")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| Uuid::parse_str(v).ok())
        .ok_or_else(|| Error::InvalidArgument {
            message: "x-target must be a service id".to_string(),
        })?;

    let outbound = acl
        .controller_mut()
        .outgoing_headers(&headers, target, HashMap::from([("origin".to_string(), json!("blog"))]))?;

    let rendered: HashMap<String, Vec<String>> = outbound
        .keys()
        .map(|name| {
            let values = outbound
                .get_all(name)
                .iter()
                .filter_map(|v| v.to_str().ok().map(str::to_string))
                .collect();
            (name.to_string(), values)
        })
        .collect();
    Ok(Json(json!(rendered)))
}

//! End-to-end account lifecycle scenarios over the in-memory store.

use std::sync::Arc;

use axum::Router;
use axum::http::{Method, StatusCode, header};
use clinica::account::{
    AccountService, OauthAssertion, Profile, Provider, Role,
};
use clinica::config::{Argon2, Bootstrap, Configuration, Reset};
use clinica::crypto::Crypto;
use clinica::database::Database;
use clinica::token::TokenManager;
use clinica::{AppState, MailManager, app};
use http_body_util::BodyExt;
use serde_json::{Value, json};
use tower::util::ServiceExt;

fn state() -> AppState {
    let db = Database::in_memory();
    let crypto = Arc::new(
        Crypto::new(
            Some(Argon2 {
                memory_cost: 1024,
                iterations: 1,
                parallelism: 1,
                hash_length: 32,
            }),
            30,
        )
        .expect("argon2 parameters are valid"),
    );
    let mail = MailManager::default();
    let service = AccountService::new(
        Arc::clone(&db.accounts),
        db.audit.clone(),
        Arc::clone(&crypto),
        mail.clone(),
        Reset {
            token_ttl_minutes: 30,
            reveal_token: true,
            frontend_url: Some("https://clinic.test".into()),
        },
    );

    AppState {
        config: Arc::new(Configuration::default()),
        db,
        crypto,
        token: TokenManager::new("clinica.test", "lifecycle-test-secret", None)
            .expect("secret is not a placeholder"),
        mail,
        service,
    }
}

async fn seeded_state() -> AppState {
    let state = state();
    state
        .service
        .ensure_system_admin(&Bootstrap {
            name: "Root".into(),
            email: "root@clinic.test".into(),
            password: "rootpw".into(),
        })
        .await
        .expect("bootstrap succeeds on an empty store");
    state
}

async fn request(
    app: Router,
    token: Option<&str>,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    let mut builder = axum::extract::Request::builder()
        .method(method)
        .uri(path)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = token {
        builder =
            builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }

    app.oneshot(builder.body(axum::body::Body::from(body)).unwrap())
        .await
        .unwrap()
}

async fn json_body(
    response: axum::http::Response<axum::body::Body>,
) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn admin_token(state: &AppState) -> String {
    let account = state
        .service
        .authenticate("root@clinic.test", "rootpw", None)
        .await
        .unwrap();
    state.token.create(&account.id).unwrap()
}

#[tokio::test]
async fn provisioned_clinic_admin_logs_in_and_must_rotate() {
    let state = seeded_state().await;
    let token = admin_token(&state).await;
    let app = app(state);

    let response = request(
        app.clone(),
        Some(&token),
        Method::POST,
        "/accounts",
        json!({
            "name": "Clinic A",
            "email": "a@x.com",
            "password": "secret1",
            "role": "clinic_admin",
        })
        .to_string(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = request(
        app,
        None,
        Method::POST,
        "/login",
        json!({ "identifier": "a@x.com", "password": "secret1" }).to_string(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert!(body["token"].as_str().is_some());
    assert_eq!(body["user"]["mustChangePassword"], json!(true));
    assert_eq!(body["user"]["role"], json!("clinic_admin"));
    // credential material never leaves the server.
    assert!(body["user"].get("passwordHash").is_none());
}

#[tokio::test]
async fn password_change_requires_the_full_triple() {
    let state = seeded_state().await;
    let admin = admin_token(&state).await;
    let app = app(state.clone());

    request(
        app.clone(),
        Some(&admin),
        Method::POST,
        "/accounts",
        json!({
            "name": "Clinic A",
            "email": "a@x.com",
            "password": "secret1",
            "role": "clinic_admin",
        })
        .to_string(),
    )
    .await;
    let login = request(
        app.clone(),
        None,
        Method::POST,
        "/login",
        json!({ "identifier": "a@x.com", "password": "secret1" }).to_string(),
    )
    .await;
    let login = json_body(login).await;
    let token = login["token"].as_str().unwrap().to_owned();

    // only the new password, no old or confirmation.
    let response = request(
        app.clone(),
        Some(&token),
        Method::PATCH,
        "/accounts/@me",
        json!({ "newPassword": "rotated1" }).to_string(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // the full triple succeeds and clears the rotation flag.
    let response = request(
        app,
        Some(&token),
        Method::PATCH,
        "/accounts/@me",
        json!({
            "oldPassword": "secret1",
            "newPassword": "rotated1",
            "confirmPassword": "rotated1",
        })
        .to_string(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["mustChangePassword"], json!(false));
}

#[tokio::test]
async fn unknown_reset_address_creates_nothing() {
    let state = seeded_state().await;
    let admin = admin_token(&state).await;
    let app = app(state.clone());

    let response = request(
        app.clone(),
        None,
        Method::POST,
        "/password/forgot",
        json!({ "email": "unknown@x.com" }).to_string(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert!(body.get("token").is_none());

    // no reset entry appears on the audit trail either.
    let response = request(
        app,
        Some(&admin),
        Method::GET,
        "/audit-logs?action=password_reset_requested",
        String::default(),
    )
    .await;
    let entries = json_body(response).await;
    assert_eq!(entries.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn oauth_login_merges_into_the_existing_email_account() {
    let state = seeded_state().await;
    let admin = admin_token(&state).await;
    let app = app(state.clone());

    let response = request(
        app.clone(),
        Some(&admin),
        Method::POST,
        "/accounts",
        json!({
            "name": "Existing",
            "email": "b@x.com",
            "password": "secret1",
            "role": "dentist",
        })
        .to_string(),
    )
    .await;
    let existing = json_body(response).await;

    let merged = state
        .service
        .oauth_login(OauthAssertion {
            provider: Provider::Google,
            subject: "g-123".into(),
            email: "b@x.com".into(),
            name: "External Name".into(),
            avatar: None,
        })
        .await
        .unwrap();
    assert_eq!(merged.id, existing["id"].as_str().unwrap());
    assert_eq!(merged.role, Role::Dentist);

    // no second account exists for that person.
    let response = request(
        app,
        Some(&admin),
        Method::GET,
        "/accounts",
        String::default(),
    )
    .await;
    let listed: Vec<Profile> =
        serde_json::from_value(json_body(response).await).unwrap();
    assert_eq!(
        listed
            .iter()
            .filter(|profile| profile.email == "b@x.com")
            .count(),
        1
    );
}

#[tokio::test]
async fn reissue_restores_a_deleted_account_with_a_fresh_password() {
    let state = seeded_state().await;
    let admin = admin_token(&state).await;
    let app = app(state.clone());

    let response = request(
        app.clone(),
        Some(&admin),
        Method::POST,
        "/accounts",
        json!({
            "name": "Clinic A",
            "email": "a@x.com",
            "password": "secret1",
            "role": "clinic_admin",
        })
        .to_string(),
    )
    .await;
    let profile = json_body(response).await;
    let id = profile["id"].as_str().unwrap().to_owned();

    let response = request(
        app.clone(),
        Some(&admin),
        Method::DELETE,
        &format!("/accounts/{id}"),
        String::default(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    // deleted accounts refuse password logins.
    let response = request(
        app.clone(),
        None,
        Method::POST,
        "/login",
        json!({ "identifier": "a@x.com", "password": "secret1" }).to_string(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = request(
        app.clone(),
        Some(&admin),
        Method::POST,
        &format!("/accounts/{id}/reissue"),
        String::default(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["user"]["isActive"], json!(true));
    assert_eq!(body["user"]["mustChangePassword"], json!(true));
    let temp_password = body["tempPassword"].as_str().unwrap().to_owned();

    // the old password is gone, the reissued one works.
    let response = request(
        app.clone(),
        None,
        Method::POST,
        "/login",
        json!({ "identifier": "a@x.com", "password": "secret1" }).to_string(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = request(
        app,
        None,
        Method::POST,
        "/login",
        json!({ "identifier": "a@x.com", "password": temp_password })
            .to_string(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn hard_delete_cascades_the_audit_trail() {
    let state = seeded_state().await;
    let admin = admin_token(&state).await;
    let app = app(state.clone());

    let response = request(
        app.clone(),
        Some(&admin),
        Method::POST,
        "/accounts",
        json!({
            "name": "Short Lived",
            "email": "gone@x.com",
            "password": "secret1",
            "role": "staff",
        })
        .to_string(),
    )
    .await;
    let profile = json_body(response).await;
    let id = profile["id"].as_str().unwrap().to_owned();

    request(
        app.clone(),
        Some(&admin),
        Method::DELETE,
        &format!("/accounts/{id}"),
        String::default(),
    )
    .await;
    let response = request(
        app.clone(),
        Some(&admin),
        Method::DELETE,
        &format!("/accounts/{id}/purge"),
        String::default(),
    )
    .await;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = request(
        app,
        Some(&admin),
        Method::GET,
        &format!("/audit-logs?targetUserId={id}"),
        String::default(),
    )
    .await;
    let entries = json_body(response).await;
    assert_eq!(entries.as_array().unwrap().len(), 0);
}

//! Authenticate with an email or login id.

use axum::Json;
use axum::extract::State;
use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use validator::Validate;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::AppState;
use crate::account::Profile;
use crate::error::Result;
use crate::router::Valid;

pub const TOKEN_TYPE: &str = "Bearer";

const FORWARDED_FOR: &str = "x-forwarded-for";

#[derive(Debug, Validate, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct Body {
    /// Email address or login id.
    #[validate(length(min = 1, message = "Identifier must not be empty."))]
    pub identifier: String,
    #[validate(length(
        min = 6,
        message = "Password must contain at least 6 characters."
    ))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub token_type: String,
    pub token: String,
    pub expires_in: u64,
    pub user: Profile,
}

pub async fn handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Valid(body): Valid<Body>,
) -> Result<Json<Response>> {
    let ip = headers
        .get(FORWARDED_FOR)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let account = state
        .service
        .authenticate(&body.identifier, &body.password, ip)
        .await?;
    let token = state.token.create(&account.id)?;

    Ok(Json(Response {
        token_type: TOKEN_TYPE.to_owned(),
        token,
        expires_in: state.token.lifetime_secs(),
        user: account.profile(),
    }))
}

#[cfg(test)]
pub(super) mod tests {
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;
    use crate::account::Role;
    use crate::config::Bootstrap;
    use crate::{app, make_request, router};

    #[tokio::test]
    async fn login_returns_token_and_profile() {
        let state = router::state();
        state
            .service
            .ensure_system_admin(&Bootstrap {
                name: "Root".into(),
                email: "root@clinic.test".into(),
                password: "rootpw".into(),
            })
            .await
            .unwrap();
        let app = app(state.clone());

        let response = make_request(
            None,
            app,
            Method::POST,
            "/login",
            json!({ "identifier": "root@clinic.test", "password": "rootpw" })
                .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let body: Response = serde_json::from_slice(&body).unwrap();
        assert_eq!(body.token_type, TOKEN_TYPE);
        assert_eq!(body.user.role, Role::SystemAdmin);

        let claims = state.token.decode(&body.token).unwrap();
        assert_eq!(claims.sub, body.user.id);
    }

    #[tokio::test]
    async fn bad_password_is_unauthorized() {
        let state = router::state();
        state
            .service
            .ensure_system_admin(&Bootstrap {
                name: "Root".into(),
                email: "root@clinic.test".into(),
                password: "rootpw".into(),
            })
            .await
            .unwrap();
        let app = app(state);

        let response = make_request(
            None,
            app,
            Method::POST,
            "/login",
            json!({ "identifier": "root@clinic.test", "password": "wrongpw" })
                .to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

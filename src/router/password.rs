//! Password-reset request and completion.

use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};
use validator::Validate;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::AppState;
use crate::account::ResetOutcome;
use crate::error::Result;
use crate::router::Valid;

const ACCEPTED_MESSAGE: &str =
    "If the address exists, a reset mail has been sent.";

#[derive(Debug, Validate, Serialize, Deserialize)]
pub struct ForgotBody {
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
}

/// Response is success-shaped for every input; `token` is only filled by
/// the permissive deployment policy when mail delivery fails.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForgotResponse {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

pub async fn forgot(
    State(state): State<AppState>,
    Valid(body): Valid<ForgotBody>,
) -> Result<Json<ForgotResponse>> {
    let outcome = state.service.request_password_reset(&body.email).await?;

    Ok(Json(ForgotResponse {
        message: ACCEPTED_MESSAGE.to_owned(),
        token: match outcome {
            ResetOutcome::Revealed { token } => Some(token),
            ResetOutcome::Accepted | ResetOutcome::Sent => None,
        },
    }))
}

#[derive(Debug, Validate, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct ResetBody {
    #[validate(length(
        min = 6,
        message = "Password must contain at least 6 characters."
    ))]
    pub password: String,
}

pub async fn reset(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Valid(body): Valid<ResetBody>,
) -> Result<Json<crate::account::Profile>> {
    let profile = state
        .service
        .consume_reset_token(&token, &body.password)
        .await?;

    Ok(Json(profile))
}

#[cfg(test)]
pub(super) mod tests {
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;
    use crate::config::Bootstrap;
    use crate::{app, make_request, router};

    #[tokio::test]
    async fn forgot_never_reveals_existence() {
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

        let known = make_request(
            None,
            app.clone(),
            Method::POST,
            "/password/forgot",
            json!({ "email": "root@clinic.test" }).to_string(),
        )
        .await;
        let unknown = make_request(
            None,
            app,
            Method::POST,
            "/password/forgot",
            json!({ "email": "nobody@clinic.test" }).to_string(),
        )
        .await;

        assert_eq!(known.status(), StatusCode::OK);
        assert_eq!(unknown.status(), StatusCode::OK);

        let known = known.into_body().collect().await.unwrap().to_bytes();
        let known: ForgotResponse = serde_json::from_slice(&known).unwrap();
        let unknown = unknown.into_body().collect().await.unwrap().to_bytes();
        let unknown: ForgotResponse = serde_json::from_slice(&unknown).unwrap();
        assert_eq!(known.message, unknown.message);
    }

    #[tokio::test]
    async fn reset_with_bogus_token_fails() {
        let state = router::state();
        let app = app(state);

        let response = make_request(
            None,
            app,
            Method::POST,
            "/password/reset/deadbeef",
            json!({ "password": "freshpw1" }).to_string(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}

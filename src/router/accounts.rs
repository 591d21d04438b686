//! Account provisioning, directory and lifecycle administration.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError, ValidationErrors};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::AppState;
use crate::account::{
    Account, Profile, ProfileUpdate, Provision, Role,
};
use crate::error::Result;
use crate::router::Valid;

#[derive(Debug, Validate, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionBody {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Name must be 1 to 100 characters long."
    ))]
    pub name: String,
    #[validate(email(message = "Email must be formatted."))]
    pub email: String,
    #[validate(length(
        min = 1,
        max = 100,
        message = "Login id must be 1 to 100 characters long."
    ))]
    pub login_id: Option<String>,
    #[validate(length(
        min = 6,
        message = "Password must contain at least 6 characters."
    ))]
    pub password: String,
    pub role: Role,
    pub phone: Option<String>,
    pub address: Option<String>,
}

pub async fn provision(
    State(state): State<AppState>,
    Extension(actor): Extension<Account>,
    Valid(body): Valid<ProvisionBody>,
) -> Result<(StatusCode, Json<Profile>)> {
    let profile = state
        .service
        .provision(
            &actor,
            Provision {
                name: body.name,
                email: body.email,
                login_id: body.login_id,
                password: body.password,
                role: body.role,
                phone: body.phone,
                address: body.address,
            },
        )
        .await?;

    Ok((StatusCode::CREATED, Json(profile)))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Narrows the listing; never widens who may list.
    pub role: Option<Role>,
}

pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Account>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Profile>>> {
    Ok(Json(state.service.list(&actor, query.role).await?))
}

pub async fn get_me(
    Extension(actor): Extension<Account>,
) -> Json<Profile> {
    Json(actor.profile())
}

#[derive(Debug, Validate, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct UpdateBody {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Name must be 1 to 100 characters long."
    ))]
    pub name: Option<String>,
    #[validate(email(message = "Email must be formatted."))]
    pub email: Option<String>,
    #[validate(length(
        min = 1,
        max = 100,
        message = "Login id must be 1 to 100 characters long."
    ))]
    pub login_id: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub avatar: Option<String>,
    #[zeroize(skip)]
    pub role: Option<Role>,
    pub old_password: Option<String>,
    #[validate(length(
        min = 6,
        message = "Password must contain at least 6 characters."
    ))]
    pub new_password: Option<String>,
    pub confirm_password: Option<String>,
}

pub async fn update_me(
    State(state): State<AppState>,
    Extension(actor): Extension<Account>,
    Valid(body): Valid<UpdateBody>,
) -> Result<Json<Profile>> {
    // A password change takes the full triple; the old password is only
    // waived for accounts that have none to check.
    if body.new_password.is_some() {
        let mut errors = ValidationErrors::new();
        if body.confirm_password.is_none() {
            errors.add(
                "confirmPassword",
                ValidationError::new("confirm")
                    .with_message("Missing 'confirmPassword' field.".into()),
            );
        } else if body.confirm_password != body.new_password {
            errors.add(
                "confirmPassword",
                ValidationError::new("confirm").with_message(
                    "Password confirmation does not match.".into(),
                ),
            );
        }
        if body.old_password.is_none()
            && actor.credentials.password_hash().is_some()
        {
            errors.add(
                "oldPassword",
                ValidationError::new("old")
                    .with_message("Missing 'oldPassword' field.".into()),
            );
        }
        if !errors.is_empty() {
            return Err(errors.into());
        }
    }

    let profile = state
        .service
        .update_profile(
            &actor,
            ProfileUpdate {
                name: body.name.clone(),
                email: body.email.clone(),
                login_id: body.login_id.clone(),
                phone: body.phone.clone(),
                address: body.address.clone(),
                avatar: body.avatar.clone(),
                role: body.role,
                old_password: body.old_password.clone(),
                new_password: body.new_password.clone(),
            },
        )
        .await?;

    Ok(Json(profile))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusBody {
    pub active: bool,
}

pub async fn set_status(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Extension(actor): Extension<Account>,
    Json(body): Json<StatusBody>,
) -> Result<Json<Profile>> {
    let profile = state
        .service
        .set_status(&actor, &account_id, body.active)
        .await?;

    Ok(Json(profile))
}

pub async fn soft_delete(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Extension(actor): Extension<Account>,
) -> Result<Json<Profile>> {
    Ok(Json(state.service.soft_delete(&actor, &account_id).await?))
}

pub async fn purge(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Extension(actor): Extension<Account>,
) -> Result<StatusCode> {
    state.service.hard_delete(&actor, &account_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// One-time temporary password, returned exactly once and never stored
/// in plaintext.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReissueResponse {
    pub user: Profile,
    pub temp_password: String,
}

pub async fn reissue(
    State(state): State<AppState>,
    Path(account_id): Path<String>,
    Extension(actor): Extension<Account>,
) -> Result<Json<ReissueResponse>> {
    let (user, temp_password) = state
        .service
        .reissue_password(&actor, &account_id)
        .await?;

    Ok(Json(ReissueResponse {
        user,
        temp_password,
    }))
}

//! Audit trail listing and purge.

use axum::extract::{Query, State};
use axum::{Extension, Json};
use serde::{Deserialize, Serialize};
use validator::{ValidationError, ValidationErrors};

use crate::AppState;
use crate::account::Account;
use crate::audit::{Actor, AuditAction, AuditEntry, AuditFilter};
use crate::error::{Result, ServerError};
use crate::policy::{Action, decide};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogQuery {
    pub target_user_id: Option<String>,
    pub target_internal_id: Option<String>,
    pub action: Option<String>,
    pub limit: Option<i64>,
}

fn parse_filter(query: &LogQuery) -> Result<AuditFilter> {
    let action = match &query.action {
        Some(raw) => Some(AuditAction::parse(raw).ok_or_else(|| {
            let mut errors = ValidationErrors::new();
            errors.add(
                "action",
                ValidationError::new("action")
                    .with_message("Unknown audit action.".into()),
            );
            ServerError::Validation(errors)
        })?),
        None => None,
    };

    Ok(AuditFilter {
        target_user_id: query.target_user_id.clone(),
        target_internal_id: query.target_internal_id.clone(),
        action,
    })
}

pub async fn list(
    State(state): State<AppState>,
    Extension(actor): Extension<Account>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<AuditEntry>>> {
    if !decide(actor.role, Action::ListAuditLog, &actor.id).is_allowed() {
        return Err(ServerError::Forbidden);
    }

    let filter = parse_filter(&query)?;
    let limit = state.config.audit_page_size(query.limit);

    Ok(Json(state.db.audit.list(&filter, limit).await?))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub deleted: u64,
}

/// Targeted purge. A filter naming no target account is refused so a bad
/// request cannot wipe the whole trail.
pub async fn purge(
    State(state): State<AppState>,
    Extension(actor): Extension<Account>,
    Query(query): Query<LogQuery>,
) -> Result<Json<PurgeResponse>> {
    if !decide(actor.role, Action::PurgeAuditLog, &actor.id).is_allowed() {
        return Err(ServerError::Forbidden);
    }

    let filter = parse_filter(&query)?;
    if !filter.has_target() {
        let mut errors = ValidationErrors::new();
        errors.add(
            "targetUserId",
            ValidationError::new("target").with_message(
                "A target account filter is required to purge.".into(),
            ),
        );
        return Err(errors.into());
    }

    let deleted = state.db.audit.purge(&filter).await?;

    state
        .db
        .audit
        .record(
            &Actor::account(&actor.id, actor.role),
            AuditAction::AuditLogPurged,
            filter.target_user_id.as_deref(),
            filter.target_internal_id.as_deref(),
            serde_json::json!({ "deleted": deleted }),
        )
        .await;

    Ok(Json(PurgeResponse { deleted }))
}

#[cfg(test)]
pub(super) mod tests {
    use axum::http::{Method, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::json;

    use super::*;
    use crate::account::Profile;
    use crate::config::Bootstrap;
    use crate::{app, make_request, router};

    async fn admin_token(state: &AppState) -> String {
        state
            .service
            .ensure_system_admin(&Bootstrap {
                name: "Root".into(),
                email: "root@clinic.test".into(),
                password: "rootpw".into(),
            })
            .await
            .unwrap();
        let account = state
            .service
            .authenticate("root@clinic.test", "rootpw", None)
            .await
            .unwrap();
        state.token.create(&account.id).unwrap()
    }

    #[tokio::test]
    async fn listing_is_newest_first_and_filterable() {
        let state = router::state();
        let token = admin_token(&state).await;
        let app = app(state);

        let response = make_request(
            Some(&token),
            app.clone(),
            Method::POST,
            "/accounts",
            json!({
                "name": "Staff",
                "email": "staff@clinic.test",
                "password": "initial1",
                "role": "staff",
            })
            .to_string(),
        )
        .await;
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let profile: Profile = serde_json::from_slice(&body).unwrap();

        let response = make_request(
            Some(&token),
            app,
            Method::GET,
            &format!(
                "/audit-logs?targetUserId={}&action=clinic_account_created",
                profile.id
            ),
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let entries: Vec<AuditEntry> = serde_json::from_slice(&body).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action, AuditAction::ClinicAccountCreated);
    }

    #[tokio::test]
    async fn purge_without_target_filter_is_refused() {
        let state = router::state();
        let token = admin_token(&state).await;
        let app = app(state);

        let response = make_request(
            Some(&token),
            app.clone(),
            Method::DELETE,
            "/audit-logs?action=login_success",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = make_request(
            Some(&token),
            app,
            Method::DELETE,
            "/audit-logs?targetUserId=some-account",
            String::default(),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}

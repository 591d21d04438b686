//! Append-only audit trail of administrative actions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::account::{AuditStore, Role};
use crate::error::Result;

/// Administrative actions recorded on the trail.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ClinicAccountCreated,
    LoginSuccess,
    ProfileUpdated,
    PasswordResetRequested,
    PasswordResetCompleted,
    ClinicPasswordReissued,
    AccountSuspended,
    AccountResumed,
    AccountSoftDeleted,
    AccountHardDeleted,
    OauthAccountLinked,
    OauthAccountCreated,
    AuditLogPurged,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::ClinicAccountCreated => "clinic_account_created",
            AuditAction::LoginSuccess => "login_success",
            AuditAction::ProfileUpdated => "profile_updated",
            AuditAction::PasswordResetRequested => "password_reset_requested",
            AuditAction::PasswordResetCompleted => "password_reset_completed",
            AuditAction::ClinicPasswordReissued => "clinic_password_reissued",
            AuditAction::AccountSuspended => "account_suspended",
            AuditAction::AccountResumed => "account_resumed",
            AuditAction::AccountSoftDeleted => "account_soft_deleted",
            AuditAction::AccountHardDeleted => "account_hard_deleted",
            AuditAction::OauthAccountLinked => "oauth_account_linked",
            AuditAction::OauthAccountCreated => "oauth_account_created",
            AuditAction::AuditLogPurged => "audit_log_purged",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "clinic_account_created" => Some(Self::ClinicAccountCreated),
            "login_success" => Some(Self::LoginSuccess),
            "profile_updated" => Some(Self::ProfileUpdated),
            "password_reset_requested" => Some(Self::PasswordResetRequested),
            "password_reset_completed" => Some(Self::PasswordResetCompleted),
            "clinic_password_reissued" => Some(Self::ClinicPasswordReissued),
            "account_suspended" => Some(Self::AccountSuspended),
            "account_resumed" => Some(Self::AccountResumed),
            "account_soft_deleted" => Some(Self::AccountSoftDeleted),
            "account_hard_deleted" => Some(Self::AccountHardDeleted),
            "oauth_account_linked" => Some(Self::OauthAccountLinked),
            "oauth_account_created" => Some(Self::OauthAccountCreated),
            "audit_log_purged" => Some(Self::AuditLogPurged),
            _ => None,
        }
    }
}

/// One recorded administrative action.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    pub id: String,
    pub action: AuditAction,
    pub actor_id: Option<String>,
    pub actor_role: Option<Role>,
    /// Account the action was performed on, when any.
    pub target_user_id: Option<String>,
    /// Immutable cross-reference id of the target; survives identity
    /// changes and even account purges in older entries.
    pub target_internal_id: Option<String>,
    pub meta: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Identity of the actor on whose behalf an entry is recorded.
#[derive(Clone, Debug, Default)]
pub struct Actor {
    pub id: Option<String>,
    pub role: Option<Role>,
}

impl Actor {
    pub fn account(id: &str, role: Role) -> Self {
        Self {
            id: Some(id.to_owned()),
            role: Some(role),
        }
    }

    /// Anonymous actor for entries triggered without an authenticated
    /// caller, e.g. a reset request.
    pub fn anonymous() -> Self {
        Self::default()
    }
}

/// Listing and purge filters. Purge additionally requires at least one of
/// the target fields to be set.
#[derive(Clone, Debug, Default)]
pub struct AuditFilter {
    pub target_user_id: Option<String>,
    pub target_internal_id: Option<String>,
    pub action: Option<AuditAction>,
}

impl AuditFilter {
    pub fn has_target(&self) -> bool {
        self.target_user_id.is_some() || self.target_internal_id.is_some()
    }

    pub fn matches(&self, entry: &AuditEntry) -> bool {
        if let Some(user_id) = &self.target_user_id {
            if entry.target_user_id.as_deref() != Some(user_id) {
                return false;
            }
        }
        if let Some(internal_id) = &self.target_internal_id {
            if entry.target_internal_id.as_deref() != Some(internal_id) {
                return false;
            }
        }
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        true
    }
}

/// Writes and queries the audit trail.
///
/// `record` is deliberately infallible from the caller's point of view: a
/// failed audit write must never abort the lifecycle operation that
/// triggered it.
#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn AuditStore>) -> Self {
        Self { store }
    }

    /// Append an entry. Failures are logged and swallowed.
    pub async fn record(
        &self,
        actor: &Actor,
        action: AuditAction,
        target_user_id: Option<&str>,
        target_internal_id: Option<&str>,
        meta: serde_json::Value,
    ) {
        let entry = AuditEntry {
            id: Uuid::new_v4().to_string(),
            action,
            actor_id: actor.id.clone(),
            actor_role: actor.role,
            target_user_id: target_user_id.map(str::to_owned),
            target_internal_id: target_internal_id.map(str::to_owned),
            meta,
            created_at: Utc::now(),
        };

        if let Err(err) = self.store.append(entry).await {
            tracing::error!(
                err = %err,
                action = action.as_str(),
                "failed to append audit entry"
            );
        }
    }

    /// Newest-first listing, `limit` already clamped by the caller.
    pub async fn list(
        &self,
        filter: &AuditFilter,
        limit: i64,
    ) -> Result<Vec<AuditEntry>> {
        self.store.list(filter, limit).await
    }

    /// Targeted purge. Returns the number of removed entries.
    pub async fn purge(&self, filter: &AuditFilter) -> Result<u64> {
        self.store.purge(filter).await
    }

    /// Cascade purge of every entry referencing an account, part of hard
    /// deletion.
    pub async fn purge_for_account(
        &self,
        user_id: &str,
        internal_id: &str,
    ) -> Result<u64> {
        let by_user = self
            .store
            .purge(&AuditFilter {
                target_user_id: Some(user_id.to_owned()),
                ..Default::default()
            })
            .await?;
        let by_internal = self
            .store
            .purge(&AuditFilter {
                target_internal_id: Some(internal_id.to_owned()),
                ..Default::default()
            })
            .await?;

        Ok(by_user + by_internal)
    }
}

//! Account lifecycle operations.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use super::store::{AccountFilter, AccountStore};
use super::{
    Account, CredentialState, ExternalIdentity, LifecycleState, Profile,
    Provider, Role,
};
use crate::audit::{Actor, AuditAction, AuditTrail};
use crate::config::{Bootstrap, Reset};
use crate::crypto::{Crypto, generate_temp_password};
use crate::error::{Result, ServerError};
use crate::mail::MailManager;
use crate::policy::{Action, Decision, Scope, decide};

/// Fields accepted when provisioning a clinic account.
#[derive(Clone, Debug)]
pub struct Provision {
    pub name: String,
    pub email: String,
    pub login_id: Option<String>,
    pub password: String,
    pub role: Role,
    pub phone: Option<String>,
    pub address: Option<String>,
}

/// Self-service profile update. `new_password` requires `old_password`
/// unless the account carries no password at all.
#[derive(Clone, Debug, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub login_id: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub avatar: Option<String>,
    pub role: Option<Role>,
    pub old_password: Option<String>,
    pub new_password: Option<String>,
}

/// Identity asserted by an external OAuth provider.
#[derive(Clone, Debug)]
pub struct OauthAssertion {
    pub provider: Provider,
    pub subject: String,
    pub email: String,
    pub name: String,
    pub avatar: Option<String>,
}

/// Outcome of a password-reset request. The HTTP response is
/// success-shaped in every case so account existence does not leak.
#[derive(Debug)]
pub enum ResetOutcome {
    /// No matching account, or the account cannot authenticate; nothing
    /// was issued.
    Accepted,
    /// Token issued and the reset mail queued.
    Sent,
    /// Mail delivery failed and the permissive policy surfaces the token
    /// to the caller.
    Revealed { token: String },
}

/// Coordinates the account store, credential cryptography, the audit
/// trail and mail delivery.
#[derive(Clone)]
pub struct AccountService {
    store: Arc<dyn AccountStore>,
    audit: AuditTrail,
    crypto: Arc<Crypto>,
    mail: MailManager,
    reset: Reset,
}

fn authorize(actor: &Account, action: Action) -> Result<Scope> {
    match decide(actor.role, action, &actor.id) {
        Decision::Allow(scope) => Ok(scope),
        Decision::Deny => Err(ServerError::Forbidden),
    }
}

impl AccountService {
    pub fn new(
        store: Arc<dyn AccountStore>,
        audit: AuditTrail,
        crypto: Arc<Crypto>,
        mail: MailManager,
        reset: Reset,
    ) -> Self {
        Self {
            store,
            audit,
            crypto,
            mail,
            reset,
        }
    }

    /// Seed a system administrator when the store holds no account yet.
    pub async fn ensure_system_admin(
        &self,
        bootstrap: &Bootstrap,
    ) -> Result<()> {
        if self.store.count().await? > 0 {
            return Ok(());
        }

        let hash = self.crypto.pwd.hash_password(&bootstrap.password)?;
        let account = Account::new(
            bootstrap.name.clone(),
            bootstrap.email.clone(),
            None,
            CredentialState::Password { hash },
            Role::SystemAdmin,
        );
        self.store.insert(&account).await?;

        tracing::info!(email = account.email, "bootstrap administrator created");
        self.audit
            .record(
                &Actor::anonymous(),
                AuditAction::ClinicAccountCreated,
                Some(&account.id),
                Some(account.internal_id()),
                json!({ "bootstrap": true }),
            )
            .await;

        Ok(())
    }

    /// Provision a clinic account on behalf of an administrator. The new
    /// account must rotate its password at first login.
    pub async fn provision(
        &self,
        actor: &Account,
        request: Provision,
    ) -> Result<Profile> {
        authorize(actor, Action::ProvisionAccount)?;

        let hash = self.crypto.pwd.hash_password(&request.password)?;
        let mut account = Account::new(
            request.name,
            request.email,
            request.login_id,
            CredentialState::Password { hash },
            request.role,
        );
        account.must_change_password = true;
        account.created_by = Some(actor.id.clone());
        account.phone = request.phone;
        account.address = request.address;

        self.store.insert(&account).await?;

        self.audit
            .record(
                &Actor::account(&actor.id, actor.role),
                AuditAction::ClinicAccountCreated,
                Some(&account.id),
                Some(account.internal_id()),
                json!({ "role": account.role.as_str() }),
            )
            .await;

        Ok(account.profile())
    }

    /// Authenticate by email or login id. The same error covers an
    /// unknown identifier and a wrong password.
    pub async fn authenticate(
        &self,
        identifier: &str,
        password: &str,
        ip: Option<String>,
    ) -> Result<Account> {
        let Some(mut account) =
            self.store.find_by_identifier(identifier).await?
        else {
            return Err(ServerError::InvalidCredentials);
        };

        if !self
            .crypto
            .pwd
            .verify_password(password, account.credentials.password_hash())
        {
            return Err(ServerError::InvalidCredentials);
        }

        if !account.can_authenticate() {
            return Err(ServerError::AccountInactive);
        }

        // Best effort: a failed bookkeeping write must not fail the login.
        account.last_login_at = Some(Utc::now());
        account.last_login_ip = ip;
        if let Err(err) = self.store.update(&account).await {
            tracing::warn!(err = %err, "failed to record last login");
        }

        self.audit
            .record(
                &Actor::account(&account.id, account.role),
                AuditAction::LoginSuccess,
                Some(&account.id),
                Some(account.internal_id()),
                serde_json::Value::Null,
            )
            .await;

        Ok(account)
    }

    /// Upsert from an external identity assertion.
    ///
    /// Lookup order: linked identity first, then email merge with an
    /// identity link and avatar backfill, and only then a fresh account
    /// with the default role.
    pub async fn oauth_login(
        &self,
        assertion: OauthAssertion,
    ) -> Result<Account> {
        if let Some(mut account) = self
            .store
            .find_by_external_identity(
                assertion.provider,
                &assertion.subject,
            )
            .await?
        {
            if !account.can_authenticate() {
                return Err(ServerError::AccountInactive);
            }

            if account.avatar.is_none() && assertion.avatar.is_some() {
                account.avatar = assertion.avatar;
                self.store.update(&account).await?;
            }

            return Ok(account);
        }

        if let Some(mut account) =
            self.store.find_by_email(&assertion.email).await?
        {
            if !account.can_authenticate() {
                return Err(ServerError::AccountInactive);
            }

            account.credentials.link_identity(ExternalIdentity {
                provider: assertion.provider,
                subject: assertion.subject,
            });
            if account.avatar.is_none() {
                account.avatar = assertion.avatar;
            }
            self.store.update(&account).await?;

            self.audit
                .record(
                    &Actor::account(&account.id, account.role),
                    AuditAction::OauthAccountLinked,
                    Some(&account.id),
                    Some(account.internal_id()),
                    json!({ "provider": assertion.provider }),
                )
                .await;

            return Ok(account);
        }

        let mut account = Account::new(
            assertion.name,
            assertion.email,
            None,
            CredentialState::OAuthOnly {
                identities: vec![ExternalIdentity {
                    provider: assertion.provider,
                    subject: assertion.subject,
                }],
            },
            Role::Staff,
        );
        account.avatar = assertion.avatar;
        self.store.insert(&account).await?;

        self.audit
            .record(
                &Actor::account(&account.id, account.role),
                AuditAction::OauthAccountCreated,
                Some(&account.id),
                Some(account.internal_id()),
                json!({ "provider": assertion.provider }),
            )
            .await;

        Ok(account)
    }

    /// Self-service profile update. Role changes require system
    /// privilege even on the caller's own account.
    pub async fn update_profile(
        &self,
        actor: &Account,
        update: ProfileUpdate,
    ) -> Result<Profile> {
        authorize(actor, Action::UpdateOwnProfile)?;

        let Some(mut account) = self.store.get(&actor.id).await? else {
            return Err(ServerError::NotFound);
        };

        if let Some(role) = update.role {
            if role != account.role {
                authorize(actor, Action::ChangeRole)?;
                account.role = role;
            }
        }

        if let Some(name) = update.name {
            account.name = name;
        }
        if let Some(email) = update.email {
            account.email = email.to_lowercase();
        }
        if let Some(login_id) = update.login_id {
            account.login_id = login_id;
        }
        if let Some(phone) = update.phone {
            account.phone = Some(phone);
        }
        if let Some(address) = update.address {
            account.address = Some(address);
        }
        if let Some(avatar) = update.avatar {
            account.avatar = Some(avatar);
        }

        if let Some(new_password) = update.new_password {
            let has_password =
                account.credentials.password_hash().is_some();

            // Pure OAuth accounts set their first password freely.
            if has_password {
                let old = update.old_password.unwrap_or_default();
                if !self.crypto.pwd.verify_password(
                    &old,
                    account.credentials.password_hash(),
                ) {
                    return Err(ServerError::InvalidCredentials);
                }
            }

            let hash = self.crypto.pwd.hash_password(&new_password)?;
            account.credentials.set_password(hash);
            account.must_change_password = false;
        }

        self.store.update(&account).await?;

        self.audit
            .record(
                &Actor::account(&actor.id, actor.role),
                AuditAction::ProfileUpdated,
                Some(&account.id),
                Some(account.internal_id()),
                serde_json::Value::Null,
            )
            .await;

        Ok(account.profile())
    }

    /// Issue a reset token and queue the reset mail.
    ///
    /// An unknown address reports the same outcome as a known one. Mail
    /// failure follows the configured policy: reveal the token, or
    /// revoke it and surface the delivery error.
    pub async fn request_password_reset(
        &self,
        email: &str,
    ) -> Result<ResetOutcome> {
        let Some(mut account) = self.store.find_by_email(email).await? else {
            return Ok(ResetOutcome::Accepted);
        };
        if !account.can_authenticate() {
            return Ok(ResetOutcome::Accepted);
        }

        let issued = self.crypto.reset.issue();
        account.reset_token = Some(super::ResetToken {
            digest: issued.digest,
            expires_at: issued.expires_at,
        });
        self.store.update(&account).await?;

        self.audit
            .record(
                &Actor::anonymous(),
                AuditAction::PasswordResetRequested,
                Some(&account.id),
                Some(account.internal_id()),
                serde_json::Value::Null,
            )
            .await;

        let reset_url = format!(
            "{}/reset-password/{}",
            self.reset
                .frontend_url
                .as_deref()
                .unwrap_or_default()
                .trim_end_matches('/'),
            issued.plaintext
        );

        match self
            .mail
            .publish_reset(&account.email, &account.name, &reset_url)
            .await
        {
            Ok(()) => Ok(ResetOutcome::Sent),
            Err(err) if self.reset.reveal_token => {
                tracing::warn!(err = %err, "reset mail failed, revealing token");
                Ok(ResetOutcome::Revealed {
                    token: issued.plaintext,
                })
            },
            Err(err) => {
                // Hardened policy: no mail means no outstanding token.
                account.reset_token = None;
                self.store.update(&account).await?;
                Err(err)
            },
        }
    }

    /// Consume a reset token and set the new password. Single use: the
    /// token is cleared on success.
    pub async fn consume_reset_token(
        &self,
        token: &str,
        new_password: &str,
    ) -> Result<Profile> {
        let digest = crate::crypto::ResetTokenFactory::digest(token);
        let Some(mut account) =
            self.store.find_by_reset_digest(&digest).await?
        else {
            return Err(ServerError::InvalidOrExpiredToken);
        };

        let hash = self.crypto.pwd.hash_password(new_password)?;
        account.credentials.set_password(hash);
        account.reset_token = None;
        account.must_change_password = false;
        self.store.update(&account).await?;

        self.audit
            .record(
                &Actor::account(&account.id, account.role),
                AuditAction::PasswordResetCompleted,
                Some(&account.id),
                Some(account.internal_id()),
                serde_json::Value::Null,
            )
            .await;

        Ok(account.profile())
    }

    /// Suspend or resume an account.
    pub async fn set_status(
        &self,
        actor: &Account,
        target_id: &str,
        active: bool,
    ) -> Result<Profile> {
        authorize(actor, Action::SetAccountStatus)?;

        let Some(mut account) = self.store.get(target_id).await? else {
            return Err(ServerError::NotFound);
        };
        if account.deleted_at().is_some() {
            return Err(ServerError::PreconditionFailed(
                "a deleted account cannot change status",
            ));
        }

        let (state, action) = if active {
            (LifecycleState::Active, AuditAction::AccountResumed)
        } else {
            (LifecycleState::Suspended, AuditAction::AccountSuspended)
        };
        if account.state == state {
            return Ok(account.profile());
        }

        account.state = state;
        self.store.update(&account).await?;

        self.audit
            .record(
                &Actor::account(&actor.id, actor.role),
                action,
                Some(&account.id),
                Some(account.internal_id()),
                serde_json::Value::Null,
            )
            .await;

        Ok(account.profile())
    }

    /// Logical deletion: the record is hidden and refuses logins but
    /// remains reversible.
    pub async fn soft_delete(
        &self,
        actor: &Account,
        target_id: &str,
    ) -> Result<Profile> {
        authorize(actor, Action::SoftDeleteAccount)?;

        let Some(mut account) = self.store.get(target_id).await? else {
            return Err(ServerError::NotFound);
        };
        if account.deleted_at().is_some() {
            return Ok(account.profile());
        }

        account.state = LifecycleState::Deleted(Utc::now());
        self.store.update(&account).await?;

        self.audit
            .record(
                &Actor::account(&actor.id, actor.role),
                AuditAction::AccountSoftDeleted,
                Some(&account.id),
                Some(account.internal_id()),
                serde_json::Value::Null,
            )
            .await;

        Ok(account.profile())
    }

    /// Physical removal of a logically-deleted account, cascading to its
    /// audit entries.
    pub async fn hard_delete(
        &self,
        actor: &Account,
        target_id: &str,
    ) -> Result<()> {
        authorize(actor, Action::HardDeleteAccount)?;

        let Some(account) = self.store.get(target_id).await? else {
            return Err(ServerError::NotFound);
        };
        if account.deleted_at().is_none() {
            return Err(ServerError::PreconditionFailed(
                "logical deletion is required before purge",
            ));
        }

        let internal_id = account.internal_id().to_owned();
        self.store.remove(&account.id).await?;

        let purged = self
            .audit
            .purge_for_account(&account.id, &internal_id)
            .await?;

        self.audit
            .record(
                &Actor::account(&actor.id, actor.role),
                AuditAction::AccountHardDeleted,
                None,
                None,
                json!({ "purgedEntries": purged }),
            )
            .await;

        Ok(())
    }

    /// Issue a one-time temporary password. A logically-deleted account
    /// is reactivated in the same step.
    pub async fn reissue_password(
        &self,
        actor: &Account,
        target_id: &str,
    ) -> Result<(Profile, String)> {
        authorize(actor, Action::ReissuePassword)?;

        let Some(mut account) = self.store.get(target_id).await? else {
            return Err(ServerError::NotFound);
        };

        let temp_password = generate_temp_password();
        let hash = self.crypto.pwd.hash_password(&temp_password)?;
        account.credentials.set_password(hash);
        account.must_change_password = true;
        account.reset_token = None;
        if account.deleted_at().is_some() {
            account.state = LifecycleState::Active;
        }
        self.store.update(&account).await?;

        self.audit
            .record(
                &Actor::account(&actor.id, actor.role),
                AuditAction::ClinicPasswordReissued,
                Some(&account.id),
                Some(account.internal_id()),
                serde_json::Value::Null,
            )
            .await;

        Ok((account.profile(), temp_password))
    }

    /// Directory listing. The role filter narrows the result; it never
    /// widens who may list.
    pub async fn list(
        &self,
        actor: &Account,
        role: Option<Role>,
    ) -> Result<Vec<Profile>> {
        let scope = authorize(actor, Action::ListAccounts)?;

        let filter = AccountFilter {
            role,
            created_by: match scope {
                Scope::Unrestricted => None,
                Scope::OwnedBy(owner) => Some(owner),
            },
            include_deleted: true,
        };

        Ok(self
            .store
            .list(&filter)
            .await?
            .iter()
            .map(Account::profile)
            .collect())
    }

    /// Fetch an account by id, or the current view of the actor itself.
    pub async fn get(&self, id: &str) -> Result<Option<Account>> {
        self.store.get(id).await
    }
}

//! In-memory store used by tests and database-less development.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::store::{AccountFilter, AccountStore, AuditStore};
use super::{Account, Provider};
use crate::audit::{AuditEntry, AuditFilter};
use crate::error::{Result, ServerError};

#[derive(Default)]
struct Inner {
    accounts: HashMap<String, Account>,
    audit: Vec<AuditEntry>,
}

/// Shared-state store backed by maps. Enforces the same uniqueness rules
/// as the PostgreSQL schema.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn check_unique(
    accounts: &HashMap<String, Account>,
    candidate: &Account,
) -> Result<()> {
    for other in accounts.values() {
        if other.id == candidate.id {
            continue;
        }
        if other.email == candidate.email {
            return Err(ServerError::DuplicateIdentity { field: "email" });
        }
        if other.login_id == candidate.login_id {
            return Err(ServerError::DuplicateIdentity { field: "loginId" });
        }
        for identity in candidate.credentials.identities() {
            if other
                .credentials
                .has_identity(identity.provider, &identity.subject)
            {
                return Err(ServerError::DuplicateIdentity {
                    field: "externalIdentity",
                });
            }
        }
    }

    Ok(())
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn insert(&self, account: &Account) -> Result<()> {
        let mut inner = self.inner.write().await;
        check_unique(&inner.accounts, account)?;
        inner.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn update(&self, account: &Account) -> Result<()> {
        let mut inner = self.inner.write().await;
        if !inner.accounts.contains_key(&account.id) {
            return Err(ServerError::NotFound);
        }
        check_unique(&inner.accounts, account)?;
        inner.accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Account>> {
        Ok(self.inner.read().await.accounts.get(id).cloned())
    }

    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<Account>> {
        let lowered = identifier.to_lowercase();
        Ok(self
            .inner
            .read()
            .await
            .accounts
            .values()
            .find(|account| {
                account.email == lowered || account.login_id == identifier
            })
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let lowered = email.to_lowercase();
        Ok(self
            .inner
            .read()
            .await
            .accounts
            .values()
            .find(|account| account.email == lowered)
            .cloned())
    }

    async fn find_by_external_identity(
        &self,
        provider: Provider,
        subject: &str,
    ) -> Result<Option<Account>> {
        Ok(self
            .inner
            .read()
            .await
            .accounts
            .values()
            .find(|account| account.credentials.has_identity(provider, subject))
            .cloned())
    }

    async fn find_by_reset_digest(
        &self,
        digest: &str,
    ) -> Result<Option<Account>> {
        let now = Utc::now();
        Ok(self
            .inner
            .read()
            .await
            .accounts
            .values()
            .find(|account| {
                account
                    .reset_token
                    .as_ref()
                    .is_some_and(|token| {
                        token.digest == digest && !token.is_expired(now)
                    })
            })
            .cloned())
    }

    async fn list(&self, filter: &AccountFilter) -> Result<Vec<Account>> {
        let inner = self.inner.read().await;
        let mut accounts: Vec<Account> = inner
            .accounts
            .values()
            .filter(|account| {
                filter.include_deleted || account.deleted_at().is_none()
            })
            .filter(|account| {
                filter.role.is_none_or(|role| account.role == role)
            })
            .filter(|account| {
                filter
                    .created_by
                    .as_deref()
                    .is_none_or(|owner| {
                        account.created_by.as_deref() == Some(owner)
                    })
            })
            .cloned()
            .collect();
        accounts.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(accounts)
    }

    async fn count(&self) -> Result<u64> {
        Ok(self.inner.read().await.accounts.len() as u64)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .accounts
            .remove(id)
            .map(|_| ())
            .ok_or(ServerError::NotFound)
    }
}

#[async_trait]
impl AuditStore for MemoryStore {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        self.inner.write().await.audit.push(entry);
        Ok(())
    }

    async fn list(
        &self,
        filter: &AuditFilter,
        limit: i64,
    ) -> Result<Vec<AuditEntry>> {
        let inner = self.inner.read().await;
        let mut entries: Vec<AuditEntry> = inner
            .audit
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        entries.truncate(limit.max(0) as usize);

        Ok(entries)
    }

    async fn purge(&self, filter: &AuditFilter) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let before = inner.audit.len();
        inner.audit.retain(|entry| !filter.matches(entry));

        Ok((before - inner.audit.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{CredentialState, Role};

    fn account(email: &str, login_id: Option<&str>) -> Account {
        Account::new(
            "Name",
            email,
            login_id.map(str::to_owned),
            CredentialState::Password { hash: "phc".into() },
            Role::Staff,
        )
    }

    #[tokio::test]
    async fn duplicate_email_is_refused() {
        let store = MemoryStore::new();
        store.insert(&account("a@x.test", Some("a"))).await.unwrap();

        let err = store
            .insert(&account("a@x.test", Some("b")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::DuplicateIdentity { field: "email" }
        ));
    }

    #[tokio::test]
    async fn duplicate_login_id_is_refused() {
        let store = MemoryStore::new();
        store.insert(&account("a@x.test", Some("shared"))).await.unwrap();

        let err = store
            .insert(&account("b@x.test", Some("shared")))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ServerError::DuplicateIdentity { field: "loginId" }
        ));
    }

    #[tokio::test]
    async fn identity_linked_elsewhere_is_refused_on_update() {
        use crate::account::ExternalIdentity;

        let identity = ExternalIdentity {
            provider: Provider::Google,
            subject: "g-123".into(),
        };
        let store = MemoryStore::new();
        let holder = Account::new(
            "Holder",
            "holder@x.test",
            None,
            CredentialState::OAuthOnly { identities: vec![identity.clone()] },
            Role::Staff,
        );
        store.insert(&holder).await.unwrap();

        let mut claimant = account("claimant@x.test", None);
        store.insert(&claimant).await.unwrap();
        claimant.credentials.link_identity(identity.clone());

        let err = store.update(&claimant).await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::DuplicateIdentity { field: "externalIdentity" }
        ));

        let late = Account::new(
            "Late",
            "late@x.test",
            None,
            CredentialState::OAuthOnly { identities: vec![identity] },
            Role::Staff,
        );
        let err = store.insert(&late).await.unwrap_err();
        assert!(matches!(
            err,
            ServerError::DuplicateIdentity { field: "externalIdentity" }
        ));
    }

    #[tokio::test]
    async fn identifier_lookup_matches_email_and_login_id() {
        let store = MemoryStore::new();
        let stored = account("a@x.test", Some("handle"));
        store.insert(&stored).await.unwrap();

        let by_email =
            store.find_by_identifier("A@X.TEST").await.unwrap().unwrap();
        assert_eq!(by_email.id, stored.id);

        let by_login =
            store.find_by_identifier("handle").await.unwrap().unwrap();
        assert_eq!(by_login.id, stored.id);

        assert!(store.find_by_identifier("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn expired_reset_digest_is_not_found() {
        use crate::account::ResetToken;

        let store = MemoryStore::new();
        let mut stored = account("a@x.test", None);
        stored.reset_token = Some(ResetToken {
            digest: "d1".into(),
            expires_at: Utc::now() - chrono::Duration::minutes(1),
        });
        store.insert(&stored).await.unwrap();

        assert!(store.find_by_reset_digest("d1").await.unwrap().is_none());

        let mut fresh = store.get(&stored.id).await.unwrap().unwrap();
        fresh.reset_token = Some(ResetToken {
            digest: "d2".into(),
            expires_at: Utc::now() + chrono::Duration::minutes(5),
        });
        store.update(&fresh).await.unwrap();

        assert!(store.find_by_reset_digest("d2").await.unwrap().is_some());
    }
}

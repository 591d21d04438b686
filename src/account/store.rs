//! Storage ports for accounts and the audit trail.

use async_trait::async_trait;

use super::Account;
use crate::audit::{AuditEntry, AuditFilter};
use crate::error::Result;

/// Filter for the account directory listing.
#[derive(Clone, Debug, Default)]
pub struct AccountFilter {
    pub role: Option<super::Role>,
    /// Tenant restriction: only accounts provisioned by this actor.
    pub created_by: Option<String>,
    pub include_deleted: bool,
}

/// Port to the account storage.
#[async_trait]
pub trait AccountStore: Send + Sync {
    /// Insert a new account. Duplicate email or login id yields
    /// [`crate::error::ServerError::DuplicateIdentity`].
    async fn insert(&self, account: &Account) -> Result<()>;

    /// Persist every mutable field of an existing account. Duplicate
    /// email or login id yields `DuplicateIdentity` here too.
    async fn update(&self, account: &Account) -> Result<()>;

    async fn get(&self, id: &str) -> Result<Option<Account>>;

    /// Lookup by email or login id, for authentication.
    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<Account>>;

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>>;

    /// Lookup by linked external identity.
    async fn find_by_external_identity(
        &self,
        provider: super::Provider,
        subject: &str,
    ) -> Result<Option<Account>>;

    /// Lookup by an unexpired reset-token digest.
    async fn find_by_reset_digest(
        &self,
        digest: &str,
    ) -> Result<Option<Account>>;

    async fn list(&self, filter: &AccountFilter) -> Result<Vec<Account>>;

    async fn count(&self) -> Result<u64>;

    /// Physical removal. The caller is responsible for the audit cascade.
    async fn remove(&self, id: &str) -> Result<()>;
}

/// Port to the audit-trail storage.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<()>;

    /// Newest-first, at most `limit` entries.
    async fn list(
        &self,
        filter: &AuditFilter,
        limit: i64,
    ) -> Result<Vec<AuditEntry>>;

    /// Remove matching entries, returning how many were removed.
    async fn purge(&self, filter: &AuditFilter) -> Result<u64>;
}

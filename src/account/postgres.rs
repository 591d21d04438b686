//! PostgreSQL store implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{QueryBuilder, Row};

use super::store::{AccountFilter, AccountStore, AuditStore};
use super::{
    Account, CredentialState, ExternalIdentity, LifecycleState, Provider,
    ResetToken, Role,
};
use crate::audit::{AuditAction, AuditEntry, AuditFilter};
use crate::config::Postgres as PostgresConfig;
use crate::error::{Result, ServerError};

const DEFAULT_POOL_SIZE: u32 = 10;

const ACCOUNT_COLUMNS: &str = "id, internal_id, login_id, email, name, \
     password_hash, identities, role, is_active, deleted_at, \
     must_change_password, reset_digest, reset_expires_at, last_login_at, \
     last_login_ip, created_by, avatar, phone, address, created_at";

/// Store backed by a PostgreSQL pool.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect to the database and run pending migrations.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        let url = format!(
            "postgres://{}:{}@{}/{}",
            config.username.as_deref().unwrap_or("postgres"),
            config.password.as_deref().unwrap_or_default(),
            config.address,
            config.database.as_deref().unwrap_or("clinica"),
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size.unwrap_or(DEFAULT_POOL_SIZE))
            .connect(&url)
            .await?;

        sqlx::migrate!().run(&pool).await.map_err(|err| {
            ServerError::Internal {
                details: "database migration failed".to_owned(),
                source: Some(Box::new(err)),
            }
        })?;

        Ok(Self { pool })
    }
}

/// Map a unique-index violation onto the offending identity field.
fn map_sqlx_error(err: sqlx::Error) -> ServerError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return match db.constraint() {
                Some("accounts_email_key") => {
                    ServerError::DuplicateIdentity { field: "email" }
                },
                Some("accounts_login_id_key") => {
                    ServerError::DuplicateIdentity { field: "loginId" }
                },
                Some("account_identities_pkey") => {
                    ServerError::DuplicateIdentity {
                        field: "externalIdentity",
                    }
                },
                _ => ServerError::DuplicateIdentity { field: "identity" },
            };
        }
    }

    ServerError::Sql(err)
}

fn parse_role(value: &str) -> Result<Role> {
    Role::parse(value).ok_or_else(|| ServerError::Internal {
        details: format!("unknown role `{value}` in storage"),
        source: None,
    })
}

fn row_to_account(row: &PgRow) -> Result<Account> {
    let password_hash: Option<String> = row.try_get("password_hash")?;
    let identities: Vec<ExternalIdentity> =
        serde_json::from_value(row.try_get("identities")?).map_err(|err| {
            ServerError::Internal {
                details: "malformed identities column".to_owned(),
                source: Some(Box::new(err)),
            }
        })?;

    let credentials = match (password_hash, identities) {
        (Some(hash), identities) if identities.is_empty() => {
            CredentialState::Password { hash }
        },
        (Some(hash), identities) => CredentialState::Both { hash, identities },
        (None, identities) => CredentialState::OAuthOnly { identities },
    };

    let deleted_at: Option<DateTime<Utc>> = row.try_get("deleted_at")?;
    let is_active: bool = row.try_get("is_active")?;
    let state = match deleted_at {
        Some(at) => LifecycleState::Deleted(at),
        None if is_active => LifecycleState::Active,
        None => LifecycleState::Suspended,
    };

    let reset_digest: Option<String> = row.try_get("reset_digest")?;
    let reset_expires_at: Option<DateTime<Utc>> =
        row.try_get("reset_expires_at")?;
    let reset_token = match (reset_digest, reset_expires_at) {
        (Some(digest), Some(expires_at)) => {
            Some(ResetToken { digest, expires_at })
        },
        _ => None,
    };

    let role: String = row.try_get("role")?;

    Ok(Account::from_parts(
        row.try_get("id")?,
        row.try_get("internal_id")?,
        row.try_get("login_id")?,
        row.try_get("email")?,
        row.try_get("name")?,
        credentials,
        parse_role(&role)?,
        state,
        row.try_get("must_change_password")?,
        reset_token,
        row.try_get("last_login_at")?,
        row.try_get("last_login_ip")?,
        row.try_get("created_by")?,
        row.try_get("avatar")?,
        row.try_get("phone")?,
        row.try_get("address")?,
        row.try_get("created_at")?,
    ))
}

fn identities_json(account: &Account) -> Result<serde_json::Value> {
    serde_json::to_value(account.credentials.identities()).map_err(|err| {
        ServerError::Internal {
            details: "failed to serialize identities".to_owned(),
            source: Some(Box::new(err)),
        }
    })
}

/// Rewrite the `account_identities` rows for one account. The primary key
/// on (provider, subject) rejects an identity already linked elsewhere.
async fn replace_identities(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    account: &Account,
) -> Result<()> {
    sqlx::query(
        "DELETE FROM account_identities WHERE account_internal_id = $1",
    )
    .bind(account.internal_id())
    .execute(&mut **tx)
    .await?;

    for identity in account.credentials.identities() {
        sqlx::query(
            "INSERT INTO account_identities \
             (provider, subject, account_internal_id) VALUES ($1, $2, $3)",
        )
        .bind(identity.provider.as_str())
        .bind(&identity.subject)
        .bind(account.internal_id())
        .execute(&mut **tx)
        .await
        .map_err(map_sqlx_error)?;
    }

    Ok(())
}

#[async_trait]
impl AccountStore for PgStore {
    async fn insert(&self, account: &Account) -> Result<()> {
        let reset = account.reset_token.as_ref();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO accounts (id, internal_id, login_id, email, name, \
             password_hash, identities, role, is_active, deleted_at, \
             must_change_password, reset_digest, reset_expires_at, \
             last_login_at, last_login_ip, created_by, avatar, phone, \
             address, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
             $13, $14, $15, $16, $17, $18, $19, $20)",
        )
        .bind(&account.id)
        .bind(account.internal_id())
        .bind(&account.login_id)
        .bind(&account.email)
        .bind(&account.name)
        .bind(account.credentials.password_hash())
        .bind(identities_json(account)?)
        .bind(account.role.as_str())
        .bind(account.is_active())
        .bind(account.deleted_at())
        .bind(account.must_change_password)
        .bind(reset.map(|token| token.digest.clone()))
        .bind(reset.map(|token| token.expires_at))
        .bind(account.last_login_at)
        .bind(&account.last_login_ip)
        .bind(&account.created_by)
        .bind(&account.avatar)
        .bind(&account.phone)
        .bind(&account.address)
        .bind(account.created_at)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        replace_identities(&mut tx, account).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn update(&self, account: &Account) -> Result<()> {
        let reset = account.reset_token.as_ref();
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE accounts SET login_id = $2, email = $3, name = $4, \
             password_hash = $5, identities = $6, role = $7, is_active = $8, \
             deleted_at = $9, must_change_password = $10, reset_digest = $11, \
             reset_expires_at = $12, last_login_at = $13, last_login_ip = $14, \
             created_by = $15, avatar = $16, phone = $17, address = $18 \
             WHERE id = $1",
        )
        .bind(&account.id)
        .bind(&account.login_id)
        .bind(&account.email)
        .bind(&account.name)
        .bind(account.credentials.password_hash())
        .bind(identities_json(account)?)
        .bind(account.role.as_str())
        .bind(account.is_active())
        .bind(account.deleted_at())
        .bind(account.must_change_password)
        .bind(reset.map(|token| token.digest.clone()))
        .bind(reset.map(|token| token.expires_at))
        .bind(account.last_login_at)
        .bind(&account.last_login_ip)
        .bind(&account.created_by)
        .bind(&account.avatar)
        .bind(&account.phone)
        .bind(&account.address)
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound);
        }

        replace_identities(&mut tx, account).await?;
        tx.commit().await?;

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn find_by_identifier(
        &self,
        identifier: &str,
    ) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE email = LOWER($1) OR login_id = $1"
        ))
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE email = LOWER($1)"
        ))
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn find_by_external_identity(
        &self,
        provider: Provider,
        subject: &str,
    ) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             JOIN account_identities \
             ON account_identities.account_internal_id = accounts.internal_id \
             WHERE account_identities.provider = $1 \
             AND account_identities.subject = $2"
        ))
        .bind(provider.as_str())
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn find_by_reset_digest(
        &self,
        digest: &str,
    ) -> Result<Option<Account>> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts \
             WHERE reset_digest = $1 AND reset_expires_at > NOW()"
        ))
        .bind(digest)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_account).transpose()
    }

    async fn list(&self, filter: &AccountFilter) -> Result<Vec<Account>> {
        let mut builder = QueryBuilder::new(format!(
            "SELECT {ACCOUNT_COLUMNS} FROM accounts WHERE TRUE"
        ));

        if !filter.include_deleted {
            builder.push(" AND deleted_at IS NULL");
        }
        if let Some(role) = filter.role {
            builder.push(" AND role = ").push_bind(role.as_str());
        }
        if let Some(owner) = &filter.created_by {
            builder.push(" AND created_by = ").push_bind(owner.clone());
        }
        builder.push(" ORDER BY created_at DESC");

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_account).collect()
    }

    async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) FROM accounts")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.try_get(0)?;

        Ok(count as u64)
    }

    async fn remove(&self, id: &str) -> Result<()> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(ServerError::NotFound);
        }

        Ok(())
    }
}

fn push_audit_filter(builder: &mut QueryBuilder<'_, sqlx::Postgres>, filter: &AuditFilter) {
    if let Some(user_id) = &filter.target_user_id {
        builder
            .push(" AND target_user_id = ")
            .push_bind(user_id.clone());
    }
    if let Some(internal_id) = &filter.target_internal_id {
        builder
            .push(" AND target_internal_id = ")
            .push_bind(internal_id.clone());
    }
    if let Some(action) = filter.action {
        builder.push(" AND action = ").push_bind(action.as_str());
    }
}

fn row_to_audit_entry(row: &PgRow) -> Result<AuditEntry> {
    let action: String = row.try_get("action")?;
    let actor_role: Option<String> = row.try_get("actor_role")?;

    Ok(AuditEntry {
        id: row.try_get("id")?,
        action: AuditAction::parse(&action).ok_or_else(|| {
            ServerError::Internal {
                details: format!("unknown audit action `{action}` in storage"),
                source: None,
            }
        })?,
        actor_id: row.try_get("actor_id")?,
        actor_role: actor_role.as_deref().and_then(Role::parse),
        target_user_id: row.try_get("target_user_id")?,
        target_internal_id: row.try_get("target_internal_id")?,
        meta: row.try_get("meta")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl AuditStore for PgStore {
    async fn append(&self, entry: AuditEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO audit_logs (id, action, actor_id, actor_role, \
             target_user_id, target_internal_id, meta, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(&entry.id)
        .bind(entry.action.as_str())
        .bind(&entry.actor_id)
        .bind(entry.actor_role.map(Role::as_str))
        .bind(&entry.target_user_id)
        .bind(&entry.target_internal_id)
        .bind(&entry.meta)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list(
        &self,
        filter: &AuditFilter,
        limit: i64,
    ) -> Result<Vec<AuditEntry>> {
        let mut builder = QueryBuilder::new(
            "SELECT id, action, actor_id, actor_role, target_user_id, \
             target_internal_id, meta, created_at \
             FROM audit_logs WHERE TRUE",
        );
        push_audit_filter(&mut builder, filter);
        builder.push(" ORDER BY created_at DESC LIMIT ").push_bind(limit);

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_audit_entry).collect()
    }

    async fn purge(&self, filter: &AuditFilter) -> Result<u64> {
        let mut builder =
            QueryBuilder::new("DELETE FROM audit_logs WHERE TRUE");
        push_audit_filter(&mut builder, filter);

        let result = builder.build().execute(&self.pool).await?;

        Ok(result.rows_affected())
    }
}

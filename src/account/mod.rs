//! Account aggregate and its lifecycle state machine.

mod memory;
mod postgres;
mod service;
mod store;

pub use memory::MemoryStore;
pub use postgres::PgStore;
pub use service::*;
pub use store::{AccountFilter, AccountStore, AuditStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Fixed role enumeration. `Admin` is a legacy alias kept for backwards
/// compatibility; it maps to the same privilege level as `SystemAdmin` in
/// [`Role::privilege`] and nothing else distinguishes the two.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SystemAdmin,
    ClinicAdmin,
    Admin,
    Dentist,
    Hygienist,
    #[default]
    Staff,
    Billing,
}

/// Privilege level a role maps to. One lookup table instead of scattered
/// string-equality branches.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Privilege {
    /// May act on any resource, any tenant.
    System,
    /// Bound to the tenant it owns via `created_by`.
    Tenant,
    /// Clinical staff with narrow per-endpoint permissions.
    Clinical,
}

impl Role {
    pub fn privilege(self) -> Privilege {
        match self {
            Role::SystemAdmin | Role::Admin => Privilege::System,
            Role::ClinicAdmin => Privilege::Tenant,
            Role::Dentist | Role::Hygienist | Role::Staff | Role::Billing => {
                Privilege::Clinical
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::SystemAdmin => "system_admin",
            Role::ClinicAdmin => "clinic_admin",
            Role::Admin => "admin",
            Role::Dentist => "dentist",
            Role::Hygienist => "hygienist",
            Role::Staff => "staff",
            Role::Billing => "billing",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "system_admin" => Some(Role::SystemAdmin),
            "clinic_admin" => Some(Role::ClinicAdmin),
            "admin" => Some(Role::Admin),
            "dentist" => Some(Role::Dentist),
            "hygienist" => Some(Role::Hygienist),
            "staff" => Some(Role::Staff),
            "billing" => Some(Role::Billing),
            _ => None,
        }
    }
}

/// External OAuth provider.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    Google,
    Facebook,
}

impl Provider {
    pub fn as_str(self) -> &'static str {
        match self {
            Provider::Google => "google",
            Provider::Facebook => "facebook",
        }
    }
}

/// A linked (provider, provider user id) pair; unique process-wide.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalIdentity {
    pub provider: Provider,
    pub subject: String,
}

/// Credential state of an account, modeled as a tagged variant rather than
/// a nullable hash next to nullable provider ids.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum CredentialState {
    Password { hash: String },
    OAuthOnly { identities: Vec<ExternalIdentity> },
    Both { hash: String, identities: Vec<ExternalIdentity> },
}

impl CredentialState {
    pub fn password_hash(&self) -> Option<&str> {
        match self {
            CredentialState::Password { hash }
            | CredentialState::Both { hash, .. } => Some(hash),
            CredentialState::OAuthOnly { .. } => None,
        }
    }

    pub fn identities(&self) -> &[ExternalIdentity] {
        match self {
            CredentialState::Password { .. } => &[],
            CredentialState::OAuthOnly { identities }
            | CredentialState::Both { identities, .. } => identities,
        }
    }

    pub fn has_identity(&self, provider: Provider, subject: &str) -> bool {
        self.identities()
            .iter()
            .any(|id| id.provider == provider && id.subject == subject)
    }

    /// Set or replace the password hash, preserving linked identities.
    pub fn set_password(&mut self, hash: String) {
        *self = match std::mem::replace(
            self,
            CredentialState::Password { hash: String::new() },
        ) {
            CredentialState::Password { .. } => {
                CredentialState::Password { hash }
            },
            CredentialState::OAuthOnly { identities }
            | CredentialState::Both { identities, .. } => {
                CredentialState::Both { hash, identities }
            },
        };
    }

    /// Link an external identity, preserving any password.
    pub fn link_identity(&mut self, identity: ExternalIdentity) {
        *self = match std::mem::replace(
            self,
            CredentialState::OAuthOnly { identities: Vec::new() },
        ) {
            CredentialState::Password { hash } => CredentialState::Both {
                hash,
                identities: vec![identity],
            },
            CredentialState::OAuthOnly { mut identities } => {
                identities.push(identity);
                CredentialState::OAuthOnly { identities }
            },
            CredentialState::Both { hash, mut identities } => {
                identities.push(identity);
                CredentialState::Both { hash, identities }
            },
        };
    }
}

/// Explicit lifecycle state; `is_active`/`deleted_at` are derived from it,
/// never stored separately.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum LifecycleState {
    Active,
    Suspended,
    Deleted(DateTime<Utc>),
}

impl LifecycleState {
    pub fn is_active(self) -> bool {
        matches!(self, LifecycleState::Active)
    }

    pub fn deleted_at(self) -> Option<DateTime<Utc>> {
        match self {
            LifecycleState::Deleted(at) => Some(at),
            _ => None,
        }
    }
}

/// Stored form of an outstanding password-reset token.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResetToken {
    /// SHA-256 digest of the plaintext token.
    pub digest: String,
    pub expires_at: DateTime<Utc>,
}

impl ResetToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// Account as held in the store. Never serialized to callers directly;
/// see [`Profile`].
#[derive(Clone, Debug, PartialEq)]
pub struct Account {
    /// Opaque stable identifier, never reused.
    pub id: String,
    /// Immutable cross-reference identifier; survives login/email changes.
    /// No setter exists: assigned once at construction.
    internal_id: String,
    /// Mutable, unique, case-sensitive authentication handle.
    pub login_id: String,
    /// Mutable, unique, lowercase-normalized contact address.
    pub email: String,
    pub name: String,
    pub credentials: CredentialState,
    pub role: Role,
    pub state: LifecycleState,
    /// Set on provisioning/reissuance; cleared on self-service change.
    pub must_change_password: bool,
    pub reset_token: Option<ResetToken>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub last_login_ip: Option<String>,
    /// Tenant membership: provisioning actor for accounts, owning
    /// `clinic_admin` for clinic resources.
    pub created_by: Option<String>,
    pub avatar: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Account {
    /// Construct a fresh account. `login_id` defaults to the email when
    /// unset; the email is lowercase-normalized here so every path through
    /// construction agrees.
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        login_id: Option<String>,
        credentials: CredentialState,
        role: Role,
    ) -> Self {
        let email = email.into().to_lowercase();

        Self {
            id: Uuid::new_v4().to_string(),
            internal_id: Uuid::new_v4().to_string(),
            login_id: login_id.unwrap_or_else(|| email.clone()),
            email,
            name: name.into(),
            credentials,
            role,
            state: LifecycleState::Active,
            must_change_password: false,
            reset_token: None,
            last_login_at: None,
            last_login_ip: None,
            created_by: None,
            avatar: None,
            phone: None,
            address: None,
            created_at: Utc::now(),
        }
    }

    pub fn internal_id(&self) -> &str {
        &self.internal_id
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.state.deleted_at()
    }

    /// Whether authentication may proceed at all.
    pub fn can_authenticate(&self) -> bool {
        self.is_active() && self.deleted_at().is_none()
    }

    /// Public view of the account. The password hash and reset token are
    /// structurally absent, not merely skipped.
    pub fn profile(&self) -> Profile {
        Profile {
            id: self.id.clone(),
            internal_id: self.internal_id.clone(),
            name: self.name.clone(),
            email: self.email.clone(),
            login_id: self.login_id.clone(),
            role: self.role,
            phone: self.phone.clone(),
            address: self.address.clone(),
            avatar: self.avatar.clone(),
            is_active: self.is_active(),
            deleted_at: self.deleted_at(),
            must_change_password: self.must_change_password,
            last_login_at: self.last_login_at,
        }
    }

    /// Restore an account from storage fields. Only stores call this.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn from_parts(
        id: String,
        internal_id: String,
        login_id: String,
        email: String,
        name: String,
        credentials: CredentialState,
        role: Role,
        state: LifecycleState,
        must_change_password: bool,
        reset_token: Option<ResetToken>,
        last_login_at: Option<DateTime<Utc>>,
        last_login_ip: Option<String>,
        created_by: Option<String>,
        avatar: Option<String>,
        phone: Option<String>,
        address: Option<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            internal_id,
            login_id,
            email,
            name,
            credentials,
            role,
            state,
            must_change_password,
            reset_token,
            last_login_at,
            last_login_ip,
            created_by,
            avatar,
            phone,
            address,
            created_at,
        }
    }
}

/// Public profile returned by every account-bearing endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub internal_id: String,
    pub name: String,
    pub email: String,
    pub login_id: String,
    pub role: Role,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub avatar: Option<String>,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub must_change_password: bool,
    pub last_login_at: Option<DateTime<Utc>>,
}

//! Role-based authorization policy.
//!
//! One pure function decides every permission question. Callers apply the
//! returned [`Scope`] against the resource's owner; a scope miss surfaces
//! as a missing resource, never as a denial, so existence does not leak
//! across tenants.

use crate::account::{Privilege, Role};

/// Permission questions the policy answers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    ProvisionAccount,
    ListAccounts,
    ReadAccount,
    UpdateOwnProfile,
    ChangeRole,
    SetAccountStatus,
    SoftDeleteAccount,
    HardDeleteAccount,
    ReissuePassword,
    ListAuditLog,
    PurgeAuditLog,
    ReadTenantResource,
    WriteTenantResource,
    CreateVisitRecord,
}

/// Resource visibility granted with an allowance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Scope {
    Unrestricted,
    /// Only resources whose `created_by` equals the given account id.
    OwnedBy(String),
}

impl Scope {
    /// Whether a resource with the given owner falls inside the scope.
    pub fn permits(&self, resource_owner: Option<&str>) -> bool {
        match self {
            Scope::Unrestricted => true,
            Scope::OwnedBy(owner) => resource_owner == Some(owner.as_str()),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decision {
    Allow(Scope),
    Deny,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow(_))
    }
}

/// Decide whether `role` may perform `action`. `actor_id` seeds the tenant
/// scope for tenant-bound roles.
pub fn decide(role: Role, action: Action, actor_id: &str) -> Decision {
    match role.privilege() {
        Privilege::System => Decision::Allow(Scope::Unrestricted),

        Privilege::Tenant => match action {
            Action::UpdateOwnProfile => Decision::Allow(Scope::Unrestricted),
            Action::ReadAccount
            | Action::ReadTenantResource
            | Action::WriteTenantResource => {
                Decision::Allow(Scope::OwnedBy(actor_id.to_owned()))
            },
            _ => Decision::Deny,
        },

        Privilege::Clinical => match action {
            Action::UpdateOwnProfile | Action::ReadTenantResource => {
                Decision::Allow(Scope::Unrestricted)
            },
            Action::CreateVisitRecord
                if matches!(role, Role::Dentist | Role::Hygienist) =>
            {
                Decision::Allow(Scope::Unrestricted)
            },
            _ => Decision::Deny,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_ACTIONS: [Action; 14] = [
        Action::ProvisionAccount,
        Action::ListAccounts,
        Action::ReadAccount,
        Action::UpdateOwnProfile,
        Action::ChangeRole,
        Action::SetAccountStatus,
        Action::SoftDeleteAccount,
        Action::HardDeleteAccount,
        Action::ReissuePassword,
        Action::ListAuditLog,
        Action::PurgeAuditLog,
        Action::ReadTenantResource,
        Action::WriteTenantResource,
        Action::CreateVisitRecord,
    ];

    #[test]
    fn system_roles_may_do_everything_unscoped() {
        for role in [Role::SystemAdmin, Role::Admin] {
            for action in ALL_ACTIONS {
                assert_eq!(
                    decide(role, action, "any"),
                    Decision::Allow(Scope::Unrestricted),
                    "{role:?} should be unrestricted for {action:?}"
                );
            }
        }
    }

    #[test]
    fn clinic_admin_is_tenant_scoped() {
        let decision =
            decide(Role::ClinicAdmin, Action::ReadTenantResource, "ca-1");
        let Decision::Allow(scope) = decision else {
            panic!("expected allowance");
        };

        assert!(scope.permits(Some("ca-1")));
        assert!(!scope.permits(Some("ca-2")));
        assert!(!scope.permits(None));
    }

    #[test]
    fn clinic_admin_cannot_manage_lifecycle_or_roles() {
        for action in [
            Action::ProvisionAccount,
            Action::ListAccounts,
            Action::ChangeRole,
            Action::SetAccountStatus,
            Action::SoftDeleteAccount,
            Action::HardDeleteAccount,
            Action::ReissuePassword,
            Action::ListAuditLog,
            Action::PurgeAuditLog,
        ] {
            assert_eq!(
                decide(Role::ClinicAdmin, action, "ca-1"),
                Decision::Deny,
                "clinic_admin should be denied {action:?}"
            );
        }
    }

    #[test]
    fn visit_records_are_restricted_to_practitioners() {
        for role in [Role::Dentist, Role::Hygienist] {
            assert!(
                decide(role, Action::CreateVisitRecord, "x").is_allowed()
            );
        }
        for role in [Role::Staff, Role::Billing, Role::ClinicAdmin] {
            assert_eq!(
                decide(role, Action::CreateVisitRecord, "x"),
                Decision::Deny
            );
        }
    }

    #[test]
    fn clinical_roles_keep_self_service_and_reads() {
        for role in [Role::Dentist, Role::Hygienist, Role::Staff, Role::Billing]
        {
            assert!(decide(role, Action::UpdateOwnProfile, "x").is_allowed());
            assert!(
                decide(role, Action::ReadTenantResource, "x").is_allowed()
            );
            assert_eq!(
                decide(role, Action::WriteTenantResource, "x"),
                Decision::Deny
            );
            assert_eq!(
                decide(role, Action::ListAccounts, "x"),
                Decision::Deny
            );
        }
    }

    #[test]
    fn role_filter_does_not_relax_directory_listing() {
        // The directory listing is decided on the action alone; a role
        // filter in the query string changes nothing.
        assert_eq!(
            decide(Role::Staff, Action::ListAccounts, "x"),
            Decision::Deny
        );
    }
}

//! Role and permission model
//!
//! Roles map to a fixed permission table. The request-authorization layer
//! consumes the derived authority strings (`ROLE_<NAME>` plus every
//! permission identifier); this module only defines the data.

use crate::TutorixError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Fine-grained capability granted through a role
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Permission {
    #[serde(rename = "admin:read")]
    AdminRead,
    #[serde(rename = "admin:update")]
    AdminUpdate,
    #[serde(rename = "admin:create")]
    AdminCreate,
    #[serde(rename = "admin:delete")]
    AdminDelete,
    #[serde(rename = "manager:read")]
    ManagerRead,
    #[serde(rename = "manager:update")]
    ManagerUpdate,
    #[serde(rename = "manager:create")]
    ManagerCreate,
    #[serde(rename = "manager:delete")]
    ManagerDelete,
}

const MANAGER_PERMISSIONS: &[Permission] = &[
    Permission::ManagerRead,
    Permission::ManagerUpdate,
    Permission::ManagerCreate,
    Permission::ManagerDelete,
];

const ADMIN_PERMISSIONS: &[Permission] = &[
    Permission::AdminRead,
    Permission::AdminUpdate,
    Permission::AdminCreate,
    Permission::AdminDelete,
    Permission::ManagerRead,
    Permission::ManagerUpdate,
    Permission::ManagerCreate,
    Permission::ManagerDelete,
];

impl Permission {
    /// Authority identifier, e.g. `admin:read`
    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::AdminRead => "admin:read",
            Permission::AdminUpdate => "admin:update",
            Permission::AdminCreate => "admin:create",
            Permission::AdminDelete => "admin:delete",
            Permission::ManagerRead => "manager:read",
            Permission::ManagerUpdate => "manager:update",
            Permission::ManagerCreate => "manager:create",
            Permission::ManagerDelete => "manager:delete",
        }
    }
}

impl std::fmt::Display for Permission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// User role
///
/// - User: no extra permissions
/// - Manager: read/update/create/delete on manager resources
/// - Admin: every manager permission plus the admin ones
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Role {
    User,
    Admin,
    Manager,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::User, Role::Admin, Role::Manager];

    /// Upper-case role name as stored and presented to clients
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "USER",
            Role::Admin => "ADMIN",
            Role::Manager => "MANAGER",
        }
    }

    /// Parse role from its name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_uppercase().as_str() {
            "USER" => Some(Role::User),
            "ADMIN" => Some(Role::Admin),
            "MANAGER" => Some(Role::Manager),
            _ => None,
        }
    }

    /// Permission set granted by this role
    pub fn permissions(&self) -> &'static [Permission] {
        match self {
            Role::User => &[],
            Role::Admin => ADMIN_PERMISSIONS,
            Role::Manager => MANAGER_PERMISSIONS,
        }
    }

    /// Authority strings: every permission identifier plus `ROLE_<NAME>`
    pub fn authorities(&self) -> Vec<String> {
        let mut authorities: Vec<String> = self
            .permissions()
            .iter()
            .map(|p| p.as_str().to_string())
            .collect();
        authorities.push(format!("ROLE_{}", self.as_str()));
        authorities
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = TutorixError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::from_name(s).ok_or_else(|| TutorixError::RoleNotInitialized(s.to_string()))
    }
}

/// Union of the authorities of several roles, deduplicated and sorted
pub fn authorities_for(roles: &[Role]) -> Vec<String> {
    roles
        .iter()
        .flat_map(|role| role.authorities())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Roles initialised at boot
///
/// Registration resolves roles through the catalog; a role missing from it
/// is a deployment defect reported as `RoleNotInitialized`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoleCatalog {
    roles: BTreeSet<Role>,
}

impl RoleCatalog {
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            roles: roles.into_iter().collect(),
        }
    }

    /// Build the catalog from configured role names
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, TutorixError> {
        let roles = names
            .iter()
            .map(|name| name.as_ref().parse::<Role>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(roles))
    }

    /// Look up an initialised role
    pub fn resolve(&self, role: Role) -> Result<Role, TutorixError> {
        if self.roles.contains(&role) {
            Ok(role)
        } else {
            Err(TutorixError::RoleNotInitialized(role.to_string()))
        }
    }
}

impl Default for RoleCatalog {
    fn default() -> Self {
        Self::new(Role::ALL)
    }
}

//! Core resource type definitions.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Category of grantable resource.
///
/// The set of types is closed; every stored permission blob belongs to
/// exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceType {
    Account,
    Application,
    ServiceAccount,
    Role,
    BuildService,
}

impl ResourceType {
    /// Every known resource type, in storage order.
    pub const ALL: [ResourceType; 5] = [
        ResourceType::Account,
        ResourceType::Application,
        ResourceType::ServiceAccount,
        ResourceType::Role,
        ResourceType::BuildService,
    ];

    /// Suffix used for this type's per-user storage key.
    pub fn key_suffix(&self) -> &'static str {
        match self {
            ResourceType::Account => "accounts",
            ResourceType::Application => "applications",
            ResourceType::ServiceAccount => "service_accounts",
            ResourceType::Role => "roles",
            ResourceType::BuildService => "build_services",
        }
    }

    /// Canonical upper-case name (e.g. `SERVICE_ACCOUNT`).
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceType::Account => "ACCOUNT",
            ResourceType::Application => "APPLICATION",
            ResourceType::ServiceAccount => "SERVICE_ACCOUNT",
            ResourceType::Role => "ROLE",
            ResourceType::BuildService => "BUILD_SERVICE",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ResourceType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| DomainError::UnknownResourceType {
                value: s.to_string(),
            })
    }
}

/// An action a role may be granted on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Authorization {
    Read,
    Write,
    Execute,
    Create,
}

/// Role names granted each authorization on a resource.
pub type Permissions = BTreeMap<Authorization, BTreeSet<String>>;

/// Where a role membership was sourced from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleSource {
    Ldap,
    File,
    GoogleGroups,
    Github,
    External,
}

/// A role the user is a member of.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<RoleSource>,
}

impl Role {
    /// Creates a role with no recorded source.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: None,
        }
    }

    /// Sets the membership source.
    pub fn with_source(mut self, source: RoleSource) -> Self {
        self.source = Some(source);
        self
    }
}

/// A cloud account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_provider: Option<String>,
    #[serde(default)]
    pub permissions: Permissions,
}

impl Account {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cloud_provider: None,
            permissions: Permissions::new(),
        }
    }
}

/// An application.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub name: String,
    #[serde(default)]
    pub permissions: Permissions,
}

impl Application {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permissions: Permissions::new(),
        }
    }
}

/// A service account and the roles it acts as.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceAccount {
    pub name: String,
    #[serde(default)]
    pub member_of: BTreeSet<String>,
}

impl ServiceAccount {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            member_of: BTreeSet::new(),
        }
    }
}

/// A build/CI service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildService {
    pub name: String,
    #[serde(default)]
    pub permissions: Permissions,
}

impl BuildService {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permissions: Permissions::new(),
        }
    }
}

/// A grantable resource, tagged by its [`ResourceType`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "resourceType", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Resource {
    Account(Account),
    Application(Application),
    ServiceAccount(ServiceAccount),
    Role(Role),
    BuildService(BuildService),
}

impl Resource {
    /// The resource name, unique within its type for a given user.
    pub fn name(&self) -> &str {
        match self {
            Resource::Account(r) => &r.name,
            Resource::Application(r) => &r.name,
            Resource::ServiceAccount(r) => &r.name,
            Resource::Role(r) => &r.name,
            Resource::BuildService(r) => &r.name,
        }
    }

    pub fn resource_type(&self) -> ResourceType {
        match self {
            Resource::Account(_) => ResourceType::Account,
            Resource::Application(_) => ResourceType::Application,
            Resource::ServiceAccount(_) => ResourceType::ServiceAccount,
            Resource::Role(_) => ResourceType::Role,
            Resource::BuildService(_) => ResourceType::BuildService,
        }
    }

    /// Returns the role if this resource is one.
    pub fn as_role(&self) -> Option<&Role> {
        match self {
            Resource::Role(role) => Some(role),
            _ => None,
        }
    }
}

impl From<Role> for Resource {
    fn from(role: Role) -> Self {
        Resource::Role(role)
    }
}

impl From<Account> for Resource {
    fn from(account: Account) -> Self {
        Resource::Account(account)
    }
}

impl From<Application> for Resource {
    fn from(application: Application) -> Self {
        Resource::Application(application)
    }
}

impl From<ServiceAccount> for Resource {
    fn from(service_account: ServiceAccount) -> Self {
        Resource::ServiceAccount(service_account)
    }
}

impl From<BuildService> for Resource {
    fn from(build_service: BuildService) -> Self {
        Resource::BuildService(build_service)
    }
}

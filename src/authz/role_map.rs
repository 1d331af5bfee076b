use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{role_key, PermissionMatch};

// =============================================================================
// PERMISSION
// =============================================================================

/// A capability granted by a role, usually shaped `resource:action`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Permission {
    #[schema(example = "user:create")]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PermissionRepr {
    Id(String),
    Detailed {
        #[serde(alias = "value")]
        id: String,
        #[serde(default, alias = "display")]
        name: Option<String>,
        #[serde(default)]
        description: Option<String>,
    },
}

impl<'de> Deserialize<'de> for Permission {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        PermissionRepr::deserialize(deserializer).map(Into::into)
    }
}

impl From<PermissionRepr> for Permission {
    fn from(repr: PermissionRepr) -> Self {
        match repr {
            PermissionRepr::Id(id) => Permission::new(id),
            PermissionRepr::Detailed { id, name, description } => Permission { id, name, description },
        }
    }
}

impl Permission {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
        }
    }

    pub fn resource(&self) -> Option<&str> {
        self.id.split_once(':').map(|(resource, _)| resource)
    }

    pub fn action(&self) -> Option<&str> {
        self.id.split_once(':').map(|(_, action)| action)
    }
}

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RoleMember {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct RoleEntry {
    #[serde(default)]
    pub users: Vec<RoleMember>,
    #[serde(default)]
    pub permissions: Vec<Permission>,
}

impl RoleEntry {
    pub fn with_permissions<I, S>(permissions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: Vec::new(),
            permissions: permissions.into_iter().map(Permission::new).collect(),
        }
    }

    pub fn permission_ids(&self) -> impl Iterator<Item = &str> {
        self.permissions.iter().map(|p| p.id.as_str())
    }

    fn merge(&mut self, other: RoleEntry) {
        for user in other.users {
            if !self.users.iter().any(|u| u.id == user.id) {
                self.users.push(user);
            }
        }
        for permission in other.permissions {
            if !self.permissions.iter().any(|p| p.id == permission.id) {
                self.permissions.push(permission);
            }
        }
    }
}

// =============================================================================
// ROLE MAP
// =============================================================================

/// The whole role graph as last fetched from the identity provider.
///
/// Role keys are kept verbatim; lookups go through a lower-cased index so a
/// session claim of `Dev` finds the upstream role `dev`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, RoleEntry>", into = "BTreeMap<String, RoleEntry>")]
pub struct RoleMap {
    roles: BTreeMap<String, RoleEntry>,
    index: HashMap<String, Vec<String>>,
}

impl From<BTreeMap<String, RoleEntry>> for RoleMap {
    fn from(roles: BTreeMap<String, RoleEntry>) -> Self {
        let mut index: HashMap<String, Vec<String>> = HashMap::new();
        for name in roles.keys() {
            index.entry(role_key(name)).or_default().push(name.clone());
        }
        Self { roles, index }
    }
}

impl From<RoleMap> for BTreeMap<String, RoleEntry> {
    fn from(map: RoleMap) -> Self {
        map.roles
    }
}

impl FromIterator<(String, RoleEntry)> for RoleMap {
    fn from_iter<T: IntoIterator<Item = (String, RoleEntry)>>(iter: T) -> Self {
        let mut roles: BTreeMap<String, RoleEntry> = BTreeMap::new();
        for (name, entry) in iter {
            match roles.get_mut(&name) {
                Some(existing) => existing.merge(entry),
                None => {
                    roles.insert(name, entry);
                }
            }
        }
        roles.into()
    }
}

impl RoleMap {
    pub fn roles(&self) -> &BTreeMap<String, RoleEntry> {
        &self.roles
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    /// Entries whose name matches `role` ignoring case.
    pub fn lookup(&self, role: &str) -> impl Iterator<Item = &RoleEntry> {
        self.index
            .get(&role_key(role))
            .into_iter()
            .flatten()
            .filter_map(|name| self.roles.get(name))
    }

    /// Union of permission ids granted to any of `role_names`.
    pub fn permissions_for<S: AsRef<str>>(&self, role_names: &[S]) -> BTreeSet<String> {
        role_names
            .iter()
            .flat_map(|role| self.lookup(role.as_ref()))
            .flat_map(RoleEntry::permission_ids)
            .map(str::to_string)
            .collect()
    }

    /// Reverse lookup: roles whose permission set contains `permission`.
    pub fn roles_granting(&self, permission: &str, policy: PermissionMatch) -> Vec<&str> {
        self.roles
            .iter()
            .filter(|(_, entry)| entry.permission_ids().any(|id| policy.matches(id, permission)))
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Number of distinct permission ids across all roles.
    pub fn permission_count(&self) -> usize {
        self.roles
            .values()
            .flat_map(RoleEntry::permission_ids)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

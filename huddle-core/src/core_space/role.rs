//! Roles, permission tokens and the static role catalog

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Coarse-grained permission tier, resolvable at workspace or channel scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Can manage channels, members, and roles
    Admin,
    /// Default role, can participate in channels
    Member,
    /// Whitelist-only access: channel membership must be explicit
    Guest,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Admin, Role::Member, Role::Guest];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Member => "member",
            Role::Guest => "guest",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = UnknownToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(Role::Admin),
            "member" => Ok(Role::Member),
            "guest" => Ok(Role::Guest),
            other => Err(UnknownToken(other.to_string())),
        }
    }
}

/// Fine-grained capability token layered on top of role defaults
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    Post,
    View,
    Moderate,
    ManageMembers,
    ManageChannels,
    DeleteMessages,
    UploadFiles,
    React,
    InviteMembers,
}

impl Permission {
    pub const ALL: [Permission; 9] = [
        Permission::Post,
        Permission::View,
        Permission::Moderate,
        Permission::ManageMembers,
        Permission::ManageChannels,
        Permission::DeleteMessages,
        Permission::UploadFiles,
        Permission::React,
        Permission::InviteMembers,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::Post => "post",
            Permission::View => "view",
            Permission::Moderate => "moderate",
            Permission::ManageMembers => "manage_members",
            Permission::ManageChannels => "manage_channels",
            Permission::DeleteMessages => "delete_messages",
            Permission::UploadFiles => "upload_files",
            Permission::React => "react",
            Permission::InviteMembers => "invite_members",
        }
    }
}

impl fmt::Display for Permission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Permission {
    type Err = UnknownToken;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Permission::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| UnknownToken(s.to_string()))
    }
}

/// Error returned when parsing a role or permission token fails
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown token: {0}")]
pub struct UnknownToken(pub String);

/// Set of permission tokens. Sets only ever grow by union; there is no deny.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn contains(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn insert(&mut self, permission: Permission) -> bool {
        self.0.insert(permission)
    }

    /// Union of both sets
    pub fn union(&self, other: &PermissionSet) -> PermissionSet {
        PermissionSet(self.0.union(&other.0).copied().collect())
    }

    pub fn extend(&mut self, other: &PermissionSet) {
        self.0.extend(other.0.iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Permission> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<Permission> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = Permission>>(iter: I) -> Self {
        PermissionSet(iter.into_iter().collect())
    }
}

impl<const N: usize> From<[Permission; N]> for PermissionSet {
    fn from(tokens: [Permission; N]) -> Self {
        tokens.into_iter().collect()
    }
}

/// Static table of role → default permission set
pub struct RoleCatalog;

impl RoleCatalog {
    /// Default permissions granted by a role
    pub fn defaults(role: Role) -> PermissionSet {
        use Permission::*;
        match role {
            Role::Admin => Self::full_set(),
            Role::Member => PermissionSet::from([Post, View, React, UploadFiles, InviteMembers]),
            Role::Guest => PermissionSet::from([Post, View, React]),
        }
    }

    /// Every permission token
    pub fn full_set() -> PermissionSet {
        Permission::ALL.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_has_everything() {
        let admin = RoleCatalog::defaults(Role::Admin);
        assert_eq!(admin.len(), Permission::ALL.len());
        assert_eq!(admin, RoleCatalog::full_set());
    }

    #[test]
    fn test_member_cannot_manage_channels_by_default() {
        let member = RoleCatalog::defaults(Role::Member);
        assert!(member.contains(Permission::Post));
        assert!(!member.contains(Permission::ManageChannels));
        assert!(!member.contains(Permission::ManageMembers));
    }

    #[test]
    fn test_guest_can_post_but_not_upload() {
        let guest = RoleCatalog::defaults(Role::Guest);
        assert!(guest.contains(Permission::Post));
        assert!(!guest.contains(Permission::UploadFiles));
        assert!(!guest.contains(Permission::InviteMembers));
    }

    #[test]
    fn test_union_is_additive() {
        let base = RoleCatalog::defaults(Role::Guest);
        let extra = PermissionSet::from([Permission::ManageChannels]);
        let merged = base.union(&extra);
        assert!(merged.contains(Permission::ManageChannels));
        assert!(merged.contains(Permission::Post));
        assert_eq!(merged.len(), base.len() + 1);
    }

    #[test]
    fn test_token_parsing() {
        for permission in Permission::ALL {
            assert_eq!(permission.as_str().parse::<Permission>(), Ok(permission));
        }
        for role in Role::ALL {
            assert_eq!(role.as_str().parse::<Role>(), Ok(role));
        }
        assert!("deny_all".parse::<Permission>().is_err());
    }

    #[test]
    fn test_permission_set_serializes_as_snake_case_list() {
        let set = PermissionSet::from([Permission::ManageMembers, Permission::Post]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, "[\"post\",\"manage_members\"]");
    }
}

//! Workspace data structures and operations

use super::types::{normalize_email, Timestamp, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A Workspace is the top-level container for channels and members
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    /// Unique identifier, also used as the join code
    pub id: WorkspaceId,

    /// Human-readable name
    pub name: String,

    /// Visibility mode (public or private)
    pub visibility: WorkspaceVisibility,

    /// Owner of the Workspace. Always an implicit admin.
    pub owner_id: UserId,

    /// Member set (the owner included)
    pub members: BTreeSet<UserId>,

    /// Pending email invitations
    pub invitations: BTreeSet<String>,

    /// Pending join requests (public workspaces)
    pub join_requests: BTreeSet<UserId>,

    /// When the Workspace was created
    pub created_at: Timestamp,

    /// Last time Workspace metadata was updated
    pub updated_at: Timestamp,
}

impl Workspace {
    /// Create a new Workspace owned by `owner_id`
    pub fn new(name: String, owner_id: UserId, visibility: WorkspaceVisibility) -> Self {
        let now = Timestamp::now();
        let mut members = BTreeSet::new();
        members.insert(owner_id.clone());

        Workspace {
            id: WorkspaceId::generate(),
            name,
            visibility,
            owner_id,
            members,
            invitations: BTreeSet::new(),
            join_requests: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_owner(&self, user_id: &UserId) -> bool {
        &self.owner_id == user_id
    }

    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.members.contains(user_id)
    }

    pub fn is_public(&self) -> bool {
        self.visibility == WorkspaceVisibility::Public
    }

    /// Whether an email (any casing) has a pending invitation
    pub fn has_invitation(&self, email: &str) -> bool {
        self.invitations.contains(&normalize_email(email))
    }
}

/// Workspace visibility modes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkspaceVisibility {
    /// Anyone can join with the workspace id
    Public,
    /// Joining requires a pending email invitation
    Private,
}

impl WorkspaceVisibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkspaceVisibility::Public => "public",
            WorkspaceVisibility::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(WorkspaceVisibility::Public),
            "private" => Some(WorkspaceVisibility::Private),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_workspace() {
        let owner = UserId::new("alice");
        let workspace = Workspace::new("Acme".to_string(), owner.clone(), WorkspaceVisibility::Public);

        assert_eq!(workspace.name, "Acme");
        assert!(workspace.is_owner(&owner));
        assert!(workspace.is_member(&owner));
        assert_eq!(workspace.members.len(), 1);
        assert!(workspace.invitations.is_empty());
    }

    #[test]
    fn test_invitation_lookup_ignores_case() {
        let mut workspace = Workspace::new(
            "Acme".to_string(),
            UserId::new("alice"),
            WorkspaceVisibility::Private,
        );
        workspace.invitations.insert("bob@example.com".to_string());
        assert!(workspace.has_invitation("BOB@example.com"));
        assert!(!workspace.has_invitation("carol@example.com"));
    }
}

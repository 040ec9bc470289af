//! Channel data structures

use super::types::{normalize_email, ChannelId, Timestamp, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A Channel is a sub-space of a Workspace where messages are posted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    /// Unique identifier, also used as the join code
    pub id: ChannelId,

    /// Owning Workspace (immutable)
    pub workspace_id: WorkspaceId,

    /// Human-readable name
    pub name: String,

    /// Public or private
    pub kind: ChannelKind,

    /// Explicit members
    pub members: BTreeSet<UserId>,

    /// Pending email invitations
    pub invitations: BTreeSet<String>,

    pub created_by: UserId,

    pub created_at: Timestamp,
}

impl Channel {
    /// Create a new Channel with the creator as its first member
    pub fn new(workspace_id: WorkspaceId, name: String, kind: ChannelKind, creator_id: UserId) -> Self {
        let mut members = BTreeSet::new();
        members.insert(creator_id.clone());

        Channel {
            id: ChannelId::generate(),
            workspace_id,
            name,
            kind,
            members,
            invitations: BTreeSet::new(),
            created_by: creator_id,
            created_at: Timestamp::now(),
        }
    }

    /// Explicit membership only
    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.members.contains(user_id)
    }

    pub fn is_public(&self) -> bool {
        self.kind == ChannelKind::Public
    }

    pub fn has_invitation(&self, email: &str) -> bool {
        self.invitations.contains(&normalize_email(email))
    }
}

/// Channel types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Joinable by any non-guest workspace member
    Public,
    /// Membership/invitation gated
    Private,
}

impl ChannelKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Public => "public",
            ChannelKind::Private => "private",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "public" => Some(ChannelKind::Public),
            "private" => Some(ChannelKind::Private),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_channel() {
        let creator = UserId::new("alice");
        let channel = Channel::new(
            WorkspaceId::new("w1"),
            "general".to_string(),
            ChannelKind::Public,
            creator.clone(),
        );

        assert_eq!(channel.name, "general");
        assert!(channel.is_public());
        assert!(channel.is_member(&creator));
        assert_eq!(channel.members.len(), 1);
    }

    #[test]
    fn test_kind_round_trip_through_str() {
        for kind in [ChannelKind::Public, ChannelKind::Private] {
            assert_eq!(ChannelKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(ChannelKind::parse("secret"), None);
    }
}

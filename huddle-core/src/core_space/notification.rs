//! Notification records

use super::types::{ChannelId, MessageId, NotificationId, Timestamp, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Mention,
    Message,
    WorkspaceInvite,
    ChannelInvite,
    JoinRequest,
    JoinApproved,
    JoinRejected,
}

impl NotificationKind {
    pub const ALL: [NotificationKind; 7] = [
        NotificationKind::Mention,
        NotificationKind::Message,
        NotificationKind::WorkspaceInvite,
        NotificationKind::ChannelInvite,
        NotificationKind::JoinRequest,
        NotificationKind::JoinApproved,
        NotificationKind::JoinRejected,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Mention => "mention",
            NotificationKind::Message => "message",
            NotificationKind::WorkspaceInvite => "workspace_invite",
            NotificationKind::ChannelInvite => "channel_invite",
            NotificationKind::JoinRequest => "join_request",
            NotificationKind::JoinApproved => "join_approved",
            NotificationKind::JoinRejected => "join_rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.as_str() == s)
    }
}

/// A notification addressed to a single recipient.
///
/// Only the recipient may flip `read`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub kind: NotificationKind,

    /// User whose action produced the notification
    pub actor_id: Option<UserId>,

    pub workspace_id: Option<WorkspaceId>,
    pub channel_id: Option<ChannelId>,
    pub message_id: Option<MessageId>,

    pub read: bool,
    pub created_at: Timestamp,
}

impl Notification {
    pub fn new(recipient_id: UserId, kind: NotificationKind) -> Self {
        Notification {
            id: NotificationId::generate(),
            recipient_id,
            kind,
            actor_id: None,
            workspace_id: None,
            channel_id: None,
            message_id: None,
            read: false,
            created_at: Timestamp::now(),
        }
    }

    pub fn with_actor(mut self, actor_id: UserId) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn with_workspace(mut self, workspace_id: WorkspaceId) -> Self {
        self.workspace_id = Some(workspace_id);
        self
    }

    pub fn with_channel(mut self, channel_id: ChannelId) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    pub fn with_message(mut self, message_id: MessageId) -> Self {
        self.message_id = Some(message_id);
        self
    }
}

//! Posted messages

use super::types::{ChannelId, MessageId, Timestamp, UserId, WorkspaceId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub workspace_id: WorkspaceId,
    pub channel_id: ChannelId,
    pub sender_id: UserId,
    pub text: String,
    pub created_at: Timestamp,
}

impl Message {
    pub fn new(workspace_id: WorkspaceId, channel_id: ChannelId, sender_id: UserId, text: String) -> Self {
        Message {
            id: MessageId::generate(),
            workspace_id,
            channel_id,
            sender_id,
            text,
            created_at: Timestamp::now(),
        }
    }
}

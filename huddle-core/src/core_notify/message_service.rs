//! The send-message flow
//!
//! `post_message` guard, append, then fan-out on a detached task. The caller
//! gets the stored message back as soon as it is appended; delivery happens
//! afterwards and never fails the send.

use super::dispatch::{DeliveryReport, NotificationDispatcher};
use super::fanout::NotificationFanout;
use crate::core_access::{AccessError, AccessGuard, AccessResult};
use crate::core_space::message::Message;
use crate::core_space::storage::Store;
use crate::core_space::types::{ChannelId, UserId};
use crate::metrics::{self, record_delivery_failure, Timer, FANOUT_DURATION_MS, MESSAGES_POSTED};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// A stored message and its in-flight delivery
#[derive(Debug)]
pub struct Posted {
    pub message: Message,

    /// Resolves once fan-out finishes. Dropping it detaches the task.
    pub delivery: JoinHandle<DeliveryReport>,
}

pub struct MessageService {
    store: Arc<dyn Store>,
    guard: AccessGuard,
    fanout: Arc<NotificationFanout>,
    dispatcher: Arc<NotificationDispatcher>,
    max_message_len: usize,
}

impl MessageService {
    pub fn new(
        store: Arc<dyn Store>,
        fanout: Arc<NotificationFanout>,
        dispatcher: Arc<NotificationDispatcher>,
        max_message_len: usize,
    ) -> Self {
        Self {
            guard: AccessGuard::new(store.clone()),
            store,
            fanout,
            dispatcher,
            max_message_len,
        }
    }

    /// Must be called from within a Tokio runtime
    pub async fn send_message(&self, sender: &UserId, channel_id: &ChannelId, text: &str) -> AccessResult<Posted> {
        let grant = self.guard.post_message(sender, channel_id)?;

        let text = text.trim();
        let len = text.chars().count();
        if len == 0 {
            return Err(AccessError::InvalidInput("message text is empty".to_string()));
        }
        if len > self.max_message_len {
            return Err(AccessError::InvalidInput(format!(
                "message is {} characters, limit is {}",
                len, self.max_message_len
            )));
        }

        let message = Message::new(
            grant.snapshot.workspace.id.clone(),
            channel_id.clone(),
            sender.clone(),
            text.to_string(),
        );
        self.store.append_message(&message)?;
        metrics::record_counter(MESSAGES_POSTED, 1);
        info!(message_id = %message.id, channel_id = %channel_id, sender = %sender, "message posted");

        let delivery = tokio::spawn(deliver(self.fanout.clone(), self.dispatcher.clone(), message.clone()));
        Ok(Posted { message, delivery })
    }

    /// Most recent messages, oldest first. Requires view access.
    pub async fn history(&self, user_id: &UserId, channel_id: &ChannelId, limit: usize) -> AccessResult<Vec<Message>> {
        self.guard.view_channel(Some(user_id), channel_id)?;
        let mut messages = self.store.list_messages(channel_id, limit)?;
        messages.reverse();
        Ok(messages)
    }
}

async fn deliver(
    fanout: Arc<NotificationFanout>,
    dispatcher: Arc<NotificationDispatcher>,
    message: Message,
) -> DeliveryReport {
    let timer = Timer::new(FANOUT_DURATION_MS);
    let report = match fanout.plan(&message) {
        Ok(plan) => {
            let mut report = dispatcher.dispatch(plan.intents).await;
            report.failed += plan.unresolved;
            report
        }
        Err(e) => {
            record_delivery_failure("plan");
            warn!(message_id = %message.id, error = %e, "fan-out planning failed");
            DeliveryReport {
                failed: 1,
                ..Default::default()
            }
        }
    };
    timer.stop();
    report
}

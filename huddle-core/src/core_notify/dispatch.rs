//! Delivery intent execution
//!
//! Each recipient is delivered independently: a failure for one is logged and
//! counted and never stops the others.

use super::broadcaster::{BroadcastError, Broadcaster, RoomId};
use super::email::{MailError, Mailer};
use super::fanout::{DeliveryIntent, EmailFallback};
use crate::core_space::notification::Notification;
use crate::core_space::storage::{Store, StoreError};
use crate::metrics::{self, record_delivery_failure, NOTIFICATIONS_EMAILED, NOTIFICATIONS_PUSHED};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Personal-room event carrying a notification
pub const NOTIFICATION_EVENT: &str = "notification";

#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Failed to persist notification: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to push: {0}")]
    Broadcast(#[from] BroadcastError),

    #[error("Failed to email: {0}")]
    Mail(#[from] MailError),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}

/// What a dispatch run achieved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryReport {
    /// Room broadcasts emitted
    pub broadcasts: usize,
    /// Notifications persisted and pushed to the recipient's room
    pub pushed: usize,
    /// Fallback emails sent
    pub emailed: usize,
    /// Failed delivery steps
    pub failed: usize,
}

impl DeliveryReport {
    pub fn merge(&mut self, other: DeliveryReport) {
        self.broadcasts += other.broadcasts;
        self.pushed += other.pushed;
        self.emailed += other.emailed;
        self.failed += other.failed;
    }
}

pub struct NotificationDispatcher {
    store: Arc<dyn Store>,
    broadcaster: Arc<dyn Broadcaster>,
    mailer: Arc<dyn Mailer>,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn Store>, broadcaster: Arc<dyn Broadcaster>, mailer: Arc<dyn Mailer>) -> Self {
        Self {
            store,
            broadcaster,
            mailer,
        }
    }

    /// Execute every intent. Never fails; failures show up in the report.
    pub async fn dispatch(&self, intents: Vec<DeliveryIntent>) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        for intent in intents {
            match intent {
                DeliveryIntent::Broadcast { room, event, payload } => {
                    match self.broadcaster.emit_to_room(&room, &event, payload).await {
                        Ok(_) => report.broadcasts += 1,
                        Err(e) => {
                            report.failed += 1;
                            record_delivery_failure("broadcast");
                            warn!(room = %room, event = %event, error = %e, "room broadcast failed");
                        }
                    }
                }
                DeliveryIntent::Notify { notification, email } => {
                    report.merge(self.deliver(notification, email).await);
                }
            }
        }

        debug!(
            broadcasts = report.broadcasts,
            pushed = report.pushed,
            emailed = report.emailed,
            failed = report.failed,
            "dispatch complete"
        );
        report
    }

    /// Persist, push, then email if the recipient is absent once the push
    /// has gone out
    async fn deliver(&self, notification: Notification, email: Option<EmailFallback>) -> DeliveryReport {
        let mut report = DeliveryReport::default();
        let recipient = notification.recipient_id.clone();
        let room = RoomId::user(&recipient);

        if let Err(e) = self.store.insert_notification(&notification) {
            report.failed += 1;
            record_delivery_failure("persist");
            warn!(recipient = %recipient, kind = notification.kind.as_str(), error = %e, "notification not persisted");
            return report;
        }

        match self.push(&room, &notification).await {
            Ok(()) => {
                report.pushed += 1;
                metrics::record_counter(NOTIFICATIONS_PUSHED, 1);
            }
            Err(e) => {
                report.failed += 1;
                record_delivery_failure("push");
                warn!(recipient = %recipient, error = %e, "notification push failed");
            }
        }

        let Some(fallback) = email else {
            return report;
        };

        let present = match self.broadcaster.is_present(&room).await {
            Ok(present) => present,
            Err(e) => {
                // Unknown presence is treated as absent
                report.failed += 1;
                record_delivery_failure("presence");
                warn!(recipient = %recipient, error = %e, "presence check failed");
                false
            }
        };
        if present {
            return report;
        }

        match self
            .mailer
            .send_notification_email(&fallback.address, &fallback.content)
            .await
        {
            Ok(()) => {
                report.emailed += 1;
                metrics::record_counter(NOTIFICATIONS_EMAILED, 1);
            }
            Err(e) => {
                report.failed += 1;
                record_delivery_failure("email");
                warn!(recipient = %recipient, error = %e, "fallback email failed");
            }
        }
        report
    }

    async fn push(&self, room: &RoomId, notification: &Notification) -> Result<(), DeliveryError> {
        let payload = serde_json::to_value(notification)?;
        self.broadcaster.emit_to_room(room, NOTIFICATION_EVENT, payload).await?;
        Ok(())
    }
}

//! Recording collaborators with failure injection

use crate::core_notify::broadcaster::{BroadcastError, Broadcaster, RoomEvent, RoomId};
use crate::core_notify::email::{MailError, Mailer, RenderedEmail};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Broadcaster that records every emitted event. Presence is set by hand.
#[derive(Default)]
pub struct RecordingBroadcaster {
    events: Mutex<Vec<RoomEvent>>,
    present: Mutex<HashSet<RoomId>>,
    failing: Mutex<HashSet<RoomId>>,
}

impl RecordingBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_present(&self, room: RoomId) {
        lock(&self.present).insert(room);
    }

    pub fn set_absent(&self, room: &RoomId) {
        lock(&self.present).remove(room);
    }

    /// Make every emit to `room` fail
    pub fn fail_room(&self, room: RoomId) {
        lock(&self.failing).insert(room);
    }

    pub fn events(&self) -> Vec<RoomEvent> {
        lock(&self.events).clone()
    }

    pub fn events_for(&self, room: &RoomId) -> Vec<RoomEvent> {
        lock(&self.events).iter().filter(|e| &e.room == room).cloned().collect()
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn emit_to_room(&self, room: &RoomId, event: &str, payload: serde_json::Value) -> Result<usize, BroadcastError> {
        if lock(&self.failing).contains(room) {
            return Err(BroadcastError::Failed(format!("injected failure for {}", room)));
        }
        lock(&self.events).push(RoomEvent {
            room: room.clone(),
            event: event.to_string(),
            payload,
        });
        Ok(usize::from(lock(&self.present).contains(room)))
    }

    async fn is_present(&self, room: &RoomId) -> Result<bool, BroadcastError> {
        Ok(lock(&self.present).contains(room))
    }
}

/// Mailer that records sent emails
#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<(String, RenderedEmail)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_address(&self, address: impl Into<String>) {
        lock(&self.failing).insert(address.into());
    }

    pub fn sent(&self) -> Vec<(String, RenderedEmail)> {
        lock(&self.sent).clone()
    }

    /// Recipient addresses in send order
    pub fn sent_to(&self) -> Vec<String> {
        lock(&self.sent).iter().map(|(to, _)| to.clone()).collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send_notification_email(&self, recipient: &str, email: &RenderedEmail) -> Result<(), MailError> {
        if lock(&self.failing).contains(recipient) {
            return Err(MailError::Transport(format!("injected failure for {}", recipient)));
        }
        lock(&self.sent).push((recipient.to_string(), email.clone()));
        Ok(())
    }
}

//! Notification fan-out planning
//!
//! Planning is the decision step only: it reads the store and returns a list
//! of [`DeliveryIntent`]s. Executing them is the dispatcher's job.

use super::broadcaster::RoomId;
use super::email::{EmailContext, EmailRenderer, RenderedEmail};
use super::mention::extract_mentions;
use crate::core_space::channel::Channel;
use crate::core_space::message::Message;
use crate::core_space::notification::{Notification, NotificationKind};
use crate::core_space::storage::{Store, StoreResult};
use crate::core_space::types::UserId;
use crate::core_space::user::{NotificationPreference, User};
use crate::core_space::workspace::Workspace;
use crate::metrics::record_delivery_failure;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Channel room event carrying a freshly posted message
pub const NEW_MESSAGE_EVENT: &str = "new_message";

/// Email sent when the recipient turns out to be offline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailFallback {
    pub address: String,
    pub content: RenderedEmail,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryIntent {
    /// Emit an event to everyone in a room
    Broadcast {
        room: RoomId,
        event: String,
        payload: serde_json::Value,
    },

    /// Persist and push a notification to one recipient
    Notify {
        notification: Notification,
        email: Option<EmailFallback>,
    },
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FanoutPlan {
    pub intents: Vec<DeliveryIntent>,
    /// Recipients skipped because their lookup failed
    pub unresolved: usize,
}

impl FanoutPlan {
    pub fn notifications(&self) -> impl Iterator<Item = &Notification> {
        self.intents.iter().filter_map(|i| match i {
            DeliveryIntent::Notify { notification, .. } => Some(notification),
            DeliveryIntent::Broadcast { .. } => None,
        })
    }

    /// Notification for `user`, if the plan has one
    pub fn notification_for(&self, user_id: &UserId) -> Option<&Notification> {
        self.notifications().find(|n| &n.recipient_id == user_id)
    }

    /// Whether `user`'s notification carries an email fallback
    pub fn has_email_for(&self, user_id: &UserId) -> bool {
        self.intents.iter().any(|i| {
            matches!(i, DeliveryIntent::Notify { notification, email: Some(_) } if &notification.recipient_id == user_id)
        })
    }

    pub fn is_empty(&self) -> bool {
        self.intents.is_empty()
    }
}

pub struct NotificationFanout {
    store: Arc<dyn Store>,
    renderer: EmailRenderer,
    email_fallback: bool,
}

impl NotificationFanout {
    pub fn new(store: Arc<dyn Store>, renderer: EmailRenderer) -> Self {
        Self {
            store,
            renderer,
            email_fallback: true,
        }
    }

    /// Disable email fallbacks altogether
    pub fn with_email_fallback(mut self, enabled: bool) -> Self {
        self.email_fallback = enabled;
        self
    }

    /// Plan delivery for a posted message:
    ///
    /// 1. `new_message` to the channel room
    /// 2. a `mention` notification (with email fallback) per resolved,
    ///    non-self handle, whatever the recipient's preference
    /// 3. a `message` notification per remaining channel member whose
    ///    preference for the channel is `all`
    pub fn plan(&self, message: &Message) -> StoreResult<FanoutPlan> {
        let Some(channel) = self.store.find_channel(&message.channel_id)? else {
            debug!(channel_id = %message.channel_id, "channel gone before fan-out");
            return Ok(FanoutPlan::default());
        };
        let sender = self.store.find_user(&message.sender_id).unwrap_or_else(|e| {
            warn!(user_id = %message.sender_id, error = %e, "sender lookup failed");
            None
        });
        let actor = sender
            .as_ref()
            .map(|u| u.display_name.as_str())
            .unwrap_or(message.sender_id.as_str());

        let mut plan = FanoutPlan::default();
        plan.intents.push(DeliveryIntent::Broadcast {
            room: RoomId::channel(&channel.id),
            event: NEW_MESSAGE_EVENT.to_string(),
            payload: serde_json::to_value(message)?,
        });

        let mut notified: HashSet<UserId> = HashSet::new();
        notified.insert(message.sender_id.clone());

        for handle in extract_mentions(&message.text) {
            let user = match self.store.find_user_by_handle(&handle) {
                Ok(Some(user)) => user,
                Ok(None) => continue,
                Err(e) => {
                    record_delivery_failure("resolve");
                    warn!(handle = %handle, error = %e, "mention lookup failed");
                    plan.unresolved += 1;
                    continue;
                }
            };
            if !notified.insert(user.id.clone()) {
                continue;
            }

            let email = self.email_fallback.then(|| EmailFallback {
                address: user.email.clone(),
                content: self.renderer.render(
                    NotificationKind::Mention,
                    &EmailContext {
                        actor,
                        channel: Some(&channel.name),
                        excerpt: Some(&message.text),
                        ..Default::default()
                    },
                ),
            });
            plan.intents.push(DeliveryIntent::Notify {
                notification: message_notification(&user.id, NotificationKind::Mention, message),
                email,
            });
        }

        for member_id in &channel.members {
            if notified.contains(member_id) {
                continue;
            }
            let member = match self.store.find_user(member_id) {
                Ok(Some(member)) => member,
                Ok(None) => continue,
                Err(e) => {
                    record_delivery_failure("resolve");
                    warn!(user_id = %member_id, error = %e, "member lookup failed");
                    plan.unresolved += 1;
                    continue;
                }
            };
            if member.preference_for(&channel.id) == NotificationPreference::Mute {
                continue;
            }
            notified.insert(member.id.clone());
            plan.intents.push(DeliveryIntent::Notify {
                notification: message_notification(&member.id, NotificationKind::Message, message),
                email: None,
            });
        }

        debug!(
            message_id = %message.id,
            intents = plan.intents.len(),
            "fan-out planned"
        );
        Ok(plan)
    }

    /// Intent for a membership event (invites, join requests and their
    /// outcomes). Invites carry an email fallback; the rest are push-only.
    pub fn membership_event(
        &self,
        recipient: &User,
        kind: NotificationKind,
        actor: &User,
        workspace: &Workspace,
        channel: Option<&Channel>,
    ) -> DeliveryIntent {
        let mut notification = Notification::new(recipient.id.clone(), kind)
            .with_actor(actor.id.clone())
            .with_workspace(workspace.id.clone());
        if let Some(channel) = channel {
            notification = notification.with_channel(channel.id.clone());
        }

        let wants_email = matches!(kind, NotificationKind::WorkspaceInvite | NotificationKind::ChannelInvite);
        let email = (self.email_fallback && wants_email).then(|| EmailFallback {
            address: recipient.email.clone(),
            content: self.renderer.render(
                kind,
                &EmailContext {
                    actor: &actor.display_name,
                    workspace: Some(&workspace.name),
                    channel: channel.map(|c| c.name.as_str()),
                    excerpt: None,
                },
            ),
        });

        DeliveryIntent::Notify { notification, email }
    }
}

fn message_notification(recipient: &UserId, kind: NotificationKind, message: &Message) -> Notification {
    Notification::new(recipient.clone(), kind)
        .with_actor(message.sender_id.clone())
        .with_workspace(message.workspace_id.clone())
        .with_channel(message.channel_id.clone())
        .with_message(message.id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_space::channel::ChannelKind;
    use crate::core_space::storage::{IdentityStore, MembershipStore, MemoryStore};
    use crate::core_space::workspace::WorkspaceVisibility;
    use crate::test_utils::FaultyStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        channel: Channel,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        for name in ["alice", "bob", "carol", "dave"] {
            store
                .insert_user(&User::new(UserId::new(name), name, &format!("{}@example.com", name)))
                .unwrap();
        }
        let ws = Workspace::new("Acme".into(), UserId::new("alice"), WorkspaceVisibility::Public);
        store.insert_workspace(&ws).unwrap();
        let mut channel = Channel::new(ws.id.clone(), "general".into(), ChannelKind::Public, UserId::new("alice"));
        channel.members.insert(UserId::new("bob"));
        channel.members.insert(UserId::new("carol"));
        store.insert_channel(&channel).unwrap();
        Fixture { store, channel }
    }

    fn fanout(f: &Fixture) -> NotificationFanout {
        NotificationFanout::new(f.store.clone(), EmailRenderer::default())
    }

    fn post(f: &Fixture, sender: &str, text: &str) -> Message {
        Message::new(
            f.channel.workspace_id.clone(),
            f.channel.id.clone(),
            UserId::new(sender),
            text.to_string(),
        )
    }

    #[test]
    fn test_plan_starts_with_channel_broadcast() {
        let f = fixture();
        let plan = fanout(&f).plan(&post(&f, "alice", "hello")).unwrap();
        match &plan.intents[0] {
            DeliveryIntent::Broadcast { room, event, payload } => {
                assert_eq!(room, &RoomId::channel(&f.channel.id));
                assert_eq!(event, NEW_MESSAGE_EVENT);
                assert_eq!(payload["text"], "hello");
            }
            other => panic!("expected broadcast, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_mention_yields_one_notification_and_no_self() {
        let f = fixture();
        let plan = fanout(&f).plan(&post(&f, "alice", "hi @bob and @bob @alice")).unwrap();

        let bob: Vec<_> = plan
            .notifications()
            .filter(|n| n.recipient_id == UserId::new("bob"))
            .collect();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob[0].kind, NotificationKind::Mention);
        assert!(plan.has_email_for(&UserId::new("bob")));
        assert!(plan.notification_for(&UserId::new("alice")).is_none());
    }

    #[test]
    fn test_members_get_message_notifications_without_email() {
        let f = fixture();
        let plan = fanout(&f).plan(&post(&f, "alice", "hello")).unwrap();
        let carol = plan.notification_for(&UserId::new("carol")).unwrap();
        assert_eq!(carol.kind, NotificationKind::Message);
        assert!(!plan.has_email_for(&UserId::new("carol")));
    }

    #[test]
    fn test_muted_member_still_gets_mentions() {
        let f = fixture();
        f.store
            .set_notification_preference(&UserId::new("carol"), &f.channel.id, NotificationPreference::Mute)
            .unwrap();

        let plan = fanout(&f).plan(&post(&f, "alice", "hello")).unwrap();
        assert!(plan.notification_for(&UserId::new("carol")).is_none());

        let plan = fanout(&f).plan(&post(&f, "alice", "hello @carol")).unwrap();
        assert_eq!(
            plan.notification_for(&UserId::new("carol")).map(|n| n.kind),
            Some(NotificationKind::Mention)
        );
    }

    #[test]
    fn test_mentioned_non_member_is_notified_and_unknown_handles_dropped() {
        let f = fixture();
        let plan = fanout(&f).plan(&post(&f, "alice", "@dave @nobody")).unwrap();
        assert_eq!(
            plan.notification_for(&UserId::new("dave")).map(|n| n.kind),
            Some(NotificationKind::Mention)
        );
        assert_eq!(plan.notifications().count(), 3);
    }

    #[test]
    fn test_failed_member_lookup_skips_only_that_member() {
        let f = fixture();
        let store = Arc::new(FaultyStore::new(f.store.clone()));
        store.fail_user(UserId::new("carol"));
        let plan = NotificationFanout::new(store, EmailRenderer::default())
            .plan(&post(&f, "alice", "hi @bob"))
            .unwrap();

        assert!(matches!(plan.intents[0], DeliveryIntent::Broadcast { .. }));
        assert_eq!(
            plan.notification_for(&UserId::new("bob")).map(|n| n.kind),
            Some(NotificationKind::Mention)
        );
        assert!(plan.notification_for(&UserId::new("carol")).is_none());
        assert_eq!(plan.unresolved, 1);
    }

    #[test]
    fn test_email_fallback_can_be_disabled() {
        let f = fixture();
        let plan = fanout(&f)
            .with_email_fallback(false)
            .plan(&post(&f, "alice", "@bob"))
            .unwrap();
        assert!(!plan.has_email_for(&UserId::new("bob")));
    }
}

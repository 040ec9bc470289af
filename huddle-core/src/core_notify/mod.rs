//! Mention extraction and notification delivery
//!
//! A posted message flows through [`fanout`] (who gets what) and then
//! [`dispatch`] (persist, push, email), off the send path.

pub mod broadcaster;
pub mod dispatch;
pub mod email;
pub mod fanout;
pub mod mention;
pub mod message_service;

pub use broadcaster::{BroadcastError, Broadcaster, RoomBroadcaster, RoomEvent, RoomId};
pub use dispatch::{DeliveryError, DeliveryReport, NotificationDispatcher};
pub use email::{EmailContext, EmailRenderer, MailError, Mailer, RenderedEmail, TracingMailer};
pub use fanout::{DeliveryIntent, EmailFallback, FanoutPlan, NotificationFanout};
pub use mention::extract_mentions;
pub use message_service::{MessageService, Posted};

//! Email fallback: rendering and the mail transport collaborator

use crate::core_space::notification::NotificationKind;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

const EXCERPT_CHARS: usize = 200;

/// Subject and plain-text body of a notification email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedEmail {
    pub subject: String,
    pub body: String,
}

/// Names used to fill in an email
#[derive(Debug, Clone, Default)]
pub struct EmailContext<'a> {
    pub actor: &'a str,
    pub workspace: Option<&'a str>,
    pub channel: Option<&'a str>,
    pub excerpt: Option<&'a str>,
}

#[derive(Debug, Clone)]
pub struct EmailRenderer {
    subject_prefix: String,
    app_url: String,
}

impl EmailRenderer {
    pub fn new(subject_prefix: impl Into<String>, app_url: impl Into<String>) -> Self {
        Self {
            subject_prefix: subject_prefix.into(),
            app_url: app_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn render(&self, kind: NotificationKind, ctx: &EmailContext<'_>) -> RenderedEmail {
        let channel = ctx.channel.map(|c| format!("#{}", c)).unwrap_or_else(|| "a channel".into());
        let workspace = ctx.workspace.unwrap_or("a workspace");

        let headline = match kind {
            NotificationKind::Mention => format!("{} mentioned you in {}", ctx.actor, channel),
            NotificationKind::Message => format!("New message from {} in {}", ctx.actor, channel),
            NotificationKind::WorkspaceInvite => format!("{} invited you to {}", ctx.actor, workspace),
            NotificationKind::ChannelInvite => format!("{} invited you to {}", ctx.actor, channel),
            NotificationKind::JoinRequest => format!("{} asked to join {}", ctx.actor, workspace),
            NotificationKind::JoinApproved => format!("Your request to join {} was approved", workspace),
            NotificationKind::JoinRejected => format!("Your request to join {} was declined", workspace),
        };

        let mut body = headline.clone();
        if let Some(excerpt) = ctx.excerpt {
            body.push_str(":\n\n> ");
            body.push_str(&excerpt_of(excerpt));
        }
        body.push_str(&format!("\n\nOpen Huddle: {}/notifications\n", self.app_url));

        RenderedEmail {
            subject: format!("{} {}", self.subject_prefix, headline).trim_start().to_string(),
            body,
        }
    }
}

impl Default for EmailRenderer {
    fn default() -> Self {
        Self::new("[Huddle]", "http://localhost:3000")
    }
}

fn excerpt_of(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}…", &text[..idx]),
        None => text.to_string(),
    }
}

#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Mail transport error: {0}")]
    Transport(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),
}

/// Email transport collaborator
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_notification_email(&self, recipient: &str, email: &RenderedEmail) -> Result<(), MailError>;
}

/// Mailer that only logs. Used by the CLI where no transport is configured.
#[derive(Debug, Default, Clone)]
pub struct TracingMailer;

#[async_trait]
impl Mailer for TracingMailer {
    async fn send_notification_email(&self, recipient: &str, email: &RenderedEmail) -> Result<(), MailError> {
        if !recipient.contains('@') {
            return Err(MailError::InvalidRecipient(recipient.to_string()));
        }
        info!(recipient, subject = %email.subject, "notification email");
        Ok(())
    }
}

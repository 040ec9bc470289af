//! Wiring of the access core and the notification pipeline
//!
//! [`Huddle`] owns one store handle and shares it with every service, so the
//! guard, membership state machine and fan-out always see the same data.

use crate::config::{Config, StoreConfig};
use crate::core_access::{AccessError, AccessGuard, AccessResult, MembershipService, PermissionResolver};
use crate::core_notify::broadcaster::Broadcaster;
use crate::core_notify::dispatch::NotificationDispatcher;
use crate::core_notify::email::{EmailRenderer, Mailer};
use crate::core_notify::fanout::NotificationFanout;
use crate::core_notify::message_service::MessageService;
use crate::core_space::storage::{SqlStore, Store, StoreError, StoreResult};
use crate::core_space::types::UserId;
use crate::core_space::user::User;
use std::sync::Arc;
use tracing::info;

/// Open the SQLite store described by `config`
pub fn open_store(config: &StoreConfig) -> StoreResult<Arc<dyn Store>> {
    let store = if config.is_in_memory() {
        SqlStore::open_in_memory()?
    } else {
        SqlStore::open(&config.database_path, config.pool_size, config.busy_timeout)?
    };
    info!(path = %config.database_path.display(), pool_size = config.pool_size, "store opened");
    Ok(Arc::new(store))
}

pub struct Huddle {
    store: Arc<dyn Store>,
    guard: AccessGuard,
    membership: MembershipService,
    messages: MessageService,
    max_name_len: usize,
}

impl Huddle {
    pub fn new(
        config: &Config,
        store: Arc<dyn Store>,
        broadcaster: Arc<dyn Broadcaster>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        let notifications = &config.notifications;
        let renderer = EmailRenderer::new(
            notifications.email_subject_prefix.clone(),
            notifications.app_url.clone(),
        );
        let fanout = Arc::new(
            NotificationFanout::new(store.clone(), renderer).with_email_fallback(notifications.email_fallback),
        );
        let dispatcher = Arc::new(NotificationDispatcher::new(store.clone(), broadcaster, mailer));

        Self {
            guard: AccessGuard::new(store.clone()),
            membership: MembershipService::new(
                store.clone(),
                fanout.clone(),
                dispatcher.clone(),
                config.limits.clone(),
            ),
            messages: MessageService::new(store.clone(), fanout, dispatcher, config.limits.max_message_len),
            max_name_len: config.limits.max_name_len,
            store,
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    pub fn resolver(&self) -> &PermissionResolver {
        self.guard.resolver()
    }

    pub fn membership(&self) -> &MembershipService {
        &self.membership
    }

    pub fn messages(&self) -> &MessageService {
        &self.messages
    }

    /// Create an account. The display name doubles as the mention handle.
    pub fn register_user(&self, display_name: &str, email: &str, global_admin: bool) -> AccessResult<User> {
        let display_name = display_name.trim();
        if display_name.is_empty() || display_name.chars().count() > self.max_name_len {
            return Err(AccessError::InvalidInput(format!(
                "display name must be 1 to {} characters",
                self.max_name_len
            )));
        }
        if !email.contains('@') {
            return Err(AccessError::InvalidInput(format!("not an email address: {}", email)));
        }

        let mut user = User::new(UserId::generate(), display_name, email);
        if global_admin {
            user = user.global_admin();
        }
        match self.store.insert_user(&user) {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                return Err(AccessError::InvalidInput(format!("email already registered: {}", user.email)));
            }
            Err(e) => return Err(e.into()),
        }

        info!(user_id = %user.id, handle = %user.display_name, "user registered");
        Ok(user)
    }
}

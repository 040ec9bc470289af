//! Test fixtures
//!
//! [`TestWorld`] wires a [`Huddle`] over any store with recording
//! collaborators, so the same scenario can run against both backends.

use super::recording::{RecordingBroadcaster, RecordingMailer};
use crate::config::Config;
use crate::core_space::storage::{IdentityStore, MemoryStore, SqlStore, Store, StoreResult};
use crate::core_space::types::UserId;
use crate::core_space::user::User;
use crate::service::Huddle;
use std::sync::Arc;

/// User whose id and handle are both `handle`, at `<handle>@example.com`
pub fn test_user(handle: &str) -> User {
    User::new(UserId::new(handle), handle, &format!("{}@example.com", handle))
}

/// Insert one [`test_user`] per handle
pub fn seed_users(store: &dyn Store, handles: &[&str]) -> StoreResult<Vec<User>> {
    handles
        .iter()
        .map(|handle| {
            let user = test_user(handle);
            store.insert_user(&user)?;
            Ok(user)
        })
        .collect()
}

pub struct TestWorld {
    pub store: Arc<dyn Store>,
    pub broadcaster: Arc<RecordingBroadcaster>,
    pub mailer: Arc<RecordingMailer>,
    pub huddle: Huddle,
}

impl TestWorld {
    pub fn with_store(store: Arc<dyn Store>) -> Self {
        Self::with_config(store, &Config::default())
    }

    pub fn with_config(store: Arc<dyn Store>, config: &Config) -> Self {
        let broadcaster = Arc::new(RecordingBroadcaster::new());
        let mailer = Arc::new(RecordingMailer::new());
        let huddle = Huddle::new(config, store.clone(), broadcaster.clone(), mailer.clone());
        Self {
            store,
            broadcaster,
            mailer,
            huddle,
        }
    }

    pub fn memory() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()))
    }

    pub fn sqlite() -> StoreResult<Self> {
        Ok(Self::with_store(Arc::new(SqlStore::open_in_memory()?)))
    }

    /// Both backends, labelled for assertion messages
    pub fn all() -> StoreResult<Vec<(&'static str, Self)>> {
        Ok(vec![("memory", Self::memory()), ("sqlite", Self::sqlite()?)])
    }

    pub fn seed(self, handles: &[&str]) -> StoreResult<Self> {
        seed_users(self.store.as_ref(), handles)?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded_users_resolve_by_handle() {
        for (backend, world) in TestWorld::all().unwrap() {
            let world = world.seed(&["alice", "bob"]).unwrap();
            let bob = world.store.find_user_by_handle("bob").unwrap();
            assert_eq!(bob.map(|u| u.id), Some(UserId::new("bob")), "{}", backend);
        }
    }
}

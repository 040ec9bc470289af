//! Access and fan-out properties, checked against every store backend

use huddle_core::core_access::{Denial, RoleSource};
use huddle_core::core_notify::RoomId;
use huddle_core::core_space::storage::{IdentityStore, MembershipStore, NotificationStore, SqlStore};
use huddle_core::core_space::{
    ChannelId, ChannelKind, NotificationKind, NotificationPreference, Role, RoleCatalog, UserId, Workspace,
    WorkspaceVisibility,
};
use huddle_core::test_utils::{assert_denied, test_user, TestWorld};
use std::sync::Arc;
use std::time::Duration;
use tempfile::{tempdir, TempDir};

fn uid(name: &str) -> UserId {
    UserId::new(name)
}

/// Owner "alice" with a public workspace, member "bob", and a public
/// `general` channel that bob has explicitly joined
async fn team(world: &TestWorld) -> (Workspace, ChannelId) {
    let membership = world.huddle.membership();
    let ws = membership
        .create_workspace(&uid("alice"), "Acme", WorkspaceVisibility::Public)
        .await
        .unwrap();
    membership.join_workspace(&uid("bob"), ws.id.as_str()).await.unwrap();
    let general = membership
        .create_channel(&uid("alice"), &ws.id, "general", ChannelKind::Public)
        .await
        .unwrap();
    membership.join_channel(&uid("bob"), general.id.as_str()).await.unwrap();
    (ws, general.id)
}

fn worlds(handles: &[&str]) -> Vec<(&'static str, TestWorld)> {
    TestWorld::all()
        .unwrap()
        .into_iter()
        .map(|(backend, world)| (backend, world.seed(handles).unwrap()))
        .collect()
}

#[tokio::test]
async fn test_owner_resolves_to_admin_without_record() {
    for (backend, world) in worlds(&["alice", "bob"]) {
        let (ws, general) = team(&world).await;
        assert!(world.store.find_permission(&uid("alice"), &ws.id).unwrap().is_none());

        let access = world.huddle.resolver().resolve(&uid("alice"), &ws.id, Some(&general)).unwrap();
        assert_eq!(access.source, RoleSource::Owner, "{}", backend);
        assert_eq!(access.role(), Some(Role::Admin), "{}", backend);
        assert_eq!(access.permissions, RoleCatalog::full_set(), "{}", backend);
    }
}

#[tokio::test]
async fn test_strangers_are_refused_every_guarded_write() {
    for (backend, world) in worlds(&["alice", "bob", "eve"]) {
        let (ws, general) = team(&world).await;
        let eve = uid("eve");
        let membership = world.huddle.membership();
        println!("checking {}", backend);

        assert_denied(world.huddle.messages().send_message(&eve, &general, "hi").await, Denial::NotAllowed);
        assert_denied(
            membership.create_channel(&eve, &ws.id, "x", ChannelKind::Private).await,
            Denial::NotAllowed,
        );
        assert_denied(
            membership.invite_to_workspace(&eve, &ws.id, "bob@example.com").await,
            Denial::NotAllowed,
        );
        assert_denied(
            membership.invite_to_channel(&eve, &general, "bob@example.com").await,
            Denial::NotAllowed,
        );
        assert_denied(
            membership.add_channel_member(&eve, &general, &uid("bob")).await,
            Denial::NotAllowed,
        );
        assert_denied(
            membership.remove_channel_member(&eve, &general, &uid("bob")).await,
            Denial::NotAllowed,
        );
        assert_denied(
            membership.update_workspace_role(&eve, &ws.id, &uid("bob"), Role::Admin).await,
            Denial::NotAllowed,
        );
        assert_denied(
            membership.update_channel_role(&eve, &general, &uid("bob"), Role::Admin).await,
            Denial::NotAllowed,
        );
        assert_denied(
            membership.remove_workspace_member(&eve, &ws.id, &uid("bob")).await,
            Denial::NotAllowed,
        );
    }
}

#[tokio::test]
async fn test_double_invite_leaves_one_pending_entry() {
    for (backend, world) in worlds(&["alice", "bob", "carol"]) {
        let (ws, general) = team(&world).await;
        let membership = world.huddle.membership();

        assert!(membership.invite_to_workspace(&uid("alice"), &ws.id, "carol@example.com").await.unwrap());
        assert!(!membership.invite_to_workspace(&uid("alice"), &ws.id, "Carol@Example.com").await.unwrap());
        let ws = world.store.find_workspace(&ws.id).unwrap().unwrap();
        assert_eq!(ws.invitations.len(), 1, "{}", backend);

        assert!(membership.invite_to_channel(&uid("alice"), &general, "carol@example.com").await.unwrap());
        assert!(!membership.invite_to_channel(&uid("alice"), &general, "carol@example.com").await.unwrap());
        let channel = world.store.find_channel(&general).unwrap().unwrap();
        assert_eq!(channel.invitations.len(), 1, "{}", backend);

        // One notification per distinct invite
        assert_eq!(world.store.list_notifications(&uid("carol"), false).unwrap().len(), 2, "{}", backend);
    }
}

#[tokio::test]
async fn test_guest_posts_only_where_added() {
    for (backend, world) in worlds(&["alice", "bob", "gus"]) {
        let (ws, general) = team(&world).await;
        let membership = world.huddle.membership();
        let ops = membership
            .create_channel(&uid("alice"), &ws.id, "ops", ChannelKind::Private)
            .await
            .unwrap();
        let other = membership
            .create_channel(&uid("alice"), &ws.id, "other", ChannelKind::Private)
            .await
            .unwrap();
        membership.add_channel_member(&uid("alice"), &ops.id, &uid("gus")).await.unwrap();

        let messages = world.huddle.messages();
        messages.send_message(&uid("gus"), &ops.id, "hello").await.unwrap();
        assert_denied(messages.send_message(&uid("gus"), &other.id, "hello").await, Denial::NotAllowed);
        assert_denied(messages.send_message(&uid("gus"), &general, "hello").await, Denial::NotAllowed);

        let record = world.store.find_permission(&uid("gus"), &ws.id).unwrap().unwrap();
        assert_eq!(record.role, Role::Guest, "{}", backend);
    }
}

#[tokio::test]
async fn test_owner_can_never_be_removed_from_a_channel() {
    for (backend, world) in worlds(&["alice", "bob"]) {
        world.store.insert_user(&test_user("root").global_admin()).unwrap();
        let (ws, general) = team(&world).await;
        let membership = world.huddle.membership();
        membership
            .update_workspace_role(&uid("alice"), &ws.id, &uid("bob"), Role::Admin)
            .await
            .unwrap();

        for caller in ["alice", "bob", "root", "nobody"] {
            assert_denied(
                membership.remove_channel_member(&uid(caller), &general, &uid("alice")).await,
                Denial::CannotRemoveOwner,
            );
        }
        assert!(world.store.find_channel(&general).unwrap().unwrap().is_member(&uid("alice")), "{}", backend);
    }
}

#[tokio::test]
async fn test_repeated_mention_notifies_once_and_never_the_sender() {
    for (backend, world) in worlds(&["alice", "bob"]) {
        let (_, general) = team(&world).await;

        let posted = world
            .huddle
            .messages()
            .send_message(&uid("alice"), &general, "hi @bob and @bob @alice")
            .await
            .unwrap();
        let report = posted.delivery.await.unwrap();
        assert_eq!(report.pushed, 1, "{}", backend);

        let bob = world.store.list_notifications(&uid("bob"), false).unwrap();
        assert_eq!(bob.len(), 1, "{}", backend);
        assert_eq!(bob[0].kind, NotificationKind::Mention);
        assert!(world.store.list_notifications(&uid("alice"), false).unwrap().is_empty(), "{}", backend);
        assert_eq!(world.mailer.sent_to(), vec!["bob@example.com".to_string()], "{}", backend);
    }
}

#[tokio::test]
async fn test_muted_member_gets_mentions_only() {
    for (backend, world) in worlds(&["alice", "bob"]) {
        let (_, general) = team(&world).await;
        world
            .huddle
            .membership()
            .set_notification_preference(&uid("bob"), &general, NotificationPreference::Mute)
            .await
            .unwrap();
        let messages = world.huddle.messages();

        let report = messages
            .send_message(&uid("alice"), &general, "standup in 5")
            .await
            .unwrap()
            .delivery
            .await
            .unwrap();
        assert_eq!(report.pushed, 0, "{}", backend);
        assert!(world.store.list_notifications(&uid("bob"), false).unwrap().is_empty(), "{}", backend);

        messages
            .send_message(&uid("alice"), &general, "@bob standup in 5")
            .await
            .unwrap()
            .delivery
            .await
            .unwrap();
        let bob = world.store.list_notifications(&uid("bob"), false).unwrap();
        assert_eq!(bob.len(), 1, "{}", backend);
        assert_eq!(bob[0].kind, NotificationKind::Mention);
        assert_eq!(world.mailer.sent_to(), vec!["bob@example.com".to_string()], "{}", backend);
    }
}

#[tokio::test]
async fn test_present_recipient_is_not_emailed() {
    for (backend, world) in worlds(&["alice", "bob"]) {
        let (_, general) = team(&world).await;
        world.broadcaster.set_present(RoomId::user(&uid("bob")));

        world
            .huddle
            .messages()
            .send_message(&uid("alice"), &general, "@bob ping")
            .await
            .unwrap()
            .delivery
            .await
            .unwrap();
        assert!(world.mailer.sent().is_empty(), "{}", backend);
        assert_eq!(world.broadcaster.events_for(&RoomId::user(&uid("bob"))).len(), 1, "{}", backend);
    }
}

/// Every backend plus a file-backed pool, where connections really
/// contend. The directory must outlive the world.
fn contended_worlds(handles: &[&str]) -> (TempDir, Vec<(&'static str, TestWorld)>) {
    let dir = tempdir().unwrap();
    let file = SqlStore::open(dir.path().join("huddle.db"), 8, Duration::from_secs(5)).unwrap();
    let mut all = worlds(handles);
    all.push(("sqlite-file", TestWorld::with_store(Arc::new(file)).seed(handles).unwrap()));
    (dir, all)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_joins_admit_exactly_once() {
    let (_dir, all) = contended_worlds(&["alice", "racer"]);
    for (backend, world) in all {
        let world = Arc::new(world);
        let membership = world.huddle.membership();
        let ws = membership
            .create_workspace(&uid("alice"), "Open", WorkspaceVisibility::Public)
            .await
            .unwrap();
        let general = membership
            .create_channel(&uid("alice"), &ws.id, "general", ChannelKind::Public)
            .await
            .unwrap();

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let world = world.clone();
                let code = ws.id.as_str().to_string();
                tokio::spawn(async move { world.huddle.membership().join_workspace(&uid("racer"), &code).await })
            })
            .collect();

        let mut admitted = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(e) => assert_eq!(e.denial(), Some(Denial::AlreadyMember), "{}", backend),
            }
        }
        assert_eq!(admitted, 1, "{}", backend);

        let attempts: Vec<_> = (0..8)
            .map(|_| {
                let world = world.clone();
                let code = general.id.as_str().to_string();
                tokio::spawn(async move { world.huddle.membership().join_channel(&uid("racer"), &code).await })
            })
            .collect();

        let mut admitted = 0;
        for attempt in attempts {
            match attempt.await.unwrap() {
                Ok(_) => admitted += 1,
                Err(e) => assert_eq!(e.denial(), Some(Denial::AlreadyMember), "{}", backend),
            }
        }
        assert_eq!(admitted, 1, "{}", backend);
        let record = world.store.find_permission(&uid("racer"), &ws.id).unwrap().unwrap();
        assert_eq!(record.role, Role::Member, "{}", backend);
        assert_eq!(record.channel_override(&general.id), Some(Role::Member), "{}", backend);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_role_change_racing_removal_never_leaves_an_orphan_record() {
    let (_dir, all) = contended_worlds(&["alice", "bob"]);
    for (backend, world) in all {
        let world = Arc::new(world);
        let ws = world
            .huddle
            .membership()
            .create_workspace(&uid("alice"), "Acme", WorkspaceVisibility::Public)
            .await
            .unwrap();

        for _ in 0..10 {
            world.huddle.membership().join_workspace(&uid("bob"), ws.id.as_str()).await.unwrap();

            let promote = {
                let (world, ws_id) = (world.clone(), ws.id.clone());
                tokio::spawn(async move {
                    world
                        .huddle
                        .membership()
                        .update_workspace_role(&uid("alice"), &ws_id, &uid("bob"), Role::Admin)
                        .await
                })
            };
            let remove = {
                let (world, ws_id) = (world.clone(), ws.id.clone());
                tokio::spawn(async move {
                    world
                        .huddle
                        .membership()
                        .remove_workspace_member(&uid("alice"), &ws_id, &uid("bob"))
                        .await
                })
            };
            remove.await.unwrap().unwrap();
            if let Err(e) = promote.await.unwrap() {
                assert_eq!(e.denial(), Some(Denial::UserNotInWorkspace), "{}", backend);
            }

            let workspace = world.store.find_workspace(&ws.id).unwrap().unwrap();
            assert!(!workspace.is_member(&uid("bob")), "{}", backend);
            assert!(world.store.find_permission(&uid("bob"), &ws.id).unwrap().is_none(), "{}", backend);
        }
    }
}

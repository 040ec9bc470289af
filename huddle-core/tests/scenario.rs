/*
    Membership scenario

    A owns public workspace W. M joins W and creates private channel C, then
    invites G, who is not a workspace member, to C. G shows up as pending,
    joins C through the invite, and ends up a channel member with a `member`
    override. The invitation is consumed.

    Each test runs against the in-memory and the SQLite store.
*/

use huddle_core::core_access::{Denial, RoleSource};
use huddle_core::core_notify::RoomId;
use huddle_core::core_space::storage::{MembershipStore, NotificationStore, SqlStore};
use huddle_core::core_space::{ChannelKind, NotificationKind, Role, UserId, WorkspaceId, WorkspaceVisibility};
use huddle_core::test_utils::{assert_denied, TestWorld};
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

fn uid(name: &str) -> UserId {
    UserId::new(name)
}

async fn run_guest_invite_scenario(backend: &str, world: &TestWorld) -> WorkspaceId {
    let (a, m, g) = (uid("a"), uid("m"), uid("g"));
    let membership = world.huddle.membership();

    // Phase 1: A's public workspace, M joins by code
    let w = membership.create_workspace(&a, "W", WorkspaceVisibility::Public).await.unwrap();
    membership.join_workspace(&m, w.id.as_str()).await.unwrap();
    let m_record = world.store.find_permission(&m, &w.id).unwrap().unwrap();
    assert_eq!(m_record.role, Role::Member, "{}", backend);

    // Phase 2: M creates private C and invites G
    let c = membership.create_channel(&m, &w.id, "C", ChannelKind::Private).await.unwrap();
    assert!(membership.invite_to_channel(&m, &c.id, "g@example.com").await.unwrap());

    let pending = world.store.find_channel(&c.id).unwrap().unwrap();
    assert!(pending.has_invitation("g@example.com"), "{}: G should be pending", backend);
    assert!(!pending.is_member(&g));
    assert_eq!(
        world.store.list_notifications(&g, true).unwrap()[0].kind,
        NotificationKind::ChannelInvite,
        "{}",
        backend
    );
    assert_eq!(world.mailer.sent_to(), vec!["g@example.com".to_string()], "{}", backend);

    // G cannot post before joining
    assert_denied(
        world.huddle.messages().send_message(&g, &c.id, "hello").await,
        Denial::NotAllowed,
    );

    // Phase 3: G joins through the invite
    membership.join_channel(&g, c.id.as_str()).await.unwrap();

    let joined = world.store.find_channel(&c.id).unwrap().unwrap();
    assert!(joined.is_member(&g), "{}", backend);
    assert!(joined.invitations.is_empty(), "{}: invitation consumed", backend);

    let g_record = world.store.find_permission(&g, &w.id).unwrap().unwrap();
    assert_eq!(g_record.role, Role::Guest, "{}", backend);
    assert_eq!(g_record.channel_override(&c.id), Some(Role::Member), "{}", backend);

    let access = world.huddle.resolver().resolve(&g, &w.id, Some(&c.id)).unwrap();
    assert_eq!(access.source, RoleSource::Record);
    assert_eq!(access.role(), Some(Role::Member));

    // Phase 4: G posts in C and M is notified
    let posted = world.huddle.messages().send_message(&g, &c.id, "thanks @m").await.unwrap();
    let report = posted.delivery.await.unwrap();
    assert_eq!(report.broadcasts, 1, "{}", backend);
    assert_eq!(report.failed, 0, "{}", backend);

    let inbox = world.store.list_notifications(&m, true).unwrap();
    assert_eq!(inbox.len(), 1, "{}", backend);
    assert_eq!(inbox[0].kind, NotificationKind::Mention);
    assert_eq!(world.broadcaster.events_for(&RoomId::channel(&c.id)).len(), 1);

    // Joining again is refused
    assert_denied(membership.join_channel(&g, c.id.as_str()).await, Denial::AlreadyMember);
    w.id
}

#[tokio::test]
async fn test_guest_invite_scenario_on_every_store() {
    for (backend, world) in TestWorld::all().unwrap() {
        let world = world.seed(&["a", "m", "g"]).unwrap();
        run_guest_invite_scenario(backend, &world).await;
    }
}

#[tokio::test]
async fn test_guest_invite_scenario_on_file_store() {
    let dir = tempdir().unwrap();
    let store = SqlStore::open(dir.path().join("huddle.db"), 4, Duration::from_secs(1)).unwrap();
    let world = TestWorld::with_store(Arc::new(store)).seed(&["a", "m", "g"]).unwrap();
    let workspace_id = run_guest_invite_scenario("sqlite-file", &world).await;
    drop(world);

    // State survives reopening the file
    let reopened = SqlStore::open(dir.path().join("huddle.db"), 1, Duration::from_secs(1)).unwrap();
    let channels = reopened.list_channels(&workspace_id).unwrap();
    assert_eq!(channels.len(), 1);
    assert!(channels[0].is_member(&uid("g")));
}

#[tokio::test]
async fn test_private_workspace_invite_flow() {
    for (backend, world) in TestWorld::all().unwrap() {
        let world = world.seed(&["owner", "bob"]).unwrap();
        let membership = world.huddle.membership();
        let (owner, bob) = (uid("owner"), uid("bob"));

        let w = membership
            .create_workspace(&owner, "Secret", WorkspaceVisibility::Private)
            .await
            .unwrap();
        assert_denied(membership.join_workspace(&bob, w.id.as_str()).await, Denial::InvalidInvite);

        membership.invite_to_workspace(&owner, &w.id, "bob@example.com").await.unwrap();
        membership.join_workspace(&bob, w.id.as_str()).await.unwrap();

        let w = world.store.find_workspace(&w.id).unwrap().unwrap();
        assert!(w.is_member(&bob), "{}", backend);
        assert!(w.invitations.is_empty(), "{}", backend);
    }
}

//! Two users chatting through one in-process backend.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use circle_client::config::ClientConfig;
use circle_client::notifications::NotificationKind;
use circle_client::session::{ChatSession, SessionSnapshot, SessionStatus};
use circle_client::state::AppState;
use circle_shared::UserId;
use circle_store::{DeviceStorage, LocalBackend};

struct Pair {
    backend: Arc<LocalBackend>,
    state: AppState,
    alice: UserId,
    bob: UserId,
}

async fn pair() -> Pair {
    let backend = Arc::new(LocalBackend::in_memory().unwrap());
    let state = AppState::new(
        ClientConfig::default(),
        backend.clone(),
        backend.clone(),
        Arc::new(DeviceStorage::in_memory().unwrap()),
    );
    let social = state.social();
    let alice = social.create_profile(UserId::new(), "alice", None).await.unwrap().id;
    let bob = social.create_profile(UserId::new(), "bob", None).await.unwrap().id;
    let request = social.send_friend_request(alice, bob).await.unwrap();
    social.accept_friend_request(request.id).await.unwrap();
    Pair {
        backend,
        state,
        alice,
        bob,
    }
}

async fn wait_until(session: &ChatSession, pred: impl Fn(&SessionSnapshot) -> bool) {
    let mut rx = session.watch();
    loop {
        if pred(&rx.borrow_and_update()) {
            return;
        }
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("timed out waiting for session state")
            .unwrap();
    }
}

fn settled(count: usize) -> impl Fn(&SessionSnapshot) -> bool {
    move |s| s.entries.len() == count && s.entries.iter().all(|e| !e.id.is_pending())
}

fn assert_unique(snapshot: &SessionSnapshot) {
    let ids: HashSet<String> = snapshot.entries.iter().map(|e| e.id.to_string()).collect();
    assert_eq!(ids.len(), snapshot.entries.len(), "duplicate entries: {snapshot:?}");
}

#[tokio::test]
async fn every_message_appears_once_on_both_sides() {
    let p = pair().await;
    let alice = p.state.session(p.alice);
    let bob = p.state.session(p.bob);
    alice.open(p.bob).await.unwrap();
    bob.open(p.alice).await.unwrap();

    for i in 0..5 {
        alice.send_message(&format!("a{i}")).await.unwrap();
        bob.send_message(&format!("b{i}")).await.unwrap();
    }

    wait_until(&alice, settled(10)).await;
    wait_until(&bob, settled(10)).await;

    let a = alice.snapshot();
    let b = bob.snapshot();
    assert_unique(&a);
    assert_unique(&b);
    let ids = |s: &SessionSnapshot| s.entries.iter().map(|e| e.id.to_string()).collect::<Vec<_>>();
    assert_eq!(ids(&a), ids(&b));
    let contents: Vec<_> = a.entries.iter().map(|e| e.content.as_str()).collect();
    assert_eq!(
        contents,
        vec!["a0", "b0", "a1", "b1", "a2", "b2", "a3", "b3", "a4", "b4"]
    );
}

#[tokio::test]
async fn open_sessions_mark_incoming_messages_seen() {
    let p = pair().await;
    let alice = p.state.session(p.alice);
    let bob = p.state.session(p.bob);
    alice.open(p.bob).await.unwrap();
    bob.open(p.alice).await.unwrap();

    alice.send_message("are you there?").await.unwrap();
    wait_until(&bob, settled(1)).await;

    let messages = p.state.messages();
    for _ in 0..50 {
        if messages.get_unread_count(p.bob).await.unwrap() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("message never marked seen");
}

#[tokio::test]
async fn chat_list_follows_the_conversation() {
    let p = pair().await;
    let alice = p.state.session(p.alice);
    alice.open(p.bob).await.unwrap();

    let list = p
        .state
        .chat_list(p.bob)
        .watch(&p.state.subscriber(), &p.state.bus)
        .await
        .unwrap();
    let mut rx = list.subscribe();

    alice.send_message("first").await.unwrap();
    alice.send_message("second").await.unwrap();
    loop {
        {
            let snapshot = rx.borrow_and_update();
            if let Some(summary) = snapshot.conversations.first() {
                if summary.unread == 2 && summary.preview().as_deref() == Some("second") {
                    break;
                }
            }
        }
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("chat list never caught up")
            .unwrap();
    }

    let removed = alice.delete_conversation().await.unwrap();
    assert_eq!(removed, 2);
    assert!(alice.snapshot().entries.is_empty());
    loop {
        if rx.borrow_and_update().conversations[0].last_message.is_none() {
            break;
        }
        tokio::time::timeout(Duration::from_secs(2), rx.changed())
            .await
            .expect("chat list never saw the purge")
            .unwrap();
    }
}

#[tokio::test]
async fn notifications_for_activity_on_posts() {
    let p = pair().await;
    let social = p.state.social();
    let carol = social.create_profile(UserId::new(), "carol", None).await.unwrap().id;
    social.send_friend_request(carol, p.alice).await.unwrap();

    let post = social.create_post(p.alice, "hello world", None).await.unwrap();
    social.like_post(p.alice, post.id).await.unwrap();
    social.like_post(p.bob, post.id).await.unwrap();
    social.create_comment(p.bob, post.id, "hi!").await.unwrap();

    let feed = p.state.notifications();
    let items = feed.load(p.alice).await.unwrap();
    let kinds: HashSet<_> = items.iter().map(|n| n.kind).collect();
    assert_eq!(items.len(), 3);
    assert_eq!(
        kinds,
        HashSet::from([
            NotificationKind::FriendRequest,
            NotificationKind::Like,
            NotificationKind::Comment
        ])
    );
    assert!(items.windows(2).all(|w| w[0].created_at >= w[1].created_at));
    assert_eq!(feed.unseen_count(), 3);

    feed.mark_all_seen().unwrap();
    feed.load(p.alice).await.unwrap();
    assert_eq!(feed.unseen_count(), 0);

    // A second aggregator on the same device shares the watermark.
    let other = p.state.notifications();
    other.load(p.alice).await.unwrap();
    assert_eq!(other.unseen_count(), 0);
}

#[tokio::test]
async fn teardown_releases_realtime_channels() {
    let p = pair().await;
    let alice = p.state.session(p.alice);
    alice.open(p.bob).await.unwrap();
    assert_eq!(p.backend.subscriber_count(), 1);

    alice.teardown();
    assert_eq!(p.backend.subscriber_count(), 0);
    assert_eq!(alice.status(), SessionStatus::Uninitialized);

    let bob = p.state.session(p.bob);
    bob.open(p.alice).await.unwrap();
    drop(bob);
    assert_eq!(p.backend.subscriber_count(), 0);
}

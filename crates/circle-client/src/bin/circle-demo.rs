//! # circle-demo
//!
//! Scripted two-user conversation against the in-process backend.  Shows
//! optimistic sends reconciling with realtime echoes, the chat list, the
//! notification feed and the badge counters.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use tracing::info;

use circle_client::config::ClientConfig;
use circle_client::session::{ChatSession, SessionSnapshot};
use circle_client::state::AppState;
use circle_shared::UserId;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Tracing and configuration
    // -----------------------------------------------------------------------
    circle_client::init_tracing();
    let config = ClientConfig::from_env();
    info!(?config, "Starting circle-demo v{}", env!("CARGO_PKG_VERSION"));

    let state = AppState::in_memory(config).context("open in-memory backend")?;

    // -----------------------------------------------------------------------
    // 2. Two users who are friends
    // -----------------------------------------------------------------------
    let social = state.social();
    let alice = social
        .create_profile(UserId::new(), "alice", Some("Alice Liddell"))
        .await?
        .id;
    let bob = social.create_profile(UserId::new(), "bob", None).await?.id;
    let request = social.send_friend_request(bob, alice).await?;

    let notifications = Arc::new(state.notifications());
    for item in notifications.load(alice).await? {
        info!(id = %item.id, kind = item.kind.as_str(), "notification");
    }
    notifications.accept_request(request.id).await?;

    // -----------------------------------------------------------------------
    // 3. Both open the conversation and talk
    // -----------------------------------------------------------------------
    let alice_chat = state.session(alice);
    let bob_chat = state.session(bob);
    alice_chat.open(bob).await?;
    bob_chat.open(alice).await?;

    let bob_list = state.chat_list(bob).watch(&state.subscriber(), &state.bus).await?;

    alice_chat.send_message("Hi Bob!").await?;
    alice_chat.send_message("Are you coming tonight?").await?;
    bob_chat.send_message("Hey Alice, yes!").await?;

    wait_for_entries(&alice_chat, 3).await?;
    wait_for_entries(&bob_chat, 3).await?;
    print_transcript("alice", &alice_chat.snapshot());
    print_transcript("bob", &bob_chat.snapshot());

    // -----------------------------------------------------------------------
    // 4. Feed, chat list and badges
    // -----------------------------------------------------------------------
    let post = social.create_post(alice, "Rabbit hole spotted", None).await?;
    social.like_post(bob, post.id).await?;
    social.create_comment(bob, post.id, "Careful!").await?;
    social.like_post(alice, post.id).await?;

    let badges = state.badges(alice, notifications.clone());
    let mut counts = badges.subscribe();
    tokio::time::timeout(Duration::from_secs(2), counts.changed())
        .await
        .context("badge monitor never reported")??;
    let current = badges.current();
    info!(
        messages = current.messages_label().as_deref().unwrap_or("-"),
        notifications = current.notifications_label().as_deref().unwrap_or("-"),
        "badges"
    );

    for item in notifications.items() {
        let actor = item.actor.as_ref().map(|p| p.display_name()).unwrap_or("?");
        info!(id = %item.id, kind = item.kind.as_str(), actor, "notification");
    }
    notifications.mark_all_seen()?;
    info!(unseen = notifications.unseen_count(), "notifications seen");

    for summary in bob_list.current().conversations {
        info!(
            with = summary.display_name(),
            preview = summary.preview().as_deref().unwrap_or(""),
            unread = summary.badge_label().as_deref().unwrap_or("0"),
            "chat list"
        );
    }

    // -----------------------------------------------------------------------
    // 5. Clean up
    // -----------------------------------------------------------------------
    let removed = alice_chat.delete_conversation().await?;
    info!(removed, "conversation deleted");
    alice_chat.teardown();
    bob_chat.teardown();
    drop(badges);
    drop(bob_list);
    info!(timers = state.scheduler.live_timers(), "demo finished");
    Ok(())
}

async fn wait_for_entries(session: &ChatSession, count: usize) -> anyhow::Result<()> {
    let mut rx = session.watch();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        {
            let snapshot = rx.borrow_and_update();
            if snapshot.entries.len() == count && snapshot.entries.iter().all(|e| !e.id.is_pending()) {
                return Ok(());
            }
            if snapshot.entries.len() > count {
                bail!("expected {count} messages, found {}", snapshot.entries.len());
            }
        }
        tokio::time::timeout_at(deadline, rx.changed())
            .await
            .context("timed out waiting for messages")??;
    }
}

fn print_transcript(who: &str, snapshot: &SessionSnapshot) {
    for entry in &snapshot.entries {
        info!(view = who, id = %entry.id, from = %entry.sender_id, "{}", entry.content);
    }
}

//! Tab badge counters, refreshed on a timer.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use circle_shared::constants::BADGE_CAP;
use circle_shared::UserId;
use circle_store::MessageStore;

use crate::events::{AppEvent, EventBus, ListenerHandle};
use crate::notifications::{badge_label, NotificationAggregator, NotificationFeed};
use crate::scheduler::{Scheduler, TimerHandle};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BadgeCounts {
    pub unread_messages: u64,
    pub unseen_notifications: u64,
}

impl BadgeCounts {
    pub fn messages_label(&self) -> Option<String> {
        badge_label(self.unread_messages, BADGE_CAP)
    }

    pub fn notifications_label(&self) -> Option<String> {
        badge_label(self.unseen_notifications, BADGE_CAP)
    }
}

/// Polls the unread message total and the unseen notification count.
/// A failed poll keeps the previous value.  Dropping the monitor stops the
/// timer.
///
/// Polls build their own notification feed; the aggregator's current feed
/// and its read flags are left alone.
pub struct BadgeMonitor {
    rx: watch::Receiver<BadgeCounts>,
    _timer: TimerHandle,
    _listener: ListenerHandle,
}

impl BadgeMonitor {
    pub fn start(
        me: UserId,
        messages: MessageStore,
        notifications: Arc<NotificationAggregator>,
        scheduler: &Scheduler,
        bus: &EventBus,
        period: Duration,
    ) -> Self {
        let (tx, rx) = watch::channel(BadgeCounts::default());
        let tx = Arc::new(tx);

        let polled = Arc::new(Mutex::new(NotificationFeed::default()));

        let seen_tx = tx.clone();
        let seen_notifications = notifications.clone();
        let seen_feed = polled.clone();
        let listener = bus.on(move |event| {
            if event != AppEvent::NotificationsSeen {
                return;
            }
            match seen_notifications.watermark() {
                Ok(watermark) => {
                    let mut feed = lock(&seen_feed);
                    feed.watermark = watermark;
                    let unseen = feed.unseen_count() as u64;
                    seen_tx.send_modify(|c| c.unseen_notifications = unseen);
                }
                Err(e) => tracing::warn!(error = %e, "failed to read notification watermark"),
            }
        });

        let timer = scheduler.every("badges", period, move || {
            let messages = messages.clone();
            let notifications = notifications.clone();
            let polled = polled.clone();
            let tx = tx.clone();
            async move { poll(me, &messages, &notifications, &polled, &tx).await }
        });

        Self {
            rx,
            _timer: timer,
            _listener: listener,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<BadgeCounts> {
        self.rx.clone()
    }

    pub fn current(&self) -> BadgeCounts {
        *self.rx.borrow()
    }
}

fn lock(feed: &Mutex<NotificationFeed>) -> MutexGuard<'_, NotificationFeed> {
    feed.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn poll(
    me: UserId,
    messages: &MessageStore,
    notifications: &NotificationAggregator,
    polled: &Mutex<NotificationFeed>,
    tx: &watch::Sender<BadgeCounts>,
) {
    let (unread, feed) = futures::join!(messages.get_unread_count(me), notifications.fetch(me));
    let mut counts = *tx.borrow();
    match unread {
        Ok(n) => counts.unread_messages = n,
        Err(e) => tracing::warn!(error = %e, "failed to poll unread messages"),
    }
    match feed {
        Ok(feed) => {
            counts.unseen_notifications = feed.unseen_count() as u64;
            *lock(polled) = feed;
        }
        Err(e) => tracing::warn!(error = %e, "failed to poll notifications"),
    }
    tx.send_if_modified(|current| {
        let changed = *current != counts;
        *current = counts;
        changed
    });
}

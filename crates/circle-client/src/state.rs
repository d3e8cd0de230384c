//! Application state shared by every view.
//!
//! [`AppState`] owns the gateways, the device storage, the event bus and
//! the scheduler for the lifetime of the application, and hands out the
//! per-view controllers built on top of them.

use std::sync::Arc;

use circle_shared::UserId;
use circle_store::{
    DeviceStorage, Gateway, LocalBackend, MessageStore, Realtime, RestConfig, RestGateway,
    SocialStore, StoreError,
};

use crate::badges::BadgeMonitor;
use crate::config::ClientConfig;
use crate::error::Result;
use crate::events::EventBus;
use crate::inbox::ChatList;
use crate::notifications::NotificationAggregator;
use crate::realtime::RealtimeSubscriber;
use crate::scheduler::Scheduler;
use crate::session::ChatSession;

/// Central application state.
pub struct AppState {
    pub config: ClientConfig,

    /// Row access to the backend.
    gateway: Arc<dyn Gateway>,

    /// Change feed of the backend.
    realtime: Arc<dyn Realtime>,

    /// Persisted key/value storage of this device (notification watermark).
    pub storage: Arc<DeviceStorage>,

    /// Cross-view events such as "reload the chat list".
    pub bus: EventBus,

    /// Owner of every periodic timer.
    pub scheduler: Scheduler,
}

impl AppState {
    pub fn new(
        config: ClientConfig,
        gateway: Arc<dyn Gateway>,
        realtime: Arc<dyn Realtime>,
        storage: Arc<DeviceStorage>,
    ) -> Self {
        Self {
            config,
            gateway,
            realtime,
            storage,
            bus: EventBus::new(),
            scheduler: Scheduler::new(),
        }
    }

    /// State backed by the embedded backend, stored under the configured
    /// data directory.
    pub fn embedded(config: ClientConfig) -> Result<Self> {
        let dir = config.resolved_data_dir().ok_or(StoreError::NoDataDir)?;
        std::fs::create_dir_all(&dir).map_err(StoreError::from)?;
        tracing::info!(dir = %dir.display(), "opening embedded backend");

        let backend = Arc::new(LocalBackend::open_at(&dir.join("backend.db"))?);
        let storage = Arc::new(DeviceStorage::open_in(&dir)?);
        Ok(Self::new(config, backend.clone(), backend, storage))
    }

    /// State backed by a throwaway in-memory backend.
    pub fn in_memory(config: ClientConfig) -> Result<Self> {
        let backend = Arc::new(LocalBackend::in_memory()?);
        let storage = Arc::new(DeviceStorage::in_memory()?);
        Ok(Self::new(config, backend.clone(), backend, storage))
    }

    /// State that reads and writes through the REST gateway at
    /// `config.backend_url`.  The change feed comes from `realtime`.
    pub fn remote(
        config: ClientConfig,
        access_token: Option<String>,
        realtime: Arc<dyn Realtime>,
    ) -> Result<Self> {
        let gateway = Arc::new(RestGateway::new(RestConfig {
            base_url: config.backend_url.clone(),
            api_key: config.api_key.clone(),
            access_token,
        }));
        let storage = Arc::new(match &config.data_dir {
            Some(dir) => DeviceStorage::open_in(dir)?,
            None => DeviceStorage::open_default()?,
        });
        Ok(Self::new(config, gateway, realtime, storage))
    }

    pub fn messages(&self) -> MessageStore {
        MessageStore::with_limit(self.gateway.clone(), self.config.max_message_chars)
    }

    pub fn social(&self) -> SocialStore {
        SocialStore::new(self.gateway.clone())
    }

    pub fn subscriber(&self) -> RealtimeSubscriber {
        RealtimeSubscriber::new(self.realtime.clone())
    }

    /// A chat screen for `me`.  Call [`ChatSession::open`] to load a peer.
    pub fn session(&self, me: UserId) -> ChatSession {
        ChatSession::new(me, self.messages(), self.subscriber(), self.bus.clone())
    }

    pub fn chat_list(&self, me: UserId) -> ChatList {
        ChatList::new(me, self.messages(), self.social())
    }

    pub fn notifications(&self) -> NotificationAggregator {
        NotificationAggregator::new(
            self.social(),
            self.storage.clone(),
            self.bus.clone(),
            self.config.notification_fanout,
        )
    }

    /// Start polling the tab badges of `me` at the configured interval.
    pub fn badges(&self, me: UserId, notifications: Arc<NotificationAggregator>) -> BadgeMonitor {
        BadgeMonitor::start(
            me,
            self.messages(),
            notifications,
            &self.scheduler,
            &self.bus,
            self.config.poll_interval,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embedded_state_persists_across_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let config = ClientConfig {
            data_dir: Some(dir.path().to_path_buf()),
            ..ClientConfig::default()
        };

        let me = {
            let state = AppState::embedded(config.clone()).unwrap();
            let social = state.social();
            let me = social.create_profile(UserId::new(), "me", None).await.unwrap().id;
            let peer = social.create_profile(UserId::new(), "peer", None).await.unwrap().id;
            state.messages().send_message(peer, me, "kept").await.unwrap();
            state.notifications().mark_all_seen().unwrap();
            me
        };

        let state = AppState::embedded(config).unwrap();
        assert_eq!(state.messages().get_unread_count(me).await.unwrap(), 1);
        assert!(dir.path().join("backend.db").exists());
        assert!(dir.path().join("device.db").exists());
        assert!(state.notifications().feed_snapshot().items.is_empty());
        assert!(
            state
                .storage
                .last_seen(circle_shared::constants::NOTIFICATIONS_LAST_SEEN_KEY)
                .unwrap()
                > chrono::DateTime::<chrono::Utc>::UNIX_EPOCH
        );
    }

    #[tokio::test]
    async fn message_limit_follows_config() {
        let config = ClientConfig {
            max_message_chars: 5,
            ..ClientConfig::default()
        };
        let state = AppState::in_memory(config).unwrap();
        let social = state.social();
        let me = social.create_profile(UserId::new(), "me", None).await.unwrap().id;
        let peer = social.create_profile(UserId::new(), "peer", None).await.unwrap().id;

        assert!(state.messages().send_message(me, peer, "toolong").await.is_err());
        assert!(state.messages().send_message(me, peer, "short").await.is_ok());
    }
}

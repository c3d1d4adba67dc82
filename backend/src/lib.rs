// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The group-message fan-out engine: the forward processor, the
//! group-message handler, the group-key manager, the distributor and its
//! durable inbox, the footprint presence tracker, and the minimal
//! conversational `Service`.
//!
//! No component here is a hidden singleton: every one is an explicitly
//! constructed, dependency-injected value. [`Engine`] is the single bundle
//! a process wires together and holds for its lifetime. [`Engine::ingest`]
//! is the one reachable entry point for inbound content.

pub mod distributor;
pub mod errors;
pub mod facebook;
pub mod footprint;
pub mod forward;
pub mod group_keys;
pub mod group_message;
pub mod messenger;
pub mod service;
pub mod settings;

use std::sync::Arc;

use distributor::{Distributor, InboxStorage};
use facebook::Facebook;
use footprint::Footprint;
use forward::ForwardContentProcessor;
use gbotcommon::messages::{Content, Request};
use group_keys::{GroupKeyManager, GroupKeyStorage};
use group_message::GroupMessageHandler;
use messenger::Messenger;
use service::{Service, UsherHook};
use tracing::instrument;

/// The process-wide set of collaborating services. Construct one per
/// process and hold it behind an `Arc`, spawning
/// [`Engine::spawn_background_workers`] as long-lived tasks rather than
/// reaching for global state.
pub struct Engine<K, F, S, M, U>
where
    K: GroupKeyStorage,
    F: Facebook,
    S: InboxStorage,
    M: Messenger,
    U: UsherHook,
{
    pub footprint: Arc<Footprint>,
    pub facebook: Arc<F>,
    pub group_keys: Arc<GroupKeyManager<K>>,
    pub distributor: Arc<Distributor<S, M>>,
    pub group_messages: Arc<GroupMessageHandler<K, F, S, M>>,
    pub forward: Arc<ForwardContentProcessor<K, F, S, M>>,
    pub service: Arc<Service<K, S, M, U>>,
}

impl<K, F, S, M, U> Engine<K, F, S, M, U>
where
    K: GroupKeyStorage,
    F: Facebook,
    S: InboxStorage,
    M: Messenger,
    U: UsherHook,
{
    pub fn new(
        footprint: Arc<Footprint>,
        group_key_storage: K,
        inbox_storage: S,
        facebook: Arc<F>,
        messenger: Arc<M>,
        usher: Arc<U>,
    ) -> Self {
        let group_keys = Arc::new(GroupKeyManager::new(group_key_storage));
        let distributor = Arc::new(Distributor::new(inbox_storage, footprint.clone(), messenger.clone()));
        let group_messages = Arc::new(GroupMessageHandler::new(
            group_keys.clone(),
            facebook.clone(),
            distributor.clone(),
            messenger.clone(),
        ));
        let forward = Arc::new(ForwardContentProcessor::new(group_messages.clone(), footprint.clone(), messenger.clone()));
        let service = Arc::new(Service::new(footprint.clone(), group_keys.clone(), distributor.clone(), messenger, usher));
        Self {
            footprint,
            facebook,
            group_keys,
            distributor,
            group_messages,
            forward,
            service,
        }
    }

    /// The one reachable entry point for inbound content, whatever drives
    /// it - a transport session's receive loop, a CLI ingest task, a test.
    /// A `Content::Forward` is routed straight to the forward processor and
    /// handled to completion before returning; everything else is hereby
    /// just enqueued on the service's request queue for its background
    /// worker to pick up.
    #[instrument(level = "debug", skip(self, request))]
    pub async fn ingest(&self, request: Request) {
        match request.body {
            Content::Forward(content) => self.forward.process(content).await,
            other => self.service.append_request(Request { head: request.head, body: other }),
        }
    }

    /// Spawns the long-lived background workers, one per component, each
    /// ticking in a loop. Returns their join handles so the caller can
    /// decide how to supervise them; none of them return unless their
    /// queue's sender side is fully dropped.
    pub fn spawn_background_workers(
        &self,
        tick_interval: std::time::Duration,
        facebook_refresh_interval: std::time::Duration,
    ) -> Vec<tokio::task::JoinHandle<()>>
    where
        K: 'static,
        F: 'static,
        S: 'static,
        M: 'static,
        U: 'static,
    {
        let group_messages = self.group_messages.clone();
        let service = self.service.clone();
        let distributor = self.distributor.clone();
        let footprint = self.footprint.clone();
        let facebook = self.facebook.clone();

        vec![
            tokio::spawn(async move { group_messages.run().await }),
            tokio::spawn(async move { service.run().await }),
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(tick_interval);
                loop {
                    ticker.tick().await;
                    if let Err(error) = distributor.tick().await {
                        tracing::warn!(%error, "distributor tick failed");
                    }
                }
            }),
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(facebook_refresh_interval);
                loop {
                    ticker.tick().await;
                    if let Err(error) = footprint.refresh_from_facebook(facebook.as_ref()).await {
                        tracing::warn!(%error, "footprint facebook refresh failed");
                    }
                }
            }),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::{sync::Mutex as StdMutex, time::Duration};

    use distributor::SqliteInboxStorage;
    use gbotcommon::{
        identifiers::{EntityKind, Id},
        messages::{
            CustomizedContent, Envelope, ForwardContent, ReliableMessage, UserEntry, UsersPostContent, APP_MONITOR,
            MOD_USERS,
        },
    };
    use group_keys::SqliteGroupKeyStorage;
    use sqlx::SqlitePool;

    #[derive(Debug, thiserror::Error)]
    #[error("mock error")]
    struct MockError;

    #[derive(Default)]
    struct NoopFacebook;

    #[async_trait]
    impl Facebook for NoopFacebook {
        type Error = MockError;
        async fn members(&self, _group: &Id) -> Result<Vec<Id>, Self::Error> {
            Ok(Vec::new())
        }
        async fn document_time(&self, _id: &Id) -> Result<Option<i64>, Self::Error> {
            Ok(None)
        }
    }

    #[derive(Default)]
    struct RecordingMessenger(StdMutex<Vec<ReliableMessage>>);

    #[async_trait]
    impl Messenger for RecordingMessenger {
        type Error = MockError;
        async fn send_content(&self, _receiver: &Id, _content: Content, _priority: i8) -> Result<(), Self::Error> {
            Ok(())
        }
        async fn send_reliable_message(&self, _message: ReliableMessage) -> Result<(), Self::Error> {
            Ok(())
        }
        async fn process_reliable_message(&self, message: ReliableMessage) -> Result<Vec<ReliableMessage>, Self::Error> {
            self.0.lock().unwrap().push(message);
            Ok(Vec::new())
        }
    }

    #[derive(Default)]
    struct RecordingUsher(StdMutex<Vec<Id>>);

    #[async_trait]
    impl UsherHook for RecordingUsher {
        type Error = MockError;
        async fn on_new_user(&self, user: &Id) -> Result<(), Self::Error> {
            self.0.lock().unwrap().push(user.clone());
            Ok(())
        }
    }

    fn user(s: &str) -> Id {
        Id::new(EntityKind::User, s)
    }

    async fn engine() -> (
        Engine<SqliteGroupKeyStorage, NoopFacebook, SqliteInboxStorage, RecordingMessenger, RecordingUsher>,
        Arc<RecordingMessenger>,
        Arc<RecordingUsher>,
    ) {
        let key_pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteGroupKeyStorage::migrate(&key_pool).await.unwrap();
        let inbox_pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteInboxStorage::migrate(&inbox_pool).await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let footprint = Arc::new(Footprint::new(dir.path().join("active_users.js")));
        let messenger = Arc::new(RecordingMessenger::default());
        let usher = Arc::new(RecordingUsher::default());
        let engine = Engine::new(
            footprint,
            SqliteGroupKeyStorage::new(key_pool),
            SqliteInboxStorage::new(inbox_pool),
            Arc::new(NoopFacebook),
            messenger.clone(),
            usher.clone(),
        );
        (engine, messenger, usher)
    }

    fn users_post_request(users: Vec<Id>, time: i64) -> Request {
        let post = UsersPostContent {
            users: users.into_iter().map(|user| UserEntry { user }).collect(),
            time,
        };
        let body = serde_json::to_value(&post).expect("UsersPostContent always serializes");
        let customized = CustomizedContent {
            app: APP_MONITOR.to_string(),
            module: MOD_USERS.to_string(),
            act: "post".to_string(),
            body,
        };
        Request {
            head: Envelope {
                sender: user("monitor"),
                receiver: user("bot"),
                group: None,
                time,
            },
            body: Content::Customized(customized),
        }
    }

    fn forward_request() -> Request {
        let secret = ReliableMessage {
            sender: user("a"),
            receiver: user("b"),
            group: None,
            time: 1,
            ciphertext: vec![1],
            encrypted_keys: None,
            key: None,
        };
        Request {
            head: Envelope {
                sender: user("a"),
                receiver: user("bot"),
                group: None,
                time: 1,
            },
            body: Content::Forward(ForwardContent { secrets: vec![secret] }),
        }
    }

    #[tokio::test]
    async fn ingest_routes_forward_content_straight_to_the_forward_processor() {
        let (engine, messenger, _usher) = engine().await;
        engine.ingest(forward_request()).await;
        assert_eq!(messenger.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ingest_routes_everything_else_onto_the_service_queue() {
        let (engine, _messenger, usher) = engine().await;
        let service = engine.service.clone();
        let worker = tokio::spawn(async move { service.run().await });

        engine.ingest(users_post_request(vec![user("a")], 100)).await;

        for _ in 0..50 {
            if !usher.0.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(*usher.0.lock().unwrap(), vec![user("a")]);
        worker.abort();
    }
}

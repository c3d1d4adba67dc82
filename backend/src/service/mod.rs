// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The minimal conversational surface: a polled queue of `Request`s. Two
//! customized-content kinds carry a core obligation: the `users/post`
//! liveness report, and the `chat.dim.group/keys` `update`/`request` acts
//! - dispatched here by `(app, mod)` since `Messenger` itself is an
//! out-of-scope transport-only collaborator with nowhere else to route
//! them from. Everything else is logged and dropped, the actual
//! conversational commands being an out-of-scope collaborator.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::{instrument, warn};

use gbotcommon::{
    identifiers::Id,
    messages::{Content, GroupKeysAct, GroupKeysContent, Request, TextContent, UsersPostContent},
};

use crate::{
    distributor::{Distributor, InboxStorage},
    errors::ServiceError,
    footprint::Footprint,
    group_keys::{GroupKeyManager, GroupKeyStorage},
    messenger::Messenger,
};

/// Hook invoked on a vanished-to-active edge of a reported user's presence.
/// The usher bot's actual re-invite / conversational logic lives entirely
/// behind this trait, outside the core engine.
#[async_trait]
pub trait UsherHook: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    async fn on_new_user(&self, user: &Id) -> Result<(), Self::Error>;
}

pub struct Service<K: GroupKeyStorage, S: InboxStorage, M: Messenger, U: UsherHook> {
    footprint: Arc<Footprint>,
    group_keys: Arc<GroupKeyManager<K>>,
    distributor: Arc<Distributor<S, M>>,
    messenger: Arc<M>,
    usher: Arc<U>,
    sender: mpsc::UnboundedSender<Request>,
    receiver: Mutex<mpsc::UnboundedReceiver<Request>>,
}

impl<K: GroupKeyStorage, S: InboxStorage, M: Messenger, U: UsherHook> Service<K, S, M, U> {
    pub fn new(
        footprint: Arc<Footprint>,
        group_keys: Arc<GroupKeyManager<K>>,
        distributor: Arc<Distributor<S, M>>,
        messenger: Arc<M>,
        usher: Arc<U>,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            footprint,
            group_keys,
            distributor,
            messenger,
            usher,
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Enqueue `request` for the background worker; never blocks.
    pub fn append_request(&self, request: Request) {
        let _ = self.sender.send(request);
    }

    pub async fn run(&self) {
        loop {
            let request = {
                let mut receiver = self.receiver.lock().await;
                receiver.recv().await
            };
            let Some(request) = request else {
                return;
            };
            if let Err(error) = self.handle_one(request).await {
                warn!(%error, "service request handling failed, dropping");
            }
        }
    }

    #[instrument(level = "debug", skip(self, request))]
    async fn handle_one(&self, request: Request) -> Result<(), ServiceError> {
        match request.body {
            Content::Customized(customized) => {
                if let Ok(keys) = GroupKeysContent::try_from(&customized) {
                    return self.handle_group_keys(request.head.sender, keys).await;
                }
                match UsersPostContent::try_from(&customized) {
                    Ok(post) => self.handle_users_post(post).await,
                    Err(_) => {
                        // Any other (app, mod, act) is a conversational command outside the core contract.
                        Ok(())
                    }
                }
            }
            Content::Text(_) | Content::Forward(_) => {
                // Conversational text and file-style content carry no core obligation.
                Ok(())
            }
        }
    }

    /// Dispatches the `chat.dim.group/keys` `update`/`request` acts (spec
    /// §4.3) to the [`GroupKeyManager`] and replies to `origin` - the
    /// sender of the inbound message, i.e. the key-updating sender for
    /// `update`, or the requesting member for `request`. `query`/`respond`
    /// are bot-outbound only; receiving one is logged and dropped.
    async fn handle_group_keys(&self, origin: Id, content: GroupKeysContent) -> Result<(), ServiceError> {
        match content.act {
            GroupKeysAct::Update { group, from, keys } => {
                let receipt = self.group_keys.handle_update(&group, &from, keys).await?;
                self.reply_text(&origin, receipt).await;
                Ok(())
            }
            GroupKeysAct::Request { group, from, .. } => {
                match self.group_keys.handle_request(&group, &from, &origin).await? {
                    Some(respond) => {
                        let content = Content::Customized(respond.to_customized());
                        if let Err(error) = self.messenger.send_content(&origin, content, 0).await {
                            warn!(%error, %origin, "failed to send key-request respond");
                        }
                    }
                    None => {
                        self.reply_text(&origin, TextContent::for_group("No key on file", group)).await;
                    }
                }
                Ok(())
            }
            GroupKeysAct::Query { .. } | GroupKeysAct::Respond { .. } => {
                warn!(%origin, "ignoring bot-outbound keys act received inbound");
                Ok(())
            }
        }
    }

    async fn reply_text(&self, receiver: &Id, text: TextContent) {
        if let Err(error) = self.messenger.send_content(receiver, Content::Text(text), 0).await {
            warn!(%error, %receiver, "failed to send key-command receipt");
        }
    }

    /// `users/post` is the sole core obligation of the Service: touch
    /// every reported user, and on a vanish -> active edge, invoke the
    /// usher hook exactly once and wake the distributor so anything held
    /// in the user's Inbox goes out on the next tick instead of waiting
    /// for unrelated traffic to address them.
    async fn handle_users_post(&self, post: UsersPostContent) -> Result<(), ServiceError> {
        for entry in post.users {
            let was_vanished = self.footprint.is_vanished(&entry.user);
            self.footprint.touch(&entry.user, Some(post.time));
            if was_vanished {
                self.distributor.wakeup_user(entry.user.clone()).await;
                if let Err(error) = self.usher.on_new_user(&entry.user).await {
                    warn!(%error, user = %entry.user, "usher hook failed");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{distributor::SqliteInboxStorage, group_keys::SqliteGroupKeyStorage};
    use gbotcommon::{
        identifiers::EntityKind,
        messages::{Envelope, ReliableMessage, UserEntry, WrappedKey, WrappedKeyTable},
    };
    use sqlx::SqlitePool;
    use std::{collections::BTreeMap, sync::Mutex as StdMutex};

    #[derive(Debug, thiserror::Error)]
    #[error("mock error")]
    struct MockError;

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

    #[derive(Default)]
    struct RecordingMessenger(StdMutex<Vec<(Id, Content)>>);

    #[async_trait]
    impl Messenger for RecordingMessenger {
        type Error = MockError;
        async fn send_content(&self, receiver: &Id, content: Content, _priority: i8) -> Result<(), Self::Error> {
            self.0.lock().unwrap().push((receiver.clone(), content));
            Ok(())
        }
        async fn send_reliable_message(&self, _message: gbotcommon::messages::ReliableMessage) -> Result<(), Self::Error> {
            Ok(())
        }
        async fn process_reliable_message(
            &self,
            _message: gbotcommon::messages::ReliableMessage,
        ) -> Result<Vec<gbotcommon::messages::ReliableMessage>, Self::Error> {
            Ok(Vec::new())
        }
    }

    async fn key_storage() -> SqliteGroupKeyStorage {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteGroupKeyStorage::migrate(&pool).await.unwrap();
        SqliteGroupKeyStorage::new(pool)
    }

    async fn inbox_storage() -> SqliteInboxStorage {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteInboxStorage::migrate(&pool).await.unwrap();
        SqliteInboxStorage::new(pool)
    }

    async fn harness() -> (
        Arc<Footprint>,
        Arc<GroupKeyManager<SqliteGroupKeyStorage>>,
        Arc<Distributor<SqliteInboxStorage, RecordingMessenger>>,
        Arc<RecordingMessenger>,
        Arc<RecordingUsher>,
    ) {
        let dir = tempfile::tempdir().unwrap();
        let footprint = Arc::new(Footprint::new(dir.path().join("active_users.js")));
        let group_keys = Arc::new(GroupKeyManager::new(key_storage().await));
        let messenger = Arc::new(RecordingMessenger::default());
        let distributor = Arc::new(Distributor::new(inbox_storage().await, footprint.clone(), messenger.clone()));
        let usher = Arc::new(RecordingUsher::default());
        (footprint, group_keys, distributor, messenger, usher)
    }

    fn user(s: &str) -> Id {
        Id::new(EntityKind::User, s)
    }
    fn group(s: &str) -> Id {
        Id::new(EntityKind::Group, s)
    }

    fn users_post_request(users: Vec<Id>, time: i64) -> Request {
        let post = UsersPostContent {
            users: users.into_iter().map(|user| UserEntry { user }).collect(),
            time,
        };
        let body = serde_json::to_value(&post).expect("UsersPostContent always serializes");
        let customized = gbotcommon::messages::CustomizedContent {
            app: gbotcommon::messages::APP_MONITOR.to_string(),
            module: gbotcommon::messages::MOD_USERS.to_string(),
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

    #[tokio::test]
    async fn vanished_user_triggers_usher_hook_once() {
        let (footprint, group_keys, distributor, messenger, usher) = harness().await;
        let service = Service::new(footprint, group_keys, distributor, messenger, usher.clone());

        let request = users_post_request(vec![user("a")], 100);
        service.handle_one(request).await.unwrap();
        assert_eq!(usher.0.lock().unwrap().len(), 1);

        // Second report, same user now active: no second invocation.
        let request = users_post_request(vec![user("a")], 101);
        service.handle_one(request).await.unwrap();
        assert_eq!(usher.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn vanished_user_wakes_distributor_so_inbox_drains_on_next_tick() {
        let (footprint, group_keys, distributor, messenger, usher) = harness().await;
        let receiver = user("a");
        let held = ReliableMessage {
            sender: user("sender"),
            receiver: receiver.clone(),
            group: None,
            time: 1,
            ciphertext: vec![1],
            encrypted_keys: None,
            key: None,
        };
        distributor.cache(held, receiver.clone()).await.unwrap();

        let service = Service::new(footprint, group_keys, distributor.clone(), messenger.clone(), usher);
        let request = users_post_request(vec![receiver.clone()], 100);
        service.handle_one(request).await.unwrap();

        distributor.tick().await.unwrap();
        assert_eq!(messenger.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn bot_outbound_keys_act_received_inbound_is_ignored() {
        let (footprint, group_keys, distributor, messenger, usher) = harness().await;
        let service = Service::new(footprint, group_keys, distributor, messenger, usher.clone());

        let request = Request {
            head: Envelope {
                sender: user("a"),
                receiver: user("bot"),
                group: None,
                time: 0,
            },
            body: Content::Customized(
                gbotcommon::messages::GroupKeysContent {
                    act: gbotcommon::messages::GroupKeysAct::Query {
                        group: user("g"),
                        from: user("a"),
                        digest: None,
                        members: Vec::new(),
                    },
                }
                .to_customized(),
            ),
        };
        service.handle_one(request).await.unwrap();
        assert!(usher.0.lock().unwrap().is_empty());
    }

    fn group_keys_request(sender: Id, act: GroupKeysAct) -> Request {
        Request {
            head: Envelope {
                sender,
                receiver: user("bot"),
                group: None,
                time: 0,
            },
            body: Content::Customized(GroupKeysContent { act }.to_customized()),
        }
    }

    #[tokio::test]
    async fn update_act_merges_keys_and_sends_receipt_to_sender() {
        let (footprint, group_keys, distributor, messenger, usher) = harness().await;
        let service = Service::new(footprint, group_keys.clone(), distributor, messenger.clone(), usher);

        let request = group_keys_request(
            user("a"),
            GroupKeysAct::Update {
                group: group("g"),
                from: user("a"),
                keys: WrappedKeyTable::new(
                    BTreeMap::from([(user("b"), WrappedKey::new(vec![1]))]),
                    Some("d1".into()),
                    5,
                ),
            },
        );
        service.handle_one(request).await.unwrap();

        assert!(group_keys
            .get(&group("g"), &user("a"), &user("b"))
            .await
            .unwrap()
            .is_some());
        let sent = messenger.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, user("a"));
        assert!(matches!(sent[0].1, Content::Text(_)));
    }

    #[tokio::test]
    async fn request_act_responds_with_single_entry_key_to_requester() {
        let (footprint, group_keys, distributor, messenger, usher) = harness().await;
        group_keys
            .save(
                &group("g"),
                &user("a"),
                WrappedKeyTable::new(
                    BTreeMap::from([(user("c"), WrappedKey::new(vec![2]))]),
                    Some("d2".into()),
                    7,
                ),
            )
            .await
            .unwrap();
        let service = Service::new(footprint, group_keys, distributor, messenger.clone(), usher);

        let request = group_keys_request(
            user("c"),
            GroupKeysAct::Request {
                group: group("g"),
                from: user("a"),
                digest: None,
            },
        );
        service.handle_one(request).await.unwrap();

        let sent = messenger.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, user("c"));
        match &sent[0].1 {
            Content::Customized(customized) => {
                let respond = GroupKeysContent::try_from(customized).unwrap();
                match respond.act {
                    GroupKeysAct::Respond { keys, .. } => {
                        assert!(keys.get(&user("c")).is_some());
                    }
                    _ => panic!("expected Respond"),
                }
            }
            _ => panic!("expected Customized"),
        }
    }

    #[tokio::test]
    async fn request_act_with_no_key_on_file_sends_failure_text() {
        let (footprint, group_keys, distributor, messenger, usher) = harness().await;
        let service = Service::new(footprint, group_keys, distributor, messenger.clone(), usher);

        let request = group_keys_request(
            user("c"),
            GroupKeysAct::Request {
                group: group("g"),
                from: user("a"),
                digest: None,
            },
        );
        service.handle_one(request).await.unwrap();

        let sent = messenger.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert!(matches!(sent[0].1, Content::Text(_)));
    }
}

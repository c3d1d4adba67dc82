// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Classifies each secret inside an inbound `Forward` content and routes it
//! to the group-message handler or straight back through the transport
//! layer's ordinary pipeline.

use std::sync::Arc;

use tracing::{instrument, warn};

use gbotcommon::messages::{ForwardContent, ReliableMessage};

use crate::{
    distributor::InboxStorage, errors::ForwardError, facebook::Facebook, footprint::Footprint,
    group_keys::GroupKeyStorage, group_message::GroupMessageHandler, messenger::Messenger,
};

pub struct ForwardContentProcessor<K, F, S, M>
where
    K: GroupKeyStorage,
    F: Facebook,
    S: InboxStorage,
    M: Messenger,
{
    group_messages: Arc<GroupMessageHandler<K, F, S, M>>,
    footprint: Arc<Footprint>,
    messenger: Arc<M>,
}

impl<K, F, S, M> ForwardContentProcessor<K, F, S, M>
where
    K: GroupKeyStorage,
    F: Facebook,
    S: InboxStorage,
    M: Messenger,
{
    pub fn new(group_messages: Arc<GroupMessageHandler<K, F, S, M>>, footprint: Arc<Footprint>, messenger: Arc<M>) -> Self {
        Self {
            group_messages,
            footprint,
            messenger,
        }
    }

    /// Classify and route every secret in `content` independently. Group
    /// and group-command secrets hand off to the group-message handler
    /// with no direct reply here - that empty "response slot" is exactly
    /// the `Forward` of zero messages the handler itself may later emit as
    /// a KeyQuery or receipt. Non-group secrets are replayed through the
    /// transport layer's ordinary pipeline and, if that produced anything,
    /// the results are sent straight back to the original sender wrapped
    /// in a fresh `Forward`. A malformed secret is logged and dropped; it
    /// never aborts the remaining secrets in the batch.
    #[instrument(level = "debug", skip(self, content))]
    pub async fn process(&self, content: ForwardContent) {
        for secret in content.secrets {
            if let Err(error) = self.process_one(secret).await {
                warn!(%error, "dropping malformed secret");
            }
        }
    }

    async fn process_one(&self, secret: ReliableMessage) -> Result<(), ForwardError> {
        self.footprint.touch(&secret.sender, Some(secret.time));

        if secret.receiver.is_broadcast() {
            if secret.group.is_some() {
                self.group_messages.append_message(secret);
                return Ok(());
            }
            return Err(ForwardError::BroadcastGroupReceiver);
        }

        if secret.receiver.is_group() {
            self.group_messages.append_message(secret);
            return Ok(());
        }

        let sender = secret.sender.clone();
        let results = self.messenger.process_reliable_message(secret).await.unwrap_or_default();
        if !results.is_empty() {
            let reply = gbotcommon::messages::Content::Forward(ForwardContent { secrets: results });
            let _ = self.messenger.send_content(&sender, reply, 0).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{distributor::SqliteInboxStorage, distributor::Distributor, group_keys::{GroupKeyManager, SqliteGroupKeyStorage}};
    use async_trait::async_trait;
    use gbotcommon::identifiers::{EntityKind, Id};
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
    struct RecordingMessenger(std::sync::Mutex<Vec<ReliableMessage>>);

    #[async_trait]
    impl Messenger for RecordingMessenger {
        type Error = MockError;
        async fn send_content(&self, _receiver: &Id, _content: gbotcommon::messages::Content, _priority: i8) -> Result<(), Self::Error> {
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

    fn user(s: &str) -> Id {
        Id::new(EntityKind::User, s)
    }
    fn group(s: &str) -> Id {
        Id::new(EntityKind::Group, s)
    }
    fn broadcast() -> Id {
        Id::broadcast_group("x")
    }

    fn secret(sender: Id, receiver: Id, group_tag: Option<Id>) -> ReliableMessage {
        ReliableMessage {
            sender,
            receiver,
            group: group_tag,
            time: 5,
            ciphertext: vec![1],
            encrypted_keys: None,
            key: None,
        }
    }

    async fn processor() -> ForwardContentProcessor<SqliteGroupKeyStorage, NoopFacebook, SqliteInboxStorage, RecordingMessenger> {
        let key_pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteGroupKeyStorage::migrate(&key_pool).await.unwrap();
        let keys = Arc::new(GroupKeyManager::new(SqliteGroupKeyStorage::new(key_pool)));

        let inbox_pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        SqliteInboxStorage::migrate(&inbox_pool).await.unwrap();

        let dir = tempfile::tempdir().unwrap();
        let footprint = Arc::new(Footprint::new(dir.path().join("active_users.js")));
        let messenger = Arc::new(RecordingMessenger::default());
        let distributor = Arc::new(Distributor::new(SqliteInboxStorage::new(inbox_pool), footprint.clone(), messenger.clone()));
        let facebook = Arc::new(NoopFacebook);
        let group_messages = Arc::new(GroupMessageHandler::new(keys, facebook, distributor, messenger.clone()));
        ForwardContentProcessor::new(group_messages, footprint, messenger)
    }

    #[tokio::test]
    async fn group_receiver_is_handed_to_group_messages_without_reprocessing() {
        let processor = processor().await;
        let messenger = processor.messenger.clone();
        let content = ForwardContent {
            secrets: vec![secret(user("a"), group("g"), None)],
        };
        processor.process(content).await;
        assert!(messenger.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn malformed_secret_is_dropped_without_aborting_the_rest_of_the_batch() {
        let processor = processor().await;
        let messenger = processor.messenger.clone();
        let content = ForwardContent {
            secrets: vec![
                secret(user("a"), broadcast(), None),
                secret(user("a"), user("b"), None),
            ],
        };
        processor.process(content).await;
        assert_eq!(messenger.0.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn non_group_secret_is_reprocessed() {
        let processor = processor().await;
        let messenger = processor.messenger.clone();
        let content = ForwardContent {
            secrets: vec![secret(user("a"), user("b"), None)],
        };
        processor.process(content).await;
        assert_eq!(messenger.0.lock().unwrap().len(), 1);
    }
}

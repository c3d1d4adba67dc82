// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Splits an inbound group message into per-member messages, or replays a
//! group-management command, running as a single background worker fed by
//! [`GroupMessageHandler::append_message`].

use std::{collections::BTreeMap, sync::Arc};

use tokio::sync::{mpsc, Mutex};
use tracing::{instrument, warn};

use gbotcommon::{
    identifiers::Id,
    messages::{Content, GroupKeysAct, GroupKeysContent, KeyMaterial, ReliableMessage, TextContent, WrappedKeyTable},
};

use crate::{
    distributor::{Distributor, InboxStorage},
    errors::GroupMessageError,
    facebook::Facebook,
    group_keys::{GroupKeyManager, GroupKeyStorage},
    messenger::Messenger,
};

pub struct GroupMessageHandler<K, F, S, M>
where
    K: GroupKeyStorage,
    F: Facebook,
    S: InboxStorage,
    M: Messenger,
{
    keys: Arc<GroupKeyManager<K>>,
    facebook: Arc<F>,
    distributor: Arc<Distributor<S, M>>,
    messenger: Arc<M>,
    sender: mpsc::UnboundedSender<ReliableMessage>,
    receiver: Mutex<mpsc::UnboundedReceiver<ReliableMessage>>,
}

impl<K, F, S, M> GroupMessageHandler<K, F, S, M>
where
    K: GroupKeyStorage,
    F: Facebook,
    S: InboxStorage,
    M: Messenger,
{
    pub fn new(keys: Arc<GroupKeyManager<K>>, facebook: Arc<F>, distributor: Arc<Distributor<S, M>>, messenger: Arc<M>) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            keys,
            facebook,
            distributor,
            messenger,
            sender,
            receiver: Mutex::new(receiver),
        }
    }

    /// Enqueue `message` for the background worker; never blocks.
    pub fn append_message(&self, message: ReliableMessage) {
        // The receiver only drops once `self` is dropped too, so this can't fail.
        let _ = self.sender.send(message);
    }

    /// Runs until the channel is closed (every `Self` handle dropped). Pops
    /// one message at a time; per-message failures are logged and do not
    /// stop the loop or requeue the message.
    pub async fn run(&self) {
        loop {
            let message = {
                let mut receiver = self.receiver.lock().await;
                receiver.recv().await
            };
            let Some(message) = message else {
                return;
            };
            if let Err(error) = self.handle_one(message).await {
                warn!(%error, "group message handling failed, dropping");
            }
        }
    }

    #[instrument(level = "debug", skip(self, message), fields(receiver = %message.receiver))]
    async fn handle_one(&self, message: ReliableMessage) -> Result<(), GroupMessageError> {
        if message.receiver.is_broadcast() {
            let Some(group) = message.group.clone() else {
                return Err(GroupMessageError::BroadcastGroupReceiver);
            };
            self.replay_group_command(group, message).await
        } else {
            let group = message.receiver.clone();
            self.split(group, message).await
        }
    }

    /// Splits a group message into one per-member message per recipient.
    async fn split(&self, group: Id, message: ReliableMessage) -> Result<(), GroupMessageError> {
        let sender = message.sender.clone();

        if let KeyMaterial::EncryptedKeys(keys) = message.key_material() {
            if !keys.is_empty() {
                let table = WrappedKeyTable::new(keys.clone(), None, message.time);
                self.keys.save(&group, &sender, table).await?;
            }
        }

        let Some(current) = self.keys.load(&group, &sender).await? else {
            warn!(%group, %sender, "no wrapped-key table on file, dropping group message");
            return Ok(());
        };

        let members = match self.facebook.members(&group).await {
            Ok(members) => members,
            Err(error) => {
                warn!(%error, %group, "facebook membership lookup failed");
                return Ok(());
            }
        };

        if !members.contains(&sender) {
            let receipt = Content::Text(TextContent::for_group("Permission denied", group.clone()));
            if let Err(error) = self.messenger.send_content(&sender, receipt, 1).await {
                warn!(%error, %sender, "failed to send permission-denied receipt");
            }
            return Ok(());
        }

        let mut missed = Vec::new();
        for member in members.into_iter().filter(|m| m != &sender) {
            match current.get(&member) {
                Some(wrapped_key) => {
                    let split = message.split_for_member(member.clone(), group.clone(), wrapped_key.clone());
                    self.distributor.cache(split, member).await?;
                }
                None => missed.push(member),
            }
        }

        if !missed.is_empty() {
            if let Some(digest) = current.digest.clone() {
                let query = GroupKeysContent {
                    act: GroupKeysAct::Query {
                        group: group.clone(),
                        from: sender.clone(),
                        digest: Some(digest),
                        members: missed,
                    },
                };
                let content = Content::Customized(query.to_customized());
                if let Err(error) = self.messenger.send_content(&sender, content, 1).await {
                    warn!(%error, %sender, "failed to send key query");
                }
            }
        }

        Ok(())
    }

    /// Pass a group-command secret back through the ordinary reliable-message
    /// pipeline and forward whatever it answers with directly, bypassing a
    /// re-fan-out (the client protocol handles that).
    async fn replay_group_command(&self, _group: Id, message: ReliableMessage) -> Result<(), GroupMessageError> {
        let responses = match self.messenger.process_reliable_message(message).await {
            Ok(responses) => responses,
            Err(error) => {
                warn!(%error, "group-command replay failed");
                return Ok(());
            }
        };
        for response in responses {
            if let Err(error) = self.messenger.send_reliable_message(response).await {
                warn!(%error, "failed to send group-command response");
            }
        }
        Ok(())
    }
}

// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Caches per-member messages for immediate forwarding or durable storage
//! depending on recipient liveness, and drains the result on a slow tick.

use std::{
    collections::{HashMap, HashSet, VecDeque},
    sync::Arc,
};

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};

use gbotcommon::{
    identifiers::Id,
    messages::{Content, ForwardContent, ReliableMessage},
};

use crate::{errors::DistributorError, footprint::Footprint, messenger::Messenger};

mod inbox;

pub use inbox::{InboxStorage, SqliteInboxStorage};

/// `pending` and `wakeup` are kept behind one lock: draining the wakeup set
/// and moving a receiver's pending messages out happen as one atomic step,
/// so a concurrent `cache` can't interleave with a drain and leave a
/// message stranded in neither queue nor wakeup set.
#[derive(Default)]
struct State {
    pending: HashMap<Id, VecDeque<ReliableMessage>>,
    wakeup: HashSet<Id>,
}

pub struct Distributor<S: InboxStorage, M: Messenger> {
    state: Mutex<State>,
    inbox: S,
    footprint: Arc<Footprint>,
    messenger: Arc<M>,
}

impl<S: InboxStorage, M: Messenger> Distributor<S, M> {
    pub fn new(inbox: S, footprint: Arc<Footprint>, messenger: Arc<M>) -> Self {
        Self {
            state: Mutex::new(State::default()),
            inbox,
            footprint,
            messenger,
        }
    }

    /// The single enqueue entry point: immediately durable if `receiver`
    /// is vanished, otherwise appended to the in-memory pending queue and
    /// marked for the next drain tick.
    #[instrument(level = "debug", skip(self, message), fields(%receiver))]
    pub async fn cache(&self, message: ReliableMessage, receiver: Id) -> Result<(), DistributorError> {
        if self.footprint.is_vanished(&receiver) {
            self.inbox.store(&receiver, &message).await?;
            info!("stored in inbox (recipient vanished)");
        } else {
            let mut state = self.state.lock().await;
            state.pending.entry(receiver.clone()).or_default().push_back(message);
            state.wakeup.insert(receiver);
        }
        Ok(())
    }

    /// Force a drain attempt for `id` outside the normal tick cadence,
    /// e.g. on a member's reconnect.
    pub async fn wakeup_user(&self, id: Id) {
        let mut state = self.state.lock().await;
        state.wakeup.insert(id);
    }

    /// One iteration of the background drain loop. Pulls the wakeup set,
    /// and for every still-live receiver, forwards in-memory messages
    /// first (lowest extra latency for a burst) then durable Inbox
    /// messages, removing each from its store as it's sent.
    pub async fn tick(&self) -> Result<(), DistributorError> {
        let due: Vec<Id> = {
            let mut state = self.state.lock().await;
            state.wakeup.drain().collect()
        };
        for receiver in due {
            if self.footprint.is_vanished(&receiver) {
                continue;
            }
            self.drain_receiver(&receiver).await?;
        }
        Ok(())
    }

    async fn drain_receiver(&self, receiver: &Id) -> Result<(), DistributorError> {
        let memory_msgs: Vec<ReliableMessage> = {
            let mut state = self.state.lock().await;
            state.pending.remove(receiver).map(Vec::from).unwrap_or_default()
        };
        let inbox_msgs = self.inbox.load(receiver).await?;

        for message in memory_msgs {
            self.forward_one(receiver, message, false).await?;
        }
        for message in inbox_msgs {
            self.forward_one(receiver, message, true).await?;
        }
        Ok(())
    }

    async fn forward_one(
        &self,
        receiver: &Id,
        message: ReliableMessage,
        from_inbox: bool,
    ) -> Result<(), DistributorError> {
        let signature = message.signature();
        let content = Content::Forward(ForwardContent::single(message));
        match self.messenger.send_content(receiver, content, 0).await {
            Ok(()) => {
                if from_inbox {
                    self.inbox.remove(receiver, &signature).await?;
                }
            }
            Err(error) => {
                warn!(%error, %receiver, "failed to forward message, leaving for next tick");
            }
        }
        Ok(())
    }

    /// Number of in-memory pending messages for `receiver`. Test-only
    /// window into the lock-guarded state, used by other modules' tests
    /// that exercise caching through a [`Distributor`].
    #[cfg(test)]
    pub(crate) async fn pending_len(&self, receiver: &Id) -> usize {
        let state = self.state.lock().await;
        state.pending.get(receiver).map(VecDeque::len).unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) async fn pending_is_empty(&self) -> bool {
        let state = self.state.lock().await;
        state.pending.is_empty()
    }
}

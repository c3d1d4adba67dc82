// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Placeholder collaborators wired into [`crate::run`]: the real identity
//! directory, transport session and usher bot are each a separate
//! out-of-scope service, so this process stands up a minimal stand-in for
//! each until one is supplied.

use async_trait::async_trait;
use tracing::warn;

use gbotbackend::{facebook::Facebook, messenger::Messenger, service::UsherHook};
use gbotcommon::{
    identifiers::Id,
    messages::{Content, ReliableMessage},
};

#[derive(Debug, thiserror::Error)]
#[error("no collaborator configured for this deployment")]
pub struct UnconfiguredError;

/// A `Facebook` with no members and no identity documents on file. A real
/// deployment replaces this with a client for the station's own identity
/// directory.
#[derive(Debug, Default)]
pub struct StubFacebook;

#[async_trait]
impl Facebook for StubFacebook {
    type Error = UnconfiguredError;

    async fn members(&self, group: &Id) -> Result<Vec<Id>, Self::Error> {
        warn!(%group, "StubFacebook: no identity directory configured, reporting no members");
        Ok(Vec::new())
    }

    async fn document_time(&self, _id: &Id) -> Result<Option<i64>, Self::Error> {
        Ok(None)
    }
}

/// A `Messenger` that logs instead of delivering. A real deployment
/// replaces this with the station's transport session.
#[derive(Debug, Default)]
pub struct StubMessenger;

#[async_trait]
impl Messenger for StubMessenger {
    type Error = UnconfiguredError;

    async fn send_content(&self, receiver: &Id, _content: Content, _priority: i8) -> Result<(), Self::Error> {
        warn!(%receiver, "StubMessenger: no transport configured, dropping content");
        Ok(())
    }

    async fn send_reliable_message(&self, message: ReliableMessage) -> Result<(), Self::Error> {
        warn!(receiver = %message.receiver, "StubMessenger: no transport configured, dropping reliable message");
        Ok(())
    }

    async fn process_reliable_message(&self, message: ReliableMessage) -> Result<Vec<ReliableMessage>, Self::Error> {
        warn!(receiver = %message.receiver, "StubMessenger: no transport configured, nothing to reprocess");
        Ok(Vec::new())
    }
}

/// A `UsherHook` that only logs. A real deployment replaces this with the
/// conversational usher bot's re-invite logic.
#[derive(Debug, Default)]
pub struct StubUsher;

#[async_trait]
impl UsherHook for StubUsher {
    type Error = UnconfiguredError;

    async fn on_new_user(&self, user: &Id) -> Result<(), Self::Error> {
        warn!(%user, "StubUsher: no usher bot configured, not re-inviting");
        Ok(())
    }
}

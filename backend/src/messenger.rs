// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The transport session / packer collaborator.
//!
//! Out of scope: serializing and encrypting envelopes is the transport
//! layer's job. The engine only needs to hand it a content to deliver, a
//! fully-formed reliable message to forward or reprocess, and to reprocess
//! an inbound reliable message that turned out not to be a group secret.

use async_trait::async_trait;

use gbotcommon::{
    identifiers::Id,
    messages::{Content, ReliableMessage},
};

/// Thread-safe send + reprocess capability the engine needs from the
/// transport layer.
#[async_trait]
pub trait Messenger: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Send `content` to `receiver`, wrapping and encrypting it as the
    /// transport layer sees fit. `priority` follows the source's scheme
    /// (lower values are delivered sooner); the engine uses priority `1`
    /// for receipts and key queries and `0` for ordinary forwarded
    /// messages and key-command replies.
    async fn send_content(&self, receiver: &Id, content: Content, priority: i8) -> Result<(), Self::Error>;

    /// Hand an already-sealed reliable message to the transport layer for
    /// delivery, bypassing the fan-out engine entirely. Used for
    /// already-split per-member messages and group-command responses.
    async fn send_reliable_message(&self, message: ReliableMessage) -> Result<(), Self::Error>;

    /// Re-enter the ordinary non-group message processing pipeline for a
    /// secret that the forward processor determined wasn't addressed to a
    /// group. Returns zero or more reliable messages produced in response.
    async fn process_reliable_message(&self, message: ReliableMessage) -> Result<Vec<ReliableMessage>, Self::Error>;
}

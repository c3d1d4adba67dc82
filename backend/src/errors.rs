// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use displaydoc::Display;
use thiserror::Error;

/// Wraps a durable storage operation's failure. A codec error decoding a
/// `BlobDecoded` column surfaces here too, via `sqlx`'s own column-decode
/// error variant.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Errors raised by [`crate::footprint::Footprint`].
#[derive(Debug, Error, Display)]
pub enum FootprintError {
    /// error persisting active users to disk: {0}
    Io(#[from] std::io::Error),
    /// error serializing active users: {0}
    Serde(#[from] serde_json::Error),
}

/// Errors raised by [`crate::group_keys::GroupKeyManager`].
#[derive(Debug, Error, Display)]
pub enum GroupKeyError {
    /// storage error: {0}
    Storage(#[from] StorageError),
}

/// Errors raised while splitting or replaying a group message
/// ([`crate::group_message::GroupMessageHandler`]).
#[derive(Debug, Error, Display)]
pub enum GroupMessageError {
    /// the message's receiver is the broadcast group, which cannot be split
    BroadcastGroupReceiver,
    /// group key manager error: {0}
    GroupKeys(#[from] GroupKeyError),
    /// distributor error: {0}
    Distributor(#[from] DistributorError),
}

/// Errors raised by [`crate::forward::ForwardContentProcessor`].
#[derive(Debug, Error, Display)]
pub enum ForwardError {
    /// a broadcast group is not a valid receiver for a non-group-command secret
    BroadcastGroupReceiver,
}

/// Errors raised by [`crate::distributor::Distributor`] / [`crate::distributor::Inbox`].
#[derive(Debug, Error, Display)]
pub enum DistributorError {
    /// storage error: {0}
    Storage(#[from] StorageError),
}

/// Errors raised by [`crate::service::Service`].
#[derive(Debug, Error, Display)]
pub enum ServiceError {
    /// group key manager error: {0}
    GroupKeys(#[from] GroupKeyError),
}

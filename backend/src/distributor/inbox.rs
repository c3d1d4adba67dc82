// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::instrument;

use gbotcommon::{
    codec::{BlobDecoded, BlobEncoded},
    identifiers::Id,
    messages::ReliableMessage,
};

use crate::errors::StorageError;

/// Durable per-receiver queue of undelivered reliable messages, keyed by
/// `(receiver, signature)` so re-storing the same message is a no-op.
#[async_trait]
pub trait InboxStorage: Send + Sync + 'static {
    async fn store(&self, receiver: &Id, message: &ReliableMessage) -> Result<(), StorageError>;
    /// All messages stored for `receiver`, ordered by arrival.
    async fn load(&self, receiver: &Id) -> Result<Vec<ReliableMessage>, StorageError>;
    async fn remove(&self, receiver: &Id, signature: &str) -> Result<(), StorageError>;
}

#[derive(Clone, Debug)]
pub struct SqliteInboxStorage {
    pool: SqlitePool,
}

impl SqliteInboxStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS inbox (
                receiver TEXT NOT NULL,
                signature TEXT NOT NULL,
                arrival_seq INTEGER NOT NULL,
                message_blob BLOB NOT NULL,
                PRIMARY KEY (receiver, signature)
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl InboxStorage for SqliteInboxStorage {
    #[instrument(level = "trace", skip(self, message), err)]
    async fn store(&self, receiver: &Id, message: &ReliableMessage) -> Result<(), StorageError> {
        let signature = message.signature();
        sqlx::query(
            "INSERT INTO inbox (receiver, signature, arrival_seq, message_blob)
             VALUES (?, ?, (SELECT COALESCE(MAX(arrival_seq), 0) + 1 FROM inbox), ?)
             ON CONFLICT (receiver, signature) DO NOTHING",
        )
        .bind(receiver.to_string())
        .bind(signature)
        .bind(BlobEncoded(message))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn load(&self, receiver: &Id) -> Result<Vec<ReliableMessage>, StorageError> {
        let rows: Vec<(BlobDecoded<ReliableMessage>,)> = sqlx::query_as(
            "SELECT message_blob FROM inbox WHERE receiver = ? ORDER BY arrival_seq ASC",
        )
        .bind(receiver.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(blob,)| blob.into_inner()).collect())
    }

    #[instrument(level = "trace", skip(self), err)]
    async fn remove(&self, receiver: &Id, signature: &str) -> Result<(), StorageError> {
        sqlx::query("DELETE FROM inbox WHERE receiver = ? AND signature = ?")
            .bind(receiver.to_string())
            .bind(signature)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use async_trait::async_trait;
use sqlx::SqlitePool;
use tracing::instrument;

use gbotcommon::{
    codec::{BlobDecoded, BlobEncoded},
    identifiers::Id,
    messages::WrappedKeyTable,
};

use crate::errors::StorageError;

/// Durable `(group, sender) -> WrappedKeyTable` store.
#[async_trait]
pub trait GroupKeyStorage: Send + Sync + 'static {
    async fn load(&self, group: &Id, sender: &Id) -> Result<Option<WrappedKeyTable>, StorageError>;
    async fn store(&self, group: &Id, sender: &Id, table: &WrappedKeyTable) -> Result<(), StorageError>;
}

#[derive(Clone, Debug)]
pub struct SqliteGroupKeyStorage {
    pool: SqlitePool,
}

impl SqliteGroupKeyStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn migrate(pool: &SqlitePool) -> Result<(), sqlx::Error> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS group_keys (
                group_id TEXT NOT NULL,
                sender_id TEXT NOT NULL,
                table_blob BLOB NOT NULL,
                PRIMARY KEY (group_id, sender_id)
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl GroupKeyStorage for SqliteGroupKeyStorage {
    #[instrument(level = "trace", skip(self), err)]
    async fn load(&self, group: &Id, sender: &Id) -> Result<Option<WrappedKeyTable>, StorageError> {
        let row: Option<(BlobDecoded<WrappedKeyTable>,)> = sqlx::query_as(
            "SELECT table_blob FROM group_keys WHERE group_id = ? AND sender_id = ?",
        )
        .bind(group.to_string())
        .bind(sender.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(blob,)| blob.into_inner()))
    }

    #[instrument(level = "trace", skip(self, table), err)]
    async fn store(&self, group: &Id, sender: &Id, table: &WrappedKeyTable) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO group_keys (group_id, sender_id, table_blob) VALUES (?, ?, ?)
             ON CONFLICT (group_id, sender_id) DO UPDATE SET table_blob = excluded.table_blob",
        )
        .bind(group.to_string())
        .bind(sender.to_string())
        .bind(BlobEncoded(table))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

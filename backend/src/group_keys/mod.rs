// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persists and serves per-`(group, sender)` wrapped-key tables, and
//! answers the `keys` customized-content commands.

use std::collections::BTreeMap;

use tracing::{info, instrument};

use gbotcommon::{
    identifiers::Id,
    messages::{GroupKeysAct, GroupKeysContent, TextContent, WrappedKey, WrappedKeyTable},
};

use crate::errors::GroupKeyError;

mod storage;

pub use storage::{GroupKeyStorage, SqliteGroupKeyStorage};

pub struct GroupKeyManager<S: GroupKeyStorage> {
    storage: S,
}

impl<S: GroupKeyStorage> GroupKeyManager<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    /// Merge `new` into the table stored for `(group, sender)`:
    ///
    /// - no stored table -> store `new` as-is, return `true`.
    /// - same digest -> union member entries, `new` wins on conflict;
    ///   return `true` iff at least one entry changed (and only write if so).
    /// - different digest (or either side lacks one) -> replace wholesale,
    ///   return `true`.
    #[instrument(level = "debug", skip(self, new), fields(%group, %sender))]
    pub async fn save(&self, group: &Id, sender: &Id, new: WrappedKeyTable) -> Result<bool, GroupKeyError> {
        let old = self.storage.load(group, sender).await?;
        let changed = match old {
            None => {
                self.storage.store(group, sender, &new).await?;
                true
            }
            Some(mut old) if old.mergeable_with(&new) => {
                let changed = old.merge_from(&new);
                if changed {
                    self.storage.store(group, sender, &old).await?;
                }
                changed
            }
            Some(_) => {
                self.storage.store(group, sender, &new).await?;
                true
            }
        };
        if changed {
            info!("group keys updated");
        }
        Ok(changed)
    }

    pub async fn load(&self, group: &Id, sender: &Id) -> Result<Option<WrappedKeyTable>, GroupKeyError> {
        Ok(self.storage.load(group, sender).await?)
    }

    pub async fn get(&self, group: &Id, sender: &Id, member: &Id) -> Result<Option<WrappedKey>, GroupKeyError> {
        Ok(self
            .storage
            .load(group, sender)
            .await?
            .and_then(|table| table.get(member).cloned()))
    }

    /// Handle a sender's `update` act: merge the keys and return the
    /// receipt text to send back.
    pub async fn handle_update(
        &self,
        group: &Id,
        sender: &Id,
        table: WrappedKeyTable,
    ) -> Result<TextContent, GroupKeyError> {
        let ok = self.save(group, sender, table).await?;
        let text = if ok {
            "Group keys updated"
        } else {
            "Failed to update group keys"
        };
        Ok(TextContent::for_group(text, group.clone()))
    }

    /// Handle a member's `request` act: look up their wrapped key under
    /// `key_sender`'s table and build the single-entry `respond` content,
    /// or `None` if the key isn't (yet) on file.
    pub async fn handle_request(
        &self,
        group: &Id,
        key_sender: &Id,
        member: &Id,
    ) -> Result<Option<GroupKeysContent>, GroupKeyError> {
        let Some(table) = self.storage.load(group, key_sender).await? else {
            return Ok(None);
        };
        let Some(wrapped_key) = table.get(member) else {
            return Ok(None);
        };
        let mut members = BTreeMap::new();
        members.insert(member.clone(), wrapped_key.clone());
        let respond = WrappedKeyTable::new(members, table.digest.clone(), table.time);
        Ok(Some(GroupKeysContent {
            act: GroupKeysAct::Respond {
                group: group.clone(),
                from: key_sender.clone(),
                keys: respond,
            },
        }))
    }
}

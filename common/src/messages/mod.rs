// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{collections::BTreeMap, fmt};

use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::identifiers::Id;

mod content;

pub use content::{
    Content, ContentError, CustomizedContent, Envelope, ForwardContent, GroupKeysAct,
    GroupKeysContent, Request, TextContent, UserEntry, UsersPostContent, APP_GROUP, APP_MONITOR,
    MOD_KEYS, MOD_USERS,
};

mod base64_bytes {
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&base64::engine::general_purpose::STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        base64::engine::general_purpose::STANDARD
            .decode(s.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}

/// A per-recipient wrapped symmetric key. Opaque to this crate: the bytes
/// are produced and consumed by the clients, never by the server side.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey(#[serde(with = "base64_bytes")] Vec<u8>);

impl WrappedKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for WrappedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "WrappedKey({} bytes)", self.0.len())
    }
}

/// Per-`(group, sender)` table of wrapped keys, one entry per member, plus
/// the sender-assigned digest identifying this key generation.
///
/// Invariant: two tables with the same `digest` are mergeable (their member
/// entries can be unioned); a table with a different digest replaces the
/// stored one wholesale. See [`WrappedKeyTable::mergeable_with`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKeyTable {
    pub members: BTreeMap<Id, WrappedKey>,
    pub digest: Option<String>,
    pub time: i64,
}

impl WrappedKeyTable {
    pub fn new(members: BTreeMap<Id, WrappedKey>, digest: Option<String>, time: i64) -> Self {
        Self {
            members,
            digest,
            time,
        }
    }

    pub fn get(&self, member: &Id) -> Option<&WrappedKey> {
        self.members.get(member)
    }

    /// True iff both tables carry a digest and the digests match - the
    /// condition under which `save` merges rather than replaces.
    pub fn mergeable_with(&self, other: &WrappedKeyTable) -> bool {
        matches!((&self.digest, &other.digest), (Some(a), Some(b)) if a == b)
    }

    /// Merge `other`'s member entries into `self`, `other` winning on
    /// conflicting member ids. Returns `true` iff at least one entry was
    /// added or changed.
    pub fn merge_from(&mut self, other: &WrappedKeyTable) -> bool {
        let mut changed = false;
        for (member, key) in &other.members {
            match self.members.get(member) {
                Some(existing) if existing == key => {}
                _ => {
                    self.members.insert(member.clone(), key.clone());
                    changed = true;
                }
            }
        }
        if other.time > self.time {
            self.time = other.time;
        }
        changed
    }
}

/// An already-encrypted transport envelope.
///
/// Invariant: a multi-recipient group message carries `encrypted_keys` and
/// no `key`; a per-recipient split message carries exactly `key`, a
/// concrete `receiver`, and `group` set. The invariant is not enforced by
/// the type (the wire format genuinely allows either shape); call
/// [`ReliableMessage::key_material`] to inspect it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReliableMessage {
    pub sender: Id,
    pub receiver: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Id>,
    pub time: i64,
    #[serde(with = "base64_bytes")]
    pub ciphertext: Vec<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encrypted_keys: Option<BTreeMap<Id, WrappedKey>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<WrappedKey>,
}

/// The two (mutually exclusive in well-formed messages) shapes a
/// [`ReliableMessage`] carries key material in.
#[derive(Debug, Clone)]
pub enum KeyMaterial<'a> {
    /// A group message fresh from the sender: a per-member wrapping table.
    EncryptedKeys(&'a BTreeMap<Id, WrappedKey>),
    /// A split, per-recipient message: exactly one wrapped key.
    Key(&'a WrappedKey),
    /// Neither present - a group-command replay or non-group message.
    None,
}

impl ReliableMessage {
    pub fn key_material(&self) -> KeyMaterial<'_> {
        match (&self.encrypted_keys, &self.key) {
            (Some(keys), _) if !keys.is_empty() => KeyMaterial::EncryptedKeys(keys),
            (_, Some(key)) => KeyMaterial::Key(key),
            _ => KeyMaterial::None,
        }
    }

    /// Build the per-member split of `self` destined for `receiver`,
    /// carrying `wrapped_key` instead of the group's `encrypted_keys` table.
    pub fn split_for_member(&self, receiver: Id, group: Id, wrapped_key: WrappedKey) -> Self {
        Self {
            sender: self.sender.clone(),
            receiver,
            group: Some(group),
            time: self.time,
            ciphertext: self.ciphertext.clone(),
            encrypted_keys: None,
            key: Some(wrapped_key),
        }
    }

    /// A stable signature used as the second half of the Inbox key
    /// `(receiver, signature)`. Deliberately coarse - it only needs to
    /// distinguish two genuinely different envelopes for the same receiver,
    /// not to be cryptographically binding.
    pub fn signature(&self) -> String {
        use std::hash::{Hash, Hasher};
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.sender.hash(&mut hasher);
        self.time.hash(&mut hasher);
        self.ciphertext.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

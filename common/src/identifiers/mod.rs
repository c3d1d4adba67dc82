// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use sqlx::{Database, Decode, Encode, Type, encode::IsNull, error::BoxDynError};
use thiserror::Error;
use tracing::error;

/// The local-part that marks a group address as the broadcast group, i.e.
/// "every member of the station", rather than a specific managed group.
const BROADCAST_LOCAL_PART: &str = "all";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityKind {
    User,
    Bot,
    Group,
    Station,
}

impl EntityKind {
    fn as_str(&self) -> &'static str {
        match self {
            EntityKind::User => "user",
            EntityKind::Bot => "bot",
            EntityKind::Group => "group",
            EntityKind::Station => "station",
        }
    }
}

impl FromStr for EntityKind {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(EntityKind::User),
            "bot" => Ok(EntityKind::Bot),
            "group" => Ok(EntityKind::Group),
            "station" => Ok(EntityKind::Station),
            other => Err(IdParseError::UnknownKind(other.to_string())),
        }
    }
}

/// An opaque identifier for a user, bot, group or station.
///
/// Two `Id`s compare equal iff their canonical string forms are equal; the
/// entity kind is carried alongside the address rather than derived from it,
/// matching the source network's convention of type-tagging identities.
#[derive(Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Id {
    kind: EntityKind,
    address: Arc<str>,
}

#[derive(Debug, Clone, Error)]
pub enum IdParseError {
    #[error("identifier is missing a `kind:address` separator: {0:?}")]
    MissingSeparator(String),
    #[error("unknown identifier kind: {0:?}")]
    UnknownKind(String),
    #[error("identifier address is empty")]
    EmptyAddress,
}

impl Id {
    pub fn new(kind: EntityKind, address: impl Into<Arc<str>>) -> Self {
        Self {
            kind,
            address: address.into(),
        }
    }

    /// The sentinel broadcast group address: every member of the station,
    /// not a specific managed group.
    pub fn broadcast_group(network: &str) -> Self {
        Self::new(EntityKind::Group, format!("{BROADCAST_LOCAL_PART}@{network}"))
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn is_group(&self) -> bool {
        self.kind == EntityKind::Group
    }

    pub fn is_user(&self) -> bool {
        self.kind == EntityKind::User
    }

    pub fn is_bot(&self) -> bool {
        self.kind == EntityKind::Bot
    }

    /// True for the single reserved address meaning "every member", as
    /// opposed to an ordinary managed group.
    pub fn is_broadcast(&self) -> bool {
        self.kind == EntityKind::Group
            && self
                .address
                .split('@')
                .next()
                .is_some_and(|local| local == BROADCAST_LOCAL_PART)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.address)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

impl FromStr for Id {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, address) = s
            .split_once(':')
            .ok_or_else(|| IdParseError::MissingSeparator(s.to_string()))?;
        if address.is_empty() {
            return Err(IdParseError::EmptyAddress);
        }
        Ok(Self {
            kind: kind.parse()?,
            address: Arc::from(address),
        })
    }
}

impl TryFrom<String> for Id {
    type Error = IdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Id> for String {
    fn from(value: Id) -> Self {
        value.to_string()
    }
}

impl<DB: Database> Type<DB> for Id
where
    String: Type<DB>,
{
    fn type_info() -> DB::TypeInfo {
        <String as Type<DB>>::type_info()
    }
}

impl<'r, DB: Database> Encode<'r, DB> for Id
where
    String: Encode<'r, DB>,
{
    fn encode_by_ref(&self, buf: &mut <DB as Database>::ArgumentBuffer<'r>) -> Result<IsNull, BoxDynError> {
        Encode::<DB>::encode(self.to_string(), buf)
    }
}

impl<'r, DB: Database> Decode<'r, DB> for Id
where
    &'r str: Decode<'r, DB>,
{
    fn decode(value: <DB as Database>::ValueRef<'r>) -> Result<Self, BoxDynError> {
        let s: &str = Decode::<DB>::decode(value)?;
        s.parse().map_err(|error| {
            error!(%error, "error parsing Id from DB");
            Box::new(error) as BoxDynError
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broadcast_group_is_broadcast() {
        let id = Id::broadcast_group("chat.example.org");
        assert!(id.is_broadcast());
        assert!(id.is_group());
    }

    #[test]
    fn ordinary_group_is_not_broadcast() {
        let id = Id::new(EntityKind::Group, "family@chat.example.org");
        assert!(!id.is_broadcast());
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let id = Id::new(EntityKind::User, "alice@chat.example.org");
        let parsed: Id = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn rejects_unknown_kind() {
        let err = "robot:x@y".parse::<Id>().unwrap_err();
        assert!(matches!(err, IdParseError::UnknownKind(_)));
    }
}

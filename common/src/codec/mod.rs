// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The persistence codec used to store application values (wrapped-key
//! tables, queued reliable messages) as opaque blobs in SQLite.
//!
//! A version byte prefixes every encoded value so the on-disk format can
//! evolve without a data migration.

use serde::{Serialize, de::DeserializeOwned};

mod error;
mod persistence;

pub use error::Error;
pub use persistence::{BlobDecoded, BlobEncoded};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
#[non_exhaustive]
pub enum GbotCodec {
    #[default]
    V1 = 1,
}

impl TryFrom<u8> for GbotCodec {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(GbotCodec::V1),
            other => Err(Error::UnknownCodecVersion(other)),
        }
    }
}

impl GbotCodec {
    pub fn to_vec<T: Serialize>(value: &T) -> Result<Vec<u8>, Error> {
        let mut buf = vec![GbotCodec::default() as u8];
        serde_json::to_writer(&mut buf, value)?;
        Ok(buf)
    }

    pub fn from_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
        let (version_byte, body) = bytes.split_first().ok_or(Error::EmptyInputSlice)?;
        match GbotCodec::try_from(*version_byte)? {
            GbotCodec::V1 => Ok(serde_json::from_slice(body)?),
        }
    }
}

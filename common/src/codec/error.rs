// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("empty input slice")]
    EmptyInputSlice,
    #[error("unknown codec version byte: {0}")]
    UnknownCodecVersion(u8),
    #[error("codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

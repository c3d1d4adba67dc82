// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Shared types for the group-message assistant engine: identifiers, wire
//! content, and the blob-persistence codec used by `gbotbackend`'s storage
//! layers.

pub mod codec;
pub mod identifiers;
pub mod messages;

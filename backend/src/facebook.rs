// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The identity / public-key directory collaborator.
//!
//! Out of scope: this crate only depends on the narrow read capabilities
//! the engine needs - group membership and an identity document's last
//! update time - never on document storage, key management or the
//! directory's own persistence. Kept separate from `Messenger` so neither
//! collaborator needs a reference back to the other.

use async_trait::async_trait;

use gbotcommon::identifiers::Id;

/// Read-only view of the identity directory needed by the fan-out engine.
#[async_trait]
pub trait Facebook: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Current membership of `group`, in no particular order.
    async fn members(&self, group: &Id) -> Result<Vec<Id>, Self::Error>;

    /// The `time` field of `id`'s current identity document, if any is on
    /// file. Used by [`crate::footprint::Footprint`]'s secondary pass to
    /// keep liveness consistent with identity updates.
    async fn document_time(&self, id: &Id) -> Result<Option<i64>, Self::Error>;
}

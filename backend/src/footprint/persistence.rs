// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::{fs, path::Path};

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

use gbotcommon::identifiers::Id;

use crate::errors::FootprintError;

/// One row of `protected/active_users.js`: `{ID, time, time_str}`,
/// sorted by `time` descending in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveUserRecord {
    #[serde(rename = "ID")]
    pub id: Id,
    pub time: i64,
    pub time_str: String,
}

impl ActiveUserRecord {
    pub fn new(id: Id, time: i64) -> Self {
        let time_str = Utc
            .timestamp_opt(time, 0)
            .single()
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_default();
        Self { id, time, time_str }
    }
}

pub(super) fn read(path: &Path) -> Result<Vec<ActiveUserRecord>, FootprintError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let bytes = fs::read(path)?;
    if bytes.is_empty() {
        return Ok(Vec::new());
    }
    Ok(serde_json::from_slice(&bytes)?)
}

pub(super) fn write(path: &Path, records: &[ActiveUserRecord]) -> Result<(), FootprintError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(records)?;
    fs::write(path, bytes)?;
    Ok(())
}

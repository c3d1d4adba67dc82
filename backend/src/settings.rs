// SPDX-FileCopyrightText: 2024 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use std::collections::HashMap;

use gbotcommon::identifiers::Id;
use serde::Deserialize;

/// Configuration for a group-message assistant bot process.
///
/// Loaded from an ini file (section `group`, `ans`, `station`, `database`)
/// by `gbotserver::configurations::get_configuration`.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database: DatabaseSettings,
    pub station: StationSettings,
    #[serde(default)]
    pub group: GroupSettings,
    /// Alias name -> bot id, e.g. `assistant = bot:group-assistant@example.org`.
    #[serde(default)]
    pub ans: HashMap<String, Id>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseSettings {
    /// Path to the SQLite database file backing the group-key store and
    /// the durable Inbox.
    pub path: String,
    /// Path to the JSON active-users snapshot, `protected/active_users.js`.
    #[serde(default = "default_active_users_path")]
    pub active_users_path: String,
}

fn default_active_users_path() -> String {
    "protected/active_users.js".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct StationSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupSettings {
    /// Admin ids allowed to operate the conversational surface. Not
    /// consulted by the core fan-out engine; carried through for the
    /// (out-of-scope) conversational bots.
    #[serde(default)]
    pub supervisors: Vec<Id>,
}

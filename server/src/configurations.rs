// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Loads [`gbotbackend::settings::Settings`] from an ini file, layering
//! `GBOT_`-prefixed environment variable overrides on top.

use std::path::Path;

use config::{Config, ConfigError};
use gbotbackend::settings::Settings;
use ini::Ini;
use serde_json::Value;

/// Load `path` as an ini document and deserialize it into [`Settings`].
///
/// Every scalar is coerced to a number or boolean when it parses as one,
/// and split on `,` into an array otherwise - the `ini` format has no
/// native list syntax, so `supervisors = user:a@x, user:b@x` becomes a
/// JSON array before `config` ever sees it.
pub fn get_configuration(path: &Path) -> Result<Settings, ConfigError> {
    let document =
        Ini::load_from_file(path).map_err(|error| ConfigError::Message(format!("{}: {error}", path.display())))?;
    let as_json = ini_to_json(&document);

    Config::builder()
        .add_source(config::File::from_str(&as_json.to_string(), config::FileFormat::Json))
        .add_source(config::Environment::with_prefix("GBOT").separator("_"))
        .build()?
        .try_deserialize()
}

fn ini_to_json(document: &Ini) -> Value {
    let mut sections = serde_json::Map::new();
    for (section, properties) in document.iter() {
        let mut entry = serde_json::Map::new();
        for (key, value) in properties.iter() {
            entry.insert(key.to_string(), coerce(value));
        }
        sections.insert(section.unwrap_or_default().to_string(), Value::Object(entry));
    }
    Value::Object(sections)
}

fn coerce(raw: &str) -> Value {
    let raw = raw.trim();
    if let Ok(number) = raw.parse::<i64>() {
        return Value::from(number);
    }
    if let Ok(boolean) = raw.parse::<bool>() {
        return Value::from(boolean);
    }
    if raw.contains(',') {
        return Value::Array(raw.split(',').map(|part| coerce(part.trim())).collect());
    }
    Value::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_ini(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn loads_full_settings_from_ini() {
        let file = write_ini(
            "[station]\n\
             host = 0.0.0.0\n\
             port = 5000\n\
             \n\
             [database]\n\
             path = data/gbot.sqlite\n\
             \n\
             [group]\n\
             supervisors = user:admin1@x, user:admin2@x\n\
             \n\
             [ans]\n\
             assistant = bot:group-assistant@x\n",
        );
        let settings = get_configuration(file.path()).unwrap();
        assert_eq!(settings.station.host, "0.0.0.0");
        assert_eq!(settings.station.port, 5000);
        assert_eq!(settings.database.path, "data/gbot.sqlite");
        assert_eq!(settings.group.supervisors.len(), 2);
        assert_eq!(settings.ans.len(), 1);
    }

    #[test]
    fn missing_optional_sections_fall_back_to_defaults() {
        let file = write_ini(
            "[station]\n\
             host = 127.0.0.1\n\
             port = 5001\n\
             \n\
             [database]\n\
             path = data/gbot.sqlite\n",
        );
        let settings = get_configuration(file.path()).unwrap();
        assert!(settings.group.supervisors.is_empty());
        assert!(settings.ans.is_empty());
        assert_eq!(settings.database.active_users_path, "protected/active_users.js");
    }
}

// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::identifiers::Id;

use super::{ReliableMessage, WrappedKeyTable};

pub const APP_GROUP: &str = "chat.dim.group";
pub const MOD_KEYS: &str = "keys";
pub const APP_MONITOR: &str = "chat.dim.monitor";
pub const MOD_USERS: &str = "users";

/// `head` + `body` pair used by the conversational surface. The effective
/// `identifier` is the group for group messages, the sender for direct
/// messages.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: Id,
    pub receiver: Id,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Id>,
    pub time: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub head: Envelope,
    pub body: Content,
}

impl Request {
    /// `body.group ?? head.sender`.
    pub fn identifier(&self) -> &Id {
        self.body.group().unwrap_or(&self.head.sender)
    }
}

/// A top-level content payload. `Customized` is the open-enumeration arm:
/// any `(app, mod)` pair this crate doesn't know about still round-trips
/// through it.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Content {
    Text(TextContent),
    Forward(ForwardContent),
    Customized(CustomizedContent),
}

impl Content {
    pub fn group(&self) -> Option<&Id> {
        match self {
            Content::Text(t) => t.group.as_ref(),
            Content::Forward(_) => None,
            Content::Customized(c) => c.group(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TextContent {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Id>,
}

impl TextContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            group: None,
        }
    }

    pub fn for_group(text: impl Into<String>, group: Id) -> Self {
        Self {
            text: text.into(),
            group: Some(group),
        }
    }
}

/// A content whose payload is one or more nested [`ReliableMessage`]s. An
/// empty `secrets` list is the forward processor's "empty response slot"
/// encoding for a secret that produced no reply.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ForwardContent {
    pub secrets: Vec<ReliableMessage>,
}

impl ForwardContent {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn single(message: ReliableMessage) -> Self {
        Self {
            secrets: vec![message],
        }
    }
}

/// A customized content: `{app, mod, act}` plus a free-form body. Specific
/// handlers recover a typed view (see [`GroupKeysContent`],
/// [`UsersPostContent`]) via `TryFrom`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CustomizedContent {
    pub app: String,
    #[serde(rename = "mod")]
    pub module: String,
    pub act: String,
    #[serde(flatten)]
    pub body: serde_json::Value,
}

impl CustomizedContent {
    pub fn is(&self, app: &str, module: &str) -> bool {
        self.app == app && self.module == module
    }

    fn group(&self) -> Option<&Id> {
        // Best-effort: group-scoped customized contents always carry a
        // "group" field in their body.
        self.body.get("group").and_then(|v| v.as_str()).and_then(|s| s.parse().ok())
    }
}

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("content is not a {app}/{module} customized content")]
    WrongAppOrMod { app: String, module: String },
    #[error("malformed customized content body: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// The act carried by a `chat.dim.group` / `keys` customized content, the
/// group wrapped-key exchange sub-protocol.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "act", rename_all = "lowercase")]
pub enum GroupKeysAct {
    /// bot -> sender: which members are missing a wrapped key.
    Query {
        group: Id,
        from: Id,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        members: Vec<Id>,
    },
    /// sender -> bot: a (possibly partial) wrapped-key table update.
    Update {
        group: Id,
        from: Id,
        keys: WrappedKeyTable,
    },
    /// member -> bot: "give me my wrapped key for this sender's table".
    Request {
        group: Id,
        from: Id,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        digest: Option<String>,
    },
    /// bot -> member: the single-entry answer to `Request`.
    Respond {
        group: Id,
        from: Id,
        keys: WrappedKeyTable,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GroupKeysContent {
    pub act: GroupKeysAct,
}

impl GroupKeysContent {
    pub fn group(&self) -> &Id {
        match &self.act {
            GroupKeysAct::Query { group, .. }
            | GroupKeysAct::Update { group, .. }
            | GroupKeysAct::Request { group, .. }
            | GroupKeysAct::Respond { group, .. } => group,
        }
    }

    pub fn to_customized(&self) -> CustomizedContent {
        let body = serde_json::to_value(&self.act).expect("act always serializes");
        let act = body
            .get("act")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        CustomizedContent {
            app: APP_GROUP.to_string(),
            module: MOD_KEYS.to_string(),
            act,
            body,
        }
    }
}

impl TryFrom<&CustomizedContent> for GroupKeysContent {
    type Error = ContentError;

    fn try_from(value: &CustomizedContent) -> Result<Self, Self::Error> {
        if !value.is(APP_GROUP, MOD_KEYS) {
            return Err(ContentError::WrongAppOrMod {
                app: APP_GROUP.to_string(),
                module: MOD_KEYS.to_string(),
            });
        }
        let mut body = value.body.clone();
        if let serde_json::Value::Object(ref mut map) = body {
            map.insert("act".to_string(), serde_json::Value::String(value.act.clone()));
        }
        let act: GroupKeysAct = serde_json::from_value(body)?;
        Ok(Self { act })
    }
}

/// The monitor's liveness report, `chat.dim.monitor/users/post`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsersPostContent {
    pub users: Vec<UserEntry>,
    pub time: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UserEntry {
    #[serde(rename = "U")]
    pub user: Id,
}

impl TryFrom<&CustomizedContent> for UsersPostContent {
    type Error = ContentError;

    fn try_from(value: &CustomizedContent) -> Result<Self, Self::Error> {
        if !value.is(APP_MONITOR, MOD_USERS) || value.act != "post" {
            return Err(ContentError::WrongAppOrMod {
                app: APP_MONITOR.to_string(),
                module: MOD_USERS.to_string(),
            });
        }
        Ok(serde_json::from_value(value.body.clone())?)
    }
}

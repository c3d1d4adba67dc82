// SPDX-FileCopyrightText: 2023 Phoenix R&D GmbH <hello@phnx.im>
//
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The presence tracker: last-seen time per user, consulted by the
//! [`crate::distributor::Distributor`] to decide immediate forward vs.
//! durable Inbox storage, and used by the usher bot (outside this crate)
//! to decide who needs re-inviting.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Mutex,
};

use chrono::Utc;
use tracing::{info, instrument, warn};

use gbotcommon::identifiers::Id;

use crate::{errors::FootprintError, facebook::Facebook};

mod persistence;

pub use persistence::ActiveUserRecord;

/// A user considered vanished once `now - last_time > EXPIRES`.
pub const EXPIRES_SECS: i64 = 36_000;
/// Minimum interval between disk flushes.
pub const INTERVAL_SECS: i64 = 600;
/// A user not seen in this long is dropped entirely on flush.
pub const MONTHLY_SECS: i64 = 30 * 24 * 60 * 60;

struct State {
    last_times: HashMap<Id, i64>,
    next_flush_time: i64,
}

/// Process-wide (by construction, not by hidden global) presence tracker.
/// Hold one `Footprint` behind a shared reference and pass it to every
/// component that needs it, rather than reaching for a singleton.
pub struct Footprint {
    state: Mutex<State>,
    active_users_path: PathBuf,
}

impl Footprint {
    pub fn new(active_users_path: impl Into<PathBuf>) -> Self {
        Self {
            state: Mutex::new(State {
                last_times: HashMap::new(),
                next_flush_time: 0,
            }),
            active_users_path: active_users_path.into(),
        }
    }

    /// Load the snapshot at `active_users_path` into an otherwise-empty
    /// tracker, if the file exists.
    pub fn load(active_users_path: impl Into<PathBuf>) -> Result<Self, FootprintError> {
        let path: PathBuf = active_users_path.into();
        let records = persistence::read(&path)?;
        let last_times = records.into_iter().map(|r| (r.id, r.time)).collect();
        Ok(Self {
            state: Mutex::new(State {
                last_times,
                next_flush_time: 0,
            }),
            active_users_path: path,
        })
    }

    /// Record that `id` was observed at `when` (epoch seconds); `None`
    /// (or a non-positive / future timestamp) is clamped to `now`.
    ///
    /// Groups are ignored: only user/bot/station presence is tracked.
    /// Returns `true` iff the entry changed.
    #[instrument(level = "debug", skip(self))]
    pub fn touch(&self, id: &Id, when: Option<i64>) -> bool {
        self.touch_at(id, when, Utc::now().timestamp())
    }

    fn touch_at(&self, id: &Id, when: Option<i64>, now: i64) -> bool {
        if id.is_group() {
            return false;
        }
        let when = match when {
            Some(w) if w > 0 && w <= now => w,
            _ => now,
        };
        let mut state = self.state.lock().expect("footprint mutex poisoned");
        let changed = match state.last_times.get(id) {
            Some(&existing) if when > existing => {
                state.last_times.insert(id.clone(), when);
                true
            }
            Some(_) => false,
            None => {
                state.last_times.insert(id.clone(), when);
                true
            }
        };
        if changed {
            info!(%id, when, "touch");
        }
        if now >= state.next_flush_time {
            if let Err(error) = self.flush_locked(&mut state, now) {
                warn!(%error, "failed to flush active users");
            }
        }
        changed
    }

    fn flush_locked(&self, state: &mut State, now: i64) -> Result<(), FootprintError> {
        state
            .last_times
            .retain(|_, &mut last_time| now - last_time < MONTHLY_SECS);
        let mut records: Vec<ActiveUserRecord> = state
            .last_times
            .iter()
            .map(|(id, &time)| ActiveUserRecord::new(id.clone(), time))
            .collect();
        records.sort_by(|a, b| b.time.cmp(&a.time));
        persistence::write(&self.active_users_path, &records)?;
        state.next_flush_time = now + INTERVAL_SECS;
        Ok(())
    }

    pub fn is_vanished(&self, id: &Id) -> bool {
        self.is_vanished_at(id, Utc::now().timestamp())
    }

    fn is_vanished_at(&self, id: &Id, now: i64) -> bool {
        let state = self.state.lock().expect("footprint mutex poisoned");
        match state.last_times.get(id) {
            Some(&last_time) => now - last_time > EXPIRES_SECS,
            None => true,
        }
    }

    /// Cross-check each tracked user's identity document against
    /// `facebook`; if the document carries a more recent `time`, touch the
    /// user with it. Intended to run from a dedicated background tick
    /// alongside the periodic flush, not inline in every `touch` call.
    pub async fn refresh_from_facebook<F: Facebook>(&self, facebook: &F) -> Result<(), F::Error> {
        let ids: Vec<Id> = {
            let state = self.state.lock().expect("footprint mutex poisoned");
            state.last_times.keys().cloned().collect()
        };
        for id in ids {
            if let Some(document_time) = facebook.document_time(&id).await? {
                self.touch(&id, Some(document_time));
            }
        }
        Ok(())
    }

    /// The (possibly loaded-from-disk) list of active users, sorted
    /// descending by last-seen time.
    pub fn active_users(&self) -> Vec<ActiveUserRecord> {
        let state = self.state.lock().expect("footprint mutex poisoned");
        let mut records: Vec<_> = state
            .last_times
            .iter()
            .map(|(id, &time)| ActiveUserRecord::new(id.clone(), time))
            .collect();
        records.sort_by(|a, b| b.time.cmp(&a.time));
        records
    }

    pub fn path(&self) -> &Path {
        &self.active_users_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gbotcommon::identifiers::EntityKind;
    use tempfile::tempdir;

    fn user(s: &str) -> Id {
        Id::new(EntityKind::User, s)
    }

    #[test]
    fn touch_ignores_groups() {
        let dir = tempdir().unwrap();
        let fp = Footprint::new(dir.path().join("active_users.js"));
        let group = Id::new(EntityKind::Group, "g@x");
        assert!(!fp.touch_at(&group, Some(100), 100));
    }

    #[test]
    fn touch_only_advances_monotonically() {
        let dir = tempdir().unwrap();
        let fp = Footprint::new(dir.path().join("active_users.js"));
        let a = user("a@x");
        assert!(fp.touch_at(&a, Some(100), 200));
        assert!(!fp.touch_at(&a, Some(50), 200));
        assert!(fp.is_vanished_at(&a, 200 + EXPIRES_SECS + 1));
        assert!(!fp.is_vanished_at(&a, 200 + EXPIRES_SECS - 1));
    }

    #[test]
    fn future_timestamp_is_clamped_to_now() {
        let dir = tempdir().unwrap();
        let fp = Footprint::new(dir.path().join("active_users.js"));
        let a = user("a@x");
        assert!(fp.touch_at(&a, Some(999_999_999), 100));
        assert!(!fp.is_vanished_at(&a, 100));
    }

    #[test]
    fn unknown_user_is_vanished() {
        let dir = tempdir().unwrap();
        let fp = Footprint::new(dir.path().join("active_users.js"));
        assert!(fp.is_vanished_at(&user("nobody@x"), 0));
    }

    #[test]
    fn flush_writes_snapshot_and_drops_stale_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("active_users.js");
        let fp = Footprint::new(&path);
        let fresh = user("fresh@x");
        let stale = user("stale@x");
        fp.touch_at(&stale, Some(0), 0);
        // second touch is far enough in the future to trigger a flush, and
        // `stale` is older than MONTHLY by then.
        assert!(fp.touch_at(&fresh, Some(MONTHLY_SECS + 10), MONTHLY_SECS + 10));

        let loaded = Footprint::load(&path).unwrap();
        assert!(!loaded.is_vanished_at(&fresh, MONTHLY_SECS + 10));
        assert!(loaded.is_vanished_at(&stale, MONTHLY_SECS + 10));
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Notices: aggregated records of noteworthy events that clients list or
//! wait for.
//!
//! A notice is unique per user, type, and key. Recording it again counts one
//! more occurrence. The notice is only "repeated", which moves it to the end
//! of listings, once its repeat-after window has passed.

use crate::error::StateError;
use crate::lock::State;
use crate::state::StateData;
use chrono::{DateTime, Utc};
use ovl_core::{ChangeId, Status};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// Notices not seen again for this long are dropped.
pub const DEFAULT_NOTICE_EXPIRE_AFTER: Duration = Duration::from_secs(7 * 24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NoticeType {
    /// A change was spawned or its status moved. Keyed by change id.
    ChangeUpdate,
    /// Keyed by the human-readable warning message.
    Warning,
}

impl fmt::Display for NoticeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            NoticeType::ChangeUpdate => "change-update",
            NoticeType::Warning => "warning",
        })
    }
}

/// Durations are stored as whole seconds.
mod secs {
    use super::*;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

fn default_expire_after() -> Duration {
    DEFAULT_NOTICE_EXPIRE_AFTER
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Notice {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) user_id: Option<u32>,
    #[serde(rename = "type")]
    pub(crate) notice_type: NoticeType,
    pub(crate) key: String,
    pub(crate) first_occurred: DateTime<Utc>,
    pub(crate) last_occurred: DateTime<Utc>,
    pub(crate) last_repeated: DateTime<Utc>,
    pub(crate) occurrences: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub(crate) last_data: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Duration::is_zero", with = "secs")]
    pub(crate) repeat_after: Duration,
    #[serde(default = "default_expire_after", with = "secs")]
    pub(crate) expire_after: Duration,
}

impl Notice {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// User allowed to see the notice, `None` for public notices.
    pub fn user_id(&self) -> Option<u32> {
        self.user_id
    }

    pub fn notice_type(&self) -> NoticeType {
        self.notice_type
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn first_occurred(&self) -> DateTime<Utc> {
        self.first_occurred
    }

    pub fn last_occurred(&self) -> DateTime<Utc> {
        self.last_occurred
    }

    pub fn last_repeated(&self) -> DateTime<Utc> {
        self.last_repeated
    }

    pub fn occurrences(&self) -> u64 {
        self.occurrences
    }

    /// Data recorded with the most recent occurrence.
    pub fn last_data(&self) -> &BTreeMap<String, String> {
        &self.last_data
    }

    pub fn repeat_after(&self) -> Duration {
        self.repeat_after
    }

    pub fn expire_after(&self) -> Duration {
        self.expire_after
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        let expires = chrono::Duration::from_std(self.expire_after)
            .ok()
            .and_then(|d| self.last_occurred.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        expires < now
    }

    fn is(&self, user_id: Option<u32>, notice_type: NoticeType, key: &str) -> bool {
        self.user_id == user_id && self.notice_type == notice_type && self.key == key
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let user = self
            .user_id
            .map_or_else(|| "public".to_string(), |u| u.to_string());
        write!(f, "Notice {} ({user}:{}:{})", self.id, self.notice_type, self.key)
    }
}

/// Optional parts of a recorded occurrence.
#[derive(Debug, Clone, Default)]
pub struct AddNoticeOptions {
    pub data: BTreeMap<String, String>,
    /// Minimum time between repeats; zero repeats on every occurrence.
    pub repeat_after: Duration,
    /// Occurrence time, the state clock's current time when `None`.
    pub time: Option<DateTime<Utc>>,
}

/// Selects notices. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct NoticeFilter {
    /// Only notices of this user or public ones.
    pub user_id: Option<u32>,
    pub types: Vec<NoticeType>,
    pub keys: Vec<String>,
    /// Only notices repeated strictly after this time.
    pub after: Option<DateTime<Utc>>,
}

impl NoticeFilter {
    fn matches(&self, n: &Notice) -> bool {
        if let (Some(uid), Some(owner)) = (self.user_id, n.user_id) {
            if uid != owner {
                return false;
            }
        }
        if !self.types.is_empty() && !self.types.contains(&n.notice_type) {
            return false;
        }
        if !self.keys.is_empty() && !self.keys.iter().any(|k| *k == n.key) {
            return false;
        }
        self.after.map_or(true, |after| n.last_repeated > after)
    }
}

impl StateData {
    /// Record an occurrence of the notice with `notice_type` and `key`,
    /// returning its id.
    pub fn add_notice(
        &mut self,
        user_id: Option<u32>,
        notice_type: NoticeType,
        key: &str,
        options: AddNoticeOptions,
    ) -> Result<String, StateError> {
        if key.is_empty() {
            return Err(StateError::InvalidNotice(format!(
                "{notice_type} notice needs a key"
            )));
        }
        self.touch();
        let now = options.time.unwrap_or_else(|| self.now());

        let existing = self
            .notices
            .iter()
            .position(|n| n.is(user_id, notice_type, key));
        let notice = match existing {
            Some(i) => {
                let notice = &mut self.notices[i];
                let window_over = chrono::Duration::from_std(options.repeat_after)
                    .ok()
                    .and_then(|d| notice.last_repeated.checked_add_signed(d))
                    .is_some_and(|until| now > until);
                if options.repeat_after.is_zero() || window_over {
                    notice.last_repeated = now;
                }
                notice.occurrences += 1;
                notice
            }
            None => {
                self.last_notice_id += 1;
                self.notices.push(Notice {
                    id: self.last_notice_id.to_string(),
                    user_id,
                    notice_type,
                    key: key.to_string(),
                    first_occurred: now,
                    last_occurred: now,
                    last_repeated: now,
                    occurrences: 1,
                    last_data: BTreeMap::new(),
                    repeat_after: Duration::ZERO,
                    expire_after: DEFAULT_NOTICE_EXPIRE_AFTER,
                });
                let last = self.notices.len() - 1;
                &mut self.notices[last]
            }
        };
        notice.last_occurred = now;
        notice.last_data = options.data;
        notice.repeat_after = options.repeat_after;
        Ok(notice.id.clone())
    }

    /// Unexpired notices matching `filter`, oldest repeat first.
    pub fn notices(&self, filter: &NoticeFilter) -> Vec<&Notice> {
        let now = self.now();
        let mut found: Vec<&Notice> = self
            .notices
            .iter()
            .filter(|n| !n.expired(now) && filter.matches(n))
            .collect();
        found.sort_by_key(|n| n.last_repeated);
        found
    }

    pub fn notice(&self, id: &str) -> Option<&Notice> {
        self.notices.iter().find(|n| n.id == id)
    }

    /// Number of stored notices, expired ones included until pruned.
    pub fn num_notices(&self) -> usize {
        self.notices.len()
    }

    /// Drop notices that expired before `now`, returning how many.
    pub(crate) fn prune_notices(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.notices.len();
        self.notices.retain(|n| !n.expired(now));
        let removed = before - self.notices.len();
        if removed > 0 {
            self.touch();
        }
        removed
    }

    /// Remember the current status of every change without recording
    /// notices for it.
    pub(crate) fn seed_change_updates(&mut self) {
        let statuses = self.change_statuses();
        self.reported = statuses.into_iter().collect();
    }

    /// Record a change-update notice for every change spawned or whose
    /// status moved since the last call.
    pub(crate) fn record_change_updates(&mut self) {
        let statuses = self.change_statuses();
        self.reported.retain(|id, _| self.changes.contains_key(id));
        for (id, status) in statuses {
            if self.reported.get(&id) == Some(&status) {
                continue;
            }
            let kind = self
                .changes
                .get(&id)
                .map(|c| c.kind.clone())
                .unwrap_or_default();
            let options = AddNoticeOptions {
                data: BTreeMap::from([("kind".to_string(), kind)]),
                ..AddNoticeOptions::default()
            };
            if self
                .add_notice(None, NoticeType::ChangeUpdate, id.as_str(), options)
                .is_ok()
            {
                self.reported.insert(id, status);
            }
        }
    }

    fn change_statuses(&self) -> Vec<(ChangeId, Status)> {
        self.changes
            .keys()
            .map(|id| (id.clone(), self.change_status(id)))
            .collect()
    }
}

impl State {
    /// Wait until notices matching `filter` exist, returning them oldest
    /// repeat first. Notices become visible once the lock that recorded them
    /// is released. Drop the future to stop waiting.
    pub async fn wait_notices(&self, filter: &NoticeFilter) -> Vec<Notice> {
        loop {
            let notified = self.changed().notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            {
                let st = self.lock();
                let found: Vec<Notice> = st.notices(filter).into_iter().cloned().collect();
                if !found.is_empty() {
                    return found;
                }
            }
            notified.await;
        }
    }
}

#[cfg(test)]
#[path = "notices_tests.rs"]
mod tests;

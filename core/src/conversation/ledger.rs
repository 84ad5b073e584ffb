//! Version ledger for edited messages
//!
//! Every user message that has been edited at least once owns a
//! [`VersionSet`]: the ordered list of its alternate contents plus the index
//! of the one currently displayed. Each non-active [`Version`] keeps the
//! continuation (the messages that followed it) from the last time it was
//! active, so switching back restores that timeline.

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use uuid::Uuid;

use crate::error::Result;
use crate::error::RetconErr;
use crate::models::Content;
use crate::models::Message;

/// One alternate content of an edited message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: Uuid,
    pub content: Content,
    pub created_at: DateTime<Utc>,
    /// Owned copy of the messages that followed this version the last time
    /// it was active. Empty for a version that was never navigated away from.
    #[serde(default)]
    pub stashed_continuation: Vec<Message>,
}

impl Version {
    fn new(content: Content, created_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            content,
            created_at,
            stashed_continuation: Vec::new(),
        }
    }
}

/// Step between neighbouring versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Previous,
    Next,
}

impl Direction {
    pub const fn offset(self) -> i64 {
        match self {
            Self::Previous => -1,
            Self::Next => 1,
        }
    }
}

impl TryFrom<i32> for Direction {
    type Error = RetconErr;

    /// Only `-1` and `+1` name a neighbour; every other offset, including
    /// zero, is out of range.
    fn try_from(offset: i32) -> Result<Self> {
        match offset {
            -1 => Ok(Self::Previous),
            1 => Ok(Self::Next),
            other => Err(RetconErr::OutOfRange {
                index: i64::from(other),
                len: 0,
            }),
        }
    }
}

/// Serialized shape of a [`VersionSet`], validated on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawVersionSet {
    versions: Vec<Version>,
    active_index: usize,
}

/// Ordered versions of one message plus the active index.
///
/// Invariant: `versions` is never empty and `active_index < versions.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawVersionSet", into = "RawVersionSet")]
pub struct VersionSet {
    versions: Vec<Version>,
    active_index: usize,
}

impl TryFrom<RawVersionSet> for VersionSet {
    type Error = String;

    fn try_from(raw: RawVersionSet) -> std::result::Result<Self, Self::Error> {
        if raw.versions.is_empty() {
            return Err("version set has no versions".to_string());
        }
        if raw.active_index >= raw.versions.len() {
            return Err(format!(
                "active version {} out of range for {} versions",
                raw.active_index,
                raw.versions.len()
            ));
        }
        Ok(Self {
            versions: raw.versions,
            active_index: raw.active_index,
        })
    }
}

impl From<VersionSet> for RawVersionSet {
    fn from(set: VersionSet) -> Self {
        Self {
            versions: set.versions,
            active_index: set.active_index,
        }
    }
}

impl VersionSet {
    /// Version 0 holds the pre-edit content and an empty stash.
    pub fn seed(content: Content, created_at: DateTime<Utc>) -> Self {
        Self {
            versions: vec![Version::new(content, created_at)],
            active_index: 0,
        }
    }

    pub const fn active_index(&self) -> usize {
        self.active_index
    }

    pub fn len(&self) -> usize {
        self.versions.len()
    }

    /// Never true for a set that came from `seed` or deserialization.
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }

    pub fn active(&self) -> &Version {
        &self.versions[self.active_index]
    }

    pub fn get(&self, index: usize) -> Option<&Version> {
        self.versions.get(index)
    }

    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    /// Overwrite the active version's stash with `continuation`.
    pub fn stash_active(&mut self, continuation: Vec<Message>) {
        self.versions[self.active_index].stashed_continuation = continuation;
    }

    /// Append a version with an empty stash and make it active.
    pub fn push_active(&mut self, content: Content) -> usize {
        self.versions.push(Version::new(content, Utc::now()));
        self.active_index = self.versions.len() - 1;
        self.active_index
    }

    /// Index reached by moving one step in `direction`, without moving.
    pub fn step(&self, direction: Direction) -> Result<usize> {
        let target = self.active_index as i64 + direction.offset();
        if target < 0 || target >= self.versions.len() as i64 {
            return Err(RetconErr::OutOfRange {
                index: target,
                len: self.versions.len(),
            });
        }
        Ok(target as usize)
    }

    /// Make `index` active and hand back a fresh copy of its stash.
    ///
    /// The copy keeps the archived stash intact however the live timeline is
    /// mutated afterwards.
    pub fn activate(&mut self, index: usize) -> Result<Vec<Message>> {
        let Some(target) = self.versions.get(index) else {
            return Err(RetconErr::OutOfRange {
                index: index as i64,
                len: self.versions.len(),
            });
        };
        let restored = target.stashed_continuation.clone();
        self.active_index = index;
        Ok(restored)
    }
}

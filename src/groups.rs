//! Group specification and resolution.
//!
//! A spec is either a literal comma separated list of group ids or the
//! sentinel `ALL`, which expands to every group the authenticated user
//! belongs to. Resolution runs once per connection attempt and is never
//! cached.

use std::fmt;
use std::str::FromStr;

use orion_client::{OrionApi, Session};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::SessionError;

pub const ALL_GROUPS: &str = "ALL";

/// Ordered set of group ids. Inserting an id already present is a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct GroupSet(Vec<String>);

impl GroupSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>) -> bool {
        let id = id.into();
        if self.0.contains(&id) {
            return false;
        }
        self.0.push(id);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.iter().any(|g| g == id)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.0.clone()
    }
}

impl<S: Into<String>> FromIterator<S> for GroupSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = GroupSet::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

impl From<Vec<String>> for GroupSet {
    fn from(ids: Vec<String>) -> Self {
        ids.into_iter().collect()
    }
}

impl From<GroupSet> for Vec<String> {
    fn from(set: GroupSet) -> Self {
        set.0
    }
}

impl fmt::Display for GroupSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(","))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSpec {
    All,
    List(GroupSet),
}

impl GroupSpec {
    /// Parse a configured spec. Line breaks are stripped before splitting on
    /// commas; empty segments are dropped.
    pub fn parse(raw: &str) -> Self {
        let cleaned: String = raw.chars().filter(|c| *c != '\r' && *c != '\n').collect();
        let cleaned = cleaned.trim();
        if cleaned == ALL_GROUPS {
            return GroupSpec::All;
        }
        GroupSpec::List(
            cleaned
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .collect(),
        )
    }

    pub fn is_all(&self) -> bool {
        matches!(self, GroupSpec::All)
    }
}

impl FromStr for GroupSpec {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(GroupSpec::parse(s))
    }
}

impl fmt::Display for GroupSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupSpec::All => f.write_str(ALL_GROUPS),
            GroupSpec::List(set) => set.fmt(f),
        }
    }
}

/// Expand `spec` into concrete group ids. `ALL` issues exactly one
/// membership query against the platform.
pub async fn resolve(spec: &GroupSpec, api: &dyn OrionApi, session: &Session) -> Result<GroupSet, SessionError> {
    match spec {
        GroupSpec::List(set) => Ok(set.clone()),
        GroupSpec::All => {
            let ids = api.user_groups(session).await.map_err(SessionError::Resolution)?;
            let set: GroupSet = ids.into_iter().collect();
            debug!(groups = %set, "resolved ALL groups");
            Ok(set)
        }
    }
}

//! Deterministic pair identity and role assignment.
//!
//! Both participants derive the same connection id and the same offerer
//! from nothing but the two user ids, so neither has to ask the other.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Rendezvous key for one participant pair.
///
/// The smaller id is length-prefixed so that no two distinct pairs can
/// produce the same key, whatever characters the ids contain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(String);

impl ConnectionId {
    pub fn for_pair(a: &str, b: &str) -> Self {
        let (lo, hi) = ordered(a, b);
        Self(format!("{}:{}_{}", lo.len(), lo, hi))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

impl NegotiationRole {
    /// The lexicographically smaller id offers.
    pub fn for_pair(local_id: &str, remote_id: &str) -> Self {
        if local_id < remote_id {
            NegotiationRole::Offerer
        } else {
            NegotiationRole::Answerer
        }
    }
}

/// The offerer of a pair.
#[cfg(test)]
fn offerer_of<'a>(a: &'a str, b: &'a str) -> &'a str {
    ordered(a, b).0
}

fn ordered<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

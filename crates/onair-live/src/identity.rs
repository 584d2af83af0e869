//! Participant identity and the follow-graph lookup, both supplied by the
//! profile service. The orchestrator only reads them.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use onair_common::LiveError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub display_name: String,
    /// Opaque avatar reference (url or storage key).
    #[serde(default)]
    pub avatar_ref: Option<String>,
}

impl Identity {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            display_name: display_name.into(),
            avatar_ref: None,
        }
    }

    pub fn with_avatar(mut self, avatar_ref: impl Into<String>) -> Self {
        self.avatar_ref = Some(avatar_ref.into());
        self
    }

    /// User ids become store path segments, so they must be non-empty and
    /// free of `/`. `system` is reserved for orchestrator messages.
    pub fn validate(&self) -> Result<(), LiveError> {
        validate_user_id(&self.user_id)
    }
}

pub(crate) fn validate_user_id(user_id: &str) -> Result<(), LiveError> {
    if user_id.is_empty() || user_id.contains('/') {
        return Err(LiveError::Validation(format!("invalid user id {user_id:?}")));
    }
    if user_id == crate::model::SYSTEM_SENDER {
        return Err(LiveError::Validation("user id \"system\" is reserved".into()));
    }
    Ok(())
}

/// Answers "does `follower` follow `followee`?" for the followers-only
/// gates.
#[async_trait]
pub trait FollowGraph: Send + Sync {
    async fn follows(&self, follower: &str, followee: &str) -> bool;
}

/// Follow graph held in memory.
#[derive(Debug, Default)]
pub struct StaticFollowGraph {
    edges: RwLock<HashMap<String, HashSet<String>>>,
}

impl StaticFollowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn follow(&self, follower: &str, followee: &str) {
        let mut edges = self.edges.write().unwrap_or_else(|e| e.into_inner());
        edges
            .entry(follower.to_string())
            .or_default()
            .insert(followee.to_string());
    }

    pub fn unfollow(&self, follower: &str, followee: &str) {
        let mut edges = self.edges.write().unwrap_or_else(|e| e.into_inner());
        if let Some(set) = edges.get_mut(follower) {
            set.remove(followee);
        }
    }
}

#[async_trait]
impl FollowGraph for StaticFollowGraph {
    async fn follows(&self, follower: &str, followee: &str) -> bool {
        let edges = self.edges.read().unwrap_or_else(|e| e.into_inner());
        edges
            .get(follower)
            .is_some_and(|set| set.contains(followee))
    }
}

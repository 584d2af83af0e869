//! Who must connect to whom.
//!
//! Stage participants (host and guests) mesh with each other and with
//! every viewer; viewers connect to the stage only.

use std::collections::{BTreeMap, BTreeSet};

/// Room membership as seen by one participant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Membership {
    pub host_id: String,
    pub guests: BTreeSet<String>,
    pub viewers: BTreeSet<String>,
}

impl Membership {
    pub fn new(host_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            ..Self::default()
        }
    }

    pub fn is_on_stage(&self, user_id: &str) -> bool {
        user_id == self.host_id || self.guests.contains(user_id)
    }

    pub fn stage(&self) -> impl Iterator<Item = &String> {
        std::iter::once(&self.host_id).chain(self.guests.iter())
    }

    /// Remote ids `local_id` must hold a link to.
    pub fn target_set(&self, local_id: &str) -> BTreeSet<String> {
        target_set(local_id, &self.host_id, &self.guests, &self.viewers)
    }

    /// Targets paired with whether each one is on stage.
    pub fn targets_with_stage(&self, local_id: &str) -> BTreeMap<String, bool> {
        self.target_set(local_id)
            .into_iter()
            .map(|id| {
                let stage = self.is_on_stage(&id);
                (id, stage)
            })
            .collect()
    }
}

/// The topology rule as a pure function. Someone listed both as guest
/// and viewer counts as a guest.
pub fn target_set(
    local_id: &str,
    host_id: &str,
    guests: &BTreeSet<String>,
    viewers: &BTreeSet<String>,
) -> BTreeSet<String> {
    let local_on_stage = local_id == host_id || guests.contains(local_id);

    let mut targets: BTreeSet<String> = std::iter::once(host_id.to_string())
        .chain(guests.iter().cloned())
        .collect();
    if local_on_stage {
        targets.extend(viewers.iter().cloned());
    }
    targets.remove(local_id);
    targets
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&str]) -> BTreeSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn room() -> Membership {
        Membership {
            host_id: "h".into(),
            guests: set(&["g1", "g2"]),
            viewers: set(&["v1", "v2"]),
        }
    }

    #[test]
    fn host_connects_to_everyone() {
        assert_eq!(room().target_set("h"), set(&["g1", "g2", "v1", "v2"]));
    }

    #[test]
    fn guest_meshes_with_stage_and_serves_viewers() {
        assert_eq!(room().target_set("g1"), set(&["h", "g2", "v1", "v2"]));
    }

    #[test]
    fn viewer_connects_to_stage_only() {
        assert_eq!(room().target_set("v1"), set(&["h", "g1", "g2"]));
    }

    #[test]
    fn outsider_is_treated_as_viewer() {
        assert_eq!(room().target_set("x"), set(&["h", "g1", "g2"]));
    }

    #[test]
    fn guest_listed_as_viewer_counts_as_guest() {
        let mut m = room();
        m.viewers.insert("g1".into());
        assert_eq!(m.target_set("g1"), set(&["h", "g2", "v1", "v2"]));
        assert!(m.targets_with_stage("v1")["g1"]);
    }

    #[test]
    fn promotion_changes_the_target_set() {
        let mut m = room();
        let before = m.target_set("v1");
        m.viewers.remove("v1");
        m.guests.insert("v1".into());
        let after = m.target_set("v1");
        assert_eq!(before, set(&["h", "g1", "g2"]));
        assert_eq!(after, set(&["h", "g1", "g2", "v2"]));
    }

    #[test]
    fn stage_iterates_host_first() {
        let m = room();
        let stage: Vec<&String> = m.stage().collect();
        assert_eq!(stage, vec!["h", "g1", "g2"]);
    }
}

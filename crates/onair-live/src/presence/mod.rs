//! Presence: viewer accounting and lease-based cleanup.

mod reaper;
mod tracker;

pub use reaper::{LeaseReaper, ReapReport};
pub use tracker::{JoinOutcome, PresenceTracker};

pub(crate) use tracker::decrement_viewers;

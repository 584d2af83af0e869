//! Room lifecycle: creation, the one-way live→ended transition, counters
//! and the host lease.

use chrono::Duration;
use onair_common::{new_id, LiveError, LiveEvent, Result};
use serde_json::json;
use tracing::{debug, info};

use crate::context::LiveContext;
use crate::identity::Identity;
use crate::model::{Room, RoomSettings, RoomStatus};
use crate::store::{paths, SetMode, StoreExt, Subscription, Transaction, TxnExt, Watch};

/// Read a room inside a transaction, failing if it does not exist.
pub(crate) fn txn_room(txn: &dyn Transaction, room_id: &str) -> Result<Room> {
    txn.get_as::<Room>(&paths::room(room_id))?
        .ok_or_else(|| LiveError::NotFound(format!("room {room_id}")))
}

pub struct RoomManager {
    ctx: LiveContext,
}

impl RoomManager {
    pub fn new(ctx: LiveContext) -> Self {
        Self { ctx }
    }

    /// Create a live room hosted by `host` and return its id.
    pub async fn create_room(
        &self,
        host: &Identity,
        title: &str,
        settings: RoomSettings,
    ) -> Result<String> {
        host.validate()?;
        let limits = &self.ctx.config.rooms;

        let title = title.trim();
        if title.is_empty() {
            return Err(LiveError::Validation("title must not be empty".into()));
        }
        if title.chars().count() > limits.max_title_length as usize {
            return Err(LiveError::Validation(format!(
                "title is longer than {} characters",
                limits.max_title_length
            )));
        }
        if settings.max_guests < 0 {
            return Err(LiveError::Validation("max guests must not be negative".into()));
        }
        if settings.max_guests > i64::from(limits.max_guests_limit) {
            return Err(LiveError::Validation(format!(
                "max guests must be at most {}",
                limits.max_guests_limit
            )));
        }

        let now = self.ctx.now();
        let room = Room {
            id: new_id(),
            host_id: host.user_id.clone(),
            host_name: host.display_name.clone(),
            host_avatar: host.avatar_ref.clone(),
            title: title.to_string(),
            room_type: settings.room_type,
            allow_guests: settings.allow_guests,
            chat_access: settings.chat_access,
            join_access: settings.join_access,
            moderation: settings.moderation,
            privacy: settings.privacy,
            max_guests: settings.max_guests as u32,
            viewer_count: 0,
            like_count: 0,
            status: RoomStatus::Live,
            created_at: now,
            started_at: now,
            ended_at: None,
            host_lease_expires_at: now + self.lease(),
        };

        self.ctx
            .store
            .put(&paths::room(&room.id), &room, SetMode::Replace)
            .await?;

        self.ctx.publish(LiveEvent::RoomCreated {
            room_id: room.id.clone(),
            host_id: room.host_id.clone(),
        });
        info!(room_id = %room.id, user_id = %room.host_id, "Room created");
        Ok(room.id)
    }

    /// Mark the room ended. Safe to call from any number of triggers;
    /// returns `true` only for the call that performed the transition.
    pub async fn end_room(&self, room_id: &str) -> Result<bool> {
        let now = self.ctx.now();
        let mut ended_now = false;
        self.ctx
            .store
            .transact(&mut |txn: &mut dyn Transaction| {
                ended_now = false;
                let room = txn_room(txn, room_id)?;
                if room.status == RoomStatus::Ended {
                    return Ok(());
                }
                txn.set(
                    &paths::room(room_id),
                    json!({ "status": RoomStatus::Ended, "ended_at": now }),
                    SetMode::Merge,
                );
                ended_now = true;
                Ok(())
            })
            .await?;

        if ended_now {
            self.ctx.publish(LiveEvent::RoomEnded {
                room_id: room_id.to_string(),
            });
            info!(room_id, "Room ended");
        } else {
            debug!(room_id, "Room already ended");
        }
        Ok(ended_now)
    }

    /// Atomically add one like and return the new total.
    pub async fn increment_like(&self, room_id: &str) -> Result<i64> {
        Ok(self
            .ctx
            .store
            .increment(&paths::room(room_id), "like_count", 1)
            .await?)
    }

    pub async fn get_room(&self, room_id: &str) -> Result<Option<Room>> {
        Ok(self.ctx.store.get_as(&paths::room(room_id)).await?)
    }

    /// Like `get_room`, but a missing room is an error.
    pub async fn room(&self, room_id: &str) -> Result<Room> {
        self.get_room(room_id)
            .await?
            .ok_or_else(|| LiveError::NotFound(format!("room {room_id}")))
    }

    pub async fn watch_room(&self, room_id: &str) -> Result<Subscription> {
        Ok(self
            .ctx
            .store
            .subscribe(Watch::Document(paths::room(room_id)))
            .await?)
    }

    pub async fn list_live_rooms(&self) -> Result<Vec<Room>> {
        let rooms: Vec<(String, Room)> = self.ctx.store.list_as(paths::ROOMS).await?;
        Ok(rooms
            .into_iter()
            .map(|(_, room)| room)
            .filter(Room::is_live)
            .collect())
    }

    /// Push the host lease forward. Returns `false` if the room has
    /// already ended.
    pub async fn renew_host_lease(&self, room_id: &str) -> Result<bool> {
        self.ctx
            .retry("renew_host_lease", || async move {
                let expires = self.ctx.now() + self.lease();
                let mut renewed = false;
                self.ctx
                    .store
                    .transact(&mut |txn: &mut dyn Transaction| {
                        let room = txn_room(txn, room_id)?;
                        renewed = room.is_live();
                        if renewed {
                            txn.set(
                                &paths::room(room_id),
                                json!({ "host_lease_expires_at": expires }),
                                SetMode::Merge,
                            );
                        }
                        Ok(())
                    })
                    .await?;
                Ok::<_, LiveError>(renewed)
            })
            .await
    }

    fn lease(&self) -> Duration {
        Duration::seconds(self.ctx.config.presence.lease_secs as i64)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use onair_common::{Clock, ManualClock};
    use onair_config::OnAirConfig;

    use super::*;
    use crate::store::MemoryStore;

    fn setup() -> (RoomManager, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let ctx = LiveContext::new(store.clone(), OnAirConfig::default()).with_clock(clock.clone());
        (RoomManager::new(ctx), store, clock)
    }

    fn host() -> Identity {
        Identity::new("host", "Host")
    }

    #[tokio::test]
    async fn create_room_starts_live_with_zeroed_counts() {
        let (rooms, _, clock) = setup();
        let id = rooms
            .create_room(&host(), "  Friday night  ", RoomSettings::default())
            .await
            .unwrap();

        let room = rooms.room(&id).await.unwrap();
        assert_eq!(room.title, "Friday night");
        assert_eq!(room.status, RoomStatus::Live);
        assert_eq!(room.viewer_count, 0);
        assert_eq!(room.like_count, 0);
        assert_eq!(room.started_at, clock.now());
        assert!(room.ended_at.is_none());
        assert_eq!(room.max_guests, 3);
    }

    #[tokio::test]
    async fn create_room_validates_input() {
        let (rooms, _, _) = setup();
        let err = rooms
            .create_room(&host(), "   ", RoomSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, LiveError::Validation(_)));

        let settings = RoomSettings {
            max_guests: -1,
            ..RoomSettings::default()
        };
        let err = rooms.create_room(&host(), "ok", settings).await.unwrap_err();
        assert!(matches!(err, LiveError::Validation(_)));

        let settings = RoomSettings {
            max_guests: 9,
            ..RoomSettings::default()
        };
        assert!(rooms.create_room(&host(), "ok", settings).await.is_err());

        let long = "x".repeat(121);
        assert!(rooms
            .create_room(&host(), &long, RoomSettings::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn end_room_is_idempotent() {
        let (rooms, _, clock) = setup();
        let id = rooms
            .create_room(&host(), "show", RoomSettings::default())
            .await
            .unwrap();

        clock.advance(Duration::seconds(60));
        assert!(rooms.end_room(&id).await.unwrap());
        let first_end = rooms.room(&id).await.unwrap().ended_at;

        clock.advance(Duration::seconds(60));
        assert!(!rooms.end_room(&id).await.unwrap());
        let room = rooms.room(&id).await.unwrap();
        assert_eq!(room.status, RoomStatus::Ended);
        assert_eq!(room.ended_at, first_end);
    }

    #[tokio::test]
    async fn end_room_publishes_once() {
        let (rooms, _, _) = setup();
        let mut events = rooms.ctx.events.subscribe();
        let id = rooms
            .create_room(&host(), "show", RoomSettings::default())
            .await
            .unwrap();
        rooms.end_room(&id).await.unwrap();
        rooms.end_room(&id).await.unwrap();

        assert!(matches!(events.recv().await.unwrap(), LiveEvent::RoomCreated { .. }));
        assert!(matches!(events.recv().await.unwrap(), LiveEvent::RoomEnded { .. }));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn end_missing_room_is_not_found() {
        let (rooms, _, _) = setup();
        assert!(matches!(
            rooms.end_room("nope").await,
            Err(LiveError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn concurrent_likes_all_count() {
        let (rooms, _, _) = setup();
        let rooms = Arc::new(rooms);
        let id = rooms
            .create_room(&host(), "show", RoomSettings::default())
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..20 {
            let rooms = Arc::clone(&rooms);
            let id = id.clone();
            handles.push(tokio::spawn(async move { rooms.increment_like(&id).await }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(rooms.room(&id).await.unwrap().like_count, 20);
    }

    #[tokio::test]
    async fn list_live_rooms_skips_ended() {
        let (rooms, _, _) = setup();
        let a = rooms.create_room(&host(), "a", RoomSettings::default()).await.unwrap();
        let b = rooms.create_room(&host(), "b", RoomSettings::default()).await.unwrap();
        rooms.end_room(&a).await.unwrap();

        let live: Vec<String> = rooms
            .list_live_rooms()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(live, vec![b]);
    }

    #[tokio::test]
    async fn host_lease_renewal_survives_transient_failure() {
        let (rooms, store, clock) = setup();
        let id = rooms.create_room(&host(), "show", RoomSettings::default()).await.unwrap();
        clock.advance(Duration::seconds(30));

        store.fail_next(1);
        assert!(rooms.renew_host_lease(&id).await.unwrap());
        let room = rooms.room(&id).await.unwrap();
        assert_eq!(room.host_lease_expires_at, clock.now() + Duration::seconds(45));

        rooms.end_room(&id).await.unwrap();
        assert!(!rooms.renew_host_lease(&id).await.unwrap());
    }
}

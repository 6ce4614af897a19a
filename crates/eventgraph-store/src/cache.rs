//! Memoizes the one hot read query this core has: the forward-extremity
//! list for a room. A sharded cache crate is overkill for one key per room;
//! a plain mutex-guarded map, invalidated only from post-commit callbacks,
//! satisfies the contract directly.

use std::{collections::HashMap, sync::Mutex};

use eventgraph_common::RoomId;

use crate::edge_store::LatestEvent;

/// Read-mostly cache for per-room query results, invalidated exclusively
/// through [`crate::Transaction::call_after`] callbacks so a reader can
/// never observe an invalidation for a write that did not durably commit.
#[derive(Default)]
pub struct CacheCoordinator {
    latest_event_ids_in_room: Mutex<HashMap<RoomId, Vec<LatestEvent>>>,
}

impl CacheCoordinator {
    /// An empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached forward-extremity list for `room_id`, if present.
    pub fn get_latest_in_room(&self, room_id: &RoomId) -> Option<Vec<LatestEvent>> {
        self.latest_event_ids_in_room.lock().expect("cache mutex poisoned").get(room_id).cloned()
    }

    /// Populates the cache entry for `room_id`.
    pub fn set_latest_in_room(&self, room_id: RoomId, value: Vec<LatestEvent>) {
        self.latest_event_ids_in_room.lock().expect("cache mutex poisoned").insert(room_id, value);
    }

    /// Drops the cache entry for `room_id`, if any.
    pub fn invalidate_latest_in_room(&self, room_id: &RoomId) {
        self.latest_event_ids_in_room.lock().expect("cache mutex poisoned").remove(room_id);
    }
}

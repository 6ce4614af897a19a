//! DAG-walking read queries: authorization-chain closure, depth-ordered
//! backfill, and the missing-events gap fill used to catch a peer up
//! between two frontiers.

use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashSet},
};

use eventgraph_common::{Event, EventId, RoomId};
use sqlx::Row;

use crate::{edge_store::EdgeStore, error::Result, txn::Transaction};

/// Read-only traversal operations over the event graph.
pub struct GraphQueryEngine;

/// A backfill queue entry ordered solely by depth, per the redesign note
/// against relying on tuple ordering of heterogeneous payloads for
/// tie-breaks: `event_id` never participates in the comparison.
struct BackfillItem {
    depth: u64,
    event_id: EventId,
}

impl PartialEq for BackfillItem {
    fn eq(&self, other: &Self) -> bool {
        self.depth == other.depth
    }
}

impl Eq for BackfillItem {}

impl PartialOrd for BackfillItem {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BackfillItem {
    fn cmp(&self, other: &Self) -> Ordering {
        self.depth.cmp(&other.depth)
    }
}

impl GraphQueryEngine {
    /// Breadth-first closure of `event_ids` over the `event_auth` relation.
    /// Terminates because the auth sub-DAG is acyclic and finite; returns
    /// the closure as an unordered list.
    pub async fn auth_chain(
        txn: &mut Transaction,
        event_ids: &[EventId],
    ) -> Result<Vec<EventId>> {
        let mut results: HashSet<EventId> = HashSet::new();
        let mut front: HashSet<EventId> = event_ids.iter().cloned().collect();

        while !front.is_empty() {
            let mut new_front = HashSet::new();
            for event_id in &front {
                let rows = sqlx::query("SELECT auth_id FROM event_auth WHERE event_id = ?")
                    .bind(event_id.as_str())
                    .fetch_all(txn.connection())
                    .await?;
                for row in rows {
                    let auth_id = EventId::from(row.get::<String, _>("auth_id"));
                    if !results.contains(&auth_id) {
                        new_front.insert(auth_id);
                    }
                }
            }
            results.extend(new_front.iter().cloned());
            front = new_front;
        }

        Ok(results.into_iter().collect())
    }

    /// Depth-ordered best-first walk over prev-edges, seeded from
    /// `seed_event_ids`. Returns the visited set; callers materialize full
    /// events and sort by descending depth themselves.
    pub async fn backfill(
        txn: &mut Transaction,
        room_id: &RoomId,
        seed_event_ids: &[EventId],
        limit: usize,
    ) -> Result<Vec<(EventId, u64)>> {
        let mut heap = BinaryHeap::new();
        for event_id in seed_event_ids {
            if let Some(depth) = EdgeStore::get_depth(txn, event_id).await? {
                heap.push(BackfillItem { depth, event_id: event_id.clone() });
            }
        }

        let mut visited = HashSet::new();
        let mut results = Vec::new();
        while let Some(BackfillItem { event_id, depth }) = heap.pop() {
            if visited.contains(&event_id) {
                continue;
            }
            visited.insert(event_id.clone());
            results.push((event_id.clone(), depth));
            if results.len() >= limit {
                break;
            }

            let remaining = (limit - results.len()) as i64;
            let rows = sqlx::query(
                r#"
                SELECT e.event_id AS event_id, e.depth AS depth
                FROM event_edges AS ee
                JOIN events AS e ON e.event_id = ee.prev_event_id
                WHERE ee.event_id = ? AND ee.room_id = ? AND ee.is_state = 0
                LIMIT ?
                "#,
            )
            .bind(event_id.as_str())
            .bind(room_id.as_str())
            .bind(remaining)
            .fetch_all(txn.connection())
            .await?;

            for row in rows {
                let prev_id = EventId::from(row.get::<String, _>("event_id"));
                if !visited.contains(&prev_id) {
                    let depth = row.get::<i64, _>("depth") as u64;
                    heap.push(BackfillItem { depth, event_id: prev_id });
                }
            }
        }

        Ok(results)
    }

    /// Finds a capped bag of events strictly between `earliest_events` and
    /// `latest_events`, then materializes them, filters by `min_depth`, and
    /// sorts ascending by depth.
    ///
    /// The initial frontier (`latest_events`, less anything already in
    /// `earliest_events`) seeds the result set directly rather than only
    /// contributing through its prev-events: a peer whose `latest_events`
    /// includes an event we hold and it doesn't is missing that event too,
    /// not just its ancestors.
    pub async fn missing_events(
        txn: &mut Transaction,
        room_id: &RoomId,
        earliest_events: &[EventId],
        latest_events: &[EventId],
        limit: usize,
        min_depth: u64,
    ) -> Result<Vec<Event>> {
        let earliest: HashSet<EventId> = earliest_events.iter().cloned().collect();
        let mut front: HashSet<EventId> =
            latest_events.iter().filter(|id| !earliest.contains(*id)).cloned().collect();
        let mut results: HashSet<EventId> = front.clone();

        while !front.is_empty() && results.len() < limit {
            let mut new_front = HashSet::new();
            for event_id in &front {
                let remaining = (limit - results.len()) as i64;
                if remaining == 0 {
                    break;
                }
                let rows = sqlx::query(
                    "SELECT prev_event_id FROM event_edges \
                     WHERE event_id = ? AND room_id = ? AND is_state = 0 LIMIT ?",
                )
                .bind(event_id.as_str())
                .bind(room_id.as_str())
                .bind(remaining)
                .fetch_all(txn.connection())
                .await?;
                for row in rows {
                    new_front.insert(EventId::from(row.get::<String, _>("prev_event_id")));
                }
            }
            new_front.retain(|id| !earliest.contains(id) && !results.contains(id));
            results.extend(new_front.iter().cloned());
            front = new_front;
        }

        let mut materialized = Vec::with_capacity(results.len());
        for event_id in results {
            if let Some(event) = EdgeStore::fetch_event(txn, &event_id).await? {
                if event.depth >= min_depth {
                    materialized.push(event);
                }
            }
        }
        materialized.sort_by_key(|event| event.depth);
        materialized.truncate(limit);

        Ok(materialized)
    }

    /// Deletes every forward-extremity row for `room_id` and schedules its
    /// cache invalidation. Used when a server first joins a room and must
    /// rebuild its frontier from scratch.
    pub async fn clean_room_for_join(txn: &mut Transaction, room_id: &RoomId) -> Result<()> {
        sqlx::query("DELETE FROM event_forward_extremities WHERE room_id = ?")
            .bind(room_id.as_str())
            .execute(txn.connection())
            .await?;

        let room_id = room_id.clone();
        let cache = txn.cache();
        txn.call_after(move || cache.invalidate_latest_in_room(&room_id));

        Ok(())
    }
}

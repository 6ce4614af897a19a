//! Maintains forward/backward extremity sets as new edges are written.
//!
//! Grounded directly in `_handle_prev_events`: steps 1-4 below are that
//! function's SQL, translated statement for statement; step 5 is the
//! cache-invalidation hook it schedules via `txn.call_after`.

use eventgraph_common::Event;
use tracing::debug;

use crate::{edge_store::EdgeStore, error::Result, txn::Transaction};

/// Stateless maintainer of `event_forward_extremities` and
/// `event_backward_extremities`.
pub struct ExtremityTracker;

impl ExtremityTracker {
    /// Applies the five-step extremity update for a freshly-inserted,
    /// non-outlier event. Callers skip this entirely for outliers — an
    /// outlier is recorded but never changes either frontier.
    #[tracing::instrument(skip(txn, event), fields(event_id = %event.event_id, room_id = %event.room_id))]
    pub async fn apply(txn: &mut Transaction, event: &Event) -> Result<()> {
        let room_id = &event.room_id;

        // Step 1: each prev-event is no longer a leaf.
        for prev in &event.prev_events {
            sqlx::query("DELETE FROM event_forward_extremities WHERE event_id = ? AND room_id = ?")
                .bind(prev.event_id.as_str())
                .bind(room_id.as_str())
                .execute(txn.connection())
                .await?;
        }

        // Step 2: E is a new leaf iff nothing already references it.
        if !EdgeStore::any_edge_references(txn, &event.event_id).await? {
            sqlx::query(
                "INSERT OR IGNORE INTO event_forward_extremities (event_id, room_id) VALUES (?, ?)",
            )
            .bind(event.event_id.as_str())
            .bind(room_id.as_str())
            .execute(txn.connection())
            .await?;
        }

        // Step 3: each prev-event becomes a backward extremity iff it is
        // not already one and no non-outlier copy of it is stored. A single
        // INSERT ... WHERE NOT EXISTS avoids a read-modify-write race
        // within this transaction.
        for prev in &event.prev_events {
            sqlx::query(
                r#"
                INSERT INTO event_backward_extremities (event_id, room_id)
                SELECT ?, ?
                WHERE NOT EXISTS (
                    SELECT 1 FROM event_backward_extremities WHERE event_id = ? AND room_id = ?
                )
                AND NOT EXISTS (
                    SELECT 1 FROM events WHERE event_id = ? AND room_id = ? AND outlier = 0
                )
                "#,
            )
            .bind(prev.event_id.as_str())
            .bind(room_id.as_str())
            .bind(prev.event_id.as_str())
            .bind(room_id.as_str())
            .bind(prev.event_id.as_str())
            .bind(room_id.as_str())
            .execute(txn.connection())
            .await?;
        }

        // Step 4: E is now known, so it can't be a dangling reference.
        sqlx::query("DELETE FROM event_backward_extremities WHERE event_id = ? AND room_id = ?")
            .bind(event.event_id.as_str())
            .bind(room_id.as_str())
            .execute(txn.connection())
            .await?;

        // Step 5: schedule the post-commit cache invalidation.
        let room_id = room_id.clone();
        let cache = txn.cache();
        txn.call_after(move || {
            debug!(%room_id, "invalidating latest_event_ids_in_room");
            cache.invalidate_latest_in_room(&room_id);
        });

        Ok(())
    }
}

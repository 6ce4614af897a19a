//! Transactional persistence of events and their edges.
//!
//! Every operation here is a free function taking an explicit
//! [`Transaction`] handle rather than a method on a stateful connection
//! wrapper — there is no client-side state beyond the database itself.

use std::collections::BTreeMap;

use eventgraph_common::{Event, EventId, EventReference, RoomId};
use sqlx::Row;

use crate::{error::Result, extremity::ExtremityTracker, txn::Transaction};

/// The only hash algorithm `GetPrevEvents`/`GetAuthEvents`/`GetLatestInRoom`
/// report back to callers, matching the original's `if k == "sha256"`
/// filters — a peer-supplied non-`sha256` entry in `event_reference_hashes`
/// must not leak into these results.
const REPORTED_HASH_ALGORITHM: &str = "sha256";

/// One row of `GetLatestInRoom`: a forward extremity, its reference hashes,
/// and its depth.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LatestEvent {
    /// The forward extremity's event id.
    pub event_id: EventId,
    /// Its `sha256` reference hash, if known.
    pub reference_hashes: BTreeMap<String, String>,
    /// Its depth.
    pub depth: u64,
}

fn reference_hashes_json(hashes: &BTreeMap<String, String>) -> String {
    serde_json::to_string(hashes).expect("BTreeMap<String, String> always serializes")
}

fn decode_hashes_json(raw: &str) -> BTreeMap<String, String> {
    serde_json::from_str(raw).unwrap_or_default()
}

/// Writer and reader for the `events`/`event_edges`/`event_auth` tables.
pub struct EdgeStore;

impl EdgeStore {
    /// Inserts `event`, its prev-event and auth-event edges, records its
    /// reference hashes, updates the room's minimum depth, and — unless
    /// `event.outlier` is set — runs [`ExtremityTracker::apply`].
    ///
    /// `reference_hashes` is the event's own reference-hash map (as
    /// computed by the signing layer), stored so later reads of this event
    /// as someone else's prev-event or auth-event can report it without
    /// recomputing a hash inside the store.
    pub async fn put_event(
        txn: &mut Transaction,
        event: &Event,
        reference_hashes: &BTreeMap<String, String>,
    ) -> Result<()> {
        let content = serde_json::to_string(&event.content)?;
        let hashes = reference_hashes_json(&event.hashes);
        let state_hash = reference_hashes_json(&event.state_hash);
        let signatures = serde_json::to_string(&event.signatures)?;
        let unsigned = event.unsigned.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO events (
                event_id, room_id, event_type, state_key, depth, origin,
                origin_server_ts, content, hashes, state_hash, signatures,
                age_ts, unsigned, outlier
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.event_id.as_str())
        .bind(event.room_id.as_str())
        .bind(&event.event_type)
        .bind(event.state_key.as_deref())
        .bind(event.depth as i64)
        .bind(event.origin.as_str())
        .bind(event.origin_server_ts)
        .bind(content)
        .bind(hashes)
        .bind(state_hash)
        .bind(signatures)
        .bind(event.age_ts)
        .bind(unsigned)
        .bind(event.outlier)
        .execute(txn.connection())
        .await?;

        for prev in &event.prev_events {
            sqlx::query(
                "INSERT INTO event_edges (event_id, prev_event_id, room_id, is_state) \
                 VALUES (?, ?, ?, 0)",
            )
            .bind(event.event_id.as_str())
            .bind(prev.event_id.as_str())
            .bind(event.room_id.as_str())
            .execute(txn.connection())
            .await?;
        }

        for auth in &event.auth_events {
            sqlx::query("INSERT INTO event_auth (event_id, auth_id) VALUES (?, ?)")
                .bind(event.event_id.as_str())
                .bind(auth.event_id.as_str())
                .execute(txn.connection())
                .await?;
        }

        for (algorithm, digest_b64) in reference_hashes {
            sqlx::query(
                "INSERT OR REPLACE INTO event_reference_hashes (event_id, algorithm, hash) \
                 VALUES (?, ?, ?)",
            )
            .bind(event.event_id.as_str())
            .bind(algorithm)
            .bind(digest_b64.as_bytes())
            .execute(txn.connection())
            .await?;
        }

        Self::update_min_depth(txn, &event.room_id, event.depth).await?;

        if !event.outlier {
            ExtremityTracker::apply(txn, event).await?;
        }

        Ok(())
    }

    /// The depth of a stored event, or `None` if unknown.
    pub async fn get_depth(txn: &mut Transaction, event_id: &EventId) -> Result<Option<u64>> {
        let row = sqlx::query("SELECT depth FROM events WHERE event_id = ?")
            .bind(event_id.as_str())
            .fetch_optional(txn.connection())
            .await?;
        Ok(row.map(|row| row.get::<i64, _>("depth") as u64))
    }

    async fn reference_hashes_for(
        txn: &mut Transaction,
        event_id: &EventId,
    ) -> Result<BTreeMap<String, String>> {
        let rows = sqlx::query(
            "SELECT algorithm, hash FROM event_reference_hashes WHERE event_id = ? AND algorithm = ?",
        )
        .bind(event_id.as_str())
        .bind(REPORTED_HASH_ALGORITHM)
        .fetch_all(txn.connection())
        .await?;

        let mut hashes = BTreeMap::new();
        for row in rows {
            let algorithm: String = row.get("algorithm");
            let hash: Vec<u8> = row.get("hash");
            let hash = String::from_utf8(hash).map_err(|err| {
                crate::error::Error::Decode(format!("non-utf8 reference hash: {err}"))
            })?;
            hashes.insert(algorithm, hash);
        }
        Ok(hashes)
    }

    async fn prev_events_filtered(
        txn: &mut Transaction,
        event_id: &EventId,
        is_state: bool,
    ) -> Result<Vec<EventReference>> {
        let rows = sqlx::query(
            "SELECT prev_event_id FROM event_edges WHERE event_id = ? AND is_state = ?",
        )
        .bind(event_id.as_str())
        .bind(is_state)
        .fetch_all(txn.connection())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let prev_id = EventId::from(row.get::<String, _>("prev_event_id"));
            let hashes = Self::reference_hashes_for(txn, &prev_id).await?;
            out.push(EventReference { event_id: prev_id, hashes });
        }
        Ok(out)
    }

    /// The prev-event edges of `event_id`, with each referenced event's
    /// `sha256` reference hash attached.
    pub async fn get_prev_events(
        txn: &mut Transaction,
        event_id: &EventId,
    ) -> Result<Vec<EventReference>> {
        Self::prev_events_filtered(txn, event_id, false).await
    }

    /// The subset of `event_id`'s prev-event edges marked as state edges.
    pub async fn get_prev_state(
        txn: &mut Transaction,
        event_id: &EventId,
    ) -> Result<Vec<EventReference>> {
        Self::prev_events_filtered(txn, event_id, true).await
    }

    /// The auth-event edges of `event_id`, with reference hashes attached.
    pub async fn get_auth_events(
        txn: &mut Transaction,
        event_id: &EventId,
    ) -> Result<Vec<EventReference>> {
        let rows = sqlx::query("SELECT auth_id FROM event_auth WHERE event_id = ?")
            .bind(event_id.as_str())
            .fetch_all(txn.connection())
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let auth_id = EventId::from(row.get::<String, _>("auth_id"));
            let hashes = Self::reference_hashes_for(txn, &auth_id).await?;
            out.push(EventReference { event_id: auth_id, hashes });
        }
        Ok(out)
    }

    /// The room's current forward extremities, each with its reference
    /// hashes and depth, by joining `events` against
    /// `event_forward_extremities`.
    pub async fn get_latest_in_room(
        txn: &mut Transaction,
        room_id: &RoomId,
    ) -> Result<Vec<LatestEvent>> {
        let rows = sqlx::query(
            r#"
            SELECT e.event_id AS event_id, e.depth AS depth
            FROM event_forward_extremities AS fe
            JOIN events AS e ON e.event_id = fe.event_id
            WHERE fe.room_id = ?
            "#,
        )
        .bind(room_id.as_str())
        .fetch_all(txn.connection())
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let event_id = EventId::from(row.get::<String, _>("event_id"));
            let depth = row.get::<i64, _>("depth") as u64;
            let reference_hashes = Self::reference_hashes_for(txn, &event_id).await?;
            out.push(LatestEvent { event_id, reference_hashes, depth });
        }
        Ok(out)
    }

    /// The room's backward extremities (dangling ancestors), unordered.
    pub async fn get_oldest_in_room(
        txn: &mut Transaction,
        room_id: &RoomId,
    ) -> Result<Vec<EventId>> {
        let rows = sqlx::query("SELECT event_id FROM event_backward_extremities WHERE room_id = ?")
            .bind(room_id.as_str())
            .fetch_all(txn.connection())
            .await?;
        Ok(rows.into_iter().map(|row| EventId::from(row.get::<String, _>("event_id"))).collect())
    }

    /// Backward extremities paired with the greatest depth among the
    /// (possibly several) known events that reference each one as a
    /// prev-event — matching the original's `MAX(depth)` join.
    pub async fn get_oldest_with_depth_in_room(
        txn: &mut Transaction,
        room_id: &RoomId,
    ) -> Result<BTreeMap<EventId, u64>> {
        let rows = sqlx::query(
            r#"
            SELECT be.event_id AS event_id, MAX(e.depth) AS max_depth
            FROM event_backward_extremities AS be
            JOIN event_edges AS ee ON ee.prev_event_id = be.event_id AND ee.room_id = be.room_id
            JOIN events AS e ON e.event_id = ee.event_id
            WHERE be.room_id = ?
            GROUP BY be.event_id
            "#,
        )
        .bind(room_id.as_str())
        .fetch_all(txn.connection())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let event_id = EventId::from(row.get::<String, _>("event_id"));
                let depth = row.get::<i64, _>("max_depth") as u64;
                (event_id, depth)
            })
            .collect())
    }

    /// The room's minimum observed depth, or `None` if the room is unknown.
    pub async fn get_min_depth(txn: &mut Transaction, room_id: &RoomId) -> Result<Option<u64>> {
        let row = sqlx::query("SELECT min_depth FROM room_depth WHERE room_id = ?")
            .bind(room_id.as_str())
            .fetch_optional(txn.connection())
            .await?;
        Ok(row.map(|row| row.get::<i64, _>("min_depth") as u64))
    }

    /// Inserts the room's minimum depth if absent, lowers it if `depth` is
    /// smaller than the current value, otherwise does nothing.
    ///
    /// Compares against `None`, not falsiness — `min_depth = 0` is a valid
    /// floor and must not be treated as "absent".
    pub async fn update_min_depth(
        txn: &mut Transaction,
        room_id: &RoomId,
        depth: u64,
    ) -> Result<()> {
        match Self::get_min_depth(txn, room_id).await? {
            None => {
                sqlx::query("INSERT INTO room_depth (room_id, min_depth) VALUES (?, ?)")
                    .bind(room_id.as_str())
                    .bind(depth as i64)
                    .execute(txn.connection())
                    .await?;
            }
            Some(current) if depth < current => {
                sqlx::query("UPDATE room_depth SET min_depth = ? WHERE room_id = ?")
                    .bind(depth as i64)
                    .bind(room_id.as_str())
                    .execute(txn.connection())
                    .await?;
            }
            Some(_) => {}
        }
        Ok(())
    }

    /// Whether a non-outlier event with this id is stored in `room_id`.
    pub(crate) async fn non_outlier_event_exists(
        txn: &mut Transaction,
        room_id: &RoomId,
        event_id: &EventId,
    ) -> Result<bool> {
        let row = sqlx::query(
            "SELECT 1 FROM events WHERE event_id = ? AND room_id = ? AND outlier = 0",
        )
        .bind(event_id.as_str())
        .bind(room_id.as_str())
        .fetch_optional(txn.connection())
        .await?;
        Ok(row.is_some())
    }

    pub(crate) async fn any_edge_references(
        txn: &mut Transaction,
        event_id: &EventId,
    ) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM event_edges WHERE prev_event_id = ?")
            .bind(event_id.as_str())
            .fetch_optional(txn.connection())
            .await?;
        Ok(row.is_some())
    }

    /// A single event materialized from the `events` table, for query
    /// engines that need full rows rather than bare ids.
    pub(crate) async fn fetch_event(
        txn: &mut Transaction,
        event_id: &EventId,
    ) -> Result<Option<Event>> {
        let row = sqlx::query(
            r#"
            SELECT event_id, room_id, event_type, state_key, depth, origin,
                   origin_server_ts, content, hashes, state_hash, signatures,
                   age_ts, unsigned, outlier
            FROM events WHERE event_id = ?
            "#,
        )
        .bind(event_id.as_str())
        .fetch_optional(txn.connection())
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(row_to_event(row)?))
    }
}

fn row_to_event(row: sqlx::sqlite::SqliteRow) -> Result<Event> {
    let content: String = row.get("content");
    let unsigned: Option<String> = row.get("unsigned");

    Ok(Event {
        event_id: EventId::from(row.get::<String, _>("event_id")),
        room_id: RoomId::from(row.get::<String, _>("room_id")),
        event_type: row.get("event_type"),
        state_key: row.get("state_key"),
        depth: row.get::<i64, _>("depth") as u64,
        origin: eventgraph_common::ServerName::from(row.get::<String, _>("origin")),
        origin_server_ts: row.get("origin_server_ts"),
        content: serde_json::from_str(&content)?,
        prev_events: Vec::new(),
        auth_events: Vec::new(),
        hashes: decode_hashes_json(&row.get::<String, _>("hashes")),
        state_hash: decode_hashes_json(&row.get::<String, _>("state_hash")),
        signatures: serde_json::from_str(&row.get::<String, _>("signatures"))?,
        age_ts: row.get("age_ts"),
        unsigned: unsigned.map(|raw| serde_json::from_str(&raw)).transpose()?,
        outlier: row.get("outlier"),
    })
}

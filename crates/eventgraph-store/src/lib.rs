//! Transactional persistence, extremity tracking, and DAG-walking queries
//! for the event-graph storage core of a federated messaging homeserver.
//!
//! [`Store`] is the single entry point: it owns the connection pool and the
//! in-process cache, and exposes the consumer interface (`put_event`,
//! `get_latest_in_room`, `get_backfill_events`, …) as plain `async` methods.
//! Each method runs as one atomic transaction via [`Store::with_transaction`];
//! nothing it does is visible to another caller until that transaction
//! commits.
#![warn(missing_docs)]

mod cache;
mod config;
mod edge_store;
mod error;
mod extremity;
mod query;
mod schema;
mod txn;

use std::{collections::BTreeMap, pin::Pin, sync::Arc};

use eventgraph_common::{Event, EventId, RoomId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::warn;

pub use crate::{
    cache::CacheCoordinator,
    config::RunnerConfig,
    edge_store::{EdgeStore, LatestEvent},
    error::{Error, Result},
    extremity::ExtremityTracker,
    query::GraphQueryEngine,
    txn::Transaction,
};

type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// How many times a transaction is retried after the database reports it
/// aborted (deadlock, busy, serialization conflict) before the error is
/// surfaced to the caller. Matches spec.md §7's `TransactionAborted`
/// recovery policy.
const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

/// The event-graph storage core: one SQLite-backed connection pool plus the
/// in-process read cache layered over it.
pub struct Store {
    pool: sqlx::SqlitePool,
    cache: Arc<CacheCoordinator>,
}

impl Store {
    /// Opens a store, applying schema migrations if needed.
    pub async fn connect(config: &RunnerConfig) -> Result<Self> {
        let options: SqliteConnectOptions = config.database_url.parse()?;
        let options = options.busy_timeout(config.busy_timeout).create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;

        schema::run_migrations(&pool).await?;

        Ok(Self { pool, cache: Arc::new(CacheCoordinator::new()) })
    }

    /// Runs `f` inside a single transaction, committing on success and
    /// running every callback it scheduled via [`Transaction::call_after`]
    /// before returning. On error, the transaction is dropped (and rolled
    /// back) without running any callback.
    ///
    /// The whole attempt — begin, `f`, commit — runs inside a detached
    /// `tokio::spawn`ed task rather than directly in the caller's future:
    /// dropping a `tokio::task::JoinHandle` does not cancel the task it
    /// refers to, so a caller that abandons the `await` on this method
    /// only detaches the result, per spec.md §5 — the transaction still
    /// runs to completion and still fires its post-commit callbacks. A
    /// `TransactionAborted` error retries the whole attempt, up to
    /// `MAX_TRANSACTION_ATTEMPTS` times, before being surfaced.
    pub async fn with_transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: for<'c> Fn(&'c mut Transaction) -> BoxFuture<'c, Result<T>> + Send + Sync + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        let cache = Arc::clone(&self.cache);

        let handle = tokio::spawn(async move {
            let mut attempt: u32 = 0;
            loop {
                attempt += 1;
                let mut txn = Transaction::begin(&pool, Arc::clone(&cache)).await?;
                let result = match f(&mut txn).await {
                    Ok(value) => txn.commit().await.map(|()| value),
                    Err(err) => Err(err),
                };

                match &result {
                    Err(Error::TransactionAborted(db_err))
                        if attempt < MAX_TRANSACTION_ATTEMPTS =>
                    {
                        warn!(attempt, error = %db_err, "retrying aborted transaction");
                    }
                    _ => return result,
                }
            }
        });

        match handle.await {
            Ok(result) => result,
            Err(join_err) => {
                Err(Error::IntegrityViolation(format!("transaction task panicked: {join_err}")))
            }
        }
    }

    /// Persists a sealed event: inserts its row, edges, and reference
    /// hashes, updates the room's minimum depth, and (unless the event is
    /// an outlier) runs the extremity-tracking algorithm.
    ///
    /// `reference_hashes` is the event's own reference hash map, as
    /// computed by the signing layer before calling this — the store does
    /// not recompute it.
    #[tracing::instrument(skip(self, event, reference_hashes), fields(event_id = %event.event_id))]
    pub async fn put_event(
        &self,
        event: Event,
        reference_hashes: BTreeMap<String, String>,
    ) -> Result<()> {
        self.with_transaction(move |txn| {
            let event = event.clone();
            let reference_hashes = reference_hashes.clone();
            Box::pin(async move { EdgeStore::put_event(txn, &event, &reference_hashes).await })
        })
        .await
    }

    /// The room's forward extremities, served from cache when present.
    pub async fn get_latest_in_room(&self, room_id: &RoomId) -> Result<Vec<LatestEvent>> {
        if let Some(cached) = self.cache.get_latest_in_room(room_id) {
            return Ok(cached);
        }

        let room_id_owned = room_id.clone();
        let value = self
            .with_transaction(move |txn| {
                let room_id = room_id_owned.clone();
                Box::pin(async move { EdgeStore::get_latest_in_room(txn, &room_id).await })
            })
            .await?;

        self.cache.set_latest_in_room(room_id.clone(), value.clone());
        Ok(value)
    }

    /// The room's backward extremities.
    pub async fn get_oldest_in_room(&self, room_id: &RoomId) -> Result<Vec<EventId>> {
        let room_id = room_id.clone();
        self.with_transaction(move |txn| {
            let room_id = room_id.clone();
            Box::pin(async move { EdgeStore::get_oldest_in_room(txn, &room_id).await })
        })
        .await
    }

    /// Backward extremities paired with the deepest known referencing
    /// event's depth.
    pub async fn get_oldest_with_depth_in_room(
        &self,
        room_id: &RoomId,
    ) -> Result<BTreeMap<EventId, u64>> {
        let room_id = room_id.clone();
        self.with_transaction(move |txn| {
            let room_id = room_id.clone();
            Box::pin(async move { EdgeStore::get_oldest_with_depth_in_room(txn, &room_id).await })
        })
        .await
    }

    /// The room's minimum observed depth.
    pub async fn get_min_depth(&self, room_id: &RoomId) -> Result<Option<u64>> {
        let room_id = room_id.clone();
        self.with_transaction(move |txn| {
            let room_id = room_id.clone();
            Box::pin(async move { EdgeStore::get_min_depth(txn, &room_id).await })
        })
        .await
    }

    /// Depth-ordered best-first backfill: walks prev-edges from
    /// `seed_event_ids`, then materializes and returns up to `limit` full
    /// events sorted by descending depth.
    pub async fn get_backfill_events(
        &self,
        room_id: &RoomId,
        seed_event_ids: Vec<EventId>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let room_id = room_id.clone();
        self.with_transaction(move |txn| {
            let room_id = room_id.clone();
            let seed_event_ids = seed_event_ids.clone();
            Box::pin(async move {
                let mut visited =
                    GraphQueryEngine::backfill(txn, &room_id, &seed_event_ids, limit).await?;
                visited.sort_by(|(_, a), (_, b)| b.cmp(a));

                let mut events = Vec::with_capacity(visited.len());
                for (event_id, _depth) in &visited {
                    if let Some(event) = EdgeStore::fetch_event(txn, event_id).await? {
                        events.push(event);
                    }
                }
                Ok(events)
            })
        })
        .await
    }

    /// Depth of a single stored event.
    pub async fn get_depth(&self, event_id: &EventId) -> Result<Option<u64>> {
        let event_id = event_id.clone();
        self.with_transaction(move |txn| {
            let event_id = event_id.clone();
            Box::pin(async move { EdgeStore::get_depth(txn, &event_id).await })
        })
        .await
    }

    /// Events strictly between `earliest_events` and `latest_events`,
    /// filtered to `depth >= min_depth`, materialized and sorted ascending
    /// by depth.
    pub async fn get_missing_events(
        &self,
        room_id: &RoomId,
        earliest_events: Vec<EventId>,
        latest_events: Vec<EventId>,
        limit: usize,
        min_depth: u64,
    ) -> Result<Vec<Event>> {
        let room_id = room_id.clone();
        self.with_transaction(move |txn| {
            let room_id = room_id.clone();
            let earliest_events = earliest_events.clone();
            let latest_events = latest_events.clone();
            Box::pin(async move {
                GraphQueryEngine::missing_events(
                    txn,
                    &room_id,
                    &earliest_events,
                    &latest_events,
                    limit,
                    min_depth,
                )
                .await
            })
        })
        .await
    }

    /// Breadth-first closure of `event_ids` over the auth-events relation.
    pub async fn get_auth_chain(&self, event_ids: Vec<EventId>) -> Result<Vec<EventId>> {
        self.with_transaction(move |txn| {
            let event_ids = event_ids.clone();
            Box::pin(async move { GraphQueryEngine::auth_chain(txn, &event_ids).await })
        })
        .await
    }

    /// Rebuilds a room's forward-extremity frontier from scratch, for use
    /// when this server first joins the room.
    pub async fn clean_room_for_join(&self, room_id: &RoomId) -> Result<()> {
        let room_id = room_id.clone();
        self.with_transaction(move |txn| {
            let room_id = room_id.clone();
            Box::pin(async move { GraphQueryEngine::clean_room_for_join(txn, &room_id).await })
        })
        .await
    }
}

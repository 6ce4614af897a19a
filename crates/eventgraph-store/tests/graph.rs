//! End-to-end coverage of the persistence layer: extremity maintenance on
//! linear and out-of-order inserts, backfill depth ordering, the
//! missing-events gap fill, outlier handling, and cache invalidation
//! atomicity across commit/abort.

use std::collections::BTreeMap;

use eventgraph_common::{Event, EventBuilder, EventId, EventReference, PriorState, RoomId, ServerName};
use eventgraph_signing::{compute_reference_hash_base64, seal, SigningKey, SHA256};
use eventgraph_store::{EdgeStore, RunnerConfig, Store};

async fn store() -> Store {
    Store::connect(&RunnerConfig::in_memory()).await.expect("in-memory store opens")
}

fn server() -> ServerName {
    ServerName::from("example.org")
}

/// Builds and seals an event, returning it alongside the reference-hash map
/// callers attach to any future event that names this one as a prev-event.
fn make_event(
    event_id: &str,
    room_id: &str,
    depth: u64,
    prev: Vec<(&str, BTreeMap<String, String>)>,
    outlier: bool,
) -> (Event, BTreeMap<String, String>) {
    let key = SigningKey::generate("1");
    let prev_events = prev
        .into_iter()
        .map(|(id, hashes)| EventReference { event_id: EventId::from(id), hashes })
        .collect();

    let draft = EventBuilder::new(event_id, room_id, "m.room.message", "example.org", 0, depth)
        .prev_events(prev_events)
        .content(serde_json::json!({"body": event_id}))
        .outlier(outlier)
        .build();

    let sealed = seal(draft, PriorState::None, &server(), &key, SHA256).expect("seal succeeds");
    let (algorithm, digest) =
        compute_reference_hash_base64(&sealed, SHA256).expect("reference hash succeeds");
    let reference_hashes = BTreeMap::from([(algorithm, digest)]);

    (sealed, reference_hashes)
}

fn forward_ids(latest: &[eventgraph_store::LatestEvent]) -> Vec<String> {
    let mut ids: Vec<String> = latest.iter().map(|e| e.event_id.to_string()).collect();
    ids.sort();
    ids
}

#[tokio::test]
async fn empty_room_frontier() {
    let store = store().await;
    let room = RoomId::from("!r1:example.org");

    assert!(store.get_latest_in_room(&room).await.unwrap().is_empty());
    assert!(store.get_oldest_in_room(&room).await.unwrap().is_empty());
    assert_eq!(store.get_min_depth(&room).await.unwrap(), None);
}

#[tokio::test]
async fn linear_insert_tracks_extremities() {
    let store = store().await;
    let room = RoomId::from("!r1:example.org");

    let (a, a_hashes) = make_event("$a", room.as_str(), 1, vec![], false);
    store.put_event(a, a_hashes.clone()).await.unwrap();
    assert_eq!(forward_ids(&store.get_latest_in_room(&room).await.unwrap()), vec!["$a"]);
    assert!(store.get_oldest_in_room(&room).await.unwrap().is_empty());

    let (b, b_hashes) = make_event("$b", room.as_str(), 2, vec![("$a", a_hashes)], false);
    store.put_event(b, b_hashes.clone()).await.unwrap();
    assert_eq!(forward_ids(&store.get_latest_in_room(&room).await.unwrap()), vec!["$b"]);
    assert!(store.get_oldest_in_room(&room).await.unwrap().is_empty());

    let (c, c_hashes) = make_event("$c", room.as_str(), 3, vec![("$b", b_hashes)], false);
    store.put_event(c, c_hashes).await.unwrap();

    let latest = store.get_latest_in_room(&room).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].event_id, EventId::from("$c"));
    assert_eq!(latest[0].depth, 3);
    assert!(store.get_oldest_in_room(&room).await.unwrap().is_empty());
}

#[tokio::test]
async fn out_of_order_insert_then_fills_backward_extremity() {
    let store = store().await;
    let room = RoomId::from("!r1:example.org");

    // `$a`'s reference hashes aren't known yet, so `$b` is built referencing
    // an id whose hash map we don't have — an empty map, same as any peer
    // that only knows the id so far.
    let (b, _) = make_event("$b", room.as_str(), 2, vec![("$a", BTreeMap::new())], false);
    store.put_event(b, BTreeMap::new()).await.unwrap();

    assert_eq!(forward_ids(&store.get_latest_in_room(&room).await.unwrap()), vec!["$b"]);
    assert_eq!(store.get_oldest_in_room(&room).await.unwrap(), vec![EventId::from("$a")]);

    let (a, a_hashes) = make_event("$a", room.as_str(), 1, vec![], false);
    store.put_event(a, a_hashes).await.unwrap();

    assert_eq!(forward_ids(&store.get_latest_in_room(&room).await.unwrap()), vec!["$b"]);
    assert!(store.get_oldest_in_room(&room).await.unwrap().is_empty());
}

#[tokio::test]
async fn backfill_orders_by_descending_depth() {
    let store = store().await;
    let room = RoomId::from("!r1:example.org");

    let (a, a_hashes) = make_event("$a", room.as_str(), 1, vec![], false);
    store.put_event(a, a_hashes.clone()).await.unwrap();

    let (b, b_hashes) = make_event("$b", room.as_str(), 2, vec![("$a", a_hashes.clone())], false);
    store.put_event(b, b_hashes.clone()).await.unwrap();

    let (b_side, _) = make_event("$b2", room.as_str(), 2, vec![("$a", a_hashes)], false);
    store.put_event(b_side, BTreeMap::new()).await.unwrap();

    let (c, c_hashes) = make_event("$c", room.as_str(), 3, vec![("$b", b_hashes)], false);
    store.put_event(c, c_hashes.clone()).await.unwrap();

    let (d, d_hashes) = make_event("$d", room.as_str(), 4, vec![("$c", c_hashes)], false);
    store.put_event(d, d_hashes).await.unwrap();

    let backfilled = store
        .get_backfill_events(&room, vec![EventId::from("$d")], 3)
        .await
        .unwrap();

    assert_eq!(backfilled.len(), 3);
    assert_eq!(backfilled[0].event_id, EventId::from("$d"));
    assert_eq!(backfilled[1].event_id, EventId::from("$c"));
    assert!(
        backfilled[2].event_id == EventId::from("$b")
            || backfilled[2].event_id == EventId::from("$b2")
    );
}

#[tokio::test]
async fn missing_events_gap_fill_respects_min_depth() {
    let store = store().await;
    let room = RoomId::from("!r1:example.org");

    let (a, a_hashes) = make_event("$a", room.as_str(), 1, vec![], false);
    store.put_event(a, a_hashes.clone()).await.unwrap();

    let (b, b_hashes) = make_event("$b", room.as_str(), 2, vec![("$a", a_hashes)], false);
    store.put_event(b, b_hashes.clone()).await.unwrap();

    let (c, c_hashes) = make_event("$c", room.as_str(), 3, vec![("$b", b_hashes)], false);
    store.put_event(c, c_hashes.clone()).await.unwrap();

    let (d, d_hashes) = make_event("$d", room.as_str(), 4, vec![("$c", c_hashes)], false);
    store.put_event(d, d_hashes).await.unwrap();

    let missing = store
        .get_missing_events(
            &room,
            vec![EventId::from("$a")],
            vec![EventId::from("$d")],
            10,
            0,
        )
        .await
        .unwrap();
    let mut missing_sorted: Vec<String> = missing.iter().map(|e| e.event_id.to_string()).collect();
    missing_sorted.sort();
    assert_eq!(missing_sorted, vec!["$b", "$c", "$d"]);

    let filtered = store
        .get_missing_events(
            &room,
            vec![EventId::from("$a")],
            vec![EventId::from("$d")],
            10,
            3,
        )
        .await
        .unwrap();
    let mut filtered_sorted: Vec<String> = filtered.iter().map(|e| e.event_id.to_string()).collect();
    filtered_sorted.sort();
    assert_eq!(filtered_sorted, vec!["$c", "$d"]);
}

#[tokio::test]
async fn outlier_event_is_invisible_to_frontiers() {
    let store = store().await;
    let room = RoomId::from("!r1:example.org");

    let (x, _) = make_event("$x", room.as_str(), 5, vec![("$y", BTreeMap::new())], true);
    store.put_event(x, BTreeMap::new()).await.unwrap();

    assert!(store.get_latest_in_room(&room).await.unwrap().is_empty());
    assert!(store.get_oldest_in_room(&room).await.unwrap().is_empty());
}

#[tokio::test]
async fn cache_invalidation_is_atomic_with_commit() {
    let store = store().await;
    let room = RoomId::from("!r1:example.org");

    assert!(store.get_latest_in_room(&room).await.unwrap().is_empty());

    let (e, e_hashes) = make_event("$e", room.as_str(), 1, vec![], false);
    let (attempt_event, attempt_hashes) = (e.clone(), e_hashes.clone());
    let aborted: eventgraph_store::Result<()> = store
        .with_transaction(move |txn| {
            let event = attempt_event.clone();
            let hashes = attempt_hashes.clone();
            Box::pin(async move {
                EdgeStore::put_event(txn, &event, &hashes).await?;
                Err(eventgraph_store::Error::IntegrityViolation("forced abort".to_owned()))
            })
        })
        .await;
    assert!(aborted.is_err());

    assert!(store.get_latest_in_room(&room).await.unwrap().is_empty());

    store.put_event(e, e_hashes).await.unwrap();
    let latest = store.get_latest_in_room(&room).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].event_id, EventId::from("$e"));
}

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use skein_catchup::{ChatClient, Phase, SessionHandle};
use skein_core::{
    config::CatchupConfig,
    error::{HistoryError, JoinError},
    feed::BroadcastLiveFeed,
    history::{HistoryApi, HistoryPage},
    room::{Room, RoomId},
};
use skein_test_support::fakes::{
    Delivered, GatedDelivery, HangingHistory, MemoryWatermarks, RecordingDelivery,
    ScriptedHistory,
};
use skein_test_support::wire::{live_event, record_json, record_json_from};

struct Harness<H> {
    client: ChatClient<H, MemoryWatermarks, RecordingDelivery>,
    history: Arc<H>,
    watermarks: Arc<MemoryWatermarks>,
    delivery: Arc<RecordingDelivery>,
    feed: Arc<BroadcastLiveFeed>,
}

fn harness<H: HistoryApi>(history: H) -> Harness<H> {
    harness_with(history, CatchupConfig::default())
}

fn harness_with<H: HistoryApi>(history: H, config: CatchupConfig) -> Harness<H> {
    let history = Arc::new(history);
    let watermarks = Arc::new(MemoryWatermarks::new());
    let delivery = Arc::new(RecordingDelivery::new());
    let feed = Arc::new(BroadcastLiveFeed::default());
    let client = ChatClient::new(
        history.clone(),
        watermarks.clone(),
        delivery.clone(),
        feed.clone(),
        config,
    );
    Harness {
        client,
        history,
        watermarks,
        delivery,
        feed,
    }
}

fn room() -> Room {
    Room::new("room-1", "channel-1", "General")
}

fn page(records: Vec<serde_json::Value>, next_token: Option<&str>) -> HistoryPage {
    HistoryPage {
        records,
        next_token: next_token.map(str::to_string),
    }
}

async fn wait_live(handle: &mut SessionHandle) -> Phase {
    timeout(Duration::from_secs(2), handle.wait_live())
        .await
        .expect("timed out waiting for live phase")
}

async fn wait_left(handle: &mut SessionHandle) -> Phase {
    timeout(Duration::from_secs(2), handle.wait_for(Phase::Left))
        .await
        .expect("timed out waiting for teardown")
}

async fn wait_for_deliveries(delivery: &RecordingDelivery, count: usize) -> Vec<Delivered> {
    timeout(Duration::from_secs(2), async {
        loop {
            let delivered = delivery.delivered();
            if delivered.len() >= count {
                return delivered;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for deliveries")
}

// ── Catch-up ordering and the mode switch ─────────────────────────────

#[tokio::test]
async fn racing_live_event_lands_after_the_ordered_backfill() {
    // History returns [a(t10), b(t5)] while the live feed pushes c(t20)
    // mid-fetch. The backfill goes out in timestamp order, c follows the
    // switch, and the watermark is the last catch-up record, not c.
    let (history, gate) = ScriptedHistory::gated(vec![Ok(page(
        vec![
            record_json("a", "a-body", "2017-06-02T10:00:10Z"),
            record_json("b", "b-body", "2017-06-02T10:00:05Z"),
        ],
        None,
    ))]);
    let h = harness(history);

    let mut handle = h.client.join_room(room()).unwrap();
    h.feed.publish(
        "channel-1",
        live_event(record_json("c", "c-body", "2017-06-02T10:00:20Z")),
    );
    gate.notify_one();

    assert_eq!(wait_live(&mut handle).await, Phase::Live);
    let delivered = wait_for_deliveries(&h.delivery, 3).await;
    let bodies: Vec<&str> = delivered.iter().map(|d| d.body.as_str()).collect();
    assert_eq!(bodies, ["b-body", "a-body", "c-body"]);

    assert_eq!(
        h.watermarks.value(&room().id).as_deref(),
        Some("2017-06-02T10:00:10Z")
    );
    assert_eq!(h.watermarks.write_count(), 1);
}

#[tokio::test]
async fn duplicate_ids_across_pages_deliver_once() {
    let h = harness(ScriptedHistory::new(vec![
        Ok(page(
            vec![record_json("a", "a-body", "2017-06-02T10:00:01Z")],
            Some("token-x"),
        )),
        Ok(page(
            vec![
                record_json("a", "a-body", "2017-06-02T10:00:01Z"),
                record_json("b", "b-body", "2017-06-02T10:00:02Z"),
            ],
            None,
        )),
    ]));

    let mut handle = h.client.join_room(room()).unwrap();
    assert_eq!(wait_live(&mut handle).await, Phase::Live);

    let delivered = wait_for_deliveries(&h.delivery, 2).await;
    let bodies: Vec<&str> = delivered.iter().map(|d| d.body.as_str()).collect();
    assert_eq!(bodies, ["a-body", "b-body"]);
    assert_eq!(
        h.watermarks.value(&room().id).as_deref(),
        Some("2017-06-02T10:00:02Z")
    );
}

#[tokio::test]
async fn live_duplicate_of_a_history_record_delivers_once() {
    let (history, gate) = ScriptedHistory::gated(vec![Ok(page(
        vec![
            record_json("a", "a-body", "2017-06-02T10:00:01Z"),
            record_json("b", "b-body", "2017-06-02T10:00:02Z"),
        ],
        None,
    ))]);
    let h = harness(history);

    let mut handle = h.client.join_room(room()).unwrap();
    h.feed.publish(
        "channel-1",
        live_event(record_json("a", "a-body", "2017-06-02T10:00:01Z")),
    );
    gate.notify_one();

    assert_eq!(wait_live(&mut handle).await, Phase::Live);
    let delivered = wait_for_deliveries(&h.delivery, 2).await;

    let mut bodies: Vec<&str> = delivered.iter().map(|d| d.body.as_str()).collect();
    bodies.sort_unstable();
    assert_eq!(bodies, ["a-body", "b-body"]);
    assert_eq!(
        h.watermarks.value(&room().id).as_deref(),
        Some("2017-06-02T10:00:02Z")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn duplicate_queued_behind_the_switch_is_not_redelivered() {
    // The duplicate of "a" is published while the backfill is mid-delivery,
    // so it is still sitting in the feed queue when the phase flips. It must
    // be dropped, not passed through.
    let history = Arc::new(ScriptedHistory::new(vec![Ok(page(
        vec![
            record_json("a", "a-body", "2017-06-02T10:00:01Z"),
            record_json("b", "b-body", "2017-06-02T10:00:02Z"),
        ],
        None,
    ))]));
    let watermarks = Arc::new(MemoryWatermarks::new());
    let delivery = Arc::new(GatedDelivery::new());
    let feed = Arc::new(BroadcastLiveFeed::default());
    let client = ChatClient::new(
        history,
        watermarks,
        delivery.clone(),
        feed.clone(),
        CatchupConfig::default(),
    );

    let mut handle = client.join_room(room()).unwrap();
    timeout(Duration::from_secs(2), delivery.entered().notified())
        .await
        .expect("batch delivery never started");

    feed.publish(
        "channel-1",
        live_event(record_json("a", "a-body", "2017-06-02T10:00:01Z")),
    );
    delivery.open();

    assert_eq!(wait_live(&mut handle).await, Phase::Live);
    feed.publish(
        "channel-1",
        live_event(record_json("c", "c-body", "2017-06-02T10:00:03Z")),
    );

    // The feed is ordered, so once "c" lands a redelivered "a" would have
    // landed before it.
    let delivered = timeout(Duration::from_secs(2), async {
        loop {
            let delivered = delivery.delivered();
            if delivered.len() >= 3 {
                return delivered;
            }
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("timed out waiting for deliveries");

    let bodies: Vec<&str> = delivered.iter().map(|d| d.body.as_str()).collect();
    assert_eq!(bodies, ["a-body", "b-body", "c-body"]);
}

#[tokio::test]
async fn empty_backfill_switches_live_without_a_watermark_write() {
    let h = harness(ScriptedHistory::new(vec![Ok(page(vec![], None))]));

    let mut handle = h.client.join_room(room()).unwrap();
    assert_eq!(wait_live(&mut handle).await, Phase::Live);

    assert!(h.delivery.delivered().is_empty());
    assert_eq!(h.watermarks.write_count(), 0);
}

// ── Watermark handling ────────────────────────────────────────────────

#[tokio::test]
async fn watermark_bounds_the_first_page_and_advances() {
    let h = harness(ScriptedHistory::new(vec![Ok(page(
        vec![record_json("c", "c-body", "2017-06-02T10:00:10Z")],
        None,
    ))]));
    h.watermarks.seed(&room().id, "2017-06-01T00:00:00Z");

    let mut handle = h.client.join_room(room()).unwrap();
    assert_eq!(wait_live(&mut handle).await, Phase::Live);

    let calls = h.history.calls();
    assert_eq!(
        calls[0].after,
        Some(skein_core::timestamp::parse("2017-06-01T00:00:00Z").unwrap())
    );
    assert_eq!(
        h.watermarks.value(&room().id).as_deref(),
        Some("2017-06-02T10:00:10Z")
    );
}

#[tokio::test]
async fn unparsable_watermark_degrades_to_a_full_refetch() {
    let h = harness(ScriptedHistory::new(vec![Ok(page(
        vec![record_json("a", "a-body", "2017-06-02T10:00:01Z")],
        None,
    ))]));
    h.watermarks.seed(&room().id, "not a timestamp");

    let mut handle = h.client.join_room(room()).unwrap();
    assert_eq!(wait_live(&mut handle).await, Phase::Live);

    assert!(h.history.calls()[0].after.is_none());
    assert_eq!(
        h.watermarks.value(&room().id).as_deref(),
        Some("2017-06-02T10:00:01Z")
    );
}

#[tokio::test]
async fn watermark_tracks_the_last_delivered_record() {
    let h = harness(ScriptedHistory::new(vec![Ok(page(
        vec![
            record_json("a", "a-body", "2017-06-02T10:00:01Z"),
            record_json("b", "b-body", "2017-06-02T10:00:02Z"),
        ],
        None,
    ))]));
    h.delivery.reject_body("b-body");

    let mut handle = h.client.join_room(room()).unwrap();
    assert_eq!(wait_live(&mut handle).await, Phase::Live);

    let delivered = wait_for_deliveries(&h.delivery, 1).await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].body, "a-body");
    // "b" was never delivered, so it must stay above the watermark.
    assert_eq!(
        h.watermarks.value(&room().id).as_deref(),
        Some("2017-06-02T10:00:01Z")
    );
    assert_eq!(h.watermarks.write_count(), 1);
}

// ── Partial catch-up ──────────────────────────────────────────────────

#[tokio::test]
async fn failed_page_delivers_the_partial_backfill_and_goes_live() {
    let h = harness(ScriptedHistory::new(vec![
        Ok(page(
            vec![record_json("a", "a-body", "2017-06-02T10:00:01Z")],
            Some("token-x"),
        )),
        Err(HistoryError::RequestFailed("connection reset".into())),
    ]));

    let mut handle = h.client.join_room(room()).unwrap();
    assert_eq!(wait_live(&mut handle).await, Phase::Live);

    let delivered = wait_for_deliveries(&h.delivery, 1).await;
    assert_eq!(delivered[0].body, "a-body");
    // The backfill is incomplete, so the watermark must not advance.
    assert_eq!(h.watermarks.write_count(), 0);

    h.feed.publish(
        "channel-1",
        live_event(record_json("d", "d-body", "2017-06-02T10:00:30Z")),
    );
    let delivered = wait_for_deliveries(&h.delivery, 2).await;
    assert_eq!(delivered[1].body, "d-body");
}

// ── Live phase ────────────────────────────────────────────────────────

#[tokio::test]
async fn live_events_pass_through_in_receipt_order() {
    let h = harness(ScriptedHistory::new(vec![Ok(page(vec![], None))]));

    let mut handle = h.client.join_room(room()).unwrap();
    assert_eq!(wait_live(&mut handle).await, Phase::Live);

    h.feed.publish(
        "channel-1",
        live_event(record_json_from("x", "alice", "first", "2017-06-02T10:00:03Z")),
    );
    h.feed.publish(
        "channel-1",
        live_event(record_json("y", "second", "2017-06-02T10:00:01Z")),
    );

    let delivered = wait_for_deliveries(&h.delivery, 2).await;
    assert_eq!(delivered[0].body, "first");
    assert_eq!(delivered[0].member, "alice");
    assert_eq!(delivered[1].body, "second");
    assert_eq!(delivered[1].member, "someone");
    // Live delivery never touches the watermark.
    assert_eq!(h.watermarks.write_count(), 0);
}

#[tokio::test]
async fn malformed_live_events_are_dropped_silently() {
    let h = harness(ScriptedHistory::new(vec![Ok(page(vec![], None))]));

    let mut handle = h.client.join_room(room()).unwrap();
    assert_eq!(wait_live(&mut handle).await, Phase::Live);

    h.feed
        .publish("channel-1", serde_json::json!({ "no": "record" }));
    h.feed.publish(
        "channel-1",
        live_event(serde_json::json!({ "Content": "missing id" })),
    );
    h.feed.publish(
        "channel-1",
        live_event(record_json("ok", "kept", "2017-06-02T10:00:01Z")),
    );

    let delivered = wait_for_deliveries(&h.delivery, 1).await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].body, "kept");
}

// ── Join/leave lifecycle ──────────────────────────────────────────────

#[tokio::test]
async fn duplicate_join_reuses_the_session() {
    let h = harness(ScriptedHistory::new(vec![Ok(page(vec![], None))]));

    let mut first = h.client.join_room(room()).unwrap();
    let second = h.client.join_room(room()).unwrap();
    assert_eq!(second.room().id, first.room().id);
    assert_eq!(h.client.session_count(), 1);

    assert_eq!(wait_live(&mut first).await, Phase::Live);
    assert_eq!(h.history.calls().len(), 1);
}

#[tokio::test]
async fn leave_before_any_page_resolves_cancels_cleanly() {
    let h = harness(HangingHistory::new());

    let mut handle = h.client.join_room(room()).unwrap();
    timeout(Duration::from_secs(2), h.history.started().notified())
        .await
        .expect("fetch never started");

    assert!(h.client.leave_room(&room().id));
    assert_eq!(wait_left(&mut handle).await, Phase::Left);

    sleep(Duration::from_millis(50)).await;
    assert!(h.delivery.delivered().is_empty());
    assert_eq!(h.watermarks.write_count(), 0);
    assert!(!h.client.is_joined(&room().id));
    assert_eq!(h.client.session_count(), 0);
}

#[tokio::test]
async fn cancelled_fetch_never_reaches_delivery() {
    let (history, gate) = ScriptedHistory::gated(vec![Ok(page(
        vec![record_json("a", "a-body", "2017-06-02T10:00:01Z")],
        None,
    ))]);
    let h = harness(history);

    let mut handle = h.client.join_room(room()).unwrap();
    timeout(Duration::from_secs(2), async {
        while h.history.calls().is_empty() {
            sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("fetch never started");

    assert!(h.client.leave_room(&room().id));
    assert_eq!(wait_left(&mut handle).await, Phase::Left);

    // Release the page after teardown; nothing may come of it.
    gate.notify_one();
    sleep(Duration::from_millis(50)).await;
    assert!(h.delivery.delivered().is_empty());
    assert_eq!(h.watermarks.write_count(), 0);
}

#[tokio::test]
async fn leave_is_idempotent() {
    let h = harness(ScriptedHistory::new(vec![Ok(page(vec![], None))]));

    let _handle = h.client.join_room(room()).unwrap();
    assert!(h.client.leave_room(&room().id));
    assert!(!h.client.leave_room(&room().id));
}

#[tokio::test]
async fn rejoin_after_leave_starts_a_fresh_session() {
    let h = harness(ScriptedHistory::new(vec![
        Ok(page(vec![], None)),
        Ok(page(vec![record_json("a", "a-body", "2017-06-02T10:00:01Z")], None)),
    ]));

    let mut first = h.client.join_room(room()).unwrap();
    assert_eq!(wait_live(&mut first).await, Phase::Live);
    assert!(h.client.leave_room(&room().id));

    let mut second = h.client.join_room(room()).unwrap();
    assert_eq!(wait_live(&mut second).await, Phase::Live);
    let delivered = wait_for_deliveries(&h.delivery, 1).await;
    assert_eq!(delivered[0].body, "a-body");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_joins_respect_the_room_limit() {
    let config = CatchupConfig {
        max_rooms: Some(1),
        ..CatchupConfig::default()
    };
    let h = Arc::new(harness_with(ScriptedHistory::new(vec![]), config));

    let mut joins = Vec::new();
    for i in 0..8 {
        let h = h.clone();
        joins.push(tokio::spawn(async move {
            let room = Room::new(format!("room-{i}"), format!("channel-{i}"), "Race");
            h.client.join_room(room).is_ok()
        }));
    }

    let mut successes = 0;
    for join in joins {
        if join.await.unwrap() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);
    assert_eq!(h.client.session_count(), 1);
}

#[tokio::test]
async fn room_limit_surfaces_as_a_join_failure() {
    let config = CatchupConfig {
        max_rooms: Some(1),
        ..CatchupConfig::default()
    };
    let h = harness_with(ScriptedHistory::new(vec![]), config);

    let other = Room::new("room-2", "channel-2", "Other");
    h.client.join_room(room()).unwrap();
    assert!(matches!(
        h.client.join_room(other.clone()),
        Err(JoinError::RoomLimit(1))
    ));

    // Rejoining the same room is still a no-op, not a limit violation.
    h.client.join_room(room()).unwrap();

    assert!(h.client.leave_room(&room().id));
    h.client.join_room(other).unwrap();
    assert!(h.client.is_joined(&RoomId::from("room-2")));
}

//! Stream projector end to end: in-memory events, SQLite state

use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tessera_core::{
    error::{Result, TesseraError},
    DispatcherConfig, Event, EventStore, InMemoryEventStore, Notification, Projection,
    ProjectionStoreConfig, RecordedEvent,
};
use tessera_projector::{handler_fn, NotificationDispatcher, NotificationHandler, StreamProjector};
use tessera_sqlite::LockedProjectionStore;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const STREAM: &str = "accounts";

#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
struct Totals {
    deposited: i64,
    withdrawn: i64,
    events: usize,
}

/// Sums deposits and withdrawals; the payload is the amount as text
struct Balances;

impl Projection for Balances {
    type State = Totals;

    fn name(&self) -> &str {
        "balances"
    }

    fn stream(&self) -> &str {
        STREAM
    }

    fn apply(&self, mut state: Totals, event: &RecordedEvent) -> Result<Totals> {
        let amount: i64 = std::str::from_utf8(&event.event.payload)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| TesseraError::InvalidState("amount is not a number".into()))?;

        match event.event.name.as_str() {
            "deposited" => state.deposited += amount,
            "withdrawn" => state.withdrawn += amount,
            _ => {}
        }
        state.events += 1;
        Ok(state)
    }
}

fn open_store(dir: &TempDir, projection: &str) -> Arc<LockedProjectionStore> {
    Arc::new(
        LockedProjectionStore::open(ProjectionStoreConfig::new(
            dir.path().join("state.db"),
            projection,
        ))
        .unwrap(),
    )
}

fn deposit(amount: i64) -> Event {
    Event::new("deposited", "acct-1", amount.to_string())
}

fn withdrawal(amount: i64) -> Event {
    Event::new("withdrawn", "acct-1", amount.to_string())
}

fn seeded_events() -> Arc<InMemoryEventStore> {
    let events = Arc::new(InMemoryEventStore::new());
    events.create(STREAM).unwrap();
    events
        .append_to(STREAM, vec![deposit(100), deposit(50), withdrawal(30)])
        .unwrap();
    events
}

fn projector(
    store: &Arc<LockedProjectionStore>,
    events: &Arc<InMemoryEventStore>,
) -> Arc<StreamProjector<Balances>> {
    let events: Arc<dyn EventStore> = events.clone();
    Arc::new(
        StreamProjector::new(
            store.clone(),
            events,
            Balances,
            DispatcherConfig::new().with_workers(2),
        )
        .unwrap(),
    )
}

fn stored_totals(dir: &TempDir) -> Totals {
    let conn = Connection::open(dir.path().join("state.db")).unwrap();
    let blob: Vec<u8> = conn
        .query_row(
            "SELECT state FROM projections WHERE name = 'balances'",
            [],
            |row| row.get(0),
        )
        .unwrap();
    serde_json::from_slice(&blob).unwrap()
}

fn simulate_crash(dir: &TempDir) {
    let conn = Connection::open(dir.path().join("state.db")).unwrap();
    conn.execute(
        "UPDATE projections SET locked = 1 WHERE name = 'balances'",
        [],
    )
    .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_catches_up_from_scratch() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "balances");
    let events = seeded_events();
    let projector = projector(&store, &events);

    projector.run(&CancellationToken::new()).await.unwrap();

    let status = store.status().unwrap();
    assert_eq!(status.position, 3);
    assert!(!status.locked);
    assert_eq!(
        stored_totals(&dir),
        Totals {
            deposited: 150,
            withdrawn: 30,
            events: 3
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_resumes_from_persisted_position() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "balances");
    let events = seeded_events();

    projector(&store, &events)
        .run(&CancellationToken::new())
        .await
        .unwrap();

    events
        .append_to(STREAM, vec![deposit(5), withdrawal(1)])
        .unwrap();

    // A fresh projector over the same state picks up only the new events
    projector(&store, &events)
        .run(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(store.status().unwrap().position, 5);
    assert_eq!(
        stored_totals(&dir),
        Totals {
            deposited: 155,
            withdrawn: 31,
            events: 5
        }
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stuck_projection_is_not_advanced() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "balances");
    let events = seeded_events();
    let projector = projector(&store, &events);

    simulate_crash(&dir);

    // The failure is logged by the dispatcher, not returned
    projector.run(&CancellationToken::new()).await.unwrap();
    let status = store.status().unwrap();
    assert_eq!(status.position, 0);
    assert!(status.locked);

    assert!(store.clear_stuck_flag().unwrap());
    projector.run(&CancellationToken::new()).await.unwrap();

    let status = store.status().unwrap();
    assert_eq!(status.position, 3);
    assert!(!status.locked);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_contention_retries_until_holder_releases() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "balances");
    let events = seeded_events();
    let projector = projector(&store, &events);

    let holder_store = open_store(&dir, "balances");
    let mut holder = holder_store.connect().unwrap();
    let (held, _) = holder_store.acquire(&mut holder, None).unwrap();

    let started = Instant::now();
    let running = {
        let projector = projector.clone();
        tokio::spawn(async move { projector.run(&CancellationToken::new()).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(store.status().unwrap().position, 0);
    held.release();

    tokio::time::timeout(Duration::from_secs(5), running)
        .await
        .expect("run finished after the holder released")
        .unwrap()
        .unwrap();

    assert!(started.elapsed() >= Duration::from_millis(200));
    assert_eq!(store.status().unwrap().position, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_contended_rescan_backs_off() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "balances");
    let events = seeded_events();
    let projector = projector(&store, &events);

    let holder_store = open_store(&dir, "balances");
    let mut holder = holder_store.connect().unwrap();
    let (held, _) = holder_store.acquire(&mut holder, None).unwrap();

    let invocations = Arc::new(AtomicUsize::new(0));
    let handler = {
        let invocations = invocations.clone();
        handler_fn(move |cancel, notification, trigger| {
            let projector = projector.clone();
            let invocations = invocations.clone();
            async move {
                invocations.fetch_add(1, Ordering::SeqCst);
                projector.handle(&cancel, notification, trigger).await
            }
        })
    };

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        canceller.cancel();
    });

    let dispatcher = NotificationDispatcher::new(DispatcherConfig::new().with_workers(2)).unwrap();
    dispatcher
        .execute(&cancel, Arc::new(handler), None)
        .await
        .unwrap();

    // 200ms at a 50ms retry delay allows about five attempts
    let attempts = invocations.load(Ordering::SeqCst);
    assert!(attempts >= 2, "only {} attempts", attempts);
    assert!(attempts <= 8, "{} attempts while the lock was held", attempts);

    held.release();
    assert_eq!(store.status().unwrap().position, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_run_and_listen_follows_notifications() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "balances");
    let events = seeded_events();
    let projector = projector(&store, &events);

    let cancel = CancellationToken::new();
    let (sender, receiver) = mpsc::channel(8);
    let listening = {
        let projector = projector.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { projector.run_and_listen(&cancel, receiver).await })
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    while store.status().unwrap().position < 3 && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.status().unwrap().position, 3);

    let last = events.append_to(STREAM, vec![deposit(7)]).unwrap();
    sender
        .send(Notification::new(last, "acct-1"))
        .await
        .unwrap();

    while store.status().unwrap().position < last && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(store.status().unwrap().position, 4);
    assert_eq!(stored_totals(&dir).deposited, 157);

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(5), listening)
        .await
        .expect("listener stopped after cancellation")
        .unwrap()
        .unwrap();
}

#[test]
fn test_projection_name_must_match_store() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, "ledger");
    let events: Arc<dyn EventStore> = seeded_events();

    let result = StreamProjector::new(store, events, Balances, DispatcherConfig::new());
    assert!(matches!(result, Err(TesseraError::InvalidArgument(_))));
}

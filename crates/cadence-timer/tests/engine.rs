// End-to-end timer behaviour against a real scheduler thread and clock.
// Timeouts are short and assertions leave generous slack for loaded machines.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use cadence_core::{BusConfig, Envelope, Mailbox, MessageBus, MessageKind, Priority, TimerConfig};
use cadence_timer::{Expired, Repeat, TimerEngine};

const RECV_LIMIT: Duration = Duration::from_secs(5);

fn setup<P: Clone + Send + 'static>(
    capacity: usize,
) -> (MessageBus<Expired<P>>, Mailbox<Expired<P>>, TimerEngine<P>) {
    let bus = MessageBus::new(&BusConfig {
        mailbox_capacity: capacity,
    });
    let mailbox = bus.register().unwrap();
    let config = TimerConfig {
        thread_name: "cadence-timer-test".to_string(),
        ..TimerConfig::default()
    };
    let engine = TimerEngine::init(&bus, &config).unwrap();
    (bus, mailbox, engine)
}

async fn next<P>(mailbox: &mut Mailbox<Expired<P>>) -> Envelope<Expired<P>> {
    tokio::time::timeout(RECV_LIMIT, mailbox.recv())
        .await
        .expect("timed out waiting for expiration")
        .expect("mailbox closed")
}

async fn assert_quiet<P>(mailbox: &mut Mailbox<Expired<P>>, window: Duration) {
    let got = tokio::time::timeout(window, mailbox.recv()).await;
    assert!(got.is_err(), "unexpected expiration delivered");
}

#[tokio::test]
async fn one_shot_fires_once_not_before_timeout() {
    let (_bus, mut mailbox, engine) = setup::<&'static str>(16);
    let start = Instant::now();
    let handle = engine
        .create(mailbox.id(), Repeat::Once, Duration::from_millis(50), "once")
        .unwrap();

    let env = next(&mut mailbox).await;
    // Deadlines are whole milliseconds, so allow one ms of truncation.
    assert!(start.elapsed() >= Duration::from_millis(49));
    assert_eq!(env.kind, MessageKind::TIMER_EXPIRE);
    assert_eq!(env.priority, Priority::High);
    assert_eq!(env.destination, mailbox.id());
    assert_eq!(env.body.timer, handle.id());
    assert_eq!(env.body.repeat, Repeat::Once);
    assert_eq!(env.body.payload, "once");

    assert_quiet(&mut mailbox, Duration::from_millis(200)).await;

    // The payload left with the notification.
    assert_eq!(engine.destroy(handle), None);
    engine.shutdown().unwrap();
}

#[tokio::test]
async fn distinct_deadlines_dispatch_in_order() {
    let (_bus, mut mailbox, engine) = setup::<u64>(16);
    let mut handles = Vec::new();
    for ms in [90, 30, 150, 60, 120] {
        handles.push(
            engine
                .create(mailbox.id(), Repeat::Once, Duration::from_millis(ms), ms)
                .unwrap(),
        );
    }

    let mut order = Vec::new();
    for _ in 0..5 {
        order.push(next(&mut mailbox).await.body.payload);
    }
    assert_eq!(order, vec![30, 60, 90, 120, 150]);

    for handle in handles {
        assert_eq!(engine.destroy(handle), None);
    }
    engine.shutdown().unwrap();
}

#[tokio::test]
async fn periodic_deadlines_advance_by_interval() {
    let (_bus, mut mailbox, engine) = setup::<&'static str>(64);
    let handle = engine
        .create(mailbox.id(), Repeat::Periodic, Duration::from_millis(40), "tick")
        .unwrap();
    assert_eq!(engine.repeat(&handle), Repeat::Periodic);

    let mut deadlines = Vec::new();
    for _ in 0..4 {
        let env = next(&mut mailbox).await;
        assert_eq!(env.body.repeat, Repeat::Periodic);
        assert_eq!(env.body.payload, "tick");
        deadlines.push(env.body.deadline);
    }
    for pair in deadlines.windows(2) {
        assert_eq!(pair[1] - pair[0], 40);
    }

    assert_eq!(engine.destroy(handle), Some("tick"));
    while mailbox.try_recv().is_some() {}
    assert_quiet(&mut mailbox, Duration::from_millis(150)).await;
    engine.shutdown().unwrap();
}

#[tokio::test]
async fn destroy_before_deadline_suppresses_dispatch() {
    let (_bus, mut mailbox, engine) = setup::<u32>(16);
    let handle = engine
        .create(mailbox.id(), Repeat::Once, Duration::from_millis(100), 7)
        .unwrap();

    assert_eq!(engine.destroy(handle), Some(7));
    assert_quiet(&mut mailbox, Duration::from_millis(250)).await;
    engine.shutdown().unwrap();
}

#[tokio::test]
async fn destroy_after_expiry_keeps_engine_healthy() {
    let (_bus, mut mailbox, engine) = setup::<u32>(16);
    let fired = engine
        .create(mailbox.id(), Repeat::Once, Duration::from_millis(20), 1)
        .unwrap();

    // Expiration is pending in the mailbox; destroy before processing it.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(engine.destroy(fired), None);
    assert_eq!(next(&mut mailbox).await.body.payload, 1);

    let later = engine
        .create(mailbox.id(), Repeat::Once, Duration::from_millis(20), 2)
        .unwrap();
    assert_eq!(next(&mut mailbox).await.body.payload, 2);
    assert_eq!(engine.destroy(later), None);
    engine.shutdown().unwrap();
}

#[tokio::test]
async fn saturated_mailbox_loses_nothing_and_keeps_order() {
    let (_bus, mut mailbox, engine) = setup::<u64>(1);
    let mut handles = Vec::new();
    for ms in [10, 20, 30, 40] {
        handles.push(
            engine
                .create(mailbox.id(), Repeat::Once, Duration::from_millis(ms), ms)
                .unwrap(),
        );
    }

    // Let every timer come due while only one slot exists.
    tokio::time::sleep(Duration::from_millis(150)).await;

    let start = Instant::now();
    let mut order = Vec::new();
    for _ in 0..4 {
        order.push(next(&mut mailbox).await.body.payload);
    }
    assert_eq!(order, vec![10, 20, 30, 40]);
    // Each receive frees the slot and wakes the scheduler, so the held
    // expirations drain well before the default wait would elapse even once.
    assert!(
        start.elapsed() < Duration::from_millis(300),
        "held expirations drained in {:?}",
        start.elapsed()
    );

    for handle in handles {
        engine.destroy(handle);
    }
    engine.shutdown().unwrap();
}

#[tokio::test]
async fn concurrent_creates_are_all_delivered() {
    let (_bus, mut mailbox, engine) = setup::<(usize, usize)>(256);
    let engine = Arc::new(engine);
    let listener = mailbox.id();

    let workers: Vec<_> = (0..4)
        .map(|worker| {
            let engine = Arc::clone(&engine);
            std::thread::spawn(move || {
                (0..25)
                    .map(|n| {
                        engine
                            .create(listener, Repeat::Once, Duration::from_millis(20), (worker, n))
                            .unwrap()
                    })
                    .collect::<Vec<_>>()
            })
        })
        .collect();
    let handles: Vec<_> = workers
        .into_iter()
        .flat_map(|w| w.join().unwrap())
        .collect();

    let mut seen = HashSet::new();
    for _ in 0..100 {
        let env = next(&mut mailbox).await;
        assert!(seen.insert(env.body.payload));
    }
    assert_eq!(seen.len(), 100);

    for handle in handles {
        assert_eq!(engine.destroy(handle), None);
    }
    let engine = Arc::try_unwrap(engine).ok().expect("engine still shared");
    engine.shutdown().unwrap();
}

#[tokio::test]
async fn periodic_and_one_shot_interleave() {
    let (_bus, mut mailbox, engine) = setup::<&'static str>(64);
    let periodic = engine
        .create(mailbox.id(), Repeat::Periodic, Duration::from_millis(100), "periodic")
        .unwrap();
    let oneshot = engine
        .create(mailbox.id(), Repeat::Once, Duration::from_millis(50), "oneshot")
        .unwrap();

    let mut tags = Vec::new();
    for _ in 0..4 {
        tags.push(next(&mut mailbox).await.body.payload);
    }
    assert_eq!(tags, vec!["oneshot", "periodic", "periodic", "periodic"]);

    assert_eq!(engine.destroy(oneshot), None);
    assert_eq!(engine.destroy(periodic), Some("periodic"));
    engine.shutdown().unwrap();
}

#[tokio::test]
async fn dead_listener_does_not_block_other_timers() {
    let bus: MessageBus<Expired<u32>> = MessageBus::new(&BusConfig::default());
    let gone = bus.register().unwrap();
    let mut live = bus.register().unwrap();
    let engine = TimerEngine::init(&bus, &TimerConfig::default()).unwrap();

    let lost = engine
        .create(gone.id(), Repeat::Once, Duration::from_millis(10), 1)
        .unwrap();
    let kept = engine
        .create(live.id(), Repeat::Once, Duration::from_millis(30), 2)
        .unwrap();
    drop(gone);

    assert_eq!(next(&mut live).await.body.payload, 2);
    engine.destroy(lost);
    engine.destroy(kept);
    engine.shutdown().unwrap();
}

#[test]
fn shutdown_with_no_timers_is_prompt() {
    let bus: MessageBus<Expired<u32>> = MessageBus::new(&BusConfig::default());
    let engine = TimerEngine::init(&bus, &TimerConfig::default()).unwrap();

    let start = Instant::now();
    engine.shutdown().unwrap();
    // Well inside one default wait cycle.
    assert!(start.elapsed() < Duration::from_millis(500));
}

#[test]
fn dropping_engine_stops_scheduler() {
    let bus: MessageBus<Expired<u32>> = MessageBus::new(&BusConfig::default());
    let mailbox = bus.register().unwrap();
    let engine = TimerEngine::init(&bus, &TimerConfig::default()).unwrap();
    let _leaked = engine
        .create(mailbox.id(), Repeat::Periodic, Duration::from_secs(60), 3)
        .unwrap();

    let start = Instant::now();
    drop(engine);
    assert!(start.elapsed() < Duration::from_secs(5));
}

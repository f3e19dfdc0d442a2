//! Pipeline integration tests
//!
//! Exercise pools, publishers and stage drivers together across threads.

use crossbeam::channel;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use relaypool::metadata::{DataDescription, DataType};
use relaypool::{
    Aggregator, ExchangeVector, FireVector, Mailbox, Pool, Publisher, Relay, Signal, Sink,
    SinkBuffer, StageState, Termination,
};

const BLOCKED: Duration = Duration::from_millis(100);
const WAKE: Duration = Duration::from_secs(5);

fn publish_signal(publisher: &Publisher<Signal>, status: bool) -> usize {
    let mut blank = publisher.acquire();
    blank.write().status = status;
    publisher.publish(blank)
}

/// Each live subscriber gets its own delivery; the buffer returns only
/// after the last one is released
#[test]
fn test_fan_out_delivery_counts() {
    for n in [0usize, 1, 3, 8] {
        let publisher = Publisher::new("fan-out", 1, Signal::default).unwrap();
        let subscriptions: Vec<_> = (0..n).map(|_| publisher.subscribe()).collect();

        assert_eq!(publish_signal(&publisher, true), n);

        let deliveries: Vec<_> = subscriptions
            .iter()
            .map(|s| s.try_pull().expect("delivery"))
            .collect();
        assert!(subscriptions.iter().all(|s| s.try_pull().is_none()));

        if n > 0 {
            assert_eq!(publisher.pool_stats().available, 0);
        }
        for (released, delivery) in deliveries.into_iter().enumerate() {
            assert!(delivery.read().status);
            delivery.release();
            let expected = if released + 1 == n { 1 } else { 0 };
            assert_eq!(publisher.pool_stats().available, expected);
        }
        assert_eq!(publisher.pool_stats().available, 1);
    }
}

#[test]
fn test_observers_count_toward_fan_out() {
    let publisher = Publisher::new("observed", 1, Signal::default).unwrap();
    let typed = publisher.subscribe();
    let observer = publisher.observe();
    assert_eq!(publisher.subscriber_count(), 1);
    assert_eq!(publisher.observer_count(), 1);

    assert_eq!(publish_signal(&publisher, true), 2);

    let handle = observer.pull().unwrap();
    assert_eq!(handle.read(|s: &Signal| s.status), Some(true));
    assert_eq!(handle.read(|_: &FireVector| ()), None);
    assert_eq!(handle.pool_name(), "observed");
    drop(handle);
    assert_eq!(publisher.pool_stats().available, 0);

    drop(typed.pull().unwrap());
    assert_eq!(publisher.pool_stats().available, 1);
}

/// Capacity 3, two subscribers, three unreleased publishes: a fourth
/// acquire waits until both copies of some buffer are released
#[test]
fn test_exhausted_pool_blocks_acquire() {
    let publisher = Arc::new(Publisher::new("scenario-a", 3, Signal::default).unwrap());
    let first = publisher.subscribe();
    let second = publisher.subscribe();

    for _ in 0..3 {
        assert_eq!(publish_signal(&publisher, true), 2);
    }
    assert!(publisher.try_acquire().is_none());

    let (tx, rx) = channel::bounded(1);
    let acquirer = {
        let publisher = publisher.clone();
        thread::spawn(move || {
            let blank = publisher.acquire();
            tx.send(blank.slot()).unwrap();
        })
    };
    assert!(rx.recv_timeout(BLOCKED).is_err());

    // One copy released is not enough
    drop(first.pull().unwrap());
    assert!(rx.recv_timeout(BLOCKED).is_err());

    drop(second.pull().unwrap());
    rx.recv_timeout(WAKE).expect("acquire should unblock");
    acquirer.join().unwrap();
}

/// One closed gate: the primary is released, nothing is published, and the
/// aggregator stops
#[test]
fn test_closed_gate_stops_aggregator() {
    let source = Publisher::new("exchange", 1, || ExchangeVector::new(128)).unwrap();
    let gates: Vec<Publisher<Signal>> = (0..2)
        .map(|i| Publisher::new(format!("gate-{i}"), 1, Signal::default).unwrap())
        .collect();

    let mut aggregator = Aggregator::new(
        "fire",
        1,
        || FireVector::new(128),
        source.subscribe(),
        gates.iter().map(|g| g.subscribe()).collect(),
        |s: &ExchangeVector, o: &mut FireVector| o.set_fire_bits(s.words()),
    )
    .unwrap();
    let out = aggregator.subscribe();
    aggregator.start().unwrap();

    publish_signal(&gates[0], false);
    publish_signal(&gates[1], true);
    source.publish(source.acquire());

    assert_eq!(aggregator.join(), Some(Termination::GateClosed));
    assert!(out.pull().is_none());
    assert_eq!(source.pool_stats().available, 1);
    assert_eq!(source.subscriber_count(), 0);
    assert!(gates.iter().all(|g| g.subscriber_count() == 0));
}

/// Publishing into nobody recycles at once and ends the relay
#[test]
fn test_unsubscribed_relay_recycles_and_stops() {
    let publisher = Publisher::new("direct", 2, Signal::default).unwrap();
    assert_eq!(publish_signal(&publisher, true), 0);
    assert_eq!(publisher.pool_stats().available, 2);

    let mut relay = Relay::new("lonely", 2, Signal::default, |_, _| {}).unwrap();
    relay.start().unwrap();
    assert_eq!(relay.join(), Some(Termination::NoListeners));
    assert_eq!(relay.state(), StageState::Terminated(Termination::NoListeners));
}

/// A failed join still hands back the deliveries that made it
#[test]
fn test_mailbox_failure_keeps_partial_deliveries() {
    let live = Publisher::new("live", 1, Signal::default).unwrap();
    let doomed = Publisher::new("doomed", 1, Signal::default).unwrap();
    let a = live.subscribe();
    let b = doomed.subscribe();

    let mailbox = Mailbox::new();
    let slot_a = a.arm(&mailbox);
    let slot_b = b.arm(&mailbox);
    assert_eq!(mailbox.pending(), 2);

    publish_signal(&live, true);
    assert_eq!(mailbox.pending(), 1);
    drop(doomed);

    assert!(!mailbox.wait());
    assert!(mailbox.is_failed());
    assert!(slot_b.take().is_none());

    let delivered = slot_a.take().expect("partial delivery");
    assert!(delivered.read().status);
    drop(delivered);
    assert_eq!(live.pool_stats().available, 1);
}

#[test]
fn test_mailbox_join_across_threads() {
    let publishers: Vec<Arc<Publisher<Signal>>> = (0..4)
        .map(|i| Arc::new(Publisher::new(format!("src-{i}"), 1, Signal::default).unwrap()))
        .collect();
    let subscriptions: Vec<_> = publishers.iter().map(|p| p.subscribe()).collect();

    let mailbox = Mailbox::new();
    let slots: Vec<_> = subscriptions.iter().map(|s| s.arm(&mailbox)).collect();

    let producers: Vec<_> = publishers
        .iter()
        .cloned()
        .map(|p| thread::spawn(move || publish_signal(&p, true)))
        .collect();

    assert_eq!(mailbox.wait_timeout(WAKE), Some(true));
    for producer in producers {
        assert_eq!(producer.join().unwrap(), 1);
    }
    assert!(slots.iter().all(|s| s.is_filled()));
}

/// Concurrent acquire/recycle never loses or duplicates a buffer
#[test]
fn test_pool_invariant_under_contention() {
    let pool = Arc::new(Pool::new("contended", 4, Signal::default).unwrap());

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            thread::spawn(move || {
                for _ in 0..500 {
                    let mut blank = pool.acquire();
                    blank.write().status = true;
                    drop(blank);
                }
            })
        })
        .collect();

    for _ in 0..200 {
        let stats = pool.stats();
        assert!(stats.available <= stats.capacity);
        assert_eq!(stats.available + stats.in_flight, stats.capacity);
    }
    for worker in workers {
        worker.join().unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.available, 4);
    assert_eq!(stats.acquires, 4000);
    assert_eq!(stats.recycles, 4000);
}

/// Arming races the publisher's push and teardown: exactly one delivery
#[test]
fn test_arm_races_push_and_teardown() {
    for _ in 0..200 {
        let publisher = Publisher::new("racy", 1, Signal::default).unwrap();
        let subscription = publisher.subscribe();

        let producer = thread::spawn(move || {
            publish_signal(&publisher, true);
            drop(publisher);
        });

        let mailbox = Mailbox::new();
        let slot = subscription.arm(&mailbox);
        assert_eq!(mailbox.wait_timeout(WAKE), Some(true));
        producer.join().unwrap();

        let delivery = slot.take().expect("one delivery");
        assert!(subscription.try_pull().is_none());
        assert!(subscription.pull().is_none());
        drop(delivery);
    }
}

/// Subscribers leaving while the publisher pushes never leak buffers
#[test]
fn test_unsubscribe_races_publish() {
    let publisher = Arc::new(Publisher::new("churn", 2, Signal::default).unwrap());

    let churn = {
        let publisher = publisher.clone();
        thread::spawn(move || {
            for _ in 0..500 {
                let subscription = publisher.subscribe();
                let _ = subscription.try_pull();
            }
        })
    };
    for _ in 0..500 {
        publish_signal(&publisher, true);
    }
    churn.join().unwrap();

    assert_eq!(publisher.subscriber_count(), 0);
    assert_eq!(publisher.pool_stats().available, 2);
}

/// Dropping a publisher wakes every blocked puller with end-of-stream
#[test]
fn test_teardown_wakes_all_blocked_pullers() {
    const K: usize = 6;
    let publisher = Publisher::new("teardown", 1, Signal::default).unwrap();
    let (tx, rx) = channel::unbounded();

    let pullers: Vec<_> = (0..K)
        .map(|_| {
            let subscription = publisher.subscribe();
            let tx = tx.clone();
            thread::spawn(move || tx.send(subscription.pull().is_none()).unwrap())
        })
        .collect();
    assert!(rx.recv_timeout(BLOCKED).is_err());

    drop(publisher);
    for _ in 0..K {
        assert!(rx.recv_timeout(WAKE).expect("puller woke"));
    }
    for puller in pullers {
        puller.join().unwrap();
    }
}

/// Relay into a gated aggregator into a sink, ending when the gate closes
#[test]
fn test_pipeline_runs_until_gate_closes() {
    const OPEN_STEPS: u64 = 5;

    let mut exchange = Relay::new(
        "exchange",
        2,
        || ExchangeVector::new(64),
        |step, v: &mut ExchangeVector| {
            v.clear();
            v.set(step as usize % 64);
        },
    )
    .unwrap();
    let mut gate = Relay::new("gate", 2, Signal::default, |step, s: &mut Signal| {
        s.status = step < OPEN_STEPS;
    })
    .unwrap();

    let mut step = 0;
    let mut fire = Aggregator::new(
        "fire",
        2,
        || FireVector::new(64),
        exchange.subscribe(),
        vec![gate.subscribe()],
        move |s: &ExchangeVector, o: &mut FireVector| {
            o.set_fire_bits(s.words());
            o.step = step;
            step += 1;
        },
    )
    .unwrap();
    let sink = fire.subscribe();

    exchange.start().unwrap();
    gate.start().unwrap();
    fire.start().unwrap();

    let mut received = Vec::new();
    while let Some(delivery) = sink.pull() {
        let vector = delivery.read();
        assert_eq!(vector.count_ones(), 1);
        assert_eq!(vector.words()[0], 1 << vector.step);
        received.push(vector.step);
    }
    assert_eq!(received, (0..OPEN_STEPS).collect::<Vec<_>>());

    assert_eq!(fire.join(), Some(Termination::GateClosed));
    assert_eq!(gate.join(), Some(Termination::NoListeners));
    assert_eq!(exchange.join(), Some(Termination::NoListeners));
}

/// Dropping the sink winds the whole pipeline down
#[test]
fn test_pipeline_stops_when_sink_leaves() {
    let mut exchange = Relay::new("exchange", 2, || ExchangeVector::new(64), |_, _| {}).unwrap();
    let mut fire = Aggregator::new(
        "fire",
        2,
        || FireVector::new(64),
        exchange.subscribe(),
        Vec::new(),
        |s: &ExchangeVector, o: &mut FireVector| o.set_fire_bits(s.words()),
    )
    .unwrap();
    let sink = fire.subscribe();

    exchange.start().unwrap();
    fire.start().unwrap();

    for _ in 0..3 {
        assert!(sink.pull().is_some());
    }
    drop(sink);

    assert_eq!(fire.join(), Some(Termination::NoListeners));
    assert_eq!(exchange.join(), Some(Termination::NoListeners));
    assert!(fire.pool_stats().is_none());
}

/// A sink at the end of the pipeline reports every open step, then the
/// whole chain stops once the reader leaves
#[test]
fn test_sink_reports_until_reader_leaves() {
    let mut exchange = Relay::new(
        "exchange",
        2,
        || ExchangeVector::new(96),
        |step, v: &mut ExchangeVector| {
            v.clear();
            v.set(step as usize % 96);
        },
    )
    .unwrap();
    let mut gate = Relay::new("gate", 2, Signal::default, |_, s: &mut Signal| s.status = true)
        .unwrap();

    let mut step = 0;
    let mut fire = Aggregator::new(
        "fire",
        2,
        || FireVector::new(96),
        exchange.subscribe(),
        vec![gate.subscribe()],
        move |s: &ExchangeVector, o: &mut FireVector| {
            o.set_fire_bits(s.words());
            o.step = step;
            step += 1;
        },
    )
    .unwrap();
    let mut sink = Sink::new(
        "report",
        DataDescription::new(DataType::Bit, 96),
        2,
        fire.subscribe(),
        vec![gate.subscribe()],
        |f: &FireVector, out: &mut SinkBuffer| {
            out.write_words(f.words());
            out.step = f.step;
        },
    )
    .unwrap();
    let reader = sink.subscribe();

    exchange.start().unwrap();
    gate.start().unwrap();
    fire.start().unwrap();
    sink.start().unwrap();

    for expected in 0..10u64 {
        let report = reader.pull().unwrap();
        let collected = report.read();
        assert_eq!(collected.step, expected);
        assert_eq!(collected.data().len(), 16);
        assert_eq!(collected.count_ones(), 1);
        let bit = expected as usize;
        assert_eq!(collected.data()[bit / 8], 1 << (bit % 8));
    }
    drop(reader);

    assert_eq!(sink.join(), Some(Termination::NoListeners));
    assert_eq!(fire.join(), Some(Termination::NoListeners));
    assert_eq!(gate.join(), Some(Termination::NoListeners));
    assert_eq!(exchange.join(), Some(Termination::NoListeners));
}

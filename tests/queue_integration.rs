//! Message queue tests: delivery exactness, per-producer ordering,
//! backpressure and closure semantics.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use fcgid::queue::{self, Consumed};

#[test]
fn n_producers_m_messages_no_loss_no_duplicates_in_order() {
    const PRODUCERS: usize = 4;
    const MESSAGES: usize = 5_000;

    let (tx, rx) = queue::bounded::<(usize, usize)>(64);
    let mut handles = Vec::new();
    for producer in 0..PRODUCERS {
        let tx = tx.clone();
        handles.push(thread::spawn(move || {
            for seq in 0..MESSAGES {
                tx.produce((producer, seq)).expect("queue closed early");
            }
        }));
    }
    drop(tx);

    let mut next_seq: HashMap<usize, usize> = HashMap::new();
    let mut total = 0usize;
    while let Some((producer, seq)) = rx.consume() {
        let expected = next_seq.entry(producer).or_insert(0);
        assert_eq!(seq, *expected, "producer {producer} out of order");
        *expected += 1;
        total += 1;
    }

    assert_eq!(total, PRODUCERS * MESSAGES);
    for producer in 0..PRODUCERS {
        assert_eq!(next_seq[&producer], MESSAGES);
    }
    for handle in handles {
        handle.join().unwrap();
    }
}

#[test]
fn a_million_messages_pass_through_losslessly() {
    const COUNT: u32 = 1 << 20;

    let (tx, rx) = queue::bounded::<u32>(1024);
    let producer = thread::spawn(move || {
        for value in 0..COUNT {
            tx.produce(value).expect("queue closed early");
        }
    });

    let mut expected = 0u32;
    while let Some(value) = rx.consume() {
        assert_eq!(value, expected);
        expected += 1;
    }
    assert_eq!(expected, COUNT);
    producer.join().unwrap();
}

#[test]
fn produce_blocks_at_capacity_and_resumes() {
    let (tx, rx) = queue::bounded::<u8>(1);
    tx.produce(1).unwrap();

    let second_sent = Arc::new(AtomicBool::new(false));
    let sent_flag = second_sent.clone();
    let producer = thread::spawn(move || {
        tx.produce(2).unwrap();
        sent_flag.store(true, Ordering::SeqCst);
    });

    // The queue is full, so the second produce cannot have completed.
    thread::sleep(Duration::from_millis(100));
    assert!(!second_sent.load(Ordering::SeqCst));

    assert_eq!(rx.consume(), Some(1));
    producer.join().unwrap();
    assert!(second_sent.load(Ordering::SeqCst));
    assert_eq!(rx.consume(), Some(2));
}

#[test]
fn consume_timeout_reports_a_timeout_on_an_empty_queue() {
    let (_tx, rx) = queue::bounded::<u8>(4);
    assert!(matches!(
        rx.consume_timeout(Duration::from_millis(20)),
        Consumed::TimedOut
    ));
}

#[test]
fn closure_is_terminal_after_the_queue_drains() {
    let (tx, rx) = queue::bounded::<u8>(4);
    tx.produce(1).unwrap();
    tx.produce(2).unwrap();
    drop(tx);

    assert!(matches!(
        rx.consume_timeout(Duration::from_millis(20)),
        Consumed::Message(1)
    ));
    assert_eq!(rx.consume(), Some(2));
    assert_eq!(rx.consume(), None);
    assert!(matches!(
        rx.consume_timeout(Duration::from_millis(20)),
        Consumed::Closed
    ));
}

#[test]
fn produce_fails_once_the_consumer_is_gone() {
    let (tx, rx) = queue::bounded::<u8>(4);
    drop(rx);
    assert!(tx.produce(1).is_err());
}

use std::time::Duration;

use serde_json::{Map, Value, json};

use super::*;

fn event(seq: u64) -> Event {
    let mut fields = Map::new();
    fields.insert("event_type".to_owned(), json!("test"));
    fields.insert("seq".to_owned(), json!(seq));
    Event::new(fields)
}

fn batch(range: std::ops::Range<u64>) -> Batch {
    range.map(event).collect()
}

fn seq_of(event: &Event) -> u64 {
    event.get("seq").and_then(Value::as_u64).unwrap()
}

#[test]
fn eleventh_single_event_batch_is_rejected_at_capacity_ten() {
    let queue = EventQueue::new(10);

    for i in 0..10 {
        assert_eq!(
            queue.submit(vec![event(i)]),
            AdmissionVerdict::Accepted(1),
            "submission #{i}"
        );
    }

    assert_eq!(
        queue.submit(vec![event(10)]),
        AdmissionVerdict::Rejected(RejectReason::Full {
            queued: 10,
            capacity: 10,
            incoming: 1,
        })
    );
    assert_eq!(queue.len(), 10);
}

#[test]
fn rejected_batch_leaves_queue_unchanged() {
    let queue = EventQueue::new(5);
    assert_eq!(queue.submit(batch(0..3)), AdmissionVerdict::Accepted(3));

    // 3 + 3 > 5: nothing of this batch may be enqueued
    assert!(matches!(
        queue.submit(batch(100..103)),
        AdmissionVerdict::Rejected(RejectReason::Full { .. })
    ));
    assert_eq!(queue.len(), 3);

    let remaining: Vec<_> = std::iter::from_fn(|| queue.try_dequeue())
        .map(|e| seq_of(&e))
        .collect();
    assert_eq!(remaining, vec![0, 1, 2]);
}

#[test]
fn batch_filling_exactly_to_capacity_is_accepted() {
    let queue = EventQueue::new(4);
    assert_eq!(queue.submit(batch(0..4)), AdmissionVerdict::Accepted(4));
    assert_eq!(queue.len(), queue.capacity());
    assert_eq!(queue.submit(Vec::new()), AdmissionVerdict::Accepted(0));
}

#[test]
fn zero_capacity_is_raised_to_one() {
    let queue = EventQueue::new(0);
    assert_eq!(queue.capacity(), 1);
}

#[test]
fn fifo_across_batches() {
    let queue = EventQueue::new(100);
    queue.submit(batch(0..3));
    queue.submit(batch(3..4));
    queue.submit(batch(4..10));

    let order: Vec<_> = std::iter::from_fn(|| queue.try_dequeue())
        .map(|e| seq_of(&e))
        .collect();
    assert_eq!(order, (0..10).collect::<Vec<_>>());
}

#[test]
fn closed_queue_rejects_but_keeps_items() {
    let queue = EventQueue::new(10);
    queue.submit(batch(0..2));
    queue.close();
    queue.close();

    assert!(queue.is_closed());
    assert_eq!(
        queue.submit(batch(2..3)),
        AdmissionVerdict::Rejected(RejectReason::Closed)
    );
    assert_eq!(queue.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_submits_never_exceed_capacity() {
    const CAPACITY: usize = 64;
    let queue = EventQueue::new(CAPACITY);

    let mut handles = Vec::new();
    for task in 0..32u64 {
        let queue = queue.clone();
        handles.push(tokio::spawn(async move {
            let mut accepted = 0;
            for round in 0..50u64 {
                let size = 1 + ((task + round) % 4);
                let start = task * 1_000 + round * 10;
                match queue.submit(batch(start..start + size)) {
                    AdmissionVerdict::Accepted(n) => accepted += n,
                    AdmissionVerdict::Rejected(_) => (),
                }
                assert!(queue.len() <= CAPACITY);
                tokio::task::yield_now().await;
            }
            accepted
        }));
    }

    let mut total_accepted = 0;
    for handle in handles {
        total_accepted += handle.await.unwrap();
    }

    assert!(queue.len() <= CAPACITY);
    assert_eq!(queue.len(), total_accepted);
}

#[tokio::test]
async fn dequeue_suspends_until_item_arrives() {
    let queue = EventQueue::new(10);

    let consumer = tokio::spawn({
        let queue = queue.clone();
        async move { queue.dequeue_one().await }
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!consumer.is_finished());

    queue.submit(vec![event(7)]);

    let received = tokio::time::timeout(Duration::from_secs(1), consumer)
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(seq_of(&received), 7);
}

#[tokio::test]
async fn close_wakes_suspended_consumers() {
    let queue = EventQueue::new(10);

    let consumers: Vec<_> = (0..3)
        .map(|_| {
            let queue = queue.clone();
            tokio::spawn(async move { queue.dequeue_one().await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(20)).await;
    queue.close();

    for consumer in consumers {
        let result = tokio::time::timeout(Duration::from_secs(1), consumer)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }
}

#[tokio::test]
async fn closed_queue_still_drains_remaining_items() {
    let queue = EventQueue::new(10);
    queue.submit(batch(0..2));
    queue.close();

    assert_eq!(queue.dequeue_one().await.map(|e| seq_of(&e)), Some(0));
    assert_eq!(queue.dequeue_one().await.map(|e| seq_of(&e)), Some(1));
    assert!(queue.dequeue_one().await.is_none());
}

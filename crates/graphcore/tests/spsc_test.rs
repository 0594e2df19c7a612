use graphcore::spsc;
use std::sync::{Arc, Mutex};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_spsc_endpoints_move_across_tasks() {
    let (mut producer, mut consumer) = spsc::channel::<String>();

    let writer = tokio::spawn(async move {
        for i in 0..1_000 {
            producer.enqueue(format!("item-{}", i));
            if i % 100 == 0 {
                tokio::task::yield_now().await;
            }
        }
    });
    let reader = tokio::spawn(async move {
        let mut received = Vec::with_capacity(1_000);
        while received.len() < 1_000 {
            match consumer.dequeue() {
                Some(item) => received.push(item),
                None => tokio::task::yield_now().await,
            }
        }
        received
    });

    writer.await.unwrap();
    let received = reader.await.unwrap();
    let expected: Vec<String> = (0..1_000).map(|i| format!("item-{}", i)).collect();
    assert_eq!(received, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_producer_recycles_across_bursts() {
    let (mut producer, consumer) = spsc::channel::<u32>();
    let consumer = Arc::new(Mutex::new(consumer));

    for burst in 0..20u32 {
        for i in 0..8 {
            producer.enqueue(burst * 8 + i);
        }
        let drained = {
            let consumer = Arc::clone(&consumer);
            tokio::task::spawn_blocking(move || consumer.lock().unwrap().dequeue_batch(usize::MAX))
                .await
                .unwrap()
        };
        assert_eq!(drained, (burst * 8..burst * 8 + 8).collect::<Vec<_>>());
    }

    // eight in flight at most, plus the dummy and the consumer's tail link
    assert!(producer.allocated_links() <= 10);
    assert!(consumer.lock().unwrap().is_empty());
}

use tessera_task_queue::{Error, TaskQueue};

use std::{
	sync::{Arc, Mutex},
	time::Duration,
};

use futures_concurrency::future::Join;
use rand::Rng;
use tokio::{sync::oneshot, time::sleep};
use tracing::info;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn side_effects_follow_enqueue_order() {
	let queue = TaskQueue::new();
	let log = Arc::new(Mutex::new(Vec::new()));

	let delays = {
		let mut rng = rand::thread_rng();
		(0..40)
			.map(|_| Duration::from_millis(rng.gen_range(0..25)))
			.collect::<Vec<_>>()
	};

	let handles = delays
		.into_iter()
		.enumerate()
		.map(|(i, delay)| {
			let log = Arc::clone(&log);
			queue.enqueue(async move {
				sleep(delay).await;
				log.lock().unwrap().push(i);
				i
			})
		})
		.collect::<Vec<_>>();

	info!("all tasks enqueued, now we wait...");

	let outputs = handles
		.join()
		.await
		.into_iter()
		.collect::<Result<Vec<_>, _>>()
		.unwrap();

	assert_eq!(outputs, (0..40).collect::<Vec<_>>());
	assert_eq!(*log.lock().unwrap(), (0..40).collect::<Vec<_>>());
	assert!(queue.is_idle());
}

#[tokio::test]
#[traced_test]
async fn slow_task_is_not_overtaken() {
	let queue = TaskQueue::new();
	let log = Arc::new(Mutex::new(Vec::new()));

	let slow = queue.enqueue({
		let log = Arc::clone(&log);
		async move {
			sleep(Duration::from_millis(100)).await;
			log.lock().unwrap().push("slow");
		}
	});
	let fast = queue.enqueue({
		let log = Arc::clone(&log);
		async move {
			log.lock().unwrap().push("fast");
		}
	});

	assert_eq!(queue.len(), 2);

	// Awaiting the later handle first must still observe the earlier side effect
	fast.await.unwrap();
	assert_eq!(*log.lock().unwrap(), vec!["slow", "fast"]);
	slow.await.unwrap();
}

#[tokio::test]
#[traced_test]
async fn failures_do_not_block_the_queue() {
	let queue = TaskQueue::new();

	let failing = queue.enqueue(async { Err::<u32, _>("remote rejected the commit") });
	let panicking = queue.enqueue(async {
		panic!("commit task blew up");
	});
	let next = queue.enqueue(async { Ok::<_, &str>(7) });

	assert_eq!(next.await.unwrap(), Ok(7));
	assert_eq!(failing.await.unwrap(), Err("remote rejected the commit"));
	assert!(matches!(panicking.await, Err(Error::TaskPanicked(1))));
	assert!(queue.is_idle());
}

#[tokio::test]
#[traced_test]
async fn detached_task_still_runs() {
	let queue = TaskQueue::new();
	let (tx, rx) = oneshot::channel();

	let handle = queue.enqueue(async move {
		tx.send("ran").unwrap();
	});
	assert_eq!(handle.position(), 0);
	drop(handle);

	assert_eq!(rx.await.unwrap(), "ran");
}

#[tokio::test]
#[traced_test]
async fn sole_task_starts_without_waiting() {
	let queue = TaskQueue::new();

	queue.enqueue(async {}).await.unwrap();
	assert!(queue.is_idle());

	let (started_tx, started_rx) = oneshot::channel();
	let (release_tx, release_rx) = oneshot::channel::<()>();

	let handle = queue.enqueue(async move {
		started_tx.send(()).unwrap();
		release_rx.await.unwrap();
	});

	started_rx.await.unwrap();
	assert_eq!(queue.len(), 1);

	release_tx.send(()).unwrap();
	handle.await.unwrap();
	assert!(queue.is_idle());
}

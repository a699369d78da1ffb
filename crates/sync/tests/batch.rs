mod common;

use common::{client, MockTransport, Recorded, CREATED_AT};

use tessera_sync::{
	AggregateError, ClientConfig, Error, JsonValue, Method, RemoteError, SyncClient, Transport,
	Value,
};

use std::{sync::Arc, time::Duration};

use serde_json::json;
use tokio::{sync::Barrier, time::timeout};
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn batches_are_bounded() {
	let transport = MockTransport::server();
	let client = client(&transport);

	let objects = (0..45)
		.map(|i| {
			let item = client.object("Item");
			item.set("index", Value::from(i)).unwrap();
			item
		})
		.collect::<Vec<_>>();

	client.save_all(&objects).await.unwrap();

	let requests = transport.requests();
	assert_eq!(requests.len(), 3);
	assert!(requests
		.iter()
		.all(|request| request.method == Method::Post && request.path == "batch"));
	assert_eq!(
		requests
			.iter()
			.map(|request| request.members().len())
			.collect::<Vec<_>>(),
		vec![20, 20, 5]
	);

	assert!(objects.iter().all(|item| !item.is_dirty()));
	assert_eq!(objects[0].id(), Some("obj1"));
	assert_eq!(objects[44].id(), Some("obj45"));
}

#[tokio::test]
#[traced_test]
async fn configured_batch_size_is_used() {
	let transport = MockTransport::server();
	let client = SyncClient::with_transport(
		ClientConfig {
			batch_size: 2,
			..ClientConfig::new("http://localhost:1337", "test-app")
		},
		Arc::clone(&transport) as Arc<dyn Transport>,
	);

	let objects = (0..5)
		.map(|_| {
			let item = client.object("Item");
			item.set("flag", Value::from(true)).unwrap();
			item
		})
		.collect::<Vec<_>>();

	client.save_all(&objects).await.unwrap();

	assert_eq!(
		transport
			.requests()
			.iter()
			.map(|request| request.members().len())
			.collect::<Vec<_>>(),
		vec![2, 2, 1]
	);
}

#[tokio::test]
#[traced_test]
async fn referenced_objects_go_in_an_earlier_batch() {
	let transport = MockTransport::server();
	let client = client(&transport);

	let comment = client.object("Comment");
	comment.set("text", Value::from("first")).unwrap();
	let post = client.object("Post");
	post.set("comments", Value::Array(vec![Value::from(comment.pointer().clone())]))
		.unwrap();

	client.save_all(&[post.clone()]).await.unwrap();

	let requests = transport.requests();
	assert_eq!(requests.len(), 2);
	assert_eq!(
		requests[0].members(),
		vec![json!({"method": "POST", "path": "/1/classes/Comment", "body": {"text": "first"}})]
	);
	assert_eq!(
		requests[1].members(),
		vec![json!({
			"method": "POST",
			"path": "/1/classes/Post",
			"body": {
				"comments": [{"__type": "Pointer", "className": "Comment", "objectId": "obj1"}],
			},
		})]
	);
	assert_eq!(post.id(), Some("obj2"));
	assert!(!post.is_dirty());
}

#[tokio::test]
#[traced_test]
async fn objects_referencing_each_other_cannot_be_saved() {
	let transport = MockTransport::server();
	let client = client(&transport);

	let a = client.object("Node");
	let b = client.object("Node");
	a.set("next", Value::from(b.pointer().clone())).unwrap();
	b.set("next", Value::from(a.pointer().clone())).unwrap();

	let err = client.save_all(&[a.clone(), b.clone()]).await.unwrap_err();

	assert!(matches!(err, Error::BatchCycle));
	assert!(transport.requests().is_empty());
	assert_eq!(a.id(), None);
	assert!(a.is_dirty_key("next"));
	assert!(b.is_dirty_key("next"));
}

#[tokio::test]
#[traced_test]
async fn clean_objects_are_not_sent() {
	let transport = MockTransport::server();
	let client = client(&transport);

	let clean = client
		.object_from_json("Item", &json!({"objectId": "i1", "name": "kept"}))
		.unwrap();
	let dirty = client.object_with_id("Item", "i2");
	dirty.set("name", Value::from("changed")).unwrap();

	client.save_all(&[clean, dirty.clone()]).await.unwrap();

	let requests = transport.requests();
	assert_eq!(requests.len(), 1);
	assert_eq!(
		requests[0].members(),
		vec![json!({"method": "PUT", "path": "/1/classes/Item/i2", "body": {"name": "changed"}})]
	);
	assert!(!dirty.is_dirty());
}

#[tokio::test]
#[traced_test]
async fn failed_member_keeps_its_changes() {
	let transport = MockTransport::new(|request: Recorded| async move {
		let entries = request
			.members()
			.iter()
			.enumerate()
			.map(|(i, _)| {
				if i == 1 {
					json!({"error": {"code": 137, "error": "duplicate value"}})
				} else {
					json!({"success": {"objectId": format!("ok{i}"), "createdAt": CREATED_AT}})
				}
			})
			.collect();
		Ok(JsonValue::Array(entries))
	});
	let client = client(&transport);

	let objects = ["a", "b", "c"]
		.into_iter()
		.map(|name| {
			let user = client.object("User");
			user.set("username", Value::from(name)).unwrap();
			user
		})
		.collect::<Vec<_>>();

	let err = client.save_all(&objects).await.unwrap_err();
	assert!(matches!(err, Error::Remote(RemoteError { code: 137, .. })));

	assert_eq!(objects[0].id(), Some("ok0"));
	assert!(!objects[0].is_dirty());
	assert_eq!(objects[2].id(), Some("ok2"));

	assert_eq!(objects[1].id(), None);
	assert!(objects[1].is_dirty_key("username"));
	assert_eq!(objects[1].get("username"), Some(Value::from("b")));
}

#[tokio::test]
#[traced_test]
async fn destroy_all_reports_every_failed_member() {
	let transport = MockTransport::new(|request: Recorded| async move {
		let entries = request
			.members()
			.iter()
			.map(|member| {
				if member["path"] == "/1/classes/Item/b" {
					json!({"error": {"code": 101, "error": "Object not found."}})
				} else {
					json!({"success": {}})
				}
			})
			.collect();
		Ok(JsonValue::Array(entries))
	});
	let client = client(&transport);

	let a = client.object_with_id("Item", "a");
	let b = client.object_with_id("Item", "b");
	let never_saved = client.object("Item");

	let err = client
		.destroy_all(&[a.clone(), b.clone(), never_saved, a.clone()])
		.await
		.unwrap_err();

	let errors = match err {
		Error::Aggregate(AggregateError { errors }) => errors,
		other => panic!("expected an aggregate error, got: {other:?}"),
	};
	assert_eq!(errors.len(), 1);
	assert_eq!(&errors[0].object, b.pointer());
	assert!(matches!(
		errors[0].error,
		Error::Remote(RemoteError { code: 101, .. })
	));

	let requests = transport.requests();
	assert_eq!(requests.len(), 1);
	assert_eq!(
		requests[0].members(),
		vec![
			json!({"method": "DELETE", "path": "/1/classes/Item/a"}),
			json!({"method": "DELETE", "path": "/1/classes/Item/b"}),
		]
	);

	assert!(!client.registry().contains(a.pointer()));
	assert!(client.registry().contains(b.pointer()));
}

#[tokio::test]
#[traced_test]
async fn failed_batch_request_fails_every_member() {
	let transport = MockTransport::scripted(vec![Err(tessera_sync::TransportError::Connection(
		"connection reset".to_string(),
	))]);
	let client = client(&transport);

	let objects = (0..3)
		.map(|i| {
			let item = client.object_with_id("Item", format!("i{i}"));
			item.increment("hits", 1).unwrap();
			item
		})
		.collect::<Vec<_>>();

	let err = client.save_all(&objects).await.unwrap_err();
	assert!(matches!(err, Error::Connection(_)));
	assert!(objects.iter().all(|item| item.is_dirty_key("hits")));

	client.save_all(&objects).await.unwrap();
	assert!(objects.iter().all(|item| !item.is_dirty()));
	assert_eq!(objects[0].get("hits"), Some(Value::from(1)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
#[traced_test]
async fn crossing_batches_over_shared_objects_both_finish() {
	let transport = MockTransport::server();
	let client = client(&transport);

	let objects = (0..20)
		.map(|i| client.object_with_id("Item", &format!("item{i}")))
		.collect::<Vec<_>>();
	let reversed = objects.iter().rev().cloned().collect::<Vec<_>>();

	for round in 0..200 {
		for item in &objects {
			item.set("round", Value::from(round)).unwrap();
		}

		let start = Arc::new(Barrier::new(2));
		let saves = [objects.clone(), reversed.clone()].map(|group| {
			let client = client.clone();
			let start = Arc::clone(&start);
			tokio::spawn(async move {
				start.wait().await;
				client.save_all(&group).await
			})
		});

		for save in saves {
			timeout(Duration::from_secs(5), save)
				.await
				.unwrap_or_else(|_| panic!("batches stalled in round {round}"))
				.unwrap()
				.unwrap();
		}

		assert!(objects.iter().all(|item| !item.is_dirty()));
	}
}

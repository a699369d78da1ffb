mod common;

use common::{client, MockTransport, UPDATED_AT};

use tessera_sync::{Error, FetchOptions, Method, Value};

use futures::poll;
use serde_json::json;
use tracing_test::traced_test;

#[tokio::test]
#[traced_test]
async fn fetch_keeps_pending_changes_on_top() {
	let transport = MockTransport::scripted(vec![Ok(json!({
		"objectId": "p1",
		"title": "from the server",
		"views": 10,
		"updatedAt": UPDATED_AT,
	}))]);
	let client = client(&transport);

	let post = client.object_with_id("Post", "p1");
	assert!(!post.is_data_available());
	post.increment("views", 1).unwrap();

	post.fetch().await.unwrap();

	assert!(post.is_data_available());
	assert!(post.existed());
	assert_eq!(post.get("title"), Some(Value::from("from the server")));
	assert_eq!(post.get("views"), Some(Value::from(11)));
	assert!(post.is_dirty_key("views"));
	assert!(!post.is_dirty_key("title"));

	let requests = transport.requests();
	assert_eq!(requests.len(), 1);
	assert_eq!(requests[0].method, Method::Get);
	assert_eq!(requests[0].path, "classes/Post/p1");
	assert_eq!(requests[0].body, None);
}

#[tokio::test]
#[traced_test]
async fn fetch_replaces_confirmed_data_unless_restricted() {
	let transport = MockTransport::scripted(vec![
		Ok(json!({"objectId": "p1", "title": "new"})),
		Ok(json!({"objectId": "p1", "body": "text"})),
	]);
	let client = client(&transport);

	let post = client
		.object_from_json("Post", &json!({"objectId": "p1", "title": "old", "stale": true}))
		.unwrap();

	post.fetch().await.unwrap();
	assert_eq!(post.get("title"), Some(Value::from("new")));
	assert!(!post.has("stale"));

	post.fetch_with(FetchOptions {
		keys: vec!["body".to_string(), "author".to_string()],
		include: vec!["author".to_string()],
		..Default::default()
	})
	.await
	.unwrap();
	assert_eq!(post.get("title"), Some(Value::from("new")));
	assert_eq!(post.get("body"), Some(Value::from("text")));

	assert_eq!(
		transport.requests()[1].body(),
		&json!({"keys": "body,author", "include": "author"})
	);
}

#[tokio::test]
#[traced_test]
async fn included_objects_are_committed_to_their_own_state() {
	let transport = MockTransport::scripted(vec![Ok(json!({
		"objectId": "p1",
		"author": {"__type": "Object", "className": "User", "objectId": "u1", "name": "ada"},
	}))]);
	let client = client(&transport);

	let post = client.object_with_id("Post", "p1");
	post.fetch().await.unwrap();

	let Some(Value::Pointer(author)) = post.get("author") else {
		panic!("author should be a pointer");
	};
	let author = client.object_for(author);
	assert_eq!(author.id(), Some("u1"));
	assert_eq!(author.get("name"), Some(Value::from("ada")));
	assert!(author.existed());
	assert!(!author.is_dirty());
}

#[tokio::test]
#[traced_test]
async fn fetch_requires_a_server_id() {
	let transport = MockTransport::server();
	let client = client(&transport);

	let err = client.object("Post").fetch().await.unwrap_err();

	assert!(matches!(err, Error::MissingObjectId(class) if class == "Post"));
	assert!(transport.requests().is_empty());
}

#[tokio::test]
#[traced_test]
async fn fetch_all_skips_objects_with_data_unless_forced() {
	let transport = MockTransport::scripted(vec![
		Ok(json!({"results": [{"objectId": "b", "title": "bee"}]})),
		Ok(json!({"results": [
			{"objectId": "a", "title": "ay"},
			{"objectId": "b", "title": "bee 2"},
		]})),
	]);
	let client = client(&transport);

	let a = client
		.object_from_json("Post", &json!({"objectId": "a", "title": "x"}))
		.unwrap();
	let b = client.object_with_id("Post", "b");

	client.fetch_all(&[a.clone(), b.clone()], false).await.unwrap();
	assert_eq!(a.get("title"), Some(Value::from("x")));
	assert_eq!(b.get("title"), Some(Value::from("bee")));

	client.fetch_all(&[a.clone(), b.clone()], true).await.unwrap();
	assert_eq!(a.get("title"), Some(Value::from("ay")));
	assert_eq!(b.get("title"), Some(Value::from("bee 2")));

	let requests = transport.requests();
	assert_eq!(requests.len(), 2);
	assert_eq!(requests[0].method, Method::Get);
	assert_eq!(requests[0].path, "classes/Post");
	assert_eq!(
		requests[0].body(),
		&json!({"where": {"objectId": {"$in": ["b"]}}, "limit": 1})
	);
	assert_eq!(
		requests[1].body(),
		&json!({"where": {"objectId": {"$in": ["a", "b"]}}, "limit": 2})
	);
}

#[tokio::test]
#[traced_test]
async fn forced_fetch_all_fails_on_missing_objects() {
	let transport = MockTransport::scripted(vec![Ok(json!({
		"results": [{"objectId": "a", "title": "ay"}],
	}))]);
	let client = client(&transport);

	let a = client.object_with_id("Post", "a");
	let b = client.object_with_id("Post", "b");

	let err = client.fetch_all(&[a, b], true).await.unwrap_err();
	assert!(matches!(
		err,
		Error::ObjectNotFound { class_name, object_id } if class_name == "Post" && object_id == "b"
	));
}

#[tokio::test]
#[traced_test]
async fn fetch_all_rejects_mixed_or_unsaved_objects() {
	let transport = MockTransport::server();
	let client = client(&transport);

	let mixed = [
		client.object_with_id("Post", "a"),
		client.object_with_id("Comment", "b"),
	];
	assert!(matches!(
		client.fetch_all(&mixed, false).await,
		Err(Error::MixedClasses)
	));

	let unsaved = [client.object_with_id("Post", "a"), client.object("Post")];
	assert!(matches!(
		client.fetch_all(&unsaved, false).await,
		Err(Error::MissingObjectId(_))
	));

	assert!(client.fetch_all(&[], true).await.is_ok());
	assert!(transport.requests().is_empty());
}

#[tokio::test]
#[traced_test]
async fn destroy_removes_the_state() {
	let transport = MockTransport::server();
	let client = client(&transport);

	let post = client
		.object_from_json("Post", &json!({"objectId": "p1", "title": "bye"}))
		.unwrap();
	assert!(client.registry().contains(post.pointer()));

	post.destroy().await.unwrap();

	assert!(!client.registry().contains(post.pointer()));
	let requests = transport.requests();
	assert_eq!(requests.len(), 1);
	assert_eq!(requests[0].method, Method::Delete);
	assert_eq!(requests[0].path, "classes/Post/p1");
}

#[tokio::test]
#[traced_test]
async fn destroying_an_unsaved_object_sends_nothing() {
	let transport = MockTransport::server();
	let client = client(&transport);

	client.object("Post").destroy().await.unwrap();
	assert!(transport.requests().is_empty());
}

#[tokio::test]
#[traced_test]
async fn destroy_waits_for_queued_saves() {
	let transport = MockTransport::server();
	let client = client(&transport);

	let post = client.object_with_id("Post", "p1");
	post.set("title", Value::from("last words")).unwrap();

	let mut saving = Box::pin(post.save());
	assert!(poll!(&mut saving).is_pending());

	post.destroy().await.unwrap();
	saving.await.unwrap();

	let methods = transport
		.requests()
		.iter()
		.map(|request| request.method)
		.collect::<Vec<_>>();
	assert_eq!(methods, vec![Method::Put, Method::Delete]);
}

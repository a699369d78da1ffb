use tessera_rest::RestTransport;
use tessera_sync::{
	ClientConfig, Error, Method, RequestOptions, SyncClient, Transport, TransportError, Value,
};

use tracing_test::traced_test;

// Nothing listens on the discard port
const UNREACHABLE: &str = "http://127.0.0.1:9";

#[tokio::test]
#[traced_test]
async fn unreachable_server_is_a_connection_error() {
	let transport = RestTransport::new(&ClientConfig::new(UNREACHABLE, "app")).unwrap();

	let result = transport
		.request(Method::Get, "classes/Post/p1", None, &RequestOptions::default())
		.await;

	assert!(matches!(result, Err(TransportError::Connection(_))));
}

#[tokio::test]
#[traced_test]
async fn failed_save_through_the_client_keeps_the_changes() {
	let config = ClientConfig::new(UNREACHABLE, "app");
	let client = SyncClient::new(config.clone(), RestTransport::new(&config).unwrap());

	let post = client.object("Post");
	post.set("title", Value::from("offline")).unwrap();

	assert!(matches!(post.save().await, Err(Error::Connection(_))));
	assert!(post.is_dirty_key("title"));
	assert_eq!(post.get("title"), Some(Value::from("offline")));
}

#![allow(dead_code)]

use tessera_sync::{
	ClientConfig, JsonValue, Method, RemoteError, RequestOptions, SyncClient, Transport,
	TransportError,
};

use std::{
	collections::VecDeque,
	future::Future,
	sync::{
		atomic::{AtomicUsize, Ordering},
		Arc, Mutex, PoisonError,
	},
};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt};
use serde_json::json;

pub const CREATED_AT: &str = "2024-05-17T09:30:00.000Z";
pub const UPDATED_AT: &str = "2024-05-18T11:00:00.000Z";

#[derive(Debug, Clone)]
pub struct Recorded {
	pub method: Method,
	pub path: String,
	pub body: Option<JsonValue>,
	pub options: RequestOptions,
}

impl Recorded {
	pub fn body(&self) -> &JsonValue {
		self.body.as_ref().unwrap_or(&JsonValue::Null)
	}

	/// The members of a batch request.
	pub fn members(&self) -> Vec<JsonValue> {
		self.body()["requests"]
			.as_array()
			.cloned()
			.unwrap_or_default()
	}
}

type Reply = Result<JsonValue, TransportError>;
type Handler = Box<dyn Fn(Recorded) -> BoxFuture<'static, Reply> + Send + Sync>;

/// Records every request and answers it with a handler closure.
pub struct MockTransport {
	requests: Mutex<Vec<Recorded>>,
	handler: Handler,
}

impl MockTransport {
	pub fn new<F, Fut>(handler: F) -> Arc<Self>
	where
		F: Fn(Recorded) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Reply> + Send + 'static,
	{
		Arc::new(Self {
			requests: Mutex::default(),
			handler: Box::new(move |request| handler(request).boxed()),
		})
	}

	/// Answers like a server that accepts everything.
	pub fn server() -> Arc<Self> {
		let server = Arc::new(FakeServer::default());
		Self::new(move |request| {
			let reply = server.respond(&request);
			async move { reply }
		})
	}

	/// Answers from `replies` in order, then like [`MockTransport::server`].
	pub fn scripted(replies: Vec<Reply>) -> Arc<Self> {
		let replies = Mutex::new(VecDeque::from(replies));
		let server = FakeServer::default();
		Self::new(move |request| {
			let reply = replies
				.lock()
				.unwrap_or_else(PoisonError::into_inner)
				.pop_front()
				.unwrap_or_else(|| server.respond(&request));
			async move { reply }
		})
	}

	pub fn requests(&self) -> Vec<Recorded> {
		self.requests
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clone()
	}

	pub fn requests_to(&self, method: Method, path: &str) -> Vec<Recorded> {
		self.requests()
			.into_iter()
			.filter(|request| request.method == method && request.path == path)
			.collect()
	}

	pub fn clear(&self) {
		self.requests
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.clear();
	}
}

#[async_trait]
impl Transport for MockTransport {
	async fn request(
		&self,
		method: Method,
		path: &str,
		body: Option<JsonValue>,
		options: &RequestOptions,
	) -> Result<JsonValue, TransportError> {
		let recorded = Recorded {
			method,
			path: path.to_string(),
			body,
			options: options.clone(),
		};

		self.requests
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.push(recorded.clone());

		(self.handler)(recorded).await
	}
}

/// Hands out sequential object ids and acknowledges every write.
#[derive(Debug, Default)]
pub struct FakeServer {
	next_id: AtomicUsize,
}

impl FakeServer {
	pub fn respond(&self, request: &Recorded) -> Reply {
		if request.method == Method::Post && request.path == "batch" {
			let entries = request
				.members()
				.iter()
				.map(|member| {
					let method = match member["method"].as_str() {
						Some("POST") => Method::Post,
						Some("PUT") => Method::Put,
						Some("DELETE") => Method::Delete,
						_ => Method::Get,
					};
					let path = member["path"]
						.as_str()
						.unwrap_or_default()
						.trim_start_matches("/1/");

					match self.single(method, path) {
						Ok(success) => json!({ "success": success }),
						Err(e) => json!({ "error": { "code": 1, "error": e.to_string() } }),
					}
				})
				.collect();

			return Ok(JsonValue::Array(entries));
		}

		self.single(request.method, &request.path)
	}

	fn single(&self, method: Method, path: &str) -> Reply {
		match method {
			Method::Post => match path.strip_prefix("files/") {
				Some(name) => Ok(json!({
					"name": format!("stored-{name}"),
					"url": format!("http://files.local/{name}"),
				})),
				None => Ok(json!({
					"objectId": self.next_object_id(),
					"createdAt": CREATED_AT,
				})),
			},
			Method::Put => Ok(json!({ "updatedAt": UPDATED_AT })),
			Method::Delete => Ok(json!({})),
			Method::Get => Ok(json!({ "results": [] })),
		}
	}

	pub fn next_object_id(&self) -> String {
		format!("obj{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
	}
}

pub fn client(transport: &Arc<MockTransport>) -> SyncClient {
	SyncClient::with_transport(
		ClientConfig::new("http://localhost:1337", "test-app"),
		Arc::clone(transport) as Arc<dyn Transport>,
	)
}

pub fn remote_error(code: i64, message: &str) -> TransportError {
	TransportError::Remote(RemoteError {
		code,
		message: message.to_string(),
	})
}

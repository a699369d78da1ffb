use tessera_ops::{FileRef, JsonValue, Pointer};

use std::{
	collections::{HashMap, HashSet},
	sync::Arc,
};

use futures_concurrency::future::Join;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::oneshot;
use tracing::{debug, instrument, warn};

use super::{
	client::ClientInner,
	codec::commit_fetched,
	commit::{can_be_serialized, class_path, collect_unsaved, commit_save, RestRequest, Unsaved},
	error::{AggregateError, MemberError, RemoteError},
	file::upload_file,
	object::SyncObject,
	registry::StateKey,
	transport::{Method, RequestOptions},
	Error,
};

/// Saves, destroys and fetches groups of objects with as few requests as possible.
///
/// Each member still commits through its own task queue: the member tasks hand their request
/// over once every earlier commit of that object has settled, one batch request carries all of
/// them, and every task settles its object with its own entry of the response.
#[derive(Clone)]
pub struct BatchCoordinator {
	inner: Arc<ClientInner>,
}

impl BatchCoordinator {
	pub(crate) const fn new(inner: Arc<ClientInner>) -> Self {
		Self { inner }
	}

	/// Saves the objects and every unsaved object or file they reference.
	///
	/// Files go first, one at a time. Objects go in batches of up to the configured size,
	/// each batch holding only objects whose references are all saved by then. The first
	/// failed member stops the batches that have not been sent yet, members committed before
	/// stay committed.
	#[instrument(skip_all, fields(objects = objects.len()))]
	pub async fn save_all(
		&self,
		objects: &[SyncObject],
		options: &RequestOptions,
	) -> Result<(), Error> {
		let roots = objects
			.iter()
			.map(|object| object.pointer().clone())
			.collect::<Vec<_>>();

		let unsaved = collect_unsaved(&self.inner.registry, &roots, true);
		self.save_collected(unsaved, options).await
	}

	pub(crate) async fn save_collected(
		&self,
		unsaved: Unsaved,
		options: &RequestOptions,
	) -> Result<(), Error> {
		let Unsaved { objects, files } = unsaved;

		for file in &files {
			upload_file(&self.inner, file, options).await?;
		}

		let batch_size = self.inner.config.max_batch_size();
		let mut remaining = objects;

		while !remaining.is_empty() {
			let (mut batch, mut blocked) = (Vec::new(), Vec::new());
			for pointer in remaining {
				if batch.len() < batch_size && can_be_serialized(&self.inner.registry, &pointer) {
					batch.push(pointer);
				} else {
					blocked.push(pointer);
				}
			}

			if batch.is_empty() {
				warn!(
					blocked = blocked.len(),
					"No remaining object can be saved before the others"
				);
				return Err(Error::BatchCycle);
			}

			remaining = blocked;
			self.dispatch_saves(batch, options).await?;
		}

		Ok(())
	}

	async fn dispatch_saves(
		&self,
		batch: Vec<Pointer>,
		options: &RequestOptions,
	) -> Result<(), Error> {
		let (gates, batch_gate) = gates(batch.len());

		let handles = {
			let _queued = self.inner.lock_enqueue();
			batch
				.iter()
				.zip(gates)
				.map(|(pointer, gate)| {
					self.inner.registry.push_pending_generation(pointer);
					self.inner.registry.task_queue(pointer).enqueue(commit_save(
						Arc::clone(&self.inner),
						pointer.clone(),
						move |request| gate.send(request),
					))
				})
				.collect::<Vec<_>>()
		};

		batch_gate.dispatch(&self.inner, options).await;

		for result in handles.join().await {
			result??;
		}

		Ok(())
	}

	/// Destroys every saved object, unsaved ones are skipped. Batches run one after the other
	/// and every failed member is reported.
	#[instrument(skip_all, fields(objects = objects.len()))]
	pub async fn destroy_all(
		&self,
		objects: &[SyncObject],
		options: &RequestOptions,
	) -> Result<(), Error> {
		let mut seen = HashSet::new();
		let targets = objects
			.iter()
			.map(SyncObject::pointer)
			.filter(|pointer| pointer.is_saved() && seen.insert(StateKey::of(pointer)))
			.cloned()
			.collect::<Vec<_>>();

		let mut errors = Vec::new();

		for chunk in targets.chunks(self.inner.config.max_batch_size()) {
			let (gates, batch_gate) = gates(chunk.len());

			let handles = {
				let _queued = self.inner.lock_enqueue();
				chunk
					.iter()
					.zip(gates)
					.map(|(pointer, gate)| {
						let inner = Arc::clone(&self.inner);
						let pointer = pointer.clone();

						self.inner
							.registry
							.task_queue(&pointer)
							.enqueue(async move {
								gate.send(RestRequest {
									method: Method::Delete,
									path: class_path(&pointer),
									body: None,
								})
								.await?;

								inner.registry.remove(&pointer);
								Ok::<_, Error>(())
							})
					})
					.collect::<Vec<_>>()
			};

			batch_gate.dispatch(&self.inner, options).await;

			for (pointer, result) in chunk.iter().zip(handles.join().await) {
				let error = match result {
					Ok(Ok(())) => continue,
					Ok(Err(e)) => e,
					Err(e) => e.into(),
				};
				errors.push(MemberError {
					object: pointer.clone(),
					error,
				});
			}
		}

		if errors.is_empty() {
			Ok(())
		} else {
			Err(AggregateError { errors }.into())
		}
	}

	/// Refreshes the objects with a single query. They must share one class and all have a
	/// server id. Unless `force_fetch`, objects that already hold confirmed data are skipped;
	/// with it, an object missing from the answer is an error.
	#[instrument(skip_all, fields(objects = objects.len(), %force_fetch))]
	pub async fn fetch_all(
		&self,
		objects: &[SyncObject],
		force_fetch: bool,
		options: &RequestOptions,
	) -> Result<(), Error> {
		let Some(first) = objects.first() else {
			return Ok(());
		};

		let class_name = first.class_name();
		let mut targets = Vec::with_capacity(objects.len());

		for object in objects {
			if object.class_name() != class_name {
				return Err(Error::MixedClasses);
			}
			let Some(object_id) = object.id() else {
				return Err(Error::MissingObjectId(class_name.to_string()));
			};
			if force_fetch || !object.is_data_available() {
				targets.push((object.pointer(), object_id));
			}
		}

		if targets.is_empty() {
			return Ok(());
		}

		let mut ids = targets.iter().map(|(_, id)| *id).collect::<Vec<_>>();
		ids.sort_unstable();
		ids.dedup();
		let limit = ids.len();

		debug!(ids = limit, "Fetching objects");

		let response = self
			.inner
			.transport
			.request(
				Method::Get,
				&format!("classes/{class_name}"),
				Some(json!({
					"where": { "objectId": { "$in": ids } },
					"limit": limit,
				})),
				options,
			)
			.await?;

		let results = response
			.get("results")
			.and_then(JsonValue::as_array)
			.ok_or_else(|| {
				Error::MalformedResponse("fetch response without a results array".to_string())
			})?;

		let by_id = results
			.iter()
			.filter_map(|result| {
				let fields = result.as_object()?;
				let id = fields.get("objectId")?.as_str()?;
				Some((id, fields))
			})
			.collect::<HashMap<_, _>>();

		if force_fetch {
			if let Some((_, missing)) = targets.iter().find(|(_, id)| !by_id.contains_key(id)) {
				return Err(Error::ObjectNotFound {
					class_name: class_name.to_string(),
					object_id: (*missing).to_string(),
				});
			}
		}

		for (pointer, id) in &targets {
			if let Some(fields) = by_id.get(id) {
				commit_fetched(&self.inner.registry, pointer, fields, true);
			}
		}

		Ok(())
	}

	/// Uploads a file if it has no url yet.
	pub async fn save_file(&self, file: &FileRef, options: &RequestOptions) -> Result<(), Error> {
		upload_file(&self.inner, file, options).await
	}
}

type MemberResult = Result<JsonValue, Error>;

/// A member task's side of a batch: hands its request over and waits for its own entry.
struct MemberGate {
	ready: oneshot::Sender<RestRequest>,
	response: oneshot::Receiver<MemberResult>,
}

impl MemberGate {
	async fn send(self, request: RestRequest) -> MemberResult {
		self.ready.send(request).map_err(|_| {
			Error::Connection("batch request was abandoned before it was sent".to_string())
		})?;

		self.response.await.unwrap_or_else(|_| {
			Err(Error::MalformedResponse(
				"batch settled without an entry for this object".to_string(),
			))
		})
	}
}

struct BatchGate {
	ready: Vec<oneshot::Receiver<RestRequest>>,
	responders: Vec<oneshot::Sender<MemberResult>>,
}

fn gates(members: usize) -> (Vec<MemberGate>, BatchGate) {
	let mut gates = Vec::with_capacity(members);
	let mut batch = BatchGate {
		ready: Vec::with_capacity(members),
		responders: Vec::with_capacity(members),
	};

	for _ in 0..members {
		let (ready_tx, ready_rx) = oneshot::channel();
		let (response_tx, response_rx) = oneshot::channel();
		gates.push(MemberGate {
			ready: ready_tx,
			response: response_rx,
		});
		batch.ready.push(ready_rx);
		batch.responders.push(response_tx);
	}

	(gates, batch)
}

impl BatchGate {
	/// Waits for every member to hand over its request, sends them all in one batch request
	/// and hands each member its entry of the response. Members that failed before handing
	/// over a request are left out.
	async fn dispatch(self, inner: &ClientInner, options: &RequestOptions) {
		let mut members = Vec::with_capacity(self.responders.len());
		let mut responders = Vec::with_capacity(self.responders.len());

		for (request, responder) in self.ready.join().await.into_iter().zip(self.responders) {
			if let Ok(request) = request {
				members.push(request.batch_member(&inner.config.api_version));
				responders.push(responder);
			}
		}

		if members.is_empty() {
			return;
		}

		debug!(members = members.len(), "Sending batch request");

		let response = inner
			.transport
			.request(
				Method::Post,
				"batch",
				Some(json!({ "requests": members })),
				options,
			)
			.await;

		match response {
			Ok(JsonValue::Array(entries)) => {
				if entries.len() != responders.len() {
					warn!(
						expected = responders.len(),
						received = entries.len(),
						"Batch response size does not match the request"
					);
				}

				let mut entries = entries.into_iter();
				for responder in responders {
					let result = entries.next().map_or_else(
						|| {
							Err(Error::MalformedResponse(
								"batch response is missing an entry".to_string(),
							))
						},
						parse_entry,
					);
					// The member task is gone only if it panicked
					let _ = responder.send(result);
				}
			}
			Ok(other) => {
				let message = format!("expected an array of batch entries, got: {other}");
				for responder in responders {
					let _ = responder.send(Err(Error::MalformedResponse(message.clone())));
				}
			}
			Err(e) => {
				debug!(?e, "Batch request failed");
				for responder in responders {
					let _ = responder.send(Err(e.clone().into()));
				}
			}
		}
	}
}

fn parse_entry(entry: JsonValue) -> MemberResult {
	let JsonValue::Object(mut entry) = entry else {
		return Err(Error::MalformedResponse(format!(
			"batch entry is not an object: {entry}"
		)));
	};

	if let Some(success) = entry.remove("success") {
		return Ok(success);
	}

	match entry.remove("error") {
		Some(error) => Err(RemoteError::deserialize(&error)
			.map_err(|e| Error::MalformedResponse(format!("batch entry error: {e}")))?
			.into()),
		None => Err(Error::MalformedResponse(
			"batch entry has neither success nor error".to_string(),
		)),
	}
}

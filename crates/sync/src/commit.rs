use tessera_ops::{FileRef, JsonMap, JsonValue, Op, Pointer, Value};

use std::{collections::HashSet, future::Future, sync::Arc};

use serde_json::json;
use tracing::{debug, warn};

use super::{
	client::ClientInner,
	codec::{decode_server_fields, OBJECT_ID},
	registry::{Attributes, Registry, ServerChanges, StateKey},
	transport::Method,
	Error,
};

/// A `(method, path, body)` triple for the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct RestRequest {
	pub method: Method,
	pub path: String,
	pub body: Option<JsonValue>,
}

impl RestRequest {
	/// The form a request takes as a member of a batch request.
	pub fn batch_member(&self, api_version: &str) -> JsonValue {
		let mut member = json!({
			"method": self.method,
			"path": format!("/{api_version}/{}", self.path),
		});
		if let Some(body) = &self.body {
			member["body"] = body.clone();
		}
		member
	}
}

pub struct SaveRequest {
	pub request: RestRequest,
	/// Plain container attributes sent as they are, outside of any op.
	pub sent_objects: Attributes,
}

/// `classes/<Class>` for objects without a server id, `classes/<Class>/<id>` otherwise.
pub fn class_path(pointer: &Pointer) -> String {
	match pointer.object_id() {
		Some(id) => format!("classes/{}/{id}", pointer.class_name()),
		None => format!("classes/{}", pointer.class_name()),
	}
}

/// Builds the request committing the oldest pending generation. A first time creation also
/// carries every changed plain container attribute.
pub fn save_request(registry: &Registry, pointer: &Pointer) -> Result<SaveRequest, Error> {
	registry.read(pointer, |record| -> Result<SaveRequest, Error> {
		let created = !pointer.is_saved();
		let mut body = JsonMap::new();
		let mut sent_objects = Attributes::new();

		if created {
			for (attr, value) in record.dirty_objects(pointer) {
				body.insert(attr.clone(), value.encode()?);
				sent_objects.insert(attr, value);
			}
		}

		for (attr, op) in record.oldest_generation() {
			if matches!(op, Op::Relation(relation) if relation.adds().is_empty() && relation.removes().is_empty())
			{
				continue;
			}
			body.insert(attr.clone(), op.to_wire()?);
			sent_objects.remove(attr);
		}

		Ok(SaveRequest {
			request: RestRequest {
				method: if created { Method::Post } else { Method::Put },
				path: class_path(pointer),
				body: Some(JsonValue::Object(body)),
			},
			sent_objects,
		})
	})
}

/// The commit task of a save: sends the oldest pending generation through `send` and settles
/// the object's state with the outcome. A failed commit leaves its ops queued for the next one.
pub async fn commit_save<F, Fut>(
	inner: Arc<ClientInner>,
	pointer: Pointer,
	send: F,
) -> Result<(), Error>
where
	F: FnOnce(RestRequest) -> Fut + Send,
	Fut: Future<Output = Result<JsonValue, Error>> + Send,
{
	let SaveRequest {
		request,
		sent_objects,
	} = match save_request(&inner.registry, &pointer) {
		Ok(request) => request,
		Err(e) => {
			inner.registry.merge_oldest_generation_forward(&pointer);
			return Err(e);
		}
	};

	debug!(
		method = %request.method,
		path = %request.path,
		"Committing pending generation"
	);

	match send(request).await {
		Ok(response) => handle_save_response(&inner.registry, &pointer, sent_objects, &response),
		Err(e) => {
			debug!(?e, "Commit failed, requeueing its ops");
			inner.registry.merge_oldest_generation_forward(&pointer);
			Err(e)
		}
	}
}

fn handle_save_response(
	registry: &Registry,
	pointer: &Pointer,
	sent_objects: Attributes,
	response: &JsonValue,
) -> Result<(), Error> {
	let Some(fields) = response.as_object() else {
		registry.merge_oldest_generation_forward(pointer);
		return Err(Error::MalformedResponse(format!(
			"expected a saved object, got: {response}"
		)));
	};

	let committed = registry.pop_pending_generation(pointer);

	if let Some(object_id) = fields.get(OBJECT_ID).and_then(JsonValue::as_str) {
		if !pointer.is_saved() {
			registry.migrate(pointer, object_id);
		}
	}

	let echoed = decode_server_fields(registry, fields);

	registry.update(pointer, |record| {
		let mut changes = sent_objects
			.into_iter()
			.map(|(attr, value)| (attr, Some(value)))
			.collect::<ServerChanges>();

		for (attr, op) in committed {
			if fields.contains_key(&attr) {
				continue;
			}
			match op.apply_to_field(record.server_data().get(&attr), pointer, &attr) {
				Ok(value) => {
					changes.insert(attr, value);
				}
				Err(e) => warn!(%attr, ?e, "Committed op does not apply to the confirmed value"),
			}
		}

		for (attr, value) in echoed {
			let value = match (value, record.estimate_attribute(pointer, &attr)) {
				(Some(Value::Object(server)), Some(Value::Object(mut local))) => {
					local.extend(server);
					Some(Value::Object(local))
				}
				(value, _) => value,
			};
			changes.insert(attr, value);
		}

		record.commit_server_changes(changes);
		record.mark_existed();
	});

	debug!(class = %pointer.class_name(), id = %pointer.state_id(), "Commit confirmed");

	Ok(())
}

#[derive(Debug, Default)]
pub struct Unsaved {
	/// Children before the objects referencing them.
	pub objects: Vec<Pointer>,
	pub files: Vec<FileRef>,
}

impl Unsaved {
	pub fn is_empty(&self) -> bool {
		self.objects.is_empty() && self.files.is_empty()
	}
}

/// Walks the attribute graph of `roots` depth first, collecting every object without a server
/// id and every file without a url, each once. Dirty roots are included when `include_roots`,
/// roots addressing the same object only once.
pub fn collect_unsaved(registry: &Registry, roots: &[Pointer], include_roots: bool) -> Unsaved {
	let mut seen = HashSet::new();
	let mut unsaved = Unsaved::default();

	for root in roots {
		if !seen.insert(StateKey::of(root)) {
			continue;
		}
		visit_object(registry, root, &mut seen, &mut unsaved);
		if include_roots && registry.read(root, |record| record.is_dirty(root)) {
			unsaved.objects.push(root.clone());
		}
	}

	unsaved
}

fn visit_object(
	registry: &Registry,
	pointer: &Pointer,
	seen: &mut HashSet<StateKey>,
	unsaved: &mut Unsaved,
) {
	for value in registry.estimate_attributes(pointer).values() {
		visit_value(registry, value, seen, unsaved);
	}
}

fn visit_value(
	registry: &Registry,
	value: &Value,
	seen: &mut HashSet<StateKey>,
	unsaved: &mut Unsaved,
) {
	match value {
		Value::Pointer(pointer) => {
			if !pointer.is_saved() && seen.insert(StateKey::of(pointer)) {
				visit_object(registry, pointer, seen, unsaved);
				unsaved.objects.push(pointer.clone());
			}
		}
		Value::File(file) => {
			if !file.is_saved() && !unsaved.files.contains(file) {
				unsaved.files.push(file.clone());
			}
		}
		Value::Array(items) => {
			for item in items {
				visit_value(registry, item, seen, unsaved);
			}
		}
		Value::Object(map) => {
			for item in map.values() {
				visit_value(registry, item, seen, unsaved);
			}
		}
		_ => {}
	}
}

/// Whether every object and file the object references, at any depth, is already saved.
pub fn can_be_serialized(registry: &Registry, pointer: &Pointer) -> bool {
	fn saved(value: &Value) -> bool {
		match value {
			Value::Pointer(pointer) => pointer.is_saved(),
			Value::File(file) => file.is_saved(),
			Value::Array(items) => items.iter().all(saved),
			Value::Object(map) => map.values().all(saved),
			_ => true,
		}
	}

	registry
		.estimate_attributes(pointer)
		.values()
		.all(saved)
}

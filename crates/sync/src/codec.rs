use tessera_ops::{Acl, JsonMap, JsonValue, Pointer, Value};

use chrono::{DateTime, Utc};
use tracing::{trace, warn};

use super::registry::{Registry, ServerChanges};

pub const OBJECT_ID: &str = "objectId";
pub const CREATED_AT: &str = "createdAt";
pub const UPDATED_AT: &str = "updatedAt";
pub const ACL: &str = "ACL";

/// Attributes only the server writes.
pub const READ_ONLY_KEYS: [&str; 3] = [OBJECT_ID, CREATED_AT, UPDATED_AT];

/// Decodes the fields of a server object into confirmed attribute changes.
///
/// Full objects embedded in the fields are committed to the registry as confirmed data of
/// their own identity and replaced by pointers.
pub fn decode_server_fields(
	registry: &Registry,
	fields: &JsonMap<String, JsonValue>,
) -> ServerChanges {
	let mut embedded = Vec::new();
	let mut changes = ServerChanges::new();

	for (key, json) in fields {
		let value = match key.as_str() {
			OBJECT_ID | "className" | "__type" => continue,
			_ if is_delete(json) => None,
			CREATED_AT | UPDATED_AT => Some(decode_date(json)),
			ACL => Some(Acl::from_json(json).map_or_else(
				|e| {
					warn!(?e, "Server sent a malformed ACL, keeping it as a plain value");
					Value::decode(json)
				},
				Value::Acl,
			)),
			_ => Some(Value::decode_with(
				json,
				&mut |pointer: &Pointer, fields: &JsonMap<String, JsonValue>| {
					embedded.push((pointer.clone(), fields.clone()));
				},
			)),
		};
		changes.insert(key.clone(), value);
	}

	if !fields.contains_key(UPDATED_AT) {
		if let Some(created_at) = changes.get(CREATED_AT).cloned() {
			changes.insert(UPDATED_AT.to_string(), created_at);
		}
	}

	for (pointer, fields) in embedded {
		commit_embedded(registry, &pointer, &fields);
	}

	changes
}

/// Commits a fetched server representation. `replace` drops every confirmed attribute the
/// representation does not carry.
pub fn commit_fetched(
	registry: &Registry,
	pointer: &Pointer,
	fields: &JsonMap<String, JsonValue>,
	replace: bool,
) {
	let changes = decode_server_fields(registry, fields);

	registry.update(pointer, |record| {
		if replace {
			record.clear_server_data();
		}
		record.commit_server_changes(changes);
		if pointer.is_saved() {
			record.mark_existed();
		}
	});
}

fn commit_embedded(registry: &Registry, pointer: &Pointer, fields: &JsonMap<String, JsonValue>) {
	trace!(class = %pointer.class_name(), id = %pointer.state_id(), "Committing embedded object");
	commit_fetched(registry, pointer, fields, false);
}

fn is_delete(json: &JsonValue) -> bool {
	json.get("__op").and_then(JsonValue::as_str) == Some("Delete")
}

fn decode_date(json: &JsonValue) -> Value {
	json.as_str()
		.and_then(|iso| DateTime::parse_from_rfc3339(iso).ok())
		.map_or_else(
			|| Value::decode(json),
			|date| Value::Date(date.with_timezone(&Utc)),
		)
}

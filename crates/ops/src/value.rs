use std::{
	collections::BTreeMap,
	fmt,
	future::Future,
	sync::{Arc, OnceLock},
};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::{json, Map as JsonMap, Number, Value as JsonValue};
use tokio::sync::OnceCell;
use uuid::Uuid;

use super::{Acl, Error};

/// An attribute value as the application sees it.
///
/// Equality follows object identity for [`Pointer`]s and [`FileRef`]s and plain equality
/// everywhere else, so `Vec<Value>::contains` is the membership test the array operations use.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
	Null,
	Bool(bool),
	Number(Number),
	String(String),
	Date(DateTime<Utc>),
	Array(Vec<Value>),
	Object(BTreeMap<String, Value>),
	Pointer(Pointer),
	File(FileRef),
	Relation(RelationRef),
	Acl(Acl),
}

impl Value {
	#[must_use]
	pub fn as_str(&self) -> Option<&str> {
		match self {
			Self::String(s) => Some(s),
			_ => None,
		}
	}

	#[must_use]
	pub fn as_i64(&self) -> Option<i64> {
		match self {
			Self::Number(n) => n.as_i64(),
			_ => None,
		}
	}

	#[must_use]
	pub fn as_f64(&self) -> Option<f64> {
		match self {
			Self::Number(n) => n.as_f64(),
			_ => None,
		}
	}

	#[must_use]
	pub fn as_array(&self) -> Option<&[Self]> {
		match self {
			Self::Array(items) => Some(items),
			_ => None,
		}
	}

	#[must_use]
	pub const fn as_pointer(&self) -> Option<&Pointer> {
		match self {
			Self::Pointer(pointer) => Some(pointer),
			_ => None,
		}
	}

	#[must_use]
	pub const fn as_relation(&self) -> Option<&RelationRef> {
		match self {
			Self::Relation(relation) => Some(relation),
			_ => None,
		}
	}

	#[must_use]
	pub const fn as_acl(&self) -> Option<&Acl> {
		match self {
			Self::Acl(acl) => Some(acl),
			_ => None,
		}
	}

	/// Plain nested arrays and maps, the only values whose changes are tracked by comparing
	/// their serialized form instead of through an op.
	#[must_use]
	pub const fn is_plain_container(&self) -> bool {
		matches!(self, Self::Array(_) | Self::Object(_))
	}

	pub fn encode(&self) -> Result<JsonValue, Error> {
		Ok(match self {
			Self::Null => JsonValue::Null,
			Self::Bool(b) => JsonValue::Bool(*b),
			Self::Number(n) => JsonValue::Number(n.clone()),
			Self::String(s) => JsonValue::String(s.clone()),
			Self::Date(date) => json!({
				"__type": "Date",
				"iso": date.to_rfc3339_opts(SecondsFormat::Millis, true),
			}),
			Self::Array(items) => {
				JsonValue::Array(items.iter().map(Self::encode).collect::<Result<_, _>>()?)
			}
			Self::Object(map) => JsonValue::Object(
				map.iter()
					.map(|(key, value)| value.encode().map(|json| (key.clone(), json)))
					.collect::<Result<_, _>>()?,
			),
			Self::Pointer(pointer) => pointer.encode()?,
			Self::File(file) => file.encode()?,
			Self::Relation(relation) => json!({
				"__type": "Relation",
				"className": relation.target_class,
			}),
			Self::Acl(acl) => acl.to_json(),
		})
	}

	#[must_use]
	pub fn decode(json: &JsonValue) -> Self {
		Self::decode_with(json, &mut |_: &Pointer, _: &JsonMap<String, JsonValue>| {})
	}

	/// Decodes a wire value, handing every embedded full object (`"__type": "Object"`) to
	/// `on_embedded` before replacing it with a pointer.
	pub fn decode_with(
		json: &JsonValue,
		on_embedded: &mut dyn FnMut(&Pointer, &JsonMap<String, JsonValue>),
	) -> Self {
		match json {
			JsonValue::Null => Self::Null,
			JsonValue::Bool(b) => Self::Bool(*b),
			JsonValue::Number(n) => Self::Number(n.clone()),
			JsonValue::String(s) => Self::String(s.clone()),
			JsonValue::Array(items) => Self::Array(
				items
					.iter()
					.map(|item| Self::decode_with(item, &mut *on_embedded))
					.collect(),
			),
			JsonValue::Object(map) => {
				decode_tagged(map, &mut *on_embedded).unwrap_or_else(|| {
					Self::Object(
						map.iter()
							.map(|(key, value)| {
								(key.clone(), Self::decode_with(value, &mut *on_embedded))
							})
							.collect(),
					)
				})
			}
		}
	}
}

fn decode_tagged(
	map: &JsonMap<String, JsonValue>,
	on_embedded: &mut dyn FnMut(&Pointer, &JsonMap<String, JsonValue>),
) -> Option<Value> {
	let class_name = || map.get("className").and_then(JsonValue::as_str);

	match map.get("__type").and_then(JsonValue::as_str)? {
		"Pointer" => {
			let object_id = map.get("objectId").and_then(JsonValue::as_str)?;
			Some(Value::Pointer(Pointer::new(class_name()?, object_id)))
		}
		"Object" => {
			let object_id = map.get("objectId").and_then(JsonValue::as_str)?;
			let pointer = Pointer::new(class_name()?, object_id);
			on_embedded(&pointer, map);
			Some(Value::Pointer(pointer))
		}
		"Date" => map
			.get("iso")
			.and_then(JsonValue::as_str)
			.and_then(|iso| DateTime::parse_from_rfc3339(iso).ok())
			.map(|date| Value::Date(date.with_timezone(&Utc))),
		"File" => UploadedFile::deserialize(&JsonValue::Object(map.clone()))
			.ok()
			.map(|uploaded| Value::File(FileRef::uploaded(uploaded.name, uploaded.url))),
		"Relation" => Some(Value::Relation(RelationRef {
			target_class: class_name().map(ToString::to_string),
			parent: None,
			key: None,
		})),
		_ => None,
	}
}

impl From<bool> for Value {
	fn from(b: bool) -> Self {
		Self::Bool(b)
	}
}

impl From<i64> for Value {
	fn from(n: i64) -> Self {
		Self::Number(n.into())
	}
}

impl From<i32> for Value {
	fn from(n: i32) -> Self {
		Self::Number(n.into())
	}
}

impl From<u32> for Value {
	fn from(n: u32) -> Self {
		Self::Number(n.into())
	}
}

/// Non-finite floats have no JSON representation and become [`Value::Null`].
impl From<f64> for Value {
	fn from(n: f64) -> Self {
		Number::from_f64(n).map_or(Self::Null, Self::Number)
	}
}

impl From<&str> for Value {
	fn from(s: &str) -> Self {
		Self::String(s.to_string())
	}
}

impl From<String> for Value {
	fn from(s: String) -> Self {
		Self::String(s)
	}
}

impl From<DateTime<Utc>> for Value {
	fn from(date: DateTime<Utc>) -> Self {
		Self::Date(date)
	}
}

impl From<Vec<Self>> for Value {
	fn from(items: Vec<Self>) -> Self {
		Self::Array(items)
	}
}

impl From<BTreeMap<String, Self>> for Value {
	fn from(map: BTreeMap<String, Self>) -> Self {
		Self::Object(map)
	}
}

impl From<Pointer> for Value {
	fn from(pointer: Pointer) -> Self {
		Self::Pointer(pointer)
	}
}

impl From<FileRef> for Value {
	fn from(file: FileRef) -> Self {
		Self::File(file)
	}
}

impl From<Acl> for Value {
	fn from(acl: Acl) -> Self {
		Self::Acl(acl)
	}
}

impl From<&JsonValue> for Value {
	fn from(json: &JsonValue) -> Self {
		Self::decode(json)
	}
}

#[derive(Debug)]
struct ObjectHandle {
	class_name: String,
	local_id: String,
	object_id: OnceLock<String>,
}

/// Shared identity of one object.
///
/// Objects created locally start with a temporary id; the server id is assigned exactly once.
/// Every clone of a pointer sees the assignment, so references held inside other objects'
/// attributes resolve as soon as the referenced object is saved.
#[derive(Clone)]
pub struct Pointer(Arc<ObjectHandle>);

impl Pointer {
	pub fn new(class_name: impl Into<String>, object_id: impl Into<String>) -> Self {
		let pointer = Self::unsaved(class_name);
		let _ = pointer.0.object_id.set(object_id.into());
		pointer
	}

	pub fn unsaved(class_name: impl Into<String>) -> Self {
		Self(Arc::new(ObjectHandle {
			class_name: class_name.into(),
			local_id: format!("local{}", Uuid::new_v4().simple()),
			object_id: OnceLock::new(),
		}))
	}

	#[must_use]
	pub fn class_name(&self) -> &str {
		&self.0.class_name
	}

	#[must_use]
	pub fn object_id(&self) -> Option<&str> {
		self.0.object_id.get().map(String::as_str)
	}

	#[must_use]
	pub fn local_id(&self) -> &str {
		&self.0.local_id
	}

	#[must_use]
	pub fn is_saved(&self) -> bool {
		self.0.object_id.get().is_some()
	}

	/// The id the object is addressed by locally: its server id once known, its temporary id
	/// before that.
	#[must_use]
	pub fn state_id(&self) -> &str {
		self.object_id().unwrap_or(&self.0.local_id)
	}

	/// Returns `false` if the object already had a server id, which is never replaced.
	pub fn assign_object_id(&self, object_id: impl Into<String>) -> bool {
		self.0.object_id.set(object_id.into()).is_ok()
	}

	#[must_use]
	pub fn same_object(&self, other: &Self) -> bool {
		if Arc::ptr_eq(&self.0, &other.0) {
			return true;
		}

		match (self.object_id(), other.object_id()) {
			(Some(a), Some(b)) => a == b && self.class_name() == other.class_name(),
			_ => false,
		}
	}

	pub fn encode(&self) -> Result<JsonValue, Error> {
		let object_id = self
			.object_id()
			.ok_or_else(|| Error::UnsavedPointer(self.class_name().to_string()))?;

		Ok(json!({
			"__type": "Pointer",
			"className": self.class_name(),
			"objectId": object_id,
		}))
	}
}

impl PartialEq for Pointer {
	fn eq(&self, other: &Self) -> bool {
		self.same_object(other)
	}
}

impl fmt::Debug for Pointer {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Pointer({}:{})", self.class_name(), self.state_id())
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UploadedFile {
	pub name: String,
	pub url: String,
}

#[derive(Debug)]
struct FileHandle {
	name: String,
	content_type: Option<String>,
	data: Option<Vec<u8>>,
	uploaded: OnceCell<UploadedFile>,
}

/// Shared handle to a file attribute. A file counts as saved once it has a url.
#[derive(Debug, Clone)]
pub struct FileRef(Arc<FileHandle>);

impl FileRef {
	pub fn from_bytes(
		name: impl Into<String>,
		data: Vec<u8>,
		content_type: Option<String>,
	) -> Self {
		Self(Arc::new(FileHandle {
			name: name.into(),
			content_type,
			data: Some(data),
			uploaded: OnceCell::new(),
		}))
	}

	pub fn uploaded(name: impl Into<String>, url: impl Into<String>) -> Self {
		let name = name.into();
		let uploaded = OnceCell::new_with(Some(UploadedFile {
			name: name.clone(),
			url: url.into(),
		}));

		Self(Arc::new(FileHandle {
			name,
			content_type: None,
			data: None,
			uploaded,
		}))
	}

	/// The server-assigned name once uploaded, the requested one before.
	#[must_use]
	pub fn name(&self) -> &str {
		self.0
			.uploaded
			.get()
			.map_or(&self.0.name, |uploaded| &uploaded.name)
	}

	#[must_use]
	pub fn url(&self) -> Option<&str> {
		self.0.uploaded.get().map(|uploaded| uploaded.url.as_str())
	}

	#[must_use]
	pub fn data(&self) -> Option<&[u8]> {
		self.0.data.as_deref()
	}

	#[must_use]
	pub fn content_type(&self) -> Option<&str> {
		self.0.content_type.as_deref()
	}

	#[must_use]
	pub fn is_saved(&self) -> bool {
		self.0.uploaded.get().is_some()
	}

	pub fn mark_uploaded(&self, uploaded: UploadedFile) -> bool {
		self.0.uploaded.set(uploaded).is_ok()
	}

	/// Runs `upload` unless the file already has a url. Concurrent callers wait for the same
	/// upload; a failed one leaves the file unsaved and the next waiter tries again.
	pub async fn get_or_upload<F, Fut, E>(&self, upload: F) -> Result<&UploadedFile, E>
	where
		F: FnOnce() -> Fut,
		Fut: Future<Output = Result<UploadedFile, E>>,
	{
		self.0.uploaded.get_or_try_init(upload).await
	}

	#[must_use]
	pub fn same_file(&self, other: &Self) -> bool {
		Arc::ptr_eq(&self.0, &other.0)
			|| matches!((self.url(), other.url()), (Some(a), Some(b)) if a == b)
	}

	pub fn encode(&self) -> Result<JsonValue, Error> {
		let uploaded = self
			.0
			.uploaded
			.get()
			.ok_or_else(|| Error::UnsavedFile(self.0.name.clone()))?;

		Ok(json!({
			"__type": "File",
			"name": uploaded.name,
			"url": uploaded.url,
		}))
	}
}

impl PartialEq for FileRef {
	fn eq(&self, other: &Self) -> bool {
		self.same_file(other)
	}
}

/// A materialized relation attribute.
///
/// Relations decoded from the wire only know their target class; the owning object and key
/// are filled in once a relation op is applied on top of them.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationRef {
	pub target_class: Option<String>,
	pub parent: Option<Pointer>,
	pub key: Option<String>,
}

impl RelationRef {
	/// Query constraint selecting the objects in this relation.
	pub fn query_constraint(&self) -> Result<JsonValue, Error> {
		let (Some(parent), Some(key)) = (&self.parent, &self.key) else {
			return Err(Error::MissingRelationOwner);
		};

		Ok(json!({
			"$relatedTo": {
				"object": parent.encode()?,
				"key": key,
			}
		}))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pointer_identity_follows_server_id() {
		let a = Pointer::unsaved("Item");
		let b = Pointer::unsaved("Item");
		assert_ne!(a, b);
		assert_eq!(a, a.clone());

		assert!(a.assign_object_id("x1"));
		assert!(!a.assign_object_id("x2"));
		assert_eq!(a.object_id(), Some("x1"));
		assert_eq!(a, Pointer::new("Item", "x1"));
		assert_ne!(a, Pointer::new("Other", "x1"));
	}

	#[test]
	fn embedded_objects_are_reported() {
		let json = json!({
			"pet": {"__type": "Object", "className": "Pet", "objectId": "p1", "name": "Rex"},
		});

		let mut seen = vec![];
		let value = Value::decode_with(
			&json,
			&mut |pointer: &Pointer, fields: &JsonMap<String, JsonValue>| {
				seen.push((pointer.clone(), fields.get("name").cloned()));
			},
		);

		let Value::Object(map) = value else {
			panic!("expected a map");
		};
		assert_eq!(map["pet"], Value::Pointer(Pointer::new("Pet", "p1")));
		assert_eq!(seen.len(), 1);
		assert_eq!(seen[0].1, Some(json!("Rex")));
	}

	#[test]
	fn malformed_tags_decode_as_plain_maps() {
		let value = Value::decode(&json!({"__type": "Pointer", "className": "Pet"}));
		assert!(matches!(value, Value::Object(map) if map.len() == 2));
	}
}

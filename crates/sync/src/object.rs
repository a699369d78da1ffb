use tessera_ops::{Acl, JsonMap, JsonValue, Number, Op, Pointer, Value};

use std::{fmt, sync::Arc};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, instrument, trace};

use super::{
	batch::BatchCoordinator,
	client::ClientInner,
	codec::{commit_fetched, ACL, CREATED_AT, OBJECT_ID, READ_ONLY_KEYS, UPDATED_AT},
	commit::{class_path, collect_unsaved, commit_save},
	registry::{Attributes, Generation},
	relation::RelationHandle,
	transport::{Method, RequestOptions},
	Error, ValidationError,
};

#[allow(clippy::expect_used)]
static KEY_PATTERN: Lazy<Regex> = Lazy::new(|| {
	Regex::new("^[A-Za-z][0-9A-Za-z_]*$").expect("attribute name pattern is a valid regex")
});

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetOptions {
	/// Turns every change into an unset
	pub unset: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOptions {
	/// Saves unsaved referenced objects and files first
	pub cascade: bool,
	pub request: RequestOptions,
}

impl Default for SaveOptions {
	fn default() -> Self {
		Self {
			cascade: true,
			request: RequestOptions::default(),
		}
	}
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchOptions {
	/// Only fetch these attributes, the others keep their confirmed values
	pub keys: Vec<String>,
	/// Pointer attributes the server should embed as full objects
	pub include: Vec<String>,
	pub request: RequestOptions,
}

/// An object mirrored from the server.
///
/// Reads return the confirmed server data with every pending op folded on top and never wait
/// on the network. Writes are recorded as ops and only reach the server on [`SyncObject::save`].
/// Cloning yields another handle to the same object.
#[derive(Clone)]
pub struct SyncObject {
	inner: Arc<ClientInner>,
	pointer: Pointer,
}

impl fmt::Debug for SyncObject {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SyncObject")
			.field("class_name", &self.pointer.class_name())
			.field("id", &self.pointer.state_id())
			.finish()
	}
}

impl SyncObject {
	pub(crate) const fn new(inner: Arc<ClientInner>, pointer: Pointer) -> Self {
		Self { inner, pointer }
	}

	#[must_use]
	pub fn class_name(&self) -> &str {
		self.pointer.class_name()
	}

	/// The server id, `None` until the object was first saved.
	#[must_use]
	pub fn id(&self) -> Option<&str> {
		self.pointer.object_id()
	}

	#[must_use]
	pub const fn pointer(&self) -> &Pointer {
		&self.pointer
	}

	#[must_use]
	pub fn existed(&self) -> bool {
		self.inner
			.registry
			.read(&self.pointer, |record| record.existed())
	}

	/// Whether any confirmed server data is known.
	#[must_use]
	pub fn is_data_available(&self) -> bool {
		self.inner
			.registry
			.read(&self.pointer, |record| !record.server_data().is_empty())
	}

	#[must_use]
	pub fn get(&self, attr: &str) -> Option<Value> {
		self.inner.registry.estimate_attribute(&self.pointer, attr)
	}

	#[must_use]
	pub fn has(&self, attr: &str) -> bool {
		!matches!(self.get(attr), None | Some(Value::Null))
	}

	#[must_use]
	pub fn attributes(&self) -> Attributes {
		self.inner.registry.estimate_attributes(&self.pointer)
	}

	#[must_use]
	pub fn created_at(&self) -> Option<DateTime<Utc>> {
		self.date(CREATED_AT)
	}

	#[must_use]
	pub fn updated_at(&self) -> Option<DateTime<Utc>> {
		self.date(UPDATED_AT)
	}

	fn date(&self, attr: &str) -> Option<DateTime<Utc>> {
		match self.get(attr) {
			Some(Value::Date(date)) => Some(date),
			_ => None,
		}
	}

	pub fn set(&self, attr: &str, op: impl Into<Op>) -> Result<(), Error> {
		self.set_all([(attr, op.into())], &SetOptions::default())
	}

	/// Records a change per attribute, each merged over the op already pending for it.
	///
	/// Either every change is recorded or, on the first invalid one, none is.
	pub fn set_all<K: Into<String>>(
		&self,
		changes: impl IntoIterator<Item = (K, Op)>,
		options: &SetOptions,
	) -> Result<(), Error> {
		let changes = changes
			.into_iter()
			.map(|(attr, op)| {
				let attr = attr.into();
				validate_key(&attr)?;

				let op = if options.unset { Op::Unset } else { op };
				let op = if attr == ACL { normalize_acl(op)? } else { op };
				reject_unsaved_removals(&op)?;

				Ok((attr, op))
			})
			.collect::<Result<Vec<_>, Error>>()?;

		self.inner
			.registry
			.update(&self.pointer, |record| -> Result<(), Error> {
				let mut staged = record.current_generation().clone();

				for (attr, op) in changes {
					let merged = op.merge_with(staged.get(&attr))?;
					merged.apply_to_field(
						record.estimate_before_current(&self.pointer, &attr).as_ref(),
						&self.pointer,
						&attr,
					)?;

					trace!(%attr, kind = %merged.kind(), "Staged pending op");
					staged.insert(attr, merged);
				}

				record.replace_current_generation(staged);
				Ok(())
			})
	}

	/// Sets an attribute from its wire form, values tagged with `__op` are parsed as ops.
	pub fn set_json(&self, attr: &str, json: &JsonValue) -> Result<(), Error> {
		self.set(attr, Op::from_wire(json)?)
	}

	pub fn unset(&self, attr: &str) -> Result<(), Error> {
		self.set(attr, Op::Unset)
	}

	pub fn increment(&self, attr: &str, amount: impl Into<Number>) -> Result<(), Error> {
		self.set(attr, Op::increment(amount))
	}

	pub fn add(&self, attr: &str, values: Vec<Value>) -> Result<(), Error> {
		self.set(attr, Op::Add(values))
	}

	pub fn add_unique(&self, attr: &str, values: Vec<Value>) -> Result<(), Error> {
		self.set(attr, Op::AddUnique(values))
	}

	pub fn remove(&self, attr: &str, values: Vec<Value>) -> Result<(), Error> {
		self.set(attr, Op::Remove(values))
	}

	/// Drops the named attributes from the current generation, or all of them when `keys` is
	/// empty. Changes already handed to a save are not affected.
	pub fn revert(&self, keys: &[&str]) {
		self.inner.registry.update(&self.pointer, |record| {
			if keys.is_empty() {
				record.replace_current_generation(Generation::new());
			} else {
				for key in keys {
					record.set_pending_op(*key, None);
				}
			}
		});
	}

	/// Handle to a relation attribute. The attribute must be absent or hold a relation.
	pub fn relation(&self, attr: &str) -> Result<RelationHandle, Error> {
		validate_key(attr)?;

		match self.get(attr) {
			None => Ok(RelationHandle::new(self.clone(), attr.to_string(), None)),
			Some(Value::Relation(relation)) => Ok(RelationHandle::new(
				self.clone(),
				attr.to_string(),
				relation.target_class,
			)),
			Some(_) => Err(tessera_ops::Error::NonRelationField.into()),
		}
	}

	/// Whether there is anything the server has not confirmed yet.
	#[must_use]
	pub fn is_dirty(&self) -> bool {
		self.inner
			.registry
			.read(&self.pointer, |record| record.is_dirty(&self.pointer))
	}

	#[must_use]
	pub fn is_dirty_key(&self, attr: &str) -> bool {
		self.inner
			.registry
			.read(&self.pointer, |record| record.is_dirty_key(&self.pointer, attr))
	}

	#[must_use]
	pub fn dirty_keys(&self) -> Vec<String> {
		self.inner
			.registry
			.read(&self.pointer, |record| record.dirty_keys(&self.pointer))
			.into_iter()
			.collect()
	}

	/// The estimated attributes in wire form, with `className` and, once known, `objectId`.
	pub fn to_json(&self) -> Result<JsonValue, Error> {
		let mut json = self
			.attributes()
			.into_iter()
			.map(|(attr, value)| value.encode().map(|value| (attr, value)))
			.collect::<Result<JsonMap<_, _>, _>>()?;

		json.insert("className".to_string(), self.class_name().into());
		if let Some(id) = self.id() {
			json.insert(OBJECT_ID.to_string(), id.into());
		}

		Ok(JsonValue::Object(json))
	}

	pub async fn save(&self) -> Result<(), Error> {
		self.save_with(Vec::new(), SaveOptions::default()).await
	}

	/// Applies `changes`, saves unsaved referenced objects and files unless
	/// [`SaveOptions::cascade`] is off, then commits this object through its task queue.
	///
	/// Changes made while the commit is in flight are kept for the next save. If the commit
	/// fails, its changes are kept as well.
	#[instrument(
		skip_all,
		fields(class = %self.class_name(), id = %self.pointer.state_id())
	)]
	pub async fn save_with(
		&self,
		changes: Vec<(String, Op)>,
		options: SaveOptions,
	) -> Result<(), Error> {
		if !changes.is_empty() {
			self.set_all(changes, &SetOptions::default())?;
		}

		if options.cascade {
			let unsaved = collect_unsaved(
				&self.inner.registry,
				std::slice::from_ref(&self.pointer),
				false,
			);

			if !unsaved.is_empty() {
				debug!(
					objects = unsaved.objects.len(),
					files = unsaved.files.len(),
					"Saving unsaved children first"
				);
				BatchCoordinator::new(Arc::clone(&self.inner))
					.save_collected(unsaved, &options.request)
					.await?;
			}
		}

		let transport = Arc::clone(&self.inner.transport);
		let request_options = options.request;

		let handle = {
			let _queued = self.inner.lock_enqueue();
			self.inner.registry.push_pending_generation(&self.pointer);
			self.inner
				.registry
				.task_queue(&self.pointer)
				.enqueue(commit_save(
					Arc::clone(&self.inner),
					self.pointer.clone(),
					move |request| async move {
						transport
							.request(
								request.method,
								&request.path,
								request.body,
								&request_options,
							)
							.await
							.map_err(Error::from)
					},
				))
		};

		handle.await?
	}

	pub async fn fetch(&self) -> Result<(), Error> {
		self.fetch_with(FetchOptions::default()).await
	}

	/// Replaces the confirmed data with the server's current representation, or only the
	/// attributes in [`FetchOptions::keys`]. Pending changes stay on top.
	#[instrument(
		skip_all,
		fields(class = %self.class_name(), id = %self.pointer.state_id())
	)]
	pub async fn fetch_with(&self, options: FetchOptions) -> Result<(), Error> {
		if !self.pointer.is_saved() {
			return Err(Error::MissingObjectId(self.class_name().to_string()));
		}

		let mut body = JsonMap::new();
		if !options.keys.is_empty() {
			body.insert("keys".to_string(), options.keys.join(",").into());
		}
		if !options.include.is_empty() {
			body.insert("include".to_string(), options.include.join(",").into());
		}

		let response = self
			.inner
			.transport
			.request(
				Method::Get,
				&class_path(&self.pointer),
				(!body.is_empty()).then(|| JsonValue::Object(body)),
				&options.request,
			)
			.await?;

		let fields = response.as_object().ok_or_else(|| {
			Error::MalformedResponse(format!("expected an object, got: {response}"))
		})?;

		commit_fetched(
			&self.inner.registry,
			&self.pointer,
			fields,
			options.keys.is_empty(),
		);

		debug!("Fetched");

		Ok(())
	}

	pub async fn destroy(&self) -> Result<(), Error> {
		self.destroy_with(&RequestOptions::default()).await
	}

	/// Deletes the object on the server after every commit queued before, then forgets its
	/// local state. Destroying an object that was never saved does nothing.
	#[instrument(
		skip_all,
		fields(class = %self.class_name(), id = %self.pointer.state_id())
	)]
	pub async fn destroy_with(&self, options: &RequestOptions) -> Result<(), Error> {
		if !self.pointer.is_saved() {
			debug!("Never saved, nothing to destroy");
			return Ok(());
		}

		let inner = Arc::clone(&self.inner);
		let pointer = self.pointer.clone();
		let options = options.clone();

		self.inner
			.registry
			.task_queue(&self.pointer)
			.enqueue(async move {
				inner
					.transport
					.request(Method::Delete, &class_path(&pointer), None, &options)
					.await?;

				inner.registry.remove(&pointer);
				debug!(class = %pointer.class_name(), "Destroyed");

				Ok::<_, Error>(())
			})
			.await?
	}
}

pub(crate) fn validate_key(attr: &str) -> Result<(), ValidationError> {
	if !KEY_PATTERN.is_match(attr) {
		return Err(ValidationError::InvalidKey(attr.to_string()));
	}
	if READ_ONLY_KEYS.contains(&attr) {
		return Err(ValidationError::ReadOnlyKey(attr.to_string()));
	}
	Ok(())
}

/// `ACL` only takes access control lists, plain maps are converted when they parse as one.
fn normalize_acl(op: Op) -> Result<Op, Error> {
	match op {
		Op::Set(Value::Acl(_)) | Op::Unset => Ok(op),
		Op::Set(map @ Value::Object(_)) => Acl::from_json(&map.encode()?)
			.map(|acl| Op::Set(Value::Acl(acl)))
			.map_err(|_| ValidationError::InvalidAcl.into()),
		_ => Err(ValidationError::InvalidAcl.into()),
	}
}

/// Removals name their elements on the wire by server id, so the removed objects must be saved.
fn reject_unsaved_removals(op: &Op) -> Result<(), Error> {
	let Op::Remove(values) = op else {
		return Ok(());
	};

	match values.iter().find_map(|value| {
		value
			.as_pointer()
			.filter(|pointer| !pointer.is_saved())
	}) {
		Some(pointer) => {
			Err(tessera_ops::Error::UnsavedPointer(pointer.class_name().to_string()).into())
		}
		None => Ok(()),
	}
}

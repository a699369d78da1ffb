use tessera_ops::{FileRef, JsonValue, Pointer};

use std::{
	fmt,
	sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use tracing::debug;

use super::{
	batch::BatchCoordinator,
	codec::{commit_fetched, OBJECT_ID},
	config::ClientConfig,
	object::SyncObject,
	registry::Registry,
	transport::{RequestOptions, Transport},
	Error,
};

pub(crate) struct ClientInner {
	pub(crate) config: ClientConfig,
	pub(crate) registry: Registry,
	pub(crate) transport: Arc<dyn Transport>,
	/// Held while a group of commits is queued, so objects shared by two groups see them
	/// queued in the same order.
	enqueue_lock: Mutex<()>,
}

impl ClientInner {
	pub(crate) fn lock_enqueue(&self) -> MutexGuard<'_, ()> {
		self.enqueue_lock
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
	}
}

/// Entry point of the engine: owns the configuration, the state registry and the transport.
///
/// Every [`SyncObject`] created through the same client shares its registry, so two handles
/// with the same class and id observe the same state. Cloning is cheap.
#[derive(Clone)]
pub struct SyncClient {
	inner: Arc<ClientInner>,
}

impl fmt::Debug for SyncClient {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SyncClient")
			.field("server_url", &self.inner.config.server_url)
			.field("objects", &self.inner.registry.len())
			.finish_non_exhaustive()
	}
}

impl SyncClient {
	pub fn new(config: ClientConfig, transport: impl Transport) -> Self {
		Self::with_transport(config, Arc::new(transport))
	}

	pub fn with_transport(config: ClientConfig, transport: Arc<dyn Transport>) -> Self {
		debug!(server_url = %config.server_url, "Creating sync client");

		Self {
			inner: Arc::new(ClientInner {
				config,
				registry: Registry::new(),
				transport,
				enqueue_lock: Mutex::default(),
			}),
		}
	}

	#[must_use]
	pub fn config(&self) -> &ClientConfig {
		&self.inner.config
	}

	#[must_use]
	pub fn registry(&self) -> &Registry {
		&self.inner.registry
	}

	#[must_use]
	pub fn batch(&self) -> BatchCoordinator {
		BatchCoordinator::new(Arc::clone(&self.inner))
	}

	/// A new object that does not exist on the server yet.
	#[must_use]
	pub fn object(&self, class_name: impl Into<String>) -> SyncObject {
		self.object_for(Pointer::unsaved(class_name))
	}

	/// A handle to an object the server knows by `object_id`. No request is made.
	#[must_use]
	pub fn object_with_id(
		&self,
		class_name: impl Into<String>,
		object_id: impl Into<String>,
	) -> SyncObject {
		self.object_for(Pointer::new(class_name, object_id))
	}

	#[must_use]
	pub fn object_for(&self, pointer: Pointer) -> SyncObject {
		SyncObject::new(Arc::clone(&self.inner), pointer)
	}

	/// Builds an object from its server representation, committing the fields as confirmed data.
	pub fn object_from_json(
		&self,
		class_name: impl Into<String>,
		json: &JsonValue,
	) -> Result<SyncObject, Error> {
		let fields = json.as_object().ok_or_else(|| {
			Error::MalformedResponse(format!("expected an object, got: {json}"))
		})?;

		let class_name = class_name.into();
		let pointer = match fields.get(OBJECT_ID).and_then(JsonValue::as_str) {
			Some(object_id) => Pointer::new(class_name, object_id),
			None => Pointer::unsaved(class_name),
		};

		commit_fetched(&self.inner.registry, &pointer, fields, false);

		Ok(self.object_for(pointer))
	}

	pub async fn save_all(&self, objects: &[SyncObject]) -> Result<(), Error> {
		self.save_all_with(objects, &RequestOptions::default()).await
	}

	pub async fn save_all_with(
		&self,
		objects: &[SyncObject],
		options: &RequestOptions,
	) -> Result<(), Error> {
		self.batch().save_all(objects, options).await
	}

	pub async fn destroy_all(&self, objects: &[SyncObject]) -> Result<(), Error> {
		self.destroy_all_with(objects, &RequestOptions::default())
			.await
	}

	pub async fn destroy_all_with(
		&self,
		objects: &[SyncObject],
		options: &RequestOptions,
	) -> Result<(), Error> {
		self.batch().destroy_all(objects, options).await
	}

	pub async fn fetch_all(&self, objects: &[SyncObject], force_fetch: bool) -> Result<(), Error> {
		self.fetch_all_with(objects, force_fetch, &RequestOptions::default())
			.await
	}

	pub async fn fetch_all_with(
		&self,
		objects: &[SyncObject],
		force_fetch: bool,
		options: &RequestOptions,
	) -> Result<(), Error> {
		self.batch().fetch_all(objects, force_fetch, options).await
	}

	pub async fn save_file(&self, file: &FileRef) -> Result<(), Error> {
		self.save_file_with(file, &RequestOptions::default()).await
	}

	pub async fn save_file_with(&self, file: &FileRef, options: &RequestOptions) -> Result<(), Error> {
		self.batch().save_file(file, options).await
	}
}

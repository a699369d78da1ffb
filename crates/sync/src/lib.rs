//!
//! # Tessera Sync
//!
//! An optimistic object sync engine. Objects are edited locally through [`SyncObject`]: every
//! change is recorded as a pending [`Op`] and reads fold the pending ops over the last state
//! the server confirmed, so they are answered immediately. Saving hands the pending ops to the
//! object's task queue, which commits them one generation at a time, in order. Changes made
//! while a commit is in flight wait for the next one.
//!
//! All objects of a [`SyncClient`] share one [`Registry`], keyed by class and id, so every
//! handle addressing the same server object observes the same state. Groups of objects are
//! saved, destroyed and fetched through the [`BatchCoordinator`].
//!
//! ## Basic example
//!
//! ```no_run
//! use tessera_sync::{ClientConfig, Method, RequestOptions, SyncClient, Transport, TransportError};
//!
//! use async_trait::async_trait;
//! use serde_json::{json, Value as JsonValue};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Transport for Echo {
//!     async fn request(
//!         &self,
//!         _method: Method,
//!         _path: &str,
//!         _body: Option<JsonValue>,
//!         _options: &RequestOptions,
//!     ) -> Result<JsonValue, TransportError> {
//!         Ok(json!({"objectId": "p1", "createdAt": "2024-05-17T09:30:00.000Z"}))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), tessera_sync::Error> {
//!     let client = SyncClient::new(ClientConfig::new("http://localhost:1337", "app"), Echo);
//!
//!     let post = client.object("Post");
//!     post.set("title", tessera_sync::Value::from("hello"))?;
//!     post.increment("views", 1)?;
//!     post.save().await?;
//!
//!     assert_eq!(post.id(), Some("p1"));
//!     assert!(!post.is_dirty());
//!     Ok(())
//! }
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod batch;
mod client;
mod codec;
mod commit;
mod config;
mod error;
mod file;
mod object;
mod registry;
mod relation;
mod transport;

pub use batch::BatchCoordinator;
pub use client::SyncClient;
pub use config::{ClientConfig, DEFAULT_BATCH_SIZE, DEFAULT_SERVER_URL};
pub use error::{AggregateError, ConfigError, Error, MemberError, RemoteError, ValidationError};
pub use object::{FetchOptions, SaveOptions, SetOptions, SyncObject};
pub use registry::{Attributes, Generation, Registry, ServerChanges, StateKey, StateRecord};
pub use relation::RelationHandle;
pub use transport::{Method, RequestOptions, Transport, TransportError};

// Re-exports
pub use tessera_ops::{
	Acl, FileRef, JsonMap, JsonValue, Number, Op, OpKind, Pointer, RelationOp, RelationRef,
	UploadedFile, Value,
};

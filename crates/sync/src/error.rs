use tessera_ops::Pointer;

use std::{io, path::PathBuf};

use serde::Deserialize;
use thiserror::Error;

use super::transport::TransportError;

/// Local validation failures. These never reach the network.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
	#[error("invalid attribute name <key='{0}'>")]
	InvalidKey(String),
	#[error("attribute is read only <key='{0}'>")]
	ReadOnlyKey(String),
	#[error("ACL must be an access control list")]
	InvalidAcl,
	#[error("cannot save a file without data <name='{0}'>")]
	EmptyFile(String),
}

/// Error body the server answers failed requests with.
#[derive(Debug, Error, Clone, PartialEq, Eq, Deserialize)]
#[error("server error <code={code}>: {message}")]
pub struct RemoteError {
	pub code: i64,
	#[serde(rename = "error")]
	pub message: String,
}

#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Validation(#[from] ValidationError),
	#[error(transparent)]
	Op(#[from] tessera_ops::Error),
	#[error("cannot save objects that reference each other before any of them has an id")]
	BatchCycle,
	#[error(transparent)]
	Remote(#[from] RemoteError),
	#[error("connection failed: {0}")]
	Connection(String),
	#[error(transparent)]
	Aggregate(#[from] AggregateError),
	#[error("object has no server id <class='{0}'>")]
	MissingObjectId(String),
	#[error("object not found <class='{class_name}', id='{object_id}'>")]
	ObjectNotFound {
		class_name: String,
		object_id: String,
	},
	#[error("all objects must be of the same class")]
	MixedClasses,
	#[error("malformed server response: {0}")]
	MalformedResponse(String),
	#[error(transparent)]
	Queue(#[from] tessera_task_queue::Error),
	#[error(transparent)]
	Config(#[from] ConfigError),
}

impl From<TransportError> for Error {
	fn from(e: TransportError) -> Self {
		match e {
			TransportError::Remote(e) => Self::Remote(e),
			TransportError::Connection(message) => Self::Connection(message),
		}
	}
}

/// Every member failure of a batched operation.
#[derive(Debug, Error)]
#[error("{} batched operation(s) failed", .errors.len())]
pub struct AggregateError {
	pub errors: Vec<MemberError>,
}

#[derive(Debug)]
pub struct MemberError {
	pub object: Pointer,
	pub error: Error,
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config <path='{}'>: {source}", .path.display())]
	Read { path: PathBuf, source: io::Error },
	#[error("failed to parse config <path='{}'>: {source}", .path.display())]
	Parse {
		path: PathBuf,
		source: serde_json::Error,
	},
}

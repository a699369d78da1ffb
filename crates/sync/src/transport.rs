use std::fmt;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;

use super::error::RemoteError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	Get,
	Post,
	Put,
	Delete,
}

impl Method {
	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Get => "GET",
			Self::Post => "POST",
			Self::Put => "PUT",
			Self::Delete => "DELETE",
		}
	}
}

impl fmt::Display for Method {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Per-request authentication switches handed through to the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestOptions {
	pub use_master_key: bool,
	pub session_token: Option<String>,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
	#[error(transparent)]
	Remote(#[from] RemoteError),
	#[error("connection failed: {0}")]
	Connection(String),
}

/// The HTTP capability the engine talks to the server through.
///
/// Paths are relative to the server's api root, e.g. `classes/Post/a1B2c3`. The transport
/// owns urls, authentication headers, timeouts and retries.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
	async fn request(
		&self,
		method: Method,
		path: &str,
		body: Option<JsonValue>,
		options: &RequestOptions,
	) -> Result<JsonValue, TransportError>;
}

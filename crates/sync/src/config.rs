use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::ConfigError;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:1337";
pub const DEFAULT_BATCH_SIZE: usize = 20;

/// Client configuration, handed explicitly to the [`SyncClient`](crate::SyncClient) and to
/// the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientConfig {
	/// Base url every request path is appended to
	pub server_url: String,
	/// First segment of the paths inside a batch request
	pub api_version: String,
	pub application_id: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub javascript_key: Option<String>,
	/// Only sent on requests that opt into it
	#[serde(skip_serializing_if = "Option::is_none")]
	pub master_key: Option<String>,
	/// Maximum number of objects per batch request
	pub batch_size: usize,
	pub request_timeout_secs: u64,
}

impl Default for ClientConfig {
	fn default() -> Self {
		Self {
			server_url: DEFAULT_SERVER_URL.to_string(),
			api_version: "1".to_string(),
			application_id: String::new(),
			javascript_key: None,
			master_key: None,
			batch_size: DEFAULT_BATCH_SIZE,
			request_timeout_secs: 30,
		}
	}
}

impl ClientConfig {
	pub fn new(server_url: impl Into<String>, application_id: impl Into<String>) -> Self {
		Self {
			server_url: server_url.into(),
			application_id: application_id.into(),
			..Default::default()
		}
	}

	/// Loads a JSON config file, missing fields take their defaults.
	pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		info!(path = %path.display(), "Loading client config");

		let json = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;

		let config = serde_json::from_str::<Self>(&json).map_err(|source| ConfigError::Parse {
			path: path.to_path_buf(),
			source,
		})?;

		debug!(
			server_url = %config.server_url,
			batch_size = config.max_batch_size(),
			"Client config loaded"
		);

		Ok(config)
	}

	/// The batch bound actually used, never below one.
	#[must_use]
	pub fn max_batch_size(&self) -> usize {
		self.batch_size.max(1)
	}

	#[must_use]
	pub const fn request_timeout(&self) -> Duration {
		Duration::from_secs(self.request_timeout_secs)
	}

	/// Server url without trailing slashes.
	#[must_use]
	pub fn base_url(&self) -> &str {
		self.server_url.trim_end_matches('/')
	}
}

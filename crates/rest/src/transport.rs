use tessera_sync::{
	ClientConfig, JsonValue, Method, RemoteError, RequestOptions, Transport, TransportError,
};

use std::fmt;

use async_trait::async_trait;
use reqwest::{RequestBuilder, StatusCode};
use serde_json::json;
use tracing::{debug, instrument, trace};

const APPLICATION_ID: &str = "X-Parse-Application-Id";
const JAVASCRIPT_KEY: &str = "X-Parse-JavaScript-Key";
const MASTER_KEY: &str = "X-Parse-Master-Key";
const SESSION_TOKEN: &str = "X-Parse-Session-Token";

#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error("failed to build the http client: {0}")]
	Client(#[from] reqwest::Error),
}

/// Sends engine requests to `<server_url>/<path>`.
///
/// `GET` and `DELETE` bodies travel as query parameters, every other body as JSON.
#[derive(Clone)]
pub struct RestTransport {
	client: reqwest::Client,
	base_url: String,
	application_id: String,
	javascript_key: Option<String>,
	master_key: Option<String>,
}

impl fmt::Debug for RestTransport {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("RestTransport")
			.field("base_url", &self.base_url)
			.field("application_id", &self.application_id)
			.finish_non_exhaustive()
	}
}

impl RestTransport {
	pub fn new(config: &ClientConfig) -> Result<Self, Error> {
		let client = reqwest::Client::builder()
			.timeout(config.request_timeout())
			.build()?;

		Ok(Self {
			client,
			base_url: config.base_url().to_string(),
			application_id: config.application_id.clone(),
			javascript_key: config.javascript_key.clone(),
			master_key: config.master_key.clone(),
		})
	}

	fn url(&self, path: &str) -> String {
		format!("{}/{}", self.base_url, path.trim_start_matches('/'))
	}
}

trait WithCredentials {
	fn with_credentials(self, transport: &RestTransport, options: &RequestOptions) -> Self;
}

impl WithCredentials for RequestBuilder {
	fn with_credentials(self, transport: &RestTransport, options: &RequestOptions) -> Self {
		let mut builder = self.header(APPLICATION_ID, &transport.application_id);

		if let Some(key) = &transport.javascript_key {
			builder = builder.header(JAVASCRIPT_KEY, key);
		}
		if let (true, Some(key)) = (options.use_master_key, &transport.master_key) {
			builder = builder.header(MASTER_KEY, key);
		}
		if let Some(token) = &options.session_token {
			builder = builder.header(SESSION_TOKEN, token);
		}

		builder
	}
}

#[async_trait]
impl Transport for RestTransport {
	#[instrument(skip(self, body, options))]
	async fn request(
		&self,
		method: Method,
		path: &str,
		body: Option<JsonValue>,
		options: &RequestOptions,
	) -> Result<JsonValue, TransportError> {
		let url = self.url(path);

		let mut builder = self
			.client
			.request(http_method(method), &url)
			.with_credentials(self, options);

		builder = match (method, body) {
			(Method::Get | Method::Delete, Some(body)) => builder.query(&query_pairs(&body)),
			(_, Some(body)) => builder.json(&body),
			(_, None) => builder,
		};

		trace!(%url, "Sending request");

		let response = builder
			.send()
			.await
			.map_err(|e| TransportError::Connection(e.to_string()))?;

		let status = response.status();
		let text = response
			.text()
			.await
			.map_err(|e| TransportError::Connection(e.to_string()))?;

		debug!(%status, bytes = text.len(), "Received response");

		parse_response(status, &text)
	}
}

const fn http_method(method: Method) -> reqwest::Method {
	match method {
		Method::Get => reqwest::Method::GET,
		Method::Post => reqwest::Method::POST,
		Method::Put => reqwest::Method::PUT,
		Method::Delete => reqwest::Method::DELETE,
	}
}

/// Top level body fields as query parameters; strings go as they are, anything else as JSON.
fn query_pairs(body: &JsonValue) -> Vec<(String, String)> {
	body.as_object()
		.map(|fields| {
			fields
				.iter()
				.map(|(key, value)| {
					let value = match value {
						JsonValue::String(value) => value.clone(),
						other => other.to_string(),
					};
					(key.clone(), value)
				})
				.collect()
		})
		.unwrap_or_default()
}

fn parse_response(status: StatusCode, text: &str) -> Result<JsonValue, TransportError> {
	let json = if text.trim().is_empty() {
		json!({})
	} else {
		match serde_json::from_str::<JsonValue>(text) {
			Ok(json) => json,
			Err(e) => {
				return Err(TransportError::Connection(format!(
					"unreadable response <status={status}>: {e}"
				)))
			}
		}
	};

	if status.is_success() {
		return Ok(json);
	}

	serde_json::from_value::<RemoteError>(json).map_or_else(
		|_| {
			Err(TransportError::Connection(format!(
				"request failed <status={status}>"
			)))
		},
		|e| Err(e.into()),
	)
}

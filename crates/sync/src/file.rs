use tessera_ops::{FileRef, UploadedFile};

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::json;
use tracing::{debug, instrument};

use super::{
	client::ClientInner,
	transport::{Method, RequestOptions},
	Error, ValidationError,
};

/// Uploads a file that has no url yet. Files already uploaded are left alone, and callers
/// racing on the same file share one upload.
#[instrument(skip_all, fields(name = %file.name()))]
pub async fn upload_file(
	inner: &ClientInner,
	file: &FileRef,
	options: &RequestOptions,
) -> Result<(), Error> {
	if file.is_saved() {
		return Ok(());
	}

	let uploaded = file
		.get_or_upload(|| async {
			let data = file
				.data()
				.ok_or_else(|| ValidationError::EmptyFile(file.name().to_string()))?;

			let mut body = json!({ "base64": STANDARD.encode(data) });
			if let Some(content_type) = file.content_type() {
				body["_ContentType"] = content_type.into();
			}

			let response = inner
				.transport
				.request(
					Method::Post,
					&format!("files/{}", file.name()),
					Some(body),
					options,
				)
				.await?;

			let uploaded = serde_json::from_value::<UploadedFile>(response)
				.map_err(|e| Error::MalformedResponse(format!("file upload response: {e}")))?;

			Ok::<_, Error>(uploaded)
		})
		.await?;

	debug!(url = %uploaded.url, "File uploaded");

	Ok(())
}

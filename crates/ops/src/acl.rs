use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};

use super::Error;

/// Entry key granting access to everyone.
pub const PUBLIC_KEY: &str = "*";

const ROLE_PREFIX: &str = "role:";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permissions {
	#[serde(default, skip_serializing_if = "is_false")]
	pub read: bool,
	#[serde(default, skip_serializing_if = "is_false")]
	pub write: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)] // serde's `skip_serializing_if` hands us a reference
const fn is_false(value: &bool) -> bool {
	!*value
}

/// Access control list attached to an object under the `ACL` key.
///
/// Entries are keyed by user id, by `role:<name>` or by [`PUBLIC_KEY`]. An entry with neither
/// read nor write access is dropped, matching what the server stores.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Acl {
	entries: BTreeMap<String, Permissions>,
}

impl Acl {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn from_json(json: &JsonValue) -> Result<Self, Error> {
		Self::deserialize(json).map_err(|e| Error::InvalidAcl(e.to_string()))
	}

	#[must_use]
	pub fn to_json(&self) -> JsonValue {
		JsonValue::Object(
			self.entries
				.iter()
				.map(|(id, permissions)| {
					let mut entry = JsonMap::new();
					if permissions.read {
						entry.insert("read".to_string(), JsonValue::Bool(true));
					}
					if permissions.write {
						entry.insert("write".to_string(), JsonValue::Bool(true));
					}
					(id.clone(), JsonValue::Object(entry))
				})
				.collect(),
		)
	}

	#[must_use]
	pub fn permissions(&self, id: &str) -> Permissions {
		self.entries.get(id).copied().unwrap_or_default()
	}

	pub fn entries(&self) -> impl Iterator<Item = (&str, Permissions)> {
		self.entries.iter().map(|(id, p)| (id.as_str(), *p))
	}

	pub fn set_read_access(&mut self, id: impl Into<String>, allowed: bool) {
		self.update(id.into(), |p| p.read = allowed);
	}

	pub fn set_write_access(&mut self, id: impl Into<String>, allowed: bool) {
		self.update(id.into(), |p| p.write = allowed);
	}

	#[must_use]
	pub fn read_access(&self, id: &str) -> bool {
		self.permissions(id).read
	}

	#[must_use]
	pub fn write_access(&self, id: &str) -> bool {
		self.permissions(id).write
	}

	pub fn set_public_read_access(&mut self, allowed: bool) {
		self.set_read_access(PUBLIC_KEY, allowed);
	}

	pub fn set_public_write_access(&mut self, allowed: bool) {
		self.set_write_access(PUBLIC_KEY, allowed);
	}

	#[must_use]
	pub fn public_read_access(&self) -> bool {
		self.read_access(PUBLIC_KEY)
	}

	#[must_use]
	pub fn public_write_access(&self) -> bool {
		self.write_access(PUBLIC_KEY)
	}

	pub fn set_role_read_access(&mut self, role: &str, allowed: bool) {
		self.set_read_access(format!("{ROLE_PREFIX}{role}"), allowed);
	}

	pub fn set_role_write_access(&mut self, role: &str, allowed: bool) {
		self.set_write_access(format!("{ROLE_PREFIX}{role}"), allowed);
	}

	fn update(&mut self, id: String, change: impl FnOnce(&mut Permissions)) {
		let mut permissions = self.permissions(&id);
		change(&mut permissions);

		if permissions.read || permissions.write {
			self.entries.insert(id, permissions);
		} else {
			self.entries.remove(&id);
		}
	}
}

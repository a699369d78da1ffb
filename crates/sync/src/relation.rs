use tessera_ops::{JsonValue, Op, Pointer, RelationOp, RelationRef};

use serde_json::json;

use super::{object::SyncObject, Error};

/// A many to many relation held by one attribute of an object.
///
/// Changes go through the owning object as relation ops, so they are saved with it.
#[derive(Debug, Clone)]
pub struct RelationHandle {
	object: SyncObject,
	key: String,
	target_class: Option<String>,
}

impl RelationHandle {
	pub(crate) const fn new(object: SyncObject, key: String, target_class: Option<String>) -> Self {
		Self {
			object,
			key,
			target_class,
		}
	}

	#[must_use]
	pub fn key(&self) -> &str {
		&self.key
	}

	/// Class of the related objects, known once one was added or the server reported it.
	#[must_use]
	pub fn target_class(&self) -> Option<&str> {
		self.target_class.as_deref()
	}

	#[must_use]
	pub const fn parent(&self) -> &SyncObject {
		&self.object
	}

	pub fn add(&mut self, objects: &[Pointer]) -> Result<(), Error> {
		self.apply(RelationOp::from_pointers(objects, &[])?)
	}

	pub fn remove(&mut self, objects: &[Pointer]) -> Result<(), Error> {
		self.apply(RelationOp::from_pointers(&[], objects)?)
	}

	fn apply(&mut self, op: RelationOp) -> Result<(), Error> {
		if let (Some(expected), Some(found)) = (self.target_class.as_deref(), op.target_class()) {
			if expected != found {
				return Err(tessera_ops::Error::RelationClassMismatch {
					expected: expected.to_string(),
					found: found.to_string(),
				}
				.into());
			}
		}

		let target_class = op.target_class().map(str::to_string);
		self.object.set(&self.key, Op::Relation(op))?;

		if self.target_class.is_none() {
			self.target_class = target_class;
		}

		Ok(())
	}

	/// The query selecting every related object: `{"className", "where": {"$relatedTo": ..}}`.
	pub fn query_constraint(&self) -> Result<JsonValue, Error> {
		let constraint = RelationRef {
			target_class: self.target_class.clone(),
			parent: Some(self.object.pointer().clone()),
			key: Some(self.key.clone()),
		}
		.query_constraint()?;

		Ok(json!({
			"className": self.target_class,
			"where": constraint,
		}))
	}
}

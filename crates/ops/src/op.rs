use std::{collections::BTreeSet, fmt};

use serde_json::{json, Map as JsonMap, Number, Value as JsonValue};

use super::{Error, Pointer, RelationRef, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
	Set,
	Unset,
	Increment,
	Add,
	AddUnique,
	Remove,
	Relation,
}

impl fmt::Display for OpKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Set => "Set",
			Self::Unset => "Unset",
			Self::Increment => "Increment",
			Self::Add => "Add",
			Self::AddUnique => "AddUnique",
			Self::Remove => "Remove",
			Self::Relation => "Relation",
		})
	}
}

/// A pending mutation of a single attribute.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
	/// Replaces the value.
	Set(Value),
	/// Clears the value.
	Unset,
	/// Adds a numeric delta.
	Increment(Number),
	/// Appends to an array.
	Add(Vec<Value>),
	/// Appends the values not already present in an array.
	AddUnique(Vec<Value>),
	/// Removes every occurrence of the values from an array.
	Remove(Vec<Value>),
	/// Adds and removes members of a relation.
	Relation(RelationOp),
}

impl From<Value> for Op {
	fn from(value: Value) -> Self {
		Self::Set(value)
	}
}

impl From<RelationOp> for Op {
	fn from(op: RelationOp) -> Self {
		Self::Relation(op)
	}
}

impl Op {
	pub fn increment(amount: impl Into<Number>) -> Self {
		Self::Increment(amount.into())
	}

	pub fn increment_by(amount: f64) -> Result<Self, Error> {
		Number::from_f64(amount)
			.map(Self::Increment)
			.ok_or(Error::InvalidAmount)
	}

	#[must_use]
	pub const fn kind(&self) -> OpKind {
		match self {
			Self::Set(_) => OpKind::Set,
			Self::Unset => OpKind::Unset,
			Self::Increment(_) => OpKind::Increment,
			Self::Add(_) => OpKind::Add,
			Self::AddUnique(_) => OpKind::AddUnique,
			Self::Remove(_) => OpKind::Remove,
			Self::Relation(_) => OpKind::Relation,
		}
	}

	/// Applies the op to the value it will land on. `None` is an absent value.
	///
	/// Relation ops cannot materialize a relation here, use [`Op::apply_to_field`].
	pub fn apply_to(&self, prior: Option<&Value>) -> Result<Option<Value>, Error> {
		self.apply(prior, None)
	}

	/// Like [`Op::apply_to`], with the owning object and attribute that a relation op binds a
	/// freshly materialized relation to.
	pub fn apply_to_field(
		&self,
		prior: Option<&Value>,
		owner: &Pointer,
		key: &str,
	) -> Result<Option<Value>, Error> {
		self.apply(prior, Some((owner, key)))
	}

	fn apply(
		&self,
		prior: Option<&Value>,
		owner: Option<(&Pointer, &str)>,
	) -> Result<Option<Value>, Error> {
		match self {
			Self::Set(value) => Ok(Some(value.clone())),
			Self::Unset => Ok(None),
			Self::Increment(amount) => match prior {
				None => Ok(Some(Value::Number(amount.clone()))),
				Some(Value::Number(current)) => add_numbers(current, amount)
					.map(Value::Number)
					.map(Some),
				Some(_) => Err(Error::NonNumericIncrement),
			},
			Self::Add(values) => match prior {
				None => Ok(Some(Value::Array(values.clone()))),
				Some(Value::Array(items)) => {
					let mut items = items.clone();
					items.extend(values.iter().cloned());
					Ok(Some(Value::Array(items)))
				}
				Some(_) => Err(Error::NonArrayValue(OpKind::Add)),
			},
			Self::AddUnique(values) => match prior {
				None => Ok(Some(Value::Array(union(&[], values)))),
				Some(Value::Array(items)) => Ok(Some(Value::Array(union(items, values)))),
				Some(_) => Err(Error::NonArrayValue(OpKind::AddUnique)),
			},
			Self::Remove(values) => match prior {
				None => Ok(Some(Value::Array(vec![]))),
				Some(Value::Array(items)) => {
					let mut items = items.clone();
					items.retain(|item| !values.contains(item));
					Ok(Some(Value::Array(items)))
				}
				Some(_) => Err(Error::NonArrayValue(OpKind::Remove)),
			},
			Self::Relation(op) => op.apply(prior, owner).map(Some),
		}
	}

	/// `self.apply` for the ops that always produce a value.
	fn applied(&self, prior: Option<&Value>) -> Result<Value, Error> {
		self.apply(prior, None).map(|value| value.unwrap_or(Value::Null))
	}

	/// Folds this op over the op previously pending for the same attribute, producing a single
	/// op with the effect of applying `previous` and then `self`.
	pub fn merge_with(&self, previous: Option<&Self>) -> Result<Self, Error> {
		let Some(previous) = previous else {
			return Ok(self.clone());
		};

		let incompatible = || Error::MergeIncompatible {
			op: self.kind(),
			previous: previous.kind(),
		};

		match self {
			Self::Set(_) | Self::Unset => Ok(self.clone()),
			Self::Increment(amount) => match previous {
				Self::Set(value) => self.applied(Some(value)).map(Self::Set),
				Self::Unset => Ok(Self::Set(Value::Number(amount.clone()))),
				Self::Increment(prior) => add_numbers(prior, amount).map(Self::Increment),
				_ => Err(incompatible()),
			},
			Self::Add(values) => match previous {
				Self::Set(value) => self.applied(Some(value)).map(Self::Set),
				Self::Unset => Ok(Self::Set(Value::Array(values.clone()))),
				Self::Add(prior) => {
					let mut merged = prior.clone();
					merged.extend(values.iter().cloned());
					Ok(Self::Add(merged))
				}
				_ => Err(incompatible()),
			},
			Self::AddUnique(values) => match previous {
				Self::Set(value) => self.applied(Some(value)).map(Self::Set),
				Self::Unset => self.applied(None).map(Self::Set),
				Self::AddUnique(prior) => Ok(Self::AddUnique(union(prior, values))),
				_ => Err(incompatible()),
			},
			Self::Remove(values) => match previous {
				Self::Set(value) => self.applied(Some(value)).map(Self::Set),
				Self::Unset => Ok(Self::Unset),
				Self::Remove(prior) => Ok(Self::Remove(union(prior, values))),
				_ => Err(incompatible()),
			},
			Self::Relation(op) => match previous {
				Self::Unset => Err(Error::RelationAfterUnset),
				Self::Set(Value::Relation(_)) => Ok(self.clone()),
				Self::Relation(prior) => op.merge_over(prior).map(Self::Relation),
				_ => Err(incompatible()),
			},
		}
	}

	pub fn to_wire(&self) -> Result<JsonValue, Error> {
		Ok(match self {
			Self::Set(value) => value.encode()?,
			Self::Unset => json!({ "__op": "Delete" }),
			Self::Increment(amount) => json!({ "__op": "Increment", "amount": amount }),
			Self::Add(values) => json!({ "__op": "Add", "objects": encode_all(values)? }),
			Self::AddUnique(values) => {
				json!({ "__op": "AddUnique", "objects": encode_all(values)? })
			}
			Self::Remove(values) => json!({ "__op": "Remove", "objects": encode_all(values)? }),
			Self::Relation(op) => op.to_wire(),
		})
	}

	/// Parses a wire operation. Values without an `__op` tag are plain values and become a
	/// [`Op::Set`].
	pub fn from_wire(json: &JsonValue) -> Result<Self, Error> {
		let Some(tag) = json.get("__op") else {
			return Ok(Self::Set(Value::decode(json)));
		};

		let tag = tag
			.as_str()
			.ok_or_else(|| Error::InvalidWireForm(format!("non-string op tag: {tag}")))?;

		match tag {
			"Delete" => Ok(Self::Unset),
			"Increment" => match json.get("amount") {
				Some(JsonValue::Number(amount)) => Ok(Self::Increment(amount.clone())),
				_ => Err(Error::InvalidWireForm(
					"Increment without a numeric amount".to_string(),
				)),
			},
			"Add" => decode_objects(json, tag).map(Self::Add),
			"AddUnique" => decode_objects(json, tag).map(Self::AddUnique),
			"Remove" => decode_objects(json, tag).map(Self::Remove),
			"AddRelation" | "RemoveRelation" | "Batch" => {
				let mut op = RelationOp::default();
				op.absorb_wire(json)?;
				Ok(Self::Relation(op))
			}
			other => Err(Error::InvalidWireForm(format!("unknown op <tag='{other}'>"))),
		}
	}
}

/// Pending relation membership edits, keyed by the related objects' server ids.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelationOp {
	target_class: Option<String>,
	adds: BTreeSet<String>,
	removes: BTreeSet<String>,
}

impl RelationOp {
	pub fn new<A, R>(
		target_class: Option<String>,
		adds: impl IntoIterator<Item = A>,
		removes: impl IntoIterator<Item = R>,
	) -> Self
	where
		A: Into<String>,
		R: Into<String>,
	{
		let adds: BTreeSet<String> = adds.into_iter().map(Into::into).collect();
		let removes = removes
			.into_iter()
			.map(Into::into)
			.filter(|id| !adds.contains(id))
			.collect();

		Self {
			target_class,
			adds,
			removes,
		}
	}

	/// Builds the op from related objects, which must all be saved and of one class.
	pub fn from_pointers(adds: &[Pointer], removes: &[Pointer]) -> Result<Self, Error> {
		let mut target_class: Option<String> = None;
		let mut extract = |pointers: &[Pointer]| -> Result<Vec<String>, Error> {
			let mut ids = Vec::with_capacity(pointers.len());
			for pointer in pointers {
				let id = pointer.object_id().ok_or(Error::UnsavedRelationTarget)?;
				match &target_class {
					Some(class) if class != pointer.class_name() => {
						return Err(Error::RelationClassMismatch {
							expected: class.clone(),
							found: pointer.class_name().to_string(),
						});
					}
					Some(_) => {}
					None => target_class = Some(pointer.class_name().to_string()),
				}
				ids.push(id.to_string());
			}
			Ok(ids)
		};

		let adds = extract(adds)?;
		let removes = extract(removes)?;

		Ok(Self::new(target_class, adds, removes))
	}

	#[must_use]
	pub fn target_class(&self) -> Option<&str> {
		self.target_class.as_deref()
	}

	#[must_use]
	pub const fn adds(&self) -> &BTreeSet<String> {
		&self.adds
	}

	#[must_use]
	pub const fn removes(&self) -> &BTreeSet<String> {
		&self.removes
	}

	fn check_class(&self, other: Option<&str>) -> Result<(), Error> {
		match (other, self.target_class()) {
			(Some(expected), Some(found)) if expected != found => {
				Err(Error::RelationClassMismatch {
					expected: expected.to_string(),
					found: found.to_string(),
				})
			}
			_ => Ok(()),
		}
	}

	fn apply(&self, prior: Option<&Value>, owner: Option<(&Pointer, &str)>) -> Result<Value, Error> {
		match prior {
			None => {
				let (parent, key) = owner.ok_or(Error::MissingRelationOwner)?;
				Ok(Value::Relation(RelationRef {
					target_class: self.target_class.clone(),
					parent: Some(parent.clone()),
					key: Some(key.to_string()),
				}))
			}
			Some(Value::Relation(relation)) => {
				self.check_class(relation.target_class.as_deref())?;

				let mut relation = relation.clone();
				if relation.target_class.is_none() {
					relation.target_class.clone_from(&self.target_class);
				}
				if let Some((parent, key)) = owner {
					relation.parent.get_or_insert_with(|| parent.clone());
					relation.key.get_or_insert_with(|| key.to_string());
				}
				Ok(Value::Relation(relation))
			}
			Some(_) => Err(Error::NonRelationField),
		}
	}

	/// Members removed and then re-added end up only in `adds`, and symmetrically for members
	/// added and then removed.
	fn merge_over(&self, previous: &Self) -> Result<Self, Error> {
		self.check_class(previous.target_class())?;

		let mut adds = previous.adds.clone();
		for id in &self.removes {
			adds.remove(id);
		}
		adds.extend(self.adds.iter().cloned());

		let mut removes = previous.removes.clone();
		for id in &self.adds {
			removes.remove(id);
		}
		removes.extend(self.removes.iter().cloned());

		Ok(Self {
			target_class: self
				.target_class
				.clone()
				.or_else(|| previous.target_class.clone()),
			adds,
			removes,
		})
	}

	#[must_use]
	pub fn to_wire(&self) -> JsonValue {
		let pointers = |ids: &BTreeSet<String>| -> Vec<JsonValue> {
			ids.iter()
				.map(|id| {
					json!({
						"__type": "Pointer",
						"className": self.target_class,
						"objectId": id,
					})
				})
				.collect()
		};

		let adds = (!self.adds.is_empty())
			.then(|| json!({ "__op": "AddRelation", "objects": pointers(&self.adds) }));
		let removes = (!self.removes.is_empty())
			.then(|| json!({ "__op": "RemoveRelation", "objects": pointers(&self.removes) }));

		match (adds, removes) {
			(Some(adds), Some(removes)) => json!({ "__op": "Batch", "ops": [adds, removes] }),
			(Some(op), None) | (None, Some(op)) => op,
			(None, None) => JsonValue::Object(JsonMap::new()),
		}
	}

	fn absorb_wire(&mut self, json: &JsonValue) -> Result<(), Error> {
		match json.get("__op").and_then(JsonValue::as_str) {
			Some("Batch") => {
				let ops = json
					.get("ops")
					.and_then(JsonValue::as_array)
					.ok_or_else(|| Error::InvalidWireForm("Batch without ops".to_string()))?;
				for op in ops {
					if op.get("__op").and_then(JsonValue::as_str) == Some("Batch") {
						return Err(Error::InvalidWireForm("nested Batch op".to_string()));
					}
					self.absorb_wire(op)?;
				}
				Ok(())
			}
			Some(tag @ ("AddRelation" | "RemoveRelation")) => {
				for value in decode_objects(json, tag)? {
					let Value::Pointer(pointer) = value else {
						return Err(Error::InvalidWireForm(format!(
							"{tag} member is not a pointer"
						)));
					};
					let id = pointer
						.object_id()
						.ok_or(Error::UnsavedRelationTarget)?
						.to_string();

					if self.target_class.is_none() {
						self.target_class = Some(pointer.class_name().to_string());
					}

					if tag == "AddRelation" {
						self.removes.remove(&id);
						self.adds.insert(id);
					} else {
						self.adds.remove(&id);
						self.removes.insert(id);
					}
				}
				Ok(())
			}
			other => Err(Error::InvalidWireForm(format!(
				"unexpected op inside a relation batch: {other:?}"
			))),
		}
	}
}

fn encode_all(values: &[Value]) -> Result<Vec<JsonValue>, Error> {
	values.iter().map(Value::encode).collect()
}

fn decode_objects(json: &JsonValue, tag: &str) -> Result<Vec<Value>, Error> {
	json.get("objects")
		.and_then(JsonValue::as_array)
		.map(|objects| objects.iter().map(Value::decode).collect())
		.ok_or_else(|| Error::InvalidWireForm(format!("{tag} without an objects array")))
}

/// `prior` followed by the members of `values` it does not contain yet, in order.
fn union(prior: &[Value], values: &[Value]) -> Vec<Value> {
	let mut merged = prior.to_vec();
	for value in values {
		if !merged.contains(value) {
			merged.push(value.clone());
		}
	}
	merged
}

fn add_numbers(a: &Number, b: &Number) -> Result<Number, Error> {
	if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
		if let Some(sum) = a.checked_add(b) {
			return Ok(sum.into());
		}
	}

	match (a.as_f64(), b.as_f64()) {
		(Some(a), Some(b)) => Number::from_f64(a + b).ok_or(Error::InvalidAmount),
		_ => Err(Error::InvalidAmount),
	}
}

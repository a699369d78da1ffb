use tessera_ops::{Op, Pointer, Value};
use tessera_task_queue::TaskQueue;

use std::{
	collections::{BTreeMap, BTreeSet, HashMap},
	sync::{Arc, Mutex, PoisonError},
};

use tracing::{debug, trace, warn};

/// Pending ops for one save attempt, keyed by attribute.
pub type Generation = BTreeMap<String, Op>;

pub type Attributes = BTreeMap<String, Value>;

/// Changes to confirmed server data, `None` deletes the attribute.
pub type ServerChanges = BTreeMap<String, Option<Value>>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StateKey {
	pub class_name: String,
	pub id: String,
}

impl StateKey {
	/// The key an object is currently addressed by, its server id once it has one.
	#[must_use]
	pub fn of(pointer: &Pointer) -> Self {
		Self {
			class_name: pointer.class_name().to_string(),
			id: pointer.state_id().to_string(),
		}
	}
}

/// Everything known locally about one object.
#[derive(Debug, Clone)]
pub struct StateRecord {
	server_data: Attributes,
	/// Oldest first, never empty.
	pending_ops: Vec<Generation>,
	/// Serialized form of the plain array and map attributes, as last confirmed.
	object_cache: BTreeMap<String, String>,
	tasks: Arc<TaskQueue>,
	existed: bool,
}

impl Default for StateRecord {
	fn default() -> Self {
		Self {
			server_data: Attributes::new(),
			pending_ops: vec![Generation::new()],
			object_cache: BTreeMap::new(),
			tasks: Arc::default(),
			existed: false,
		}
	}
}

impl StateRecord {
	#[must_use]
	pub const fn server_data(&self) -> &Attributes {
		&self.server_data
	}

	#[must_use]
	pub fn pending_ops(&self) -> &[Generation] {
		&self.pending_ops
	}

	/// The generation new mutations are merged into.
	#[must_use]
	pub fn current_generation(&self) -> &Generation {
		&self.pending_ops[self.pending_ops.len() - 1]
	}

	fn current_generation_mut(&mut self) -> &mut Generation {
		let last = self.pending_ops.len() - 1;
		&mut self.pending_ops[last]
	}

	/// The generation the next commit sends.
	#[must_use]
	pub fn oldest_generation(&self) -> &Generation {
		&self.pending_ops[0]
	}

	#[must_use]
	pub const fn object_cache(&self) -> &BTreeMap<String, String> {
		&self.object_cache
	}

	#[must_use]
	pub fn task_queue(&self) -> Arc<TaskQueue> {
		Arc::clone(&self.tasks)
	}

	/// Whether the server ever acknowledged this object.
	#[must_use]
	pub const fn existed(&self) -> bool {
		self.existed
	}

	pub fn mark_existed(&mut self) {
		self.existed = true;
	}

	pub fn set_server_data(&mut self, attrs: impl IntoIterator<Item = (String, Option<Value>)>) {
		for (attr, value) in attrs {
			match value {
				Some(value) => {
					self.server_data.insert(attr, value);
				}
				None => {
					self.server_data.remove(&attr);
				}
			}
		}
	}

	pub fn clear_server_data(&mut self) {
		self.server_data.clear();
		self.object_cache.clear();
	}

	pub fn set_pending_op(&mut self, attr: impl Into<String>, op: Option<Op>) {
		let generation = self.current_generation_mut();
		let attr = attr.into();
		match op {
			Some(op) => {
				generation.insert(attr, op);
			}
			None => {
				generation.remove(&attr);
			}
		}
	}

	/// Replaces the current generation wholesale.
	pub fn replace_current_generation(&mut self, generation: Generation) {
		*self.current_generation_mut() = generation;
	}

	pub fn push_pending_generation(&mut self) {
		self.pending_ops.push(Generation::new());
	}

	/// Removes and returns the oldest generation.
	pub fn pop_pending_generation(&mut self) -> Generation {
		let oldest = self.pending_ops.remove(0);
		if self.pending_ops.is_empty() {
			self.pending_ops.push(Generation::new());
		}
		oldest
	}

	/// Folds the oldest generation into the one after it, so the ops of a failed commit are
	/// sent again by the next one.
	///
	/// Two ops that do not merge collapse into a set of the value they estimate together.
	pub fn merge_oldest_generation_forward(&mut self, owner: &Pointer) {
		if self.pending_ops.len() < 2 {
			return;
		}

		let oldest = self.pending_ops.remove(0);

		for (attr, op) in oldest {
			let merged = match self.pending_ops[0].get(&attr) {
				None => op,
				Some(newer) => newer.merge_with(Some(&op)).unwrap_or_else(|e| {
					debug!(%attr, ?e, "Requeued ops do not merge, collapsing them into a set");
					let confirmed = self.server_data.get(&attr).cloned();
					let older = apply_or_keep(&op, confirmed, owner, &attr);
					apply_or_keep(newer, older, owner, &attr).map_or(Op::Unset, Op::Set)
				}),
			};
			self.pending_ops[0].insert(attr, merged);
		}
	}

	/// Confirmed value of `attr` with every pending generation folded on top.
	#[must_use]
	pub fn estimate_attribute(&self, owner: &Pointer, attr: &str) -> Option<Value> {
		fold_attribute(
			self.server_data.get(attr).cloned(),
			&self.pending_ops,
			owner,
			attr,
		)
	}

	/// Like [`StateRecord::estimate_attribute`], leaving out the current generation.
	#[must_use]
	pub fn estimate_before_current(&self, owner: &Pointer, attr: &str) -> Option<Value> {
		fold_attribute(
			self.server_data.get(attr).cloned(),
			&self.pending_ops[..self.pending_ops.len() - 1],
			owner,
			attr,
		)
	}

	#[must_use]
	pub fn estimate_attributes(&self, owner: &Pointer) -> Attributes {
		let mut attributes = self.server_data.clone();

		for generation in &self.pending_ops {
			for (attr, op) in generation {
				let prior = attributes.remove(attr);
				if let Some(value) = apply_or_keep(op, prior, owner, attr) {
					attributes.insert(attr.clone(), value);
				}
			}
		}

		attributes
	}

	/// Writes confirmed server data and refreshes the cached form of plain containers.
	pub fn commit_server_changes(&mut self, changes: ServerChanges) {
		for (attr, value) in changes {
			match value {
				Some(value) => {
					match value.is_plain_container().then(|| cache_form(&value)).flatten() {
						Some(serialized) => {
							self.object_cache.insert(attr.clone(), serialized);
						}
						None => {
							self.object_cache.remove(&attr);
						}
					}
					self.server_data.insert(attr, value);
				}
				None => {
					self.object_cache.remove(&attr);
					self.server_data.remove(&attr);
				}
			}
		}
	}

	/// Plain container attributes whose serialized form differs from the cached one. A value
	/// that cannot be serialized yet counts as changed.
	#[must_use]
	pub fn dirty_objects(&self, owner: &Pointer) -> Attributes {
		self.estimate_attributes(owner)
			.into_iter()
			.filter(|(attr, value)| {
				value.is_plain_container()
					&& cache_form(value).as_ref() != self.object_cache.get(attr)
			})
			.collect()
	}

	#[must_use]
	pub fn is_dirty(&self, owner: &Pointer) -> bool {
		!owner.is_saved()
			|| !self.current_generation().is_empty()
			|| !self.dirty_objects(owner).is_empty()
	}

	#[must_use]
	pub fn is_dirty_key(&self, owner: &Pointer, attr: &str) -> bool {
		self.pending_ops
			.iter()
			.any(|generation| generation.contains_key(attr))
			|| self.dirty_objects(owner).contains_key(attr)
	}

	#[must_use]
	pub fn dirty_keys(&self, owner: &Pointer) -> BTreeSet<String> {
		let mut keys = self
			.pending_ops
			.iter()
			.flat_map(|generation| generation.keys().cloned())
			.collect::<BTreeSet<_>>();
		keys.extend(self.dirty_objects(owner).into_keys());
		keys
	}
}

fn fold_attribute(
	confirmed: Option<Value>,
	generations: &[Generation],
	owner: &Pointer,
	attr: &str,
) -> Option<Value> {
	generations
		.iter()
		.filter_map(|generation| generation.get(attr))
		.fold(confirmed, |prior, op| apply_or_keep(op, prior, owner, attr))
}

fn apply_or_keep(op: &Op, prior: Option<Value>, owner: &Pointer, attr: &str) -> Option<Value> {
	match op.apply_to_field(prior.as_ref(), owner, attr) {
		Ok(value) => value,
		Err(e) => {
			warn!(%attr, ?e, "Pending op does not apply, keeping the previous value");
			prior
		}
	}
}

fn cache_form(value: &Value) -> Option<String> {
	value.encode().ok().map(|json| json.to_string())
}

/// The state of every object a client knows about, keyed by class and id.
///
/// All access goes through short critical sections, the lock is never held across an await.
#[derive(Debug, Default)]
pub struct Registry {
	records: Mutex<HashMap<StateKey, StateRecord>>,
}

impl Registry {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Runs `f` on the object's record, creating it first if needed.
	pub fn update<R>(&self, pointer: &Pointer, f: impl FnOnce(&mut StateRecord) -> R) -> R {
		let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
		f(records.entry(StateKey::of(pointer)).or_default())
	}

	/// Runs `f` on the object's record, or on an empty one if there is none.
	pub fn read<R>(&self, pointer: &Pointer, f: impl FnOnce(&StateRecord) -> R) -> R {
		let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
		match records.get(&StateKey::of(pointer)) {
			Some(record) => f(record),
			None => f(&StateRecord::default()),
		}
	}

	/// A copy of the object's record, creating it first if needed.
	#[must_use]
	pub fn get_or_create(&self, pointer: &Pointer) -> StateRecord {
		self.update(pointer, |record| record.clone())
	}

	#[must_use]
	pub fn get(&self, pointer: &Pointer) -> Option<StateRecord> {
		self.records
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.get(&StateKey::of(pointer))
			.cloned()
	}

	#[must_use]
	pub fn contains(&self, pointer: &Pointer) -> bool {
		self.records
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.contains_key(&StateKey::of(pointer))
	}

	pub fn remove(&self, pointer: &Pointer) -> Option<StateRecord> {
		let removed = self
			.records
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.remove(&StateKey::of(pointer));

		if removed.is_some() {
			trace!(class = %pointer.class_name(), id = %pointer.state_id(), "Removed object state");
		}

		removed
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.records
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}

	pub fn set_server_data(
		&self,
		pointer: &Pointer,
		attrs: impl IntoIterator<Item = (String, Option<Value>)>,
	) {
		self.update(pointer, |record| record.set_server_data(attrs));
	}

	pub fn set_pending_op(&self, pointer: &Pointer, attr: impl Into<String>, op: Option<Op>) {
		self.update(pointer, |record| record.set_pending_op(attr, op));
	}

	pub fn push_pending_generation(&self, pointer: &Pointer) {
		self.update(pointer, StateRecord::push_pending_generation);
	}

	pub fn pop_pending_generation(&self, pointer: &Pointer) -> Generation {
		self.update(pointer, StateRecord::pop_pending_generation)
	}

	pub fn merge_oldest_generation_forward(&self, pointer: &Pointer) {
		self.update(pointer, |record| record.merge_oldest_generation_forward(pointer));
	}

	#[must_use]
	pub fn estimate_attribute(&self, pointer: &Pointer, attr: &str) -> Option<Value> {
		self.read(pointer, |record| record.estimate_attribute(pointer, attr))
	}

	#[must_use]
	pub fn estimate_attributes(&self, pointer: &Pointer) -> Attributes {
		self.read(pointer, |record| record.estimate_attributes(pointer))
	}

	pub fn commit_server_changes(&self, pointer: &Pointer, changes: ServerChanges) {
		self.update(pointer, |record| record.commit_server_changes(changes));
	}

	/// The queue every commit of this object goes through.
	pub fn task_queue(&self, pointer: &Pointer) -> Arc<TaskQueue> {
		self.update(pointer, |record| record.task_queue())
	}

	/// Assigns the server id to an object that only had a temporary one, moving its record to
	/// the new key with every pending generation intact.
	///
	/// Returns `false` if the object already had a server id.
	pub fn migrate(&self, pointer: &Pointer, object_id: &str) -> bool {
		let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);

		let temporary = StateKey::of(pointer);
		if !pointer.assign_object_id(object_id) {
			if pointer.object_id() != Some(object_id) {
				warn!(
					class = %pointer.class_name(),
					current = ?pointer.object_id(),
					%object_id,
					"Server answered with a different id for an object that already has one"
				);
			}
			return false;
		}

		if let Some(record) = records.remove(&temporary) {
			if records.insert(StateKey::of(pointer), record).is_some() {
				debug!(
					class = %pointer.class_name(),
					%object_id,
					"Replaced existing state while migrating to the server id"
				);
			}
		}

		debug!(
			class = %pointer.class_name(),
			from = %temporary.id,
			to = %object_id,
			"Migrated object state to its server id"
		);

		true
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn popping_the_last_generation_keeps_one() {
		let mut record = StateRecord::default();
		record.set_pending_op("a", Some(Op::increment(1)));

		let popped = record.pop_pending_generation();
		assert_eq!(popped.len(), 1);
		assert_eq!(record.pending_ops().len(), 1);
		assert!(record.current_generation().is_empty());
	}

	#[test]
	fn failed_apply_keeps_the_previous_value() {
		let owner = Pointer::new("Item", "i1");
		let mut record = StateRecord::default();
		record.set_server_data([("n".to_string(), Some(Value::from("text")))]);
		record.set_pending_op("n", Some(Op::increment(1)));

		assert_eq!(record.estimate_attribute(&owner, "n"), Some(Value::from("text")));
	}
}

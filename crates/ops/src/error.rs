use thiserror::Error;

use super::op::OpKind;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
	#[error("cannot merge {op} op with the previous {previous} op")]
	MergeIncompatible { op: OpKind, previous: OpKind },
	#[error("cannot increment a non-numeric value")]
	NonNumericIncrement,
	#[error("increment amount must be a finite number")]
	InvalidAmount,
	#[error("cannot apply {0} op to a non-array value")]
	NonArrayValue(OpKind),

	#[error("a relation cannot be modified after it was deleted")]
	RelationAfterUnset,
	#[error("related object must be of class <expected='{expected}'>, but <found='{found}'> was passed in")]
	RelationClassMismatch { expected: String, found: String },
	#[error("relation op cannot be applied to a non-relation field")]
	NonRelationField,
	#[error("relation op needs its owning object and key to materialize a relation")]
	MissingRelationOwner,
	#[error("unsaved objects cannot be added to or removed from a relation")]
	UnsavedRelationTarget,

	#[error("cannot create a pointer to an unsaved object <class='{0}'>")]
	UnsavedPointer(String),
	#[error("tried to encode an unsaved file <name='{0}'>")]
	UnsavedFile(String),
	#[error("malformed ACL: {0}")]
	InvalidAcl(String),
	#[error("invalid operation wire form: {0}")]
	InvalidWireForm(String),
}

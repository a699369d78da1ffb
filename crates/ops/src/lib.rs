//!
//! # Tessera Ops
//!
//! The value model and operation algebra behind every Tessera object.
//!
//! Every local mutation of an attribute is described by an [`Op`] instead of being written
//! in place. An [`Op`] knows how to apply itself to the value it will eventually land on, how
//! to fold itself over a previous pending [`Op`] for the same attribute and how to travel over
//! the wire. All of this is pure and synchronous, so a stack of pending mutations can be
//! replayed over the last confirmed server state as many times as needed.
//!
//! ## Basic example
//!
//! ```
//! use tessera_ops::{Op, Value};
//!
//! let pending = Op::increment(2);
//! let merged = Op::increment(3).merge_with(Some(&pending)).unwrap();
//!
//! assert_eq!(merged, Op::increment(5));
//! assert_eq!(
//!     merged.apply_to(Some(&Value::from(10))).unwrap(),
//!     Some(Value::from(15))
//! );
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod acl;
mod error;
mod op;
mod value;

pub use acl::{Acl, Permissions, PUBLIC_KEY};
pub use error::Error;
pub use op::{Op, OpKind, RelationOp};
pub use value::{FileRef, Pointer, RelationRef, UploadedFile, Value};

// Re-exports
pub use serde_json::{Map as JsonMap, Number, Value as JsonValue};

//!
//! # Tessera Task Queue
//!
//! A first-in first-out queue of asynchronous tasks. Each Tessera object owns one, and every
//! commit that object sends to the server goes through it, so at most one commit per object is
//! in flight and commits land in the order they were issued.
//!
//! Tasks are spawned on the tokio runtime as soon as they are enqueued and wait for every
//! earlier task to settle before starting. A task that fails or panics still releases the one
//! after it.
//!
//! ## Basic example
//!
//! ```
//! use tessera_task_queue::TaskQueue;
//!
//! #[tokio::main]
//! async fn main() {
//!     let queue = TaskQueue::new();
//!
//!     let first = queue.enqueue(async { 1 });
//!     let second = queue.enqueue(async { 2 });
//!
//!     assert_eq!(second.await.unwrap(), 2);
//!     assert_eq!(first.await.unwrap(), 1);
//!     assert!(queue.is_idle());
//! }
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

mod error;
mod queue;

pub use error::Error;
pub use queue::{TaskHandle, TaskQueue};

//!
//! # Tessera Rest
//!
//! The [`Transport`](tessera_sync::Transport) the sync engine uses against a real server:
//! requests go out over `reqwest`, with the application credentials from the
//! [`ClientConfig`](tessera_sync::ClientConfig) as headers.
//!
//! ```no_run
//! use tessera_rest::RestTransport;
//! use tessera_sync::{ClientConfig, SyncClient};
//!
//! # fn main() -> Result<(), tessera_rest::Error> {
//! let config = ClientConfig::new("https://api.example.com/parse", "my-app");
//! let client = SyncClient::new(config.clone(), RestTransport::new(&config)?);
//! # Ok(())
//! # }
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

mod transport;

pub use transport::{Error, RestTransport};

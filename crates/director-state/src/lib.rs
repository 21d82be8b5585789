//! director-state — embedded state store for Director.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for applications, runtimes, formations, formation templates, and
//! the formation membership relation.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Memberships are written twice in the same transaction: once under
//! `{tenant}/{formation}/{type}/{id}` and once under the reverse key
//! `{tenant}/{type}/{id}/{formation}`, so both "members of a formation" and
//! "formations of a resource" are prefix scans.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. redb serializes write transactions,
//! which is what keeps concurrent assign/unassign of one pair consistent.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;

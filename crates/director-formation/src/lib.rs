//! Director formation engine — guards and views over formation membership.
//!
//! This crate holds the decisions made on top of `director-state`: whether a
//! resource may be removed while it is a formation member, and which
//! applications a runtime can see. It does NOT own storage; every decision
//! runs over data read from (or inside a transaction of) the `StateStore`.
//!
//! # Components
//!
//! - **`guard`**: Deletion guard state machine (unregister / unpair)
//! - **`visibility`**: Runtime application visibility and name normalization
//! - **`page`**: Cursor pagination
//! - **`service`**: `Director` facade used by the API

pub mod guard;
pub mod page;
pub mod service;
pub mod visibility;

pub use guard::{DeletionKind, DeletionRequest, GuardPhase, deletion_guard};
pub use page::{Page, PageInfo, PageRequest, paginate};
pub use service::Director;
pub use visibility::VisibilityResolver;

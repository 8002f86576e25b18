//! # Tether Engine
//!
//! The pure, deterministic core of the Tether client SDK.
//!
//! Tether mirrors server-stored records locally, tracks field-level
//! mutations made while offline, and persists whole graphs of interlinked
//! records with a minimal, conflict-free set of wire operations. This
//! crate holds everything that can be computed without a network: the
//! value model, the operation algebra, the per-record ledger, and the
//! dependency planner. The asynchronous orchestration lives in
//! `tether-client`.
//!
//! ## Design Principles
//!
//! - **No IO**: the engine has no knowledge of transports or platforms
//! - **Deterministic**: the same mutations always produce the same
//!   operation set and the same save plan
//! - **Typed**: fields are a closed [`Value`] sum type read through typed
//!   accessors; there is no reflection and no runtime casting
//! - **Explicit context**: records live in a [`Context`] threaded through
//!   every call; there is no ambient global state
//!
//! ## Core Concepts
//!
//! ### Records and the ledger
//!
//! A [`Record`] mirrors one server entity. Mutating a field routes an
//! [`Operation`] through the record's [`Ledger`], which merges it with
//! whatever is already queued for that field under a per-field reducer
//! policy, then applies the result optimistically to the in-memory field
//! table. Nothing touches the network; the ledger is the minimal
//! replayable set of what must eventually be sent.
//!
//! ### Reducers
//!
//! Each field is governed by one [`reducer`](crate::reducer) policy:
//! scalars collapse last-write-wins, numbers fuse arithmetically
//! (`Increment(5)` then `Increment(3)` becomes `Increment(8)`), arrays
//! and relations keep their full submission-ordered history because their
//! operations do not commute.
//!
//! ### Save planning
//!
//! [`graph::plan`] turns a root record set into a [`graph::SavePlan`]:
//! waves of newborn orphans that need identities first, then the final
//! dependency-ordered batch. A cycle of mutually-referencing newborn
//! records fails with [`Error::Inconsistency`] before any network call.
//!
//! ## Quick Start
//!
//! ```rust
//! use tether_engine::{Context, Value};
//!
//! let ctx = Context::new();
//! let player = ctx.create("player");
//! player.set("name", "Ari").unwrap();
//! player.increment("score", 10.0).unwrap();
//! player.increment("score", 5.0).unwrap();
//!
//! // Optimistic state reflects both increments...
//! assert_eq!(player.get("score"), Some(Value::Number(15.0)));
//! // ...but they fused into a single wire operation.
//! assert_eq!(player.operation_tables().len(), 1);
//! ```

pub mod error;
pub mod graph;
pub mod identity;
pub mod ledger;
pub mod operation;
pub mod path;
pub mod record;
pub mod reducer;
pub mod value;

// Re-export main types at crate root
pub use error::{Error, Result};
pub use graph::SavePlan;
pub use identity::{LocalIdSource, UuidSource};
pub use ledger::Ledger;
pub use operation::{FieldPath, OpKind, Operation};
pub use record::{Context, Record, ServerDelta};
pub use reducer::{Reducer, ReducerKind};
pub use value::{RecordRef, Value};

/// Type aliases for clarity
pub type LocalId = String;
pub type ServerId = String;
pub type ClassName = String;
pub type FieldName = String;

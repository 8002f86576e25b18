//! # Tether Client
//!
//! The asynchronous orchestration shell of the Tether SDK.
//!
//! `tether-engine` decides *what* must be sent — the minimal operation
//! set and the dependency-ordered save plan. This crate decides *how* it
//! is sent: it encodes operations into batch envelopes, drives the staged
//! persistence of newborn orphans, merges server results back into
//! records, and exposes a cancellation contract over the whole sequence.
//!
//! Network mechanics stay outside: the coordinator talks to a
//! [`Transport`] trait object and never opens a connection itself.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tether_client::{BatchCoordinator, Transport};
//! use tether_engine::Context;
//!
//! async fn run(transport: Arc<dyn Transport>) -> tether_client::Result<()> {
//!     let coordinator = BatchCoordinator::new(transport);
//!     let ctx = Context::new();
//!
//!     let author = ctx.create("author");
//!     author.set("name", "Ari")?;
//!     let post = ctx.create("post");
//!     post.set("title", "Hello")?;
//!     post.set_pointer("author", &author)?;
//!
//!     // Saves author first (the post needs its identity), then the post.
//!     coordinator.save(&[post]).await
//! }
//! ```

pub mod batch;
pub mod config;
pub mod error;
pub mod handle;
pub mod transport;
pub mod wire;

// Re-export main types at crate root
pub use batch::{BatchCoordinator, Persistable};
pub use config::CoordinatorConfig;
pub use error::{Error, Result};
pub use handle::{SequenceHandle, SingleHandle};
pub use transport::{SubRequest, Transport, TransportError};

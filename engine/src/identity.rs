//! Local id generation.
//!
//! Every record carries a process-unique local id from the moment it is
//! created. The id doubles as the cross-reference key inside a batch
//! envelope when a newborn record is referenced before the server has
//! assigned it a real identity.

use crate::LocalId;
use uuid::Uuid;

/// Supplies process-unique temporary ids for newborn records.
pub trait LocalIdSource: Send + Sync {
    /// Produce the next id. Must never repeat within a process.
    fn next_id(&self) -> LocalId;
}

/// Default UUID v4 backed id source.
#[derive(Debug, Default)]
pub struct UuidSource;

impl LocalIdSource for UuidSource {
    fn next_id(&self) -> LocalId {
        Uuid::new_v4().simple().to_string()
    }
}

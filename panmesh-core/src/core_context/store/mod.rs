/*
    Store subsystem - Context persistence layer
*/

pub mod change_log;
pub mod context_store;
pub mod errors;

pub use change_log::{ChangeLog, ChangeLogEntry};
pub use context_store::SharedContextStore;
pub use errors::*;

/*
    Model subsystem - Data structures for shared contexts
*/

pub mod types;
pub mod entity;
pub mod context;

pub use types::*;
pub use entity::*;
pub use context::*;

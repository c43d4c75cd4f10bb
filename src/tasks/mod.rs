//! Task queue core — data model, authoritative store, REST surface, and
//! the live change stream.

pub mod model;
pub mod routes;
pub mod store;
pub mod ws;

pub use model::{ItemStatus, Scope, Task, TaskItem, TaskStatus, TaskStreamMessage};
pub use store::TaskStore;

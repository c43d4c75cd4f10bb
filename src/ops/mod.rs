//! Built-in operation handlers for local file management.
//!
//! Network-backed operations (metadata scraping, watch-history sync)
//! plug in through the same [`OperationHandler`] contract but live
//! outside this crate.
//!
//! [`OperationHandler`]: crate::worker::OperationHandler

pub mod delete;
pub mod rename;

pub use delete::DeleteHandler;
pub use rename::RenameHandler;

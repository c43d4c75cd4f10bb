//! Curator — background task engine and live sync for a media library.

pub mod config;
pub mod error;
pub mod ops;
pub mod sync;
pub mod tasks;
pub mod worker;

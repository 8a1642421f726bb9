//! Ayia change-stream watcher.

pub mod args;

pub use args::Args;

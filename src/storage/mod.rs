//! Storage layer.
//!
//! SQLite-based persistence for the sync queue.

mod database;
mod migrations;

pub use database::Database;

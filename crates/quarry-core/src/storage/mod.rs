//! # Storage Module
//!
//! Durable backing store for cached materializations.

pub mod redb_store;

pub use redb_store::DurableStore;

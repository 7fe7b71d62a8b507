//! WhatsGate Storage - Record storage abstraction
//!
//! This crate provides the records WhatsGate persists (accounts, messages,
//! templates, recipient lists, campaigns, contacts, keyword replies and the
//! webhook delivery log) behind repository traits, with a PostgreSQL
//! implementation and an in-memory one.

pub mod db;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use models::*;
pub use repository::*;

//! # streak-store
//!
//! Durable local storage for the score sync engine, backed by SQLite.
//!
//! The crate exposes a synchronous `Database` handle that wraps a
//! `rusqlite::Connection` and provides typed helpers for the outbox, the
//! local score cache, cached groups, the active-group selection and queued
//! membership operations. Callers that share it across tasks wrap it in a
//! mutex; every helper is short and never awaits.

pub mod database;
pub mod groups;
pub mod migrations;
pub mod models;
pub mod outbox;
pub mod scores;

mod error;

pub use database::Database;
pub use error::{Result, StoreError};
pub use models::*;

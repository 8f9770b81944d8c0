//! # streak-shared
//!
//! Types shared by the sync engine, the local store and the reference
//! backend: the record model, the error taxonomy, the join-code codec and
//! the wire DTOs exchanged over HTTP.

pub mod collections;
pub mod constants;
pub mod error;
pub mod invite;
pub mod models;
pub mod protocol;
pub mod types;

pub use error::{ErrorKind, SyncError, SyncResult};
pub use invite::{InviteError, JoinCode};
pub use models::*;
pub use types::{DateInt, GameId, UserId};

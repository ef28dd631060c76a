//! `tremplin-store` — SQLite persistence for the SIAE referential.
//!
//! The sync engine never touches the store directly: a run loads a snapshot,
//! plans a command log against it, and a wet run replays that log here.
//! Convention deletion cascades its annexes inside one statement; every
//! command runs in its own transaction, so a crash leaves a clean prefix of
//! the log applied — harmless, since a rerun plans only what is missing.

mod schema;
mod store;

pub use schema::SCHEMA;
pub use store::{Store, StoreError};

//! `tremplin-config` — sync settings.
//!
//! The business constants of the reconciliation engine (deactivation
//! threshold, grace windows) are undocumented on the ASP side and were
//! settled with the support team; they live here as named, overridable
//! settings rather than hard-coded invariants.

pub mod settings;

pub use settings::{ConfigError, SyncSettings};

//! `tremplin-sync` — reconciliation engine for the ASP fluxIAE export pair.
//!
//! Pure engine crate: receives pre-parsed export rows and an in-memory
//! snapshot of the referential, returns a command log plus a run report.
//! No store access; persistence replays the command log.
//!
//! The engine diffs the "Vue Structure" and "Vue AF" exports against the
//! live structures / conventions / financial annexes and decides what to
//! create, update, deactivate, or delete. Decisions only key off
//! already-materialized content (existence of an annex number, of an
//! (asp_id, kind) pair), which makes a rerun against the same export pair a
//! no-op.

pub mod command;
pub mod convention;
pub mod engine;
pub mod error;
pub mod financial_annex;
pub mod geo;
pub mod loader;
pub mod notify;
pub mod report;
pub mod state;
pub mod structure;
pub mod vue_af;
pub mod vue_structure;

pub use command::Command;
pub use engine::{run, SyncContext, SyncInput, SyncOutcome};
pub use error::SyncError;
pub use geo::{Geocoded, Geocoder, NoGeocoder};
pub use notify::{ActivationEmail, Mailer, NullMailer};
pub use report::SyncReport;
pub use state::State;

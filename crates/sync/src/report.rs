use serde::Serialize;

/// Per-run tally of everything the engine decided, plus the fatal data
/// inconsistencies that need a human.
///
/// Fatal entries are counted and reported once, at the end of the run; they
/// make the exit status non-zero but never abort the run (assertions do).
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub structures_created: usize,
    pub structures_updated: usize,
    pub structures_converted: usize,
    pub structures_deleted: usize,
    pub structures_deletion_skipped: usize,
    pub conventions_created: usize,
    pub conventions_updated: usize,
    pub conventions_reactivated: usize,
    pub conventions_deactivated: usize,
    pub conventions_deleted: usize,
    pub annexes_created: usize,
    pub annexes_updated: usize,
    pub annexes_relinked: usize,
    pub annexes_deleted: usize,

    /// Export rows skipped because the secure signup flow cannot be
    /// bootstrapped without a contact email. Expected, not an error.
    pub rows_without_auth_email: usize,
    /// Annex candidates dropped because no convention exists for their key.
    /// An orphan annex has no business value; expected, not an error.
    pub annex_orphans_dropped: usize,
    /// Staff-created structures still inside their grace window, waiting for
    /// ASP data to confirm them.
    pub staff_created_recent: usize,
    /// User-created structures without a convention (technical debt, only
    /// surfaced).
    pub user_created_without_convention: usize,
    /// Set when the deactivation wave was aborted by the safety threshold.
    pub deactivation_batch_aborted: bool,

    pub fatal: Vec<String>,
}

impl SyncReport {
    pub fn fatal_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{message}");
        self.fatal.push(message);
    }

    pub fn fatal_errors(&self) -> usize {
        self.fatal.len()
    }

    /// Total mutations decided this run. Zero on the second run against the
    /// same export pair.
    pub fn mutations(&self) -> usize {
        self.structures_created
            + self.structures_updated
            + self.structures_converted
            + self.structures_deleted
            + self.conventions_created
            + self.conventions_updated
            + self.conventions_reactivated
            + self.conventions_deactivated
            + self.conventions_deleted
            + self.annexes_created
            + self.annexes_updated
            + self.annexes_relinked
            + self.annexes_deleted
    }
}

impl std::fmt::Display for SyncReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "structures:  {} created, {} updated, {} converted, {} deleted, {} deletions skipped",
            self.structures_created,
            self.structures_updated,
            self.structures_converted,
            self.structures_deleted,
            self.structures_deletion_skipped,
        )?;
        writeln!(f, "conventions: {} created, {} updated, {} reactivated, {} deactivated, {} deleted",
            self.conventions_created,
            self.conventions_updated,
            self.conventions_reactivated,
            self.conventions_deactivated,
            self.conventions_deleted,
        )?;
        writeln!(f, "annexes:     {} created, {} updated, {} relinked, {} deleted",
            self.annexes_created,
            self.annexes_updated,
            self.annexes_relinked,
            self.annexes_deleted,
        )?;
        writeln!(f, "skipped:     {} rows without auth email, {} orphan annex candidates, {} recent staff-created",
            self.rows_without_auth_email,
            self.annex_orphans_dropped,
            self.staff_created_recent,
        )?;
        if self.user_created_without_convention > 0 {
            writeln!(
                f,
                "{} user created structures still have no convention (technical debt)",
                self.user_created_without_convention
            )?;
        }
        if self.deactivation_batch_aborted {
            writeln!(f, "deactivation batch ABORTED by safety threshold")?;
        }
        if self.fatal.is_empty() {
            write!(f, "fatal errors: 0")
        } else {
            writeln!(f, "fatal errors: {}", self.fatal.len())?;
            for (i, message) in self.fatal.iter().enumerate() {
                if i > 0 {
                    writeln!(f)?;
                }
                write!(f, "  - {message}")?;
            }
            Ok(())
        }
    }
}

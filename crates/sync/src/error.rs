use std::fmt;

#[derive(Debug)]
pub enum SyncError {
    /// Corrupt input or a logic defect, not ordinary business variance.
    /// Aborts the run immediately; nothing is persisted past it.
    Assertion(String),
    /// Missing required column in an export file.
    MissingColumn { file: &'static str, column: &'static str },
    /// A field of an export row failed to parse.
    FieldParse {
        file: &'static str,
        record: String,
        field: &'static str,
        value: String,
    },
    /// CSV-level read error.
    Csv { file: &'static str, message: String },
}

impl SyncError {
    pub fn assertion(msg: impl Into<String>) -> Self {
        Self::Assertion(msg.into())
    }
}

impl fmt::Display for SyncError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Assertion(msg) => write!(f, "assertion failed: {msg}"),
            Self::MissingColumn { file, column } => {
                write!(f, "{file}: missing column '{column}'")
            }
            Self::FieldParse { file, record, field, value } => {
                write!(f, "{file}, record '{record}': cannot parse {field} '{value}'")
            }
            Self::Csv { file, message } => write!(f, "{file}: {message}"),
        }
    }
}

impl std::error::Error for SyncError {}

/// Bail out with [`SyncError::Assertion`] when a data-integrity condition
/// does not hold.
macro_rules! ensure {
    ($cond:expr, $($arg:tt)*) => {
        if !$cond {
            return Err($crate::error::SyncError::Assertion(format!($($arg)*)));
        }
    };
}
pub(crate) use ensure;

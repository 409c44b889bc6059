//! Error type for database decoding.

use thiserror::Error;

/// Everything that can go wrong while decoding a database file.
///
/// Only [`DbError::Io`] and [`DbError::Format`] abort a run; the other variants
/// describe a single page, cell or chain link that the caller skips.
#[derive(Error, Debug)]
pub enum DbError {
    /// The file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The database header violates the file format.
    #[error("invalid database header: {0}")]
    Format(String),

    /// A page number outside the file was requested.
    #[error("page {page} out of range (database has {page_count} pages)")]
    PageOutOfRange { page: u32, page_count: u32 },

    /// A decode step ran past the available bytes.
    #[error("truncated data: {0}")]
    Truncated(String),

    /// A structure points out of bounds, cycles or has an impossible value.
    #[error("corrupt structure: {0}")]
    Corrupt(String),
}

impl DbError {
    /// Whether this error should abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DbError::Io(_) | DbError::Format(_))
    }
}

pub type Result<T> = std::result::Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_io_and_format_are_fatal() {
        let io = DbError::Io(std::io::Error::new(std::io::ErrorKind::NotFound, "gone"));
        assert!(io.is_fatal());
        assert!(DbError::Format("page size 3".into()).is_fatal());
        assert!(!DbError::PageOutOfRange { page: 9, page_count: 2 }.is_fatal());
        assert!(!DbError::Truncated("varint".into()).is_fatal());
        assert!(!DbError::Corrupt("cycle".into()).is_fatal());
    }

    #[test]
    fn range_error_names_the_page() {
        let err = DbError::PageOutOfRange { page: 9, page_count: 2 };
        assert_eq!(err.to_string(), "page 9 out of range (database has 2 pages)");
    }
}

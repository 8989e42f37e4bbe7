use thiserror::Error;

/// All errors that can occur while building, mutating, reading or writing catalogs.
#[derive(Debug, Error)]
pub enum Error {
    /// A field name, reader tag, archive id or record id could not be found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Two schemas that had to agree do not.
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    /// A record id or field name is already in use.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    /// Sequence access outside `0..len` (or `0..=len` for insertion).
    #[error("index {index} out of range for length {len}")]
    Index { index: usize, len: usize },
    /// A structurally invalid operation, such as mutating a frozen schema.
    #[error("logic error: {0}")]
    Logic(String),
    /// A key was requested with a type that does not match the field.
    #[error("field '{name}' has type {found}, not {expected}")]
    TypeMismatch {
        name: String,
        expected: String,
        found: String,
    },
    /// An operation whose preconditions depend on runtime state, such as
    /// building a column view over non-contiguous records.
    #[error("runtime error: {0}")]
    Runtime(String),
    /// Malformed FITS data: bad header, missing mandatory keyword, unreadable archive.
    #[error("invalid FITS data: {0}")]
    Format(String),
    /// An I/O error from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    pub(crate) fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub(crate) fn logic(msg: impl Into<String>) -> Self {
        Error::Logic(msg.into())
    }

    pub(crate) fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_not_found() {
        let e = Error::NotFound("field 'flux'".into());
        assert_eq!(e.to_string(), "not found: field 'flux'");
    }

    #[test]
    fn display_index() {
        let e = Error::Index { index: 3, len: 3 };
        assert_eq!(e.to_string(), "index 3 out of range for length 3");
    }

    #[test]
    fn display_type_mismatch() {
        let e = Error::TypeMismatch {
            name: "flux".into(),
            expected: "F32".into(),
            found: "F64".into(),
        };
        assert_eq!(e.to_string(), "field 'flux' has type F64, not F32");
    }

    #[test]
    fn display_format() {
        let e = Error::format("missing NAXIS2");
        assert_eq!(e.to_string(), "invalid FITS data: missing NAXIS2");
    }

    #[test]
    fn io_error_from_conversion() {
        let io_err = std::io::Error::other("oops");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
    }

    #[test]
    fn std_error_source() {
        use std::error::Error as StdError;

        let e = Error::logic("frozen");
        assert!(e.source().is_none());

        let e = Error::Io(std::io::Error::other("inner"));
        assert!(e.source().is_some());
    }
}

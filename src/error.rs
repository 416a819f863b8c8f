use std::error;
use std::fmt;




#[derive(Debug, Clone, PartialEq)]

/**
 * Error raised by the tree, the field layout, or the boundary exchange. Each
 * variant carries a diagnostic naming the offending node, block, or field.
 */
pub enum Error {
    /// Operation invoked in the wrong lifecycle state.
    State(String),
    /// Cell counts or resample ratios of two neighbors are inconsistent.
    LayoutMismatch(String),
    /// Non-positive extents requested for a field store.
    Allocation(String),
    /// Neighbor asymmetry, parentage violation, or a stale node handle.
    TreeInvariant(String),
    /// The requested operation is not defined for the data's precision.
    Unsupported(String),
    /// A peer disconnected or sent a message that could not be decoded.
    Transport(String),
    /// A configuration value is out of range or could not be decoded.
    Config(String),
}




// ============================================================================
impl fmt::Display for Error {
    fn fmt(&self, fmt: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        use Error::*;

        match self {
            State(msg)          => write!(fmt, "invalid state: {}", msg),
            LayoutMismatch(msg) => write!(fmt, "layout mismatch: {}", msg),
            Allocation(msg)     => write!(fmt, "allocation error: {}", msg),
            TreeInvariant(msg)  => write!(fmt, "tree invariant violated: {}", msg),
            Unsupported(msg)    => write!(fmt, "unsupported operation: {}", msg),
            Transport(msg)      => write!(fmt, "transport failure: {}", msg),
            Config(msg)         => write!(fmt, "bad configuration: {}", msg),
        }
    }
}

impl error::Error for Error {}




// ============================================================================
#[cfg(test)]
mod test {

    use super::Error;

    #[test]
    fn error_display_names_the_kind_and_the_subject() {
        let e = Error::LayoutMismatch("field 'density' 4 vs 6".to_string());
        assert_eq!(e.to_string(), "layout mismatch: field 'density' 4 vs 6");
    }
}

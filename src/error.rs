/// Represents errors that can occur when building or probing a table.
///
/// Every variant is a programmer error or a resource limit; there are no
/// recoverable mid-probe failures. A failed operation leaves the table
/// unmodified.
#[derive(Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum Error {
    /// A precondition on the arguments was violated (mismatched slice
    /// lengths, load factor outside `(0, 1)`)
    InvalidArgument(&'static str),

    /// Allocating the backing buffer failed
    OutOfMemory,

    /// The 31-bit identifier space would be exhausted
    Overflow,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(reason) => write!(f, "invalid argument: {reason}"),
            Self::OutOfMemory => write!(f, "table allocation failed"),
            Self::Overflow => write!(f, "identifier space exhausted"),
        }
    }
}

impl std::error::Error for Error {}

/// Table result
pub type Result<T> = std::result::Result<T, Error>;

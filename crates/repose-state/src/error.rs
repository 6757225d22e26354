use std::error::Error as StdError;

pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// A typed accessor was wrapped around a cell holding another type.
    #[error("state type mismatch for {key}: expected {expected}, found {found}")]
    TypeMismatch {
        key: String,
        expected: &'static str,
        found: &'static str,
    },

    /// A custom policy was built without an equivalence function.
    #[error("custom mutation policy is missing its comparison function")]
    MissingComparison,

    /// The calculation of a derived state failed.
    #[error("derived calculation failed: {0}")]
    Calculation(#[source] BoxError),

    /// A derived state was read from inside its own calculation.
    #[error("derived state read itself during its own calculation")]
    Cycle,
}

pub type Result<T, E = StateError> = std::result::Result<T, E>;

//! Error types for trialtree
//!
//! Every structural failure is a configuration problem and is raised eagerly,
//! while the experiment hierarchy is being built, never during data
//! generation.

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Configuration errors raised while building designs, trees, or sections
#[derive(Error, Debug)]
pub enum Error {
    /// A continuous IV (no declared values) needs a design matrix to supply
    /// concrete values
    #[error("IV `{iv}` declares no values; IVs without values are only allowed when a design matrix is given")]
    ContinuousIv {
        /// Name of the offending IV
        iv: String,
    },

    /// Design matrix width does not match the number of declared IVs
    #[error("design matrix has {columns} column(s) but {ivs} IV(s) are declared")]
    MatrixColumns {
        /// Number of declared IVs
        ivs: usize,
        /// Number of matrix columns
        columns: usize,
    },

    /// A design matrix column codes a different number of distinct values
    /// than its IV declares
    #[error("design matrix column for IV `{iv}` has {distinct} distinct code(s) but the IV declares {declared} value(s)")]
    MatrixCodes {
        /// Name of the IV the column belongs to
        iv: String,
        /// Number of declared IV values
        declared: usize,
        /// Number of distinct codes found in the column
        distinct: usize,
    },

    /// A non-atomic ordering surfaced a synthetic IV at the top of a tree
    #[error("non-atomic ordering at the top level of a design tree (synthetic IV `{iv}` has no level above to receive it)\nInsert a level with no IVs above it to absorb the synthetic IV")]
    NonAtomicAtTop {
        /// Name of the synthetic IV with nowhere to go
        iv: String,
    },

    /// Designs declared in sequence at one level disagree on the level name
    #[error("designs at the same level must share one name: expected `{expected}`, found `{found}`")]
    LevelNameMismatch {
        /// Name declared by the first design of the sequence
        expected: String,
        /// Conflicting name declared later in the sequence
        found: String,
    },

    /// An ordering specification named a kind the registry does not know
    #[error("unknown ordering kind `{0}`")]
    UnknownOrdering(String),

    /// A heterogeneous design referenced a branch with no matching subtree
    #[error("no design tree available for branch `{0}`")]
    UnknownBranch(String),

    /// A structured specification could not be interpreted
    #[error("invalid specification: {0}")]
    Spec(String),

    /// Any other configuration problem
    #[error("{0}")]
    Config(String),
}

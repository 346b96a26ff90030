//! The error taxonomy shared by graph construction, schedule validation,
//! bounds inference, lowering and the reference interpreter.
//!
//! Every variant names the function or variable at fault, so a failing
//! schedule directive or graph edge can be located without re-deriving
//! internal state.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("function `{func}` already has a pure definition")]
    DuplicateDefinition { func: String },

    #[error("`{referenced_by}` refers to function `{func}`, which is not defined")]
    UnknownFunction { func: String, referenced_by: String },

    #[error("cyclic dependency between functions: {}", path.join(" -> "))]
    CyclicDependency { path: Vec<String> },

    #[error("`{caller}` calls `{callee}` with {actual} indices, but it has {expected} dimensions")]
    AccessArityMismatch {
        caller: String,
        callee: String,
        expected: usize,
        actual: usize,
    },

    #[error("function `{func}` has no variable named `{var}`")]
    UnknownVariable { func: String, var: String },

    #[error("cannot split `{var}` of `{func}` by non-positive factor {factor}")]
    InvalidSplit { func: String, var: String, factor: i64 },

    #[error(
        "reorder of `{func}` lists [{}] but its current variables are [{}]",
        actual.join(", "), expected.join(", ")
    )]
    ReorderArityMismatch {
        func: String,
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("storage for `{func}` at {store} does not enclose its use at {compute}")]
    InvalidStorageNesting {
        func: String,
        store: String,
        compute: String,
    },

    #[error("`{func}` is scheduled at `{host}.{dim}`, but `{host}` is inlined")]
    InlinedHost { func: String, host: String, dim: String },

    #[error("vector loop over `{var}` of `{func}` must have a constant extent")]
    NonConstantVectorExtent { func: String, var: String },

    #[error("`{func}` is an output or has update definitions, so it cannot be inlined")]
    CannotInline { func: String },

    #[error("no finite interval can be derived for `{var}`")]
    UnboundedInterval { var: String },

    #[error("required region of `{func}` is empty along `{var}`")]
    EmptyRegion { func: String, var: String },

    #[error("storage for `{func}` is shared between iterations of parallel loop `{var}`")]
    RaceHazard { func: String, var: String },

    #[error("function `{func}` has no declared output bound")]
    MissingOutputBound { func: String },

    #[error("no binding supplied for `{name}`")]
    MissingBinding { name: String },

    #[error("access to `{buffer}` at {indices:?} is out of bounds")]
    OutOfBounds { buffer: String, indices: Vec<i64> },

    #[error("division by zero while evaluating a definition")]
    DivisionByZero,
}
